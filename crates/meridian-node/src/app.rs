use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use meridian_consensus::{
    AmendmentTable, ConsensusParms, ConsensusRound, FeeVote, Proposal, RoundPhase, UnlConfig,
    Validation, Validations,
};
use meridian_core::types::{Hash256, NodeId};
use meridian_crypto::keys::{KeyType, Keypair, Seed};
use meridian_jobs::{JobQueue, JobType, TimeKeeper};
use meridian_ledger::{GenesisConfig, Ledger};
use meridian_nodestore::{MemoryStore, NodeObjectType, NodeStore, SledStore};
use meridian_protocol::tx::Transaction;
use meridian_shamap::ShaMapNodeId;
use meridian_tx::{build_ledger, LocalTxs};

use crate::config::Config;
use crate::messages::{LedgerInfoType, PeerMessage};
use crate::pending_saves::PendingSaves;

/// The assembled node: every long-lived component, owned top-down, wired
/// through explicit handles — no ambient globals. Construction order is
/// prepare → start; stop unwinds in reverse.
pub struct Application {
    config: Config,
    timekeeper: Arc<TimeKeeper>,
    jobs: Mutex<Option<JobQueue>>,
    store: Arc<dyn NodeStore>,
    pending_saves: Arc<PendingSaves>,

    validator_key: Option<Arc<Keypair>>,
    validations: Arc<Mutex<Validations>>,
    amendments: Arc<Mutex<AmendmentTable>>,
    fee_vote: FeeVote,

    /// Last closed ledger; the chain's authoritative tip.
    ledger: Arc<Mutex<Ledger>>,
    round: Arc<Mutex<Option<ConsensusRound>>>,
    /// Candidate transactions for the open ledger, by id.
    open_txs: Arc<Mutex<HashMap<Hash256, Transaction>>>,
    local_txs: Arc<Mutex<LocalTxs>>,

    outbound: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    stopping: Arc<AtomicBool>,
    /// Consecutive ledgers that tripped the invariant checker.
    invariant_strikes: AtomicUsize,
    /// Millisecond clock for consensus ticks, advanced by the heartbeat.
    tick_ms: Mutex<u64>,
}

impl Application {
    /// Build all components from configuration. Nothing runs yet.
    pub fn prepare(config: Config) -> anyhow::Result<Application> {
        let store: Arc<dyn NodeStore> = match config.node_db.backend.as_str() {
            "memory" => Arc::new(MemoryStore::new()),
            _ => {
                let path = config.database_path.join(&config.node_db.path);
                Arc::new(SledStore::open(path)?)
            }
        };

        let validator_key = match &config.validator_seed {
            Some(seed) => {
                let seed = Seed::from_base58(seed)
                    .map_err(|e| anyhow::anyhow!("validator_seed: {e}"))?;
                Some(Arc::new(Keypair::from_seed(KeyType::Secp256k1, &seed)?))
            }
            None => None,
        };

        let trusted: Vec<NodeId> = config
            .validators
            .iter()
            .filter_map(|s| {
                meridian_core::types::base58_decode(
                    meridian_core::types::TokenType::NodePublic,
                    s,
                )
                .ok()
                .map(|raw| NodeId::from_bytes(meridian_crypto::hash::hash160(&raw).0))
            })
            .collect();
        let unl = UnlConfig::new(trusted);

        let master = validator_key
            .as_ref()
            .map(|kp| kp.account_id())
            .unwrap_or_default();
        let genesis = GenesisConfig::new(master)
            .with_amendments(config.feature_ids())
            .build();
        info!(seq = genesis.seq(), "genesis ledger constructed");

        let mut amendments = AmendmentTable::default();
        for veto in config.veto_ids() {
            amendments.veto(veto);
        }

        let fee_vote = FeeVote::new(config.fee_default);
        let app = Application {
            timekeeper: Arc::new(TimeKeeper::new()),
            jobs: Mutex::new(Some(JobQueue::new(4))),
            store,
            pending_saves: Arc::new(PendingSaves::new()),
            validator_key,
            validations: Arc::new(Mutex::new(Validations::new(unl, 300))),
            amendments: Arc::new(Mutex::new(amendments)),
            fee_vote,
            ledger: Arc::new(Mutex::new(genesis)),
            round: Arc::new(Mutex::new(None)),
            open_txs: Arc::new(Mutex::new(HashMap::new())),
            local_txs: Arc::new(Mutex::new(LocalTxs::new())),
            outbound: Mutex::new(None),
            stopping: Arc::new(AtomicBool::new(false)),
            invariant_strikes: AtomicUsize::new(0),
            tick_ms: Mutex::new(0),
            config,
        };
        app.start_round();
        Ok(app)
    }

    pub fn timekeeper(&self) -> &Arc<TimeKeeper> {
        &self.timekeeper
    }

    pub fn last_closed(&self) -> (Hash256, u32) {
        let mut ledger = self.ledger.lock();
        (ledger.hash(), ledger.seq())
    }

    /// Read-only access to the last closed ledger.
    pub fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.ledger.lock())
    }

    /// Begin the message pump and the consensus heartbeat. Returns the
    /// stream of messages this node wants broadcast.
    pub fn start(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<PeerMessage>,
    ) -> mpsc::UnboundedReceiver<PeerMessage> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(out_tx);
        if self.round.lock().is_none() {
            self.start_round();
        }

        // Peer message pump.
        let pump = self.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if pump.stopping.load(Ordering::SeqCst) {
                    break;
                }
                pump.on_message(message);
            }
        });

        // Consensus heartbeat at ledger granularity.
        let beat = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(1000));
            loop {
                interval.tick().await;
                if beat.stopping.load(Ordering::SeqCst) {
                    break;
                }
                let now_ms = {
                    let mut tick = beat.tick_ms.lock();
                    *tick += 1000;
                    *tick
                };
                beat.heartbeat_at(now_ms);
            }
        });

        out_rx
    }

    /// Cooperative shutdown, reverse of construction.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        *self.outbound.lock() = None;
        if let Some(jobs) = self.jobs.lock().take() {
            jobs.stop();
        }
        info!("node stopped");
    }

    // ── Local submission ────────────────────────────────────────────────────

    /// Accept a locally-submitted transaction into the open set.
    pub fn submit(&self, tx: Transaction) -> bool {
        if !tx.check_signature() {
            return false;
        }
        let id = tx.tx_id();
        {
            let mut round = self.round.lock();
            if let Some(round) = round.as_mut() {
                round.add_candidate(id);
            }
        }
        let seq = self.ledger.lock().seq();
        self.local_txs.lock().push(tx.clone(), seq);
        self.open_txs.lock().insert(id, tx.clone());
        self.broadcast(PeerMessage::Transaction(tx.to_bytes()));
        true
    }

    // ── Message dispatch ────────────────────────────────────────────────────

    pub fn on_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::Hello {
                version, timestamp, ..
            } => {
                if !self.timekeeper.in_tolerance(timestamp) {
                    warn!(version, "peer clock outside tolerance");
                }
            }
            PeerMessage::ProposeSet(proposal) => self.on_proposal(proposal),
            PeerMessage::Validation(validation) => self.on_validation(validation),
            PeerMessage::Transaction(raw) => match Transaction::parse(&raw) {
                Ok(tx) if tx.check_signature() => {
                    let id = tx.tx_id();
                    if let Some(round) = self.round.lock().as_mut() {
                        round.add_candidate(id);
                    }
                    self.open_txs.lock().insert(id, tx);
                }
                _ => debug!("dropped undecodable or unsigned transaction"),
            },
            PeerMessage::GetLedger {
                ledger_hash,
                info_type,
                node_ids,
            } => self.serve_ledger_data(ledger_hash, info_type, node_ids),
            PeerMessage::LedgerData { nodes, .. } => {
                debug!(count = nodes.len(), "ledger data received");
            }
            PeerMessage::StatusChange {
                ledger_seq, ..
            } => {
                debug!(peer_seq = ledger_seq, "peer status");
            }
            PeerMessage::HaveSet(hash) => {
                debug!(set = %hash, "peer advertises tx set");
            }
        }
    }

    fn on_proposal(&self, proposal: Proposal) {
        let now = self.timekeeper.now();
        let mut round = self.round.lock();
        if let Some(round) = round.as_mut() {
            round.on_proposal(proposal, now);
        }
    }

    fn on_validation(&self, validation: Validation) {
        let now = self.timekeeper.now();
        let outcome = self.validations.lock().add(validation, now);
        debug!(?outcome, "validation processed");
    }

    fn serve_ledger_data(
        &self,
        ledger_hash: Hash256,
        info_type: LedgerInfoType,
        node_ids: Vec<ShaMapNodeId>,
    ) {
        let mut ledger = self.ledger.lock();
        if ledger.hash() != ledger_hash {
            return;
        }
        let map = match info_type {
            LedgerInfoType::TxNode => ledger.tx_map(),
            LedgerInfoType::AsNode => ledger.state_map(),
            LedgerInfoType::Base => return,
        };
        let mut nodes = Vec::new();
        let wanted = if node_ids.is_empty() {
            vec![ShaMapNodeId::ROOT]
        } else {
            node_ids
        };
        for id in wanted {
            if let Ok((wire, children)) = map.serve_fanout(&id) {
                nodes.push((id, wire));
                for (child_id, _, child_wire) in children {
                    nodes.push((child_id, child_wire));
                }
            }
        }
        drop(ledger);
        self.broadcast(PeerMessage::LedgerData {
            ledger_hash,
            info_type,
            nodes,
        });
    }

    // ── Consensus driving ───────────────────────────────────────────────────

    fn start_round(&self) {
        let (prev_hash, prev_close, resolution) = {
            let mut ledger = self.ledger.lock();
            (
                ledger.hash(),
                ledger.close_time(),
                ledger.close_resolution(),
            )
        };
        let keypair = match &self.validator_key {
            // Non-validators still track rounds with a throwaway key; their
            // proposals are simply never trusted.
            Some(kp) => kp.as_ref().clone(),
            None => Keypair::random(KeyType::Secp256k1),
        };
        let now_ms = *self.tick_ms.lock();
        let mut round = ConsensusRound::new(
            ConsensusParms::default(),
            keypair,
            prev_hash,
            prev_close,
            resolution,
            None,
            now_ms,
        );
        for id in self.open_txs.lock().keys() {
            round.add_candidate(*id);
        }
        *self.round.lock() = Some(round);
        debug!(prev = %prev_hash, "consensus round opened");
    }

    /// One consensus tick at `now_ms`. Public so a harness can drive time.
    pub fn heartbeat_at(&self, now_ms: u64) {
        let now_net = self.timekeeper.now();
        let proposal = {
            let mut round = self.round.lock();
            let Some(active) = round.as_mut() else {
                return;
            };
            let proposal = active.on_timer(now_ms, now_net);
            match active.phase() {
                RoundPhase::Accepted => {
                    let result = active.result().cloned().expect("accepted rounds have results");
                    drop(round);
                    self.close_ledger(result.tx_set, result.close_time, result.close_time_agree);
                    self.start_round();
                    return;
                }
                RoundPhase::Expired => {
                    drop(round);
                    warn!("round expired; restarting");
                    self.start_round();
                    return;
                }
                _ => proposal,
            }
        };
        if let Some(proposal) = proposal {
            self.broadcast(PeerMessage::ProposeSet(proposal));
        }
    }

    fn close_ledger(&self, tx_ids: Vec<Hash256>, close_time: u32, agree: bool) {
        let mut txs: Vec<Transaction> = {
            let open = self.open_txs.lock();
            tx_ids.iter().filter_map(|id| open.get(id).cloned()).collect()
        };
        let mut ledger_slot = self.ledger.lock();

        // Amendment and fee transitions are decided at flag ledgers from
        // the votes riding on trusted validations.
        let next_seq = ledger_slot.seq() + 1;
        if meridian_consensus::amendments::is_flag_ledger(next_seq) {
            let trusted = self.validations.lock().current_trusted();
            let refs: Vec<&Validation> = trusted.iter().collect();
            let trusted_count = self.validations.lock().unl().len();
            let rules = ledger_slot.rules();
            let pseudo = self.amendments.lock().flag_ledger_actions(
                &refs,
                trusted_count.max(1),
                &|amendment| rules.enabled(amendment),
                close_time,
            );
            txs.extend(pseudo);
            if let Some(fee_tx) = self
                .fee_vote
                .flag_ledger_action(&refs, ledger_slot.fees().base_fee)
            {
                txs.push(fee_tx);
            }
        }
        let result = match build_ledger(&mut *ledger_slot, txs, close_time, agree) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "ledger build failed; keeping parent");
                return;
            }
        };
        let mut closed = result.ledger;
        let hash = closed.hash();
        let seq = closed.seq();

        // A transactor tripping the invariant checker is a logic bug; one
        // occurrence demotes the transaction, a repeat halts the node so
        // the operator is alerted before state diverges further.
        if result.invariant_failures > 0 {
            let strikes = self
                .invariant_strikes
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            error!(
                failures = result.invariant_failures,
                strikes, "invariant violations while closing"
            );
            if strikes >= 2 {
                error!("repeated invariant violations; halting node");
                self.stopping.store(true, Ordering::SeqCst);
            }
        } else {
            self.invariant_strikes.store(0, Ordering::SeqCst);
        }

        // Persist both maps through the node store on a write job,
        // deduplicated across callers by the pending-saves table.
        if self.pending_saves.should_work(seq, false) {
            let mut objects = Vec::new();
            for (map, object_type) in [
                (closed.state_map(), NodeObjectType::AccountNode),
                (closed.tx_map(), NodeObjectType::TransactionNode),
            ] {
                let v2 = map.is_v2();
                let _ = map.visit_nodes(&mut |node, depth| {
                    objects.push(meridian_nodestore::NodeObject::new(
                        node.compute_hash(depth, v2),
                        object_type,
                        node.to_wire(depth, v2),
                    ));
                    Ok(())
                });
            }
            let store = self.store.clone();
            let saves = self.pending_saves.clone();
            let queued = self
                .jobs
                .lock()
                .as_ref()
                .map(|jobs| {
                    jobs.add(JobType::NsWrite, move || {
                        if let Err(e) = store.store_batch(&objects) {
                            warn!(error = %e, seq, "ledger persistence failed");
                        }
                        saves.finished(seq);
                    })
                })
                .unwrap_or(false);
            if !queued {
                self.pending_saves.finished(seq);
            }
        }

        // Retries stay alive for the next open ledger.
        {
            let mut open = self.open_txs.lock();
            open.clear();
            for tx in result.retries {
                open.insert(tx.tx_id(), tx);
            }
            let mut local = self.local_txs.lock();
            for tx in local.candidates(seq + 1, |id| closed.tx_map().has(id).unwrap_or(false)) {
                open.insert(tx.tx_id(), tx);
            }
        }

        info!(seq, %hash, txs = closed.tx_count(), "ledger fully closed");
        self.broadcast(PeerMessage::StatusChange {
            ledger_hash: hash,
            ledger_seq: seq,
            first_seq: 1,
            last_seq: seq,
        });

        // Validators sign and broadcast a validation.
        if let Some(keypair) = &self.validator_key {
            let fee_wish = self.fee_vote.our_vote(closed.fees().base_fee);
            let validation = Validation::new_signed(
                keypair,
                hash,
                seq,
                self.timekeeper.now(),
                fee_wish,
                Vec::new(),
            );
            self.on_validation(validation.clone());
            self.broadcast(PeerMessage::Validation(validation));
        }
        *ledger_slot = closed;
    }

    fn broadcast(&self, message: PeerMessage) {
        if let Some(sender) = self.outbound.lock().as_ref() {
            let _ = sender.send(message);
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
