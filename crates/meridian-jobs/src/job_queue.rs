use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// Work categories, highest priority first. Each type carries a soft cap on
/// concurrent executions and a target latency; sustained overruns shed
/// lower-priority submissions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum JobType {
    /// Flush tree nodes to the node store.
    NsWrite,
    /// Consensus proposal processing.
    Proposal,
    /// Validation processing.
    Validation,
    /// Relayed candidate transactions.
    Transaction,
    /// Merkle-sync data requests from peers.
    LedgerData,
    /// Background node-store reads.
    NsAsyncRead,
    /// Client RPC work.
    ClientCommand,
}

impl JobType {
    fn limit(self) -> usize {
        match self {
            JobType::NsWrite => 2,
            JobType::Proposal => 2,
            JobType::Validation => 2,
            JobType::Transaction => 4,
            JobType::LedgerData => 2,
            JobType::NsAsyncRead => 2,
            JobType::ClientCommand => 4,
        }
    }

    /// Queue latency beyond which this type is considered overloaded.
    fn peak_latency(self) -> Duration {
        match self {
            JobType::NsWrite => Duration::from_millis(1000),
            JobType::Proposal | JobType::Validation => Duration::from_millis(500),
            JobType::Transaction => Duration::from_millis(750),
            JobType::LedgerData => Duration::from_millis(2000),
            JobType::NsAsyncRead => Duration::from_millis(2000),
            JobType::ClientCommand => Duration::from_millis(3000),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Queued {
    job: Job,
    enqueued: Instant,
}

#[derive(Default)]
struct State {
    queues: BTreeMap<JobType, VecDeque<Queued>>,
    running: BTreeMap<JobType, usize>,
    /// Most recent observed queue latency per type.
    last_latency: BTreeMap<JobType, Duration>,
    stopping: bool,
}

impl State {
    /// The next runnable job honoring per-type limits, priority order.
    fn pop_runnable(&mut self) -> Option<(JobType, Queued)> {
        let candidate = self.queues.iter().find_map(|(ty, queue)| {
            let running = self.running.get(ty).copied().unwrap_or(0);
            (!queue.is_empty() && running < ty.limit()).then_some(*ty)
        })?;
        let queued = self.queues.get_mut(&candidate)?.pop_front()?;
        *self.running.entry(candidate).or_default() += 1;
        Some((candidate, queued))
    }

    /// A higher-priority type running hot sheds `job_type` submissions.
    fn should_shed(&self, job_type: JobType) -> bool {
        self.last_latency
            .iter()
            .any(|(ty, latency)| *ty < job_type && *latency > ty.peak_latency())
    }
}

struct Shared {
    state: Mutex<State>,
    work_ready: Condvar,
}

/// Typed worker pool. Jobs run to completion; there is no cancellation.
/// Shutdown is cooperative: `stop()` drains queued work and joins.
pub struct JobQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            work_ready: Condvar::new(),
        });
        let workers = (0..worker_count.max(1))
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("jobq-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("spawn worker")
            })
            .collect();
        Self { shared, workers }
    }

    /// Submit a job. Returns false when the queue is stopping or load
    /// shedding rejected the submission.
    pub fn add<F: FnOnce() + Send + 'static>(&self, job_type: JobType, job: F) -> bool {
        let mut state = self.shared.state.lock();
        if state.stopping {
            return false;
        }
        if state.should_shed(job_type) {
            warn!(?job_type, "job shed under load");
            return false;
        }
        state
            .queues
            .entry(job_type)
            .or_default()
            .push_back(Queued {
                job: Box::new(job),
                enqueued: Instant::now(),
            });
        drop(state);
        self.shared.work_ready.notify_one();
        true
    }

    pub fn queued_len(&self) -> usize {
        let state = self.shared.state.lock();
        state.queues.values().map(|q| q.len()).sum()
    }

    /// Drain everything and join the workers.
    pub fn stop(mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
        }
        self.shared.work_ready.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let (job_type, queued) = {
            let mut state = shared.state.lock();
            loop {
                if let Some(found) = state.pop_runnable() {
                    break found;
                }
                if state.stopping {
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
        };
        let latency = queued.enqueued.elapsed();
        debug!(?job_type, ?latency, "job start");
        (queued.job)();
        let mut state = shared.state.lock();
        state.last_latency.insert(job_type, latency);
        if let Some(count) = state.running.get_mut(&job_type) {
            *count = count.saturating_sub(1);
        }
        drop(state);
        // A limit slot opened; someone may be waiting on it.
        shared.work_ready.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn executes_submitted_jobs() {
        let queue = JobQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            assert!(queue.add(JobType::Transaction, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn respects_per_type_concurrency_limit() {
        let queue = JobQueue::new(4);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let peak = peak.clone();
            let current = current.clone();
            queue.add(JobType::NsWrite, move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }
        queue.stop();
        assert!(peak.load(Ordering::SeqCst) <= JobType::NsWrite.limit());
    }

    #[test]
    fn rejects_after_stop() {
        let queue = JobQueue::new(1);
        let shared = queue.shared.clone();
        queue.stop();
        let state = shared.state.lock();
        assert!(state.stopping);
    }

    #[test]
    fn sheds_lower_priority_when_high_priority_lags() {
        let queue = JobQueue::new(1);
        {
            let mut state = queue.shared.state.lock();
            state
                .last_latency
                .insert(JobType::Proposal, Duration::from_secs(5));
        }
        // Client work is below proposals: shed.
        assert!(!queue.add(JobType::ClientCommand, || {}));
        // Higher-priority work still goes through.
        assert!(queue.add(JobType::NsWrite, || {}));
        queue.stop();
    }
}
