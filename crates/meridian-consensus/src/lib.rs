pub mod amendments;
pub mod dispute;
pub mod parms;
pub mod proposal;
pub mod round;
pub mod validations;

pub use amendments::{AmendmentTable, FeeVote};
pub use dispute::DisputedTx;
pub use parms::ConsensusParms;
pub use proposal::Proposal;
pub use round::{ConsensusRound, RoundPhase};
pub use validations::{UnlConfig, Validation, Validations};
