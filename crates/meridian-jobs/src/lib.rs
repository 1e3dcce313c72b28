pub mod job_queue;
pub mod timekeeper;

pub use job_queue::{JobQueue, JobType};
pub use timekeeper::TimeKeeper;
