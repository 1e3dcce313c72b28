pub mod book;
pub mod flow;
pub mod pathfinder;
pub mod quality;
pub mod steps;

pub use book::{book_offers, insert_offer, remove_offer};
pub use flow::{flow, FlowOptions, FlowResult};
pub use pathfinder::Pathfinder;
pub use quality::Quality;
pub use steps::{build_strands, Step, Strand};
