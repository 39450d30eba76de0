pub mod scenarios;
pub mod simulation;

pub use scenarios::*;
pub use simulation::*;
