pub mod path;
pub mod performance;
pub mod report;

pub use path::*;
pub use performance::*;
pub use report::*;
