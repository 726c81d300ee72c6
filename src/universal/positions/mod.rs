pub mod error;
pub mod manager;
pub mod sizing;
pub mod stats;
pub mod types;

pub use error::*;
pub use manager::*;
pub use stats::*;
pub use types::*;
