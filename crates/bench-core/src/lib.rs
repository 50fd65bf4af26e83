pub mod config;
pub mod executor;
pub mod protocol;
pub mod sampler;
pub mod scheduler;
pub mod stats;
pub mod transport;

pub use config::*;
pub use executor::*;
pub use sampler::{Transaction, FEATURE_COUNT, FEATURE_NAMES};
pub use scheduler::*;
pub use stats::*;
pub use transport::*;
