pub mod calendar;
pub mod config;
pub mod error;
pub mod types;

pub use calendar::TimeUnit;
pub use config::SimulationConfig;
pub use error::{Result, SimError};
pub use types::{Code, EntityId, Timestamp};
