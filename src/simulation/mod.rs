//! Population simulation over the module framework

pub mod driver;
pub mod output;

pub use driver::{simulate, simulate_person};
pub use output::{PersonOutcome, SimulationOutput};
