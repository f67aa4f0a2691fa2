//! Generic module framework
//!
//! Declarative modules are loaded into a [`ModuleRegistry`] and interpreted
//! per person by a [`Context`]. States, transitions and conditions are closed
//! enums, so a malformed module fails when it is loaded rather than when a
//! person first reaches the bad state.

pub mod context;
pub mod definition;
pub mod logic;
pub mod registry;
pub mod state;
pub mod transition;
pub mod validation;

pub use context::Context;
pub use definition::{ModuleDef, StateDef, StateKind, INITIAL};
pub use logic::{Condition, Operator};
pub use registry::{Module, ModuleRegistry};
pub use state::State;
pub use transition::Transition;
