//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for simulated persons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for a person generated from a seeded run
    pub fn from_seed(seed: u64, index: u64) -> Self {
        Self(Uuid::from_u64_pair(seed, index))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulation time: milliseconds since the Unix epoch (UTC)
pub type Timestamp = i64;

/// A clinical code attached to a state (condition, medication, procedure...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code {
    pub system: String,
    pub code: String,
    pub display: String,
}

impl Code {
    pub fn new(system: &str, code: &str, display: &str) -> Self {
        Self {
            system: system.to_string(),
            code: code.to_string(),
            display: display.to_string(),
        }
    }

    /// Lookup key derived from the display text
    pub fn symbol(&self) -> String {
        symbolize(&self.display)
    }
}

/// Lower-case a label and collapse whitespace runs into underscores.
///
/// Used for record lookup keys so that "Diabetes Mellitus" and
/// "diabetes_mellitus" refer to the same thing.
pub fn symbolize(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}
