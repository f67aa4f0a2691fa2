use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse module {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Module not found: {0}")]
    UnknownModule(String),

    #[error("State '{state}' not found in module {module}")]
    UnknownState { module: String, state: String },

    #[error("Module {0} has no Initial state")]
    MissingInitial(String),

    #[error("Invalid transition on {module}/{state}: {reason}")]
    InvalidTransition {
        module: String,
        state: String,
        reason: String,
    },

    #[error("{context} is missing required field '{field}'")]
    MissingField { context: String, field: &'static str },

    #[error("Invalid value in {context}: {message}")]
    InvalidField { context: String, message: String },

    #[error("No value available for {0}")]
    MissingValue(String),

    #[error("Cannot compare {lhs} {operator} {rhs}")]
    IncomparableValues {
        lhs: String,
        rhs: String,
        operator: String,
    },

    #[error("Module {module} exceeded {iterations} iterations in state '{state}'")]
    RunawayModule {
        module: String,
        state: String,
        iterations: usize,
    },

    #[error("Timestamp {0} is outside the supported calendar range")]
    TimeOutOfRange(i64),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
