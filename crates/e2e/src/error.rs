//! Error types for E2E testing

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Precondition missing: {0}")]
    PreconditionMissing(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server on port {port} not ready after {attempts} attempts")]
    ServerNotReady { port: u16, attempts: usize },

    #[error("Failed to spawn {what}: {reason}")]
    ProcessSpawnFailed { what: String, reason: String },

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser bridge closed: {0}")]
    BridgeClosed(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Element not visible: {0}")]
    NotVisible(String),

    #[error("Timeout after {elapsed:?} waiting for: {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("Assertion failed on {target}: expected {expected}, observed {observed}")]
    AssertionFailed {
        target: String,
        expected: String,
        observed: String,
    },

    #[error("Submit control never became clickable: {0}")]
    SubmitFailed(String),

    #[error("Delete not reflected in list: {0}")]
    DeleteNotReflected(String),

    #[error("Uncaught page error: {0}")]
    PageError(String),

    #[error("Invalid supervisor transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Process exit codes shared by the launcher and the runner.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const SCENARIOS_FAILED: i32 = 1;
    pub const PRECONDITION_MISSING: i32 = 2;
    pub const SERVER_START_FAILED: i32 = 3;
    pub const RUNNER_SPAWN_FAILED: i32 = 4;
    pub const BROWSER_UNAVAILABLE: i32 = 5;
    pub const INTERRUPTED: i32 = 130;
}

impl E2eError {
    /// Fatal errors abort the whole run; everything else fails only the
    /// current scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            E2eError::PreconditionMissing(_)
                | E2eError::ServerStartup(_)
                | E2eError::ServerNotReady { .. }
                | E2eError::ProcessSpawnFailed { .. }
                | E2eError::PlaywrightNotFound
                | E2eError::BridgeClosed(_)
                | E2eError::Config(_)
                | E2eError::Io(_)
                | E2eError::Yaml(_)
        )
    }

    /// Exit code used when this error terminates the process.
    pub fn exit_code(&self) -> i32 {
        match self {
            E2eError::PreconditionMissing(_) => exit_code::PRECONDITION_MISSING,
            E2eError::ServerStartup(_) | E2eError::ServerNotReady { .. } => {
                exit_code::SERVER_START_FAILED
            }
            E2eError::ProcessSpawnFailed { .. } => exit_code::RUNNER_SPAWN_FAILED,
            E2eError::PlaywrightNotFound | E2eError::BridgeClosed(_) => {
                exit_code::BROWSER_UNAVAILABLE
            }
            _ => exit_code::SCENARIOS_FAILED,
        }
    }

    pub(crate) fn timeout(what: impl Into<String>, elapsed: Duration) -> Self {
        E2eError::Timeout {
            what: what.into(),
            elapsed,
        }
    }
}
