//! Harness configuration
//!
//! Everything lives in one [`HarnessConfig`] value that is read once at startup
//! from `notes-e2e.toml` (if present) and handed down explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;

/// Well-known port of the local static file server.
pub const DEFAULT_PORT: u16 = 8080;

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "notes-e2e.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub suite: SuiteConfig,
    pub launch: LaunchConfig,
    pub browser: PlaywrightConfig,
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> E2eResult<Self> {
        toml::from_str(content).map_err(|e| E2eError::Config(e.to_string()))
    }

    /// Load from `path`, or from the default file. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> E2eResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

/// Per-suite settings passed into the scenario runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Root URL of the application under test
    pub base_url: String,

    /// Upper bound for element polling and retried assertions
    pub default_timeout_ms: u64,

    /// Upper bound for network round-trips (`wait_for_call`, editor settle)
    pub response_timeout_ms: u64,

    /// How long `click_if_present` waits for optional UI such as confirm dialogs
    pub optional_timeout_ms: u64,

    /// Poll interval for every bounded wait
    pub poll_interval_ms: u64,

    /// Catalog name of the element signalling the app is ready
    pub readiness_target: String,

    /// What to do with uncaught application errors
    pub error_policy: ErrorPolicy,

    /// Directory holding the YAML suites
    pub specs_dir: PathBuf,

    /// Directory for the JSON results file
    pub output_dir: PathBuf,
}

impl SuiteConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn optional_timeout(&self) -> Duration {
        Duration::from_millis(self.optional_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Resolve `path` against the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5600".to_string(),
            default_timeout_ms: 10_000,
            response_timeout_ms: 30_000,
            optional_timeout_ms: 1_000,
            poll_interval_ms: 50,
            readiness_target: "app_root".to_string(),
            error_policy: ErrorPolicy::Suppress,
            specs_dir: PathBuf::from("crates/e2e/specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Handling of uncaught exceptions raised by the application under test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log and continue
    #[default]
    Suppress,
    /// Fail the scenario that observed the error
    Fail,
}

/// Settings for the launcher process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Port the static file server listens on
    pub port: u16,

    /// Page that must exist before anything is started
    pub app_asset: PathBuf,

    /// Directory served by the static file server
    pub serve_root: PathBuf,

    /// Static server binary (None = next to the current executable, then PATH)
    pub server_binary: Option<PathBuf>,

    /// Timeout for the static server to accept connections
    pub startup_timeout_ms: u64,
}

impl LaunchConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            app_asset: PathBuf::from("web/test-app.html"),
            serve_root: PathBuf::from("."),
            server_binary: None,
            startup_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human format
    pub json: bool,

    /// Filter used when RUST_LOG is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Install the global subscriber. Logs go to stderr so stdout stays free
    /// for the summary report.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.filter));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        if self.json {
            let _ = builder.json().try_init();
        } else {
            let _ = builder.try_init();
        }
    }
}
