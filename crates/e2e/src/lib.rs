//! Notes E2E Harness
//!
//! This crate drives the notes web client end to end:
//! - Ensures a local static file server is up (adopting one that already is)
//! - Runs declarative YAML scenarios in a headless browser via Playwright
//! - Intercepts and stubs the app's HTTP calls per scenario
//! - Reports per-scenario outcomes with diagnostics and a JSON results file
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Supervisor (notes-e2e launch)                              │
//! │    ├── check_app_asset()                                    │
//! │    ├── ensure_server_running(port) -> Option<ServerHandle>  │
//! │    └── run_test_suite() -> exit code   (Ctrl-C -> 130)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner (notes-e2e run)                             │
//! │    ├── LifecycleHooks: before_each / after_each             │
//! │    ├── TestSpec (YAML) -> Scenario -> [TestStep]            │
//! │    └── assertions retried until the default timeout         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Actions (create_note, delete_item, add_comment, ...)       │
//! │    └── Target: named concept -> ordered selector fallbacks  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Page (trait)  <── PlaywrightSession (node bridge)          │
//! │                        └── every request -> Interceptor     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod hooks;
pub mod network;
pub mod page;
pub mod playwright;
pub mod runner;
pub mod server;
pub mod spec;
pub mod supervisor;
pub mod target;

pub use actions::{Actions, MenuAction};
pub use config::{HarnessConfig, SuiteConfig};
pub use error::{E2eError, E2eResult};
pub use network::{InterceptRule, Interceptor, MatchedCall, StubResponse};
pub use page::{ElementHandle, Page};
pub use runner::{ScenarioRunner, TestSuiteResult};
pub use spec::{TestSpec, TestStep};
pub use supervisor::Supervisor;
pub use target::Target;
