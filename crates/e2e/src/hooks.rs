//! Setup and teardown around every scenario

use tracing::{debug, info, warn};

use crate::actions::Actions;
use crate::config::{ErrorPolicy, SuiteConfig};
use crate::error::{E2eError, E2eResult};
use crate::network::Interceptor;
use crate::page::Page;
use crate::runner::ScenarioResult;
use crate::target::Target;

pub struct LifecycleHooks {
    config: SuiteConfig,
}

impl LifecycleHooks {
    pub fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    /// Give the scenario a clean slate: no rules, no recorded calls, a fresh
    /// page load and a ready app.
    pub async fn before_each(&self, page: &dyn Page, interceptor: &Interceptor) -> E2eResult<()> {
        interceptor.reset();

        let stale = page.drain_page_errors();
        if !stale.is_empty() {
            debug!("discarding {} page error(s) from the previous scenario", stale.len());
        }

        page.goto(&self.config.url("/")).await?;

        let readiness = Target::named(&self.config.readiness_target)?;
        Actions::new(page, &self.config)
            .wait_visible(&readiness, None, self.config.default_timeout())
            .await?;
        Ok(())
    }

    /// Apply the error policy to page errors raised during the scenario.
    pub fn check_page_errors(&self, page: &dyn Page) -> E2eResult<()> {
        let errors = page.drain_page_errors();
        if errors.is_empty() {
            return Ok(());
        }
        match self.config.error_policy {
            ErrorPolicy::Suppress => {
                for message in &errors {
                    warn!("suppressed page error: {}", message);
                }
                Ok(())
            }
            ErrorPolicy::Fail => Err(E2eError::PageError(errors.join("; "))),
        }
    }

    /// Structured completion event, one per scenario
    pub fn after_each(&self, result: &ScenarioResult) {
        info!(
            target: "notes_e2e::scenario",
            suite = %result.suite,
            scenario = %result.title,
            outcome = %result.outcome,
            duration_ms = result.duration_ms,
            "scenario finished"
        );
    }
}
