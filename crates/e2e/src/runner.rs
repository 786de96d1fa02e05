//! Scenario runner: executes suites against a [`Page`] and collects results

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::actions::Actions;
use crate::config::SuiteConfig;
use crate::error::{exit_code, E2eError, E2eResult};
use crate::hooks::LifecycleHooks;
use crate::network::{InterceptRule, Interceptor, MatchedCall};
use crate::page::{ElementHandle, Page};
use crate::spec::{Bound, Scenario, TestSpec, TestStep, Vars};
use crate::target::{Target, TargetRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Pending,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Pending => "pending",
        })
    }
}

/// Result of executing a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Diagnostic recorded for a failed scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    /// Step that failed, or the hook name
    pub step: String,
    pub message: String,
    pub target: Option<String>,
    pub expected: Option<String>,
    pub observed: Option<String>,
}

impl Failure {
    fn from_error(step: impl Into<String>, err: &E2eError) -> Self {
        let (target, expected, observed) = match err {
            E2eError::AssertionFailed {
                target,
                expected,
                observed,
            } => (
                Some(target.clone()),
                Some(expected.clone()),
                Some(observed.clone()),
            ),
            _ => (None, None, None),
        };
        Self {
            step: step.into(),
            message: err.to_string(),
            target,
            expected,
            observed,
        }
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub suite: String,
    pub title: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub failure: Option<Failure>,
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            exit_code::SUCCESS
        } else {
            exit_code::SCENARIOS_FAILED
        }
    }

    /// Human-readable report: one line per scenario, diagnostics under failures.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mut current_suite = None;
        for result in &self.results {
            if current_suite != Some(result.suite.as_str()) {
                current_suite = Some(result.suite.as_str());
                let _ = writeln!(out, "{}", result.suite);
            }
            let mark = match result.outcome {
                Outcome::Passed => "✓",
                Outcome::Failed => "✗",
                Outcome::Pending => "-",
            };
            let _ = writeln!(out, "  {} {} ({} ms)", mark, result.title, result.duration_ms);
            if let Some(failure) = &result.failure {
                let _ = writeln!(out, "      at {}: {}", failure.step, failure.message);
                if let (Some(expected), Some(observed)) = (&failure.expected, &failure.observed) {
                    let _ = writeln!(out, "      expected: {}", expected);
                    let _ = writeln!(out, "      observed: {}", observed);
                }
            }
        }
        let _ = writeln!(
            out,
            "\n{} passing, {} failing, {} pending ({} ms)",
            self.passed, self.failed, self.skipped, self.duration_ms
        );
        out
    }
}

/// Write test results to `output_dir/test-results.json`
pub fn write_results(output_dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

/// Per-scenario mutable state
struct ScenarioContext {
    vars: Vars,
    /// Last call awaited per alias
    awaited: HashMap<String, MatchedCall>,
}

impl ScenarioContext {
    fn new() -> Self {
        Self {
            vars: Vars::for_scenario(),
            awaited: HashMap::new(),
        }
    }
}

/// What the DOM looked like at one assertion attempt
struct Observation {
    count: usize,
    any_visible: bool,
    texts: Vec<String>,
}

struct DomChecks {
    exists: Option<bool>,
    visible: Option<bool>,
    at_least: Option<usize>,
    at_most: Option<usize>,
    text_contains: Option<String>,
}

impl DomChecks {
    /// A bare assertion means "the target exists".
    fn or_exists(mut self) -> Self {
        if self.exists.is_none()
            && self.visible.is_none()
            && self.at_least.is_none()
            && self.at_most.is_none()
            && self.text_contains.is_none()
        {
            self.exists = Some(true);
        }
        self
    }

    /// First failing check as (expected, observed)
    fn evaluate(&self, obs: &Observation) -> Option<(String, String)> {
        let elements = || format!("{} element(s)", obs.count);
        match self.exists {
            Some(true) if obs.count == 0 => return Some(("exists".into(), "no elements".into())),
            Some(false) if obs.count > 0 => return Some(("not exists".into(), elements())),
            _ => {}
        }
        match self.visible {
            Some(true) if !obs.any_visible => {
                return Some(("visible".into(), format!("{}, none visible", elements())))
            }
            Some(false) if obs.any_visible => return Some(("not visible".into(), "visible".into())),
            _ => {}
        }
        if let Some(min) = self.at_least {
            if obs.count < min {
                return Some((format!("count >= {}", min), elements()));
            }
        }
        if let Some(max) = self.at_most {
            if obs.count > max {
                return Some((format!("count <= {}", max), elements()));
            }
        }
        if let Some(needle) = &self.text_contains {
            if !obs.texts.iter().any(|t| t.contains(needle.as_str())) {
                let shown: Vec<String> = obs.texts.iter().take(5).map(|t| format!("{:?}", t)).collect();
                return Some((format!("text containing {:?}", needle), format!("[{}]", shown.join(", "))));
            }
        }
        None
    }
}

/// Runs scenarios one at a time against a shared page.
pub struct ScenarioRunner {
    page: Arc<dyn Page>,
    interceptor: Arc<Interceptor>,
    config: SuiteConfig,
    hooks: LifecycleHooks,
}

impl ScenarioRunner {
    pub fn new(page: Arc<dyn Page>, interceptor: Arc<Interceptor>, config: SuiteConfig) -> Self {
        let hooks = LifecycleHooks::new(config.clone());
        Self {
            page,
            interceptor,
            config,
            hooks,
        }
    }

    /// Run every scenario of every suite in order. Only fatal errors abort
    /// the run; anything else is recorded against its scenario.
    pub async fn run_specs(&self, specs: &[TestSpec]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();
        let mut results = Vec::new();
        let (mut passed, mut failed, mut skipped) = (0, 0, 0);

        let total: usize = specs.iter().map(TestSpec::scenario_count).sum();
        info!("Running {} scenario(s) from {} suite(s)...", total, specs.len());

        for spec in specs {
            info!("Suite: {}", spec.name);
            for scenario in &spec.scenarios {
                let result = self.run_scenario(&spec.name, scenario).await?;
                match result.outcome {
                    Outcome::Passed => {
                        passed += 1;
                        info!("✓ {} ({} ms)", result.title, result.duration_ms);
                    }
                    Outcome::Failed => {
                        failed += 1;
                        error!(
                            "✗ {} - {}",
                            result.title,
                            result
                                .failure
                                .as_ref()
                                .map(|f| f.message.as_str())
                                .unwrap_or("unknown error")
                        );
                    }
                    Outcome::Pending => {
                        skipped += 1;
                        info!("- {} (pending)", result.title);
                    }
                }
                results.push(result);
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        Ok(TestSuiteResult {
            total,
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        })
    }

    /// Run one scenario with its hooks. Returns `Err` only for fatal errors.
    pub async fn run_scenario(&self, suite: &str, scenario: &Scenario) -> E2eResult<ScenarioResult> {
        let start = Instant::now();
        let mut result = ScenarioResult {
            suite: suite.to_string(),
            title: scenario.title.clone(),
            outcome: Outcome::Passed,
            duration_ms: 0,
            steps: Vec::new(),
            failure: None,
        };

        if scenario.pending || scenario.steps.is_empty() {
            result.outcome = Outcome::Pending;
            self.hooks.after_each(&result);
            return Ok(result);
        }

        debug!("Running scenario: {}", scenario.title);
        match self.hooks.before_each(self.page.as_ref(), &self.interceptor).await {
            Ok(()) => {
                let mut ctx = ScenarioContext::new();
                for step in &scenario.steps {
                    let step_start = Instant::now();
                    let outcome = self.execute_step(&mut ctx, step).await;
                    let step_name = step.name();
                    let duration_ms = step_start.elapsed().as_millis() as u64;

                    match outcome {
                        Ok(()) => result.steps.push(StepResult {
                            step_name,
                            success: true,
                            duration_ms,
                            error: None,
                        }),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            result.steps.push(StepResult {
                                step_name: step_name.clone(),
                                success: false,
                                duration_ms,
                                error: Some(e.to_string()),
                            });
                            result.failure = Some(Failure::from_error(step_name, &e));
                            break;
                        }
                    }
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => result.failure = Some(Failure::from_error("before_each", &e)),
        }

        if let Err(e) = self.hooks.check_page_errors(self.page.as_ref()) {
            if result.failure.is_none() {
                result.failure = Some(Failure::from_error("page errors", &e));
            }
        }

        if result.failure.is_some() {
            result.outcome = Outcome::Failed;
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        self.hooks.after_each(&result);
        Ok(result)
    }

    fn actions(&self) -> Actions<'_> {
        Actions::new(self.page.as_ref(), &self.config)
    }

    async fn scope(&self, within: Option<&str>) -> E2eResult<Option<ElementHandle>> {
        match within {
            Some(matcher) => Ok(Some(self.actions().find_item(Some(matcher)).await?)),
            None => Ok(None),
        }
    }

    fn resolve(target: &TargetRef, contains: Option<&str>) -> E2eResult<Target> {
        Ok(target.resolve()?.containing(contains))
    }

    async fn execute_step(&self, ctx: &mut ScenarioContext, step: &TestStep) -> E2eResult<()> {
        let step = step.expand(&ctx.vars)?;
        let actions = self.actions();
        debug!("step: {}", step.name());

        match step {
            TestStep::Navigate { url } => self.page.goto(&self.config.url(&url)).await,

            TestStep::Click {
                target,
                contains,
                within,
            } => {
                let target = Self::resolve(&target, contains.as_deref())?;
                let scope = self.scope(within.as_deref()).await?;
                actions.click(&target, scope.as_ref()).await
            }

            TestStep::DoubleClick {
                target,
                contains,
                within,
            } => {
                let target = Self::resolve(&target, contains.as_deref())?;
                let scope = self.scope(within.as_deref()).await?;
                actions.double_click(&target, scope.as_ref()).await
            }

            TestStep::Type {
                target,
                text,
                clear_first,
                within,
            } => {
                let target = target.resolve()?;
                let scope = self.scope(within.as_deref()).await?;
                actions
                    .type_into(&target, scope.as_ref(), &text, clear_first)
                    .await
            }

            TestStep::ClickIfPresent { target, timeout_ms } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.optional_timeout());
                actions
                    .click_if_present(&target.resolve()?, timeout)
                    .await
                    .map(|_| ())
            }

            TestStep::CreateNote { content } => actions.create_note(&content).await,

            TestStep::OpenItemMenu { item } => actions.open_item_menu(item.as_deref()).await.map(|_| ()),

            TestStep::ChooseMenuAction { entry, optional } => {
                if optional {
                    let chosen = actions
                        .choose_menu_action_within(entry, self.config.optional_timeout())
                        .await?;
                    if !chosen {
                        debug!("menu entry {:?} not offered, skipping", entry);
                    }
                    Ok(())
                } else {
                    actions.choose_menu_action(entry).await
                }
            }

            TestStep::DeleteItem { item } => actions.delete_item(&item).await,

            TestStep::AddComment { item, text } => actions.add_comment(item.as_deref(), &text).await,

            TestStep::EditItem { item, text } => actions.edit_item(item.as_deref(), &text).await,

            TestStep::CancelEditor => actions.cancel_editor().await,

            TestStep::Intercept {
                method,
                url,
                alias,
                stub,
            } => {
                let rule = InterceptRule::new(&method, &url, stub, &alias)?;
                self.interceptor.intercept(rule);
                Ok(())
            }

            TestStep::WaitForCall {
                alias,
                timeout_ms,
                status,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.response_timeout());
                let call = self.interceptor.wait_for_call(&alias, timeout).await?;
                debug!("@{} -> {} {} ({})", call.alias, call.method, call.url, call.status);
                let key = call.alias.clone();
                ctx.awaited.insert(key, call.clone());
                match status {
                    Some(expected) => check_status(&alias, expected, Some(&call)),
                    None => Ok(()),
                }
            }

            TestStep::AssertStatus { alias, status } => {
                let key = alias.trim_start_matches('@');
                let last = ctx
                    .awaited
                    .get(key)
                    .cloned()
                    .or_else(|| self.interceptor.calls(key).pop());
                check_status(&alias, status, last.as_ref())
            }

            TestStep::CaptureCount {
                target,
                into,
                contains,
            } => {
                let target = Self::resolve(&target, contains.as_deref())?;
                let (target, probe) = (&target, &actions);
                // Short settle window; an empty list is a valid reading
                let counted = actions
                    .poll(self.config.optional_timeout(), move || async move {
                        let n = probe.count(target, None).await?;
                        Ok((n > 0).then_some(n))
                    })
                    .await?
                    .unwrap_or(0);
                debug!("captured {} = {}", into, counted);
                ctx.vars.set(into, counted.to_string());
                Ok(())
            }

            TestStep::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }

            TestStep::Log { message } => {
                info!("[scenario] {}", message);
                Ok(())
            }

            TestStep::Assert {
                target,
                contains,
                within,
                exists,
                visible,
                count_at_least,
                count_at_most,
                text_contains,
                optional,
            } => {
                let target = Self::resolve(&target, contains.as_deref())?;
                let scope = self.scope(within.as_deref()).await?;
                let checks = DomChecks {
                    exists,
                    visible,
                    at_least: count_at_least.as_ref().map(Bound::resolve).transpose()?,
                    at_most: count_at_most.as_ref().map(Bound::resolve).transpose()?,
                    text_contains,
                }
                .or_exists();
                if optional && actions.count(&target, scope.as_ref()).await? == 0 {
                    debug!("optional {} absent, assertion skipped", target);
                    return Ok(());
                }
                self.assert_dom(&actions, &target, scope.as_ref(), &checks).await
            }
        }
    }

    async fn observe(
        &self,
        actions: &Actions<'_>,
        target: &Target,
        scope: Option<&ElementHandle>,
        checks: &DomChecks,
    ) -> E2eResult<Observation> {
        let found = actions.find_all(target, scope).await?;
        let mut obs = Observation {
            count: found.len(),
            any_visible: false,
            texts: Vec::new(),
        };
        for element in &found {
            if checks.visible.is_some() && !obs.any_visible {
                obs.any_visible = self.page.is_visible(element).await?;
            }
            if checks.text_contains.is_some() {
                obs.texts.push(self.page.text(element).await?);
            }
        }
        Ok(obs)
    }

    /// Retry until every check holds or the default timeout runs out.
    async fn assert_dom(
        &self,
        actions: &Actions<'_>,
        target: &Target,
        scope: Option<&ElementHandle>,
        checks: &DomChecks,
    ) -> E2eResult<()> {
        let deadline = Instant::now() + self.config.default_timeout();
        loop {
            let failed = match self.observe(actions, target, scope, checks).await {
                Ok(obs) => checks.evaluate(&obs),
                Err(E2eError::Driver(msg)) => Some(("a stable DOM".into(), msg)),
                Err(e) => return Err(e),
            };
            let Some((expected, observed)) = failed else {
                return Ok(());
            };
            if Instant::now() >= deadline {
                warn!("assertion on {} gave up: expected {}, observed {}", target, expected, observed);
                return Err(E2eError::AssertionFailed {
                    target: target.to_string(),
                    expected,
                    observed,
                });
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

fn check_status(alias: &str, expected: u16, call: Option<&MatchedCall>) -> E2eResult<()> {
    let target = format!("@{}", alias.trim_start_matches('@'));
    match call {
        Some(call) if call.status == expected => Ok(()),
        Some(call) => Err(E2eError::AssertionFailed {
            target,
            expected: format!("status {}", expected),
            observed: format!("status {} from {} {}", call.status, call.method, call.url),
        }),
        None => Err(E2eError::AssertionFailed {
            target,
            expected: format!("status {}", expected),
            observed: "no call recorded".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checks() -> DomChecks {
        DomChecks {
            exists: None,
            visible: None,
            at_least: None,
            at_most: None,
            text_contains: None,
        }
    }

    fn obs(count: usize, any_visible: bool, texts: &[&str]) -> Observation {
        Observation {
            count,
            any_visible,
            texts: texts.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_not_exists_reports_count() {
        let c = DomChecks {
            exists: Some(false),
            ..checks()
        };
        assert_eq!(c.evaluate(&obs(0, false, &[])), None);
        let (expected, observed) = c.evaluate(&obs(2, true, &[])).unwrap();
        assert_eq!(expected, "not exists");
        assert_eq!(observed, "2 element(s)");
    }

    #[test]
    fn test_count_bounds() {
        let c = DomChecks {
            at_least: Some(2),
            at_most: Some(3),
            ..checks()
        };
        assert!(c.evaluate(&obs(1, true, &[])).is_some());
        assert!(c.evaluate(&obs(2, true, &[])).is_none());
        assert!(c.evaluate(&obs(4, true, &[])).is_some());
    }

    #[test]
    fn test_text_contains() {
        let c = DomChecks {
            text_contains: Some("#标签".into()),
            ..checks()
        };
        assert!(c.evaluate(&obs(2, true, &["a", "note #标签"])).is_none());
        let (_, observed) = c.evaluate(&obs(1, true, &["plain"])).unwrap();
        assert!(observed.contains("plain"));
    }

    #[test]
    fn test_bare_assertion_requires_existence() {
        let c = checks().or_exists();
        assert_eq!(c.exists, Some(true));
        let (expected, observed) = c.evaluate(&obs(0, false, &[])).unwrap();
        assert_eq!(expected, "exists");
        assert_eq!(observed, "no elements");
        assert!(c.evaluate(&obs(1, false, &[])).is_none());

        let c = DomChecks {
            exists: Some(false),
            ..checks()
        }
        .or_exists();
        assert_eq!(c.exists, Some(false));
    }

    #[test]
    fn test_visible_check() {
        let c = DomChecks {
            visible: Some(true),
            ..checks()
        };
        assert!(c.evaluate(&obs(1, false, &[])).is_some());
        assert!(c.evaluate(&obs(1, true, &[])).is_none());
    }

    #[test]
    fn test_check_status() {
        let call = MatchedCall {
            alias: "deleteNote".into(),
            method: "DELETE".into(),
            url: "http://localhost:5600/inbox/notes/1".into(),
            status: 500,
            body: String::new(),
            stubbed: true,
        };
        assert!(check_status("@deleteNote", 500, Some(&call)).is_ok());
        assert!(matches!(
            check_status("deleteNote", 200, Some(&call)),
            Err(E2eError::AssertionFailed { .. })
        ));
        assert!(check_status("deleteNote", 200, None).is_err());
    }

    #[test]
    fn test_summary_and_exit_code() {
        let result = TestSuiteResult {
            total: 2,
            passed: 1,
            failed: 1,
            skipped: 0,
            duration_ms: 12,
            results: vec![
                ScenarioResult {
                    suite: "note-delete".into(),
                    title: "deletes a note".into(),
                    outcome: Outcome::Passed,
                    duration_ms: 5,
                    steps: vec![],
                    failure: None,
                },
                ScenarioResult {
                    suite: "note-delete".into(),
                    title: "keeps note on error".into(),
                    outcome: Outcome::Failed,
                    duration_ms: 7,
                    steps: vec![],
                    failure: Some(Failure::from_error(
                        "assert note_item",
                        &E2eError::AssertionFailed {
                            target: "note_item".into(),
                            expected: "exists".into(),
                            observed: "no elements".into(),
                        },
                    )),
                },
            ],
        };
        let summary = result.summary();
        assert!(summary.contains("✓ deletes a note"));
        assert!(summary.contains("✗ keeps note on error"));
        assert!(summary.contains("observed: no elements"));
        assert!(summary.contains("1 passing, 1 failing, 0 pending"));
        assert_eq!(result.exit_code(), exit_code::SCENARIOS_FAILED);
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let result = TestSuiteResult {
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration_ms: 0,
            results: vec![],
        };
        let path = write_results(&dir.path().join("out"), &result).unwrap();
        let written: TestSuiteResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.total, 0);
    }
}
