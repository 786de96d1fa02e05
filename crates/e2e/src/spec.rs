//! Declarative YAML scenario suites

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::actions::MenuAction;
use crate::error::{E2eError, E2eResult};
use crate::network::StubResponse;
use crate::target::TargetRef;

/// One suite file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this suite
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags applied to every scenario of the suite
    #[serde(default)]
    pub tags: Vec<String>,

    /// Scenarios, run in declaration order
    pub scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub title: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Declared but not implemented yet; reported as skipped
    #[serde(default)]
    pub pending: bool,

    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a path relative to the base URL
    Navigate { url: String },

    /// Click a visible element
    Click {
        target: TargetRef,
        #[serde(default)]
        contains: Option<String>,
        /// Restrict the lookup to the note item containing this text
        #[serde(default)]
        within: Option<String>,
    },

    DoubleClick {
        target: TargetRef,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        within: Option<String>,
    },

    /// Type text with keyboard simulation
    Type {
        target: TargetRef,
        text: String,
        #[serde(default)]
        clear_first: bool,
        #[serde(default)]
        within: Option<String>,
    },

    /// Click an element only if it shows up in time
    ClickIfPresent {
        target: TargetRef,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    CreateNote { content: String },

    OpenItemMenu {
        #[serde(default)]
        item: Option<String>,
    },

    ChooseMenuAction {
        entry: MenuAction,
        /// Skip silently when the entry is not offered
        #[serde(default)]
        optional: bool,
    },

    DeleteItem { item: String },

    AddComment {
        #[serde(default)]
        item: Option<String>,
        text: String,
    },

    EditItem {
        #[serde(default)]
        item: Option<String>,
        text: String,
    },

    CancelEditor,

    /// Register an interception rule; must precede the triggering action
    Intercept {
        method: String,
        url: String,
        alias: String,
        #[serde(default)]
        stub: Option<StubResponse>,
    },

    /// Wait for the next call recorded under an alias
    WaitForCall {
        alias: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        status: Option<u16>,
    },

    /// Check the status of the last call awaited for an alias
    AssertStatus { alias: String, status: u16 },

    /// Store the current number of matches in a variable
    CaptureCount {
        target: TargetRef,
        into: String,
        #[serde(default)]
        contains: Option<String>,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Log a message (for debugging)
    Log { message: String },

    /// Assert something about a target; retried until the default timeout
    Assert {
        target: TargetRef,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        within: Option<String>,
        #[serde(default)]
        exists: Option<bool>,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        count_at_least: Option<Bound>,
        #[serde(default)]
        count_at_most: Option<Bound>,
        #[serde(default)]
        text_contains: Option<String>,
        /// An absent target passes instead of failing
        #[serde(default)]
        optional: bool,
    },
}

/// A count bound: a literal or a `${var}` captured earlier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Count(usize),
    Var(String),
}

impl Bound {
    /// Numeric value once templates are expanded
    pub fn resolve(&self) -> E2eResult<usize> {
        match self {
            Bound::Count(n) => Ok(*n),
            Bound::Var(raw) => raw
                .trim()
                .parse()
                .map_err(|_| E2eError::Template(format!("`{}` is not a count", raw))),
        }
    }
}

impl TestStep {
    /// Short name used in logs and reports
    pub fn name(&self) -> String {
        match self {
            TestStep::Navigate { url } => format!("navigate {}", url),
            TestStep::Click { target, .. } => format!("click {}", target_label(target)),
            TestStep::DoubleClick { target, .. } => format!("double_click {}", target_label(target)),
            TestStep::Type { target, .. } => format!("type {}", target_label(target)),
            TestStep::ClickIfPresent { target, .. } => {
                format!("click_if_present {}", target_label(target))
            }
            TestStep::CreateNote { .. } => "create_note".to_string(),
            TestStep::OpenItemMenu { item } => {
                format!("open_item_menu {}", item.as_deref().unwrap_or("<first>"))
            }
            TestStep::ChooseMenuAction { entry, .. } => format!("choose_menu_action {:?}", entry),
            TestStep::DeleteItem { item } => format!("delete_item {}", item),
            TestStep::AddComment { .. } => "add_comment".to_string(),
            TestStep::EditItem { .. } => "edit_item".to_string(),
            TestStep::CancelEditor => "cancel_editor".to_string(),
            TestStep::Intercept { method, url, alias, .. } => {
                format!("intercept {} {} as @{}", method, url, alias.trim_start_matches('@'))
            }
            TestStep::WaitForCall { alias, .. } => format!("wait_for_call {}", alias),
            TestStep::AssertStatus { alias, status } => format!("assert_status {} == {}", alias, status),
            TestStep::CaptureCount { into, .. } => format!("capture_count -> {}", into),
            TestStep::Sleep { ms } => format!("sleep {}ms", ms),
            TestStep::Log { .. } => "log".to_string(),
            TestStep::Assert { target, .. } => format!("assert {}", target_label(target)),
        }
    }

    /// Copy of this step with `${...}` placeholders replaced from `vars`.
    pub fn expand(&self, vars: &Vars) -> E2eResult<TestStep> {
        let mut value = serde_json::to_value(self)?;
        expand_value(&mut value, vars)?;
        Ok(serde_json::from_value(value)?)
    }
}

fn target_label(target: &TargetRef) -> String {
    match target {
        TargetRef::Named(name) => name.clone(),
        TargetRef::Inline(raw) => raw.join(", "),
    }
}

fn expand_value(value: &mut serde_json::Value, vars: &Vars) -> E2eResult<()> {
    match value {
        serde_json::Value::String(s) => *s = vars.expand(s)?,
        serde_json::Value::Array(items) => {
            for item in items {
                expand_value(item, vars)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                expand_value(item, vars)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap())
}

/// Scenario-scoped template variables
#[derive(Debug, Clone, Default)]
pub struct Vars(HashMap<String, String>);

impl Vars {
    /// Fresh variables for one scenario; `uid` is a millisecond timestamp.
    pub fn for_scenario() -> Self {
        let mut vars = Self::default();
        vars.set("uid", chrono::Utc::now().timestamp_millis().to_string());
        vars
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Replace every `${name}`; an unknown name is an error.
    pub fn expand(&self, input: &str) -> E2eResult<String> {
        let re = placeholder();
        if !re.is_match(input) {
            return Ok(input.to_string());
        }
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in re.captures_iter(input) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let name = &caps[1];
            let value = self
                .get(name)
                .ok_or_else(|| E2eError::Template(format!("undefined variable `{}`", name)))?;
            out.push_str(&input[last..whole.start]);
            out.push_str(value);
            last = whole.end;
        }
        out.push_str(&input[last..]);
        Ok(out)
    }
}

impl TestSpec {
    /// Parse a suite from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all suites from a directory, in file-name order
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::Config(format!(
                "specs directory {} does not exist",
                dir.display()
            )));
        }

        let mut specs = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }
        Ok(specs)
    }

    /// Keep scenarios matching the tag and title filters. A tag matches the
    /// scenario's own tags or its suite's; the title filter is a substring.
    /// Suites left without scenarios are dropped.
    pub fn filter(specs: Vec<Self>, tag: Option<&str>, title: Option<&str>) -> Vec<Self> {
        specs
            .into_iter()
            .filter_map(|mut spec| {
                let suite_tagged = tag.map_or(false, |t| spec.tags.iter().any(|s| s == t));
                spec.scenarios.retain(|scenario| {
                    let tag_ok = match tag {
                        None => true,
                        Some(t) => suite_tagged || scenario.tags.iter().any(|s| s == t),
                    };
                    let title_ok = title.map_or(true, |needle| scenario.title.contains(needle));
                    tag_ok && title_ok
                });
                (!spec.scenarios.is_empty()).then_some(spec)
            })
            .collect()
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }
}
