//! Semantic element descriptors
//!
//! The notes UI renders the same concept with different markup depending on
//! state (modal editor vs inline editor, dropdown vs context menu). A
//! [`Target`] names the concept and lists the selector alternatives that may
//! represent it; the first alternative with a current match wins.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{E2eError, E2eResult};

/// One CSS selector, optionally narrowed to elements whose text contains a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub css: String,
    pub contains: Option<String>,
}

impl Selector {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            contains: None,
        }
    }

    /// Parse `css` or `css:contains("text")`.
    pub fn parse(raw: &str) -> E2eResult<Self> {
        let raw = raw.trim();
        let Some(start) = raw.find(":contains(") else {
            if raw.is_empty() {
                return Err(E2eError::SpecParse("empty selector".into()));
            }
            return Ok(Self::css(raw));
        };

        let css = raw[..start].trim();
        let rest = &raw[start + ":contains(".len()..];
        let inner = rest
            .strip_suffix(')')
            .ok_or_else(|| E2eError::SpecParse(format!("unterminated :contains in `{}`", raw)))?;
        let text = unquote(inner.trim());

        Ok(Self {
            // A bare `:contains(...)` applies to any element
            css: if css.is_empty() { "*".to_string() } else { css.to_string() },
            contains: Some(text.to_string()),
        })
    }

    /// Same selector with an extra text filter. An existing filter is kept.
    pub fn with_contains(&self, text: Option<&str>) -> Self {
        match (&self.contains, text) {
            (None, Some(t)) => Self {
                css: self.css.clone(),
                contains: Some(t.to_string()),
            },
            _ => self.clone(),
        }
    }
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contains {
            Some(text) => write!(f, "{}:contains(\"{}\")", self.css, text),
            None => f.write_str(&self.css),
        }
    }
}

/// A named UI concept resolved against ordered selector alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub alternatives: Vec<Selector>,
}

impl Target {
    pub fn new(name: impl Into<String>, alternatives: Vec<Selector>) -> Self {
        Self {
            name: name.into(),
            alternatives,
        }
    }

    /// Build an ad-hoc target from raw selector strings.
    pub fn inline(raw: &[impl AsRef<str>]) -> E2eResult<Self> {
        let alternatives = raw
            .iter()
            .map(|s| Selector::parse(s.as_ref()))
            .collect::<E2eResult<Vec<_>>>()?;
        if alternatives.is_empty() {
            return Err(E2eError::SpecParse("target has no selectors".into()));
        }
        let name = alternatives
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Self { name, alternatives })
    }

    /// Look up a target in the built-in catalog.
    pub fn named(name: &str) -> E2eResult<Self> {
        catalog::lookup(name).ok_or_else(|| E2eError::UnknownTarget(name.to_string()))
    }

    /// Narrow every alternative to elements containing `text`.
    pub fn containing(&self, text: Option<&str>) -> Self {
        let Some(t) = text else {
            return self.clone();
        };
        Self {
            name: format!("{}:contains(\"{}\")", self.name, t),
            alternatives: self
                .alternatives
                .iter()
                .map(|s| s.with_contains(Some(t)))
                .collect(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// How a step refers to a target: a catalog name or inline selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetRef {
    Named(String),
    Inline(Vec<String>),
}

impl TargetRef {
    pub fn resolve(&self) -> E2eResult<Target> {
        match self {
            TargetRef::Named(name) => Target::named(name),
            TargetRef::Inline(raw) => Target::inline(raw),
        }
    }
}

/// Built-in descriptors for the notes UI.
pub mod catalog {
    use super::{Selector, Target};

    pub const APP_ROOT: &str = "app_root";
    pub const NOTE_LIST: &str = "note_list";
    pub const NOTE_ITEM: &str = "note_item";
    pub const CREATE_FAB: &str = "create_fab";
    pub const EDITOR: &str = "editor";
    pub const EDITOR_INPUT: &str = "editor_input";
    pub const EDITOR_SUBMIT: &str = "editor_submit";
    pub const EDIT_INPUT: &str = "edit_input";
    pub const EDIT_SUBMIT: &str = "edit_submit";
    pub const CANCEL_BUTTON: &str = "cancel_button";
    pub const ITEM_MENU_TOGGLE: &str = "item_menu_toggle";
    pub const MENU_ENTRY: &str = "menu_entry";
    pub const CONFIRM_BUTTON: &str = "confirm_button";
    pub const COMMENT_EDITOR: &str = "comment_editor";
    pub const COMMENT_INPUT: &str = "comment_input";
    pub const COMMENT_SUBMIT: &str = "comment_submit";
    pub const COMMENT_CANCEL: &str = "comment_cancel";

    const ENTRIES: &[(&str, &[&str])] = &[
        (APP_ROOT, &["#app", "body"]),
        ("body", &["body"]),
        (NOTE_LIST, &[".note-list", ".notes-container"]),
        (NOTE_ITEM, &[".note-list .note-item", ".notes-container .note-item"]),
        (CREATE_FAB, &["[data-testid=\"inbox-fab\"]"]),
        (EDITOR, &[".note-editor", ".editor-container"]),
        (
            EDITOR_INPUT,
            &[
                ".note-editor-container textarea",
                ".modal-content textarea",
                "[contenteditable=\"true\"]",
            ],
        ),
        (
            EDITOR_SUBMIT,
            &[".submit-btn", ".editor-wrapper button", "button.submit-btn"],
        ),
        (
            EDIT_INPUT,
            &[
                ".note-editor .editor-content",
                ".editor-container .editor-content",
                "[contenteditable=\"true\"]",
            ],
        ),
        (
            EDIT_SUBMIT,
            &[
                ".submit-button",
                "button:contains(\"提交\")",
                "button:contains(\"保存\")",
            ],
        ),
        (CANCEL_BUTTON, &[".cancel-button", "button:contains(\"取消\")"]),
        (
            ITEM_MENU_TOGGLE,
            &[".dropdown-toggle", ".menu-toggle", "button:contains(\"...\")"],
        ),
        (MENU_ENTRY, &[".dropdown-menu li", ".menu-item"]),
        (
            CONFIRM_BUTTON,
            &[
                "button.confirm-delete",
                "button:contains(\"确认\")",
                "button:contains(\"确定\")",
            ],
        ),
        (COMMENT_EDITOR, &[".comment-editor", ".editor-container.comment"]),
        (
            COMMENT_INPUT,
            &[
                ".comment-editor .editor-content",
                ".editor-container.comment .editor-content",
                "[contenteditable=\"true\"]",
            ],
        ),
        (
            COMMENT_SUBMIT,
            &[
                ".comment-editor .submit-button",
                ".editor-container.comment button:contains(\"提交\")",
                "button:contains(\"评论\")",
            ],
        ),
        (
            COMMENT_CANCEL,
            &[
                ".comment-editor .cancel-button",
                ".editor-container.comment button:contains(\"取消\")",
            ],
        ),
        (
            "comment_item",
            &[".comments-container .comment-item", ".comment-list .comment-item"],
        ),
        ("relations_panel", &[".relations-container", ".comments-container"]),
        ("tag_filter", &[".tag-filter", ".sidebar .tag-list", ".tags-container"]),
        ("tag", &[".tag"]),
        (
            "tag_highlight",
            &[".content-tag", ".tag-highlight", "span[data-tag=\"true\"]"],
        ),
        (
            "status_connected",
            &[".status-connected", ".status-icon:contains(\"✅\")"],
        ),
    ];

    pub fn lookup(name: &str) -> Option<Target> {
        ENTRIES.iter().find(|(n, _)| *n == name).map(|(n, raw)| {
            let alternatives = raw
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect();
            Target::new(*n, alternatives)
        })
    }

    /// All catalog names, in declaration order
    pub fn names() -> impl Iterator<Item = &'static str> {
        ENTRIES.iter().map(|(n, _)| *n)
    }
}
