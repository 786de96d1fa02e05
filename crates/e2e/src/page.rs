//! The browser surface the harness drives
//!
//! Everything above this trait (primitives, runner, hooks) is written against
//! [`Page`]; [`crate::playwright::PlaywrightSession`] is the production
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::E2eResult;

/// Opaque reference to a live DOM element. Handles are invalidated by navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Load `url` and wait for the load event
    async fn goto(&self, url: &str) -> E2eResult<()>;

    /// All elements matching a CSS selector, in document order. With a
    /// scope, only descendants of that element are returned.
    async fn query_all(
        &self,
        css: &str,
        scope: Option<&ElementHandle>,
    ) -> E2eResult<Vec<ElementHandle>>;

    /// Rendered text; the current value for form fields
    async fn text(&self, element: &ElementHandle) -> E2eResult<String>;

    async fn is_visible(&self, element: &ElementHandle) -> E2eResult<bool>;

    async fn is_enabled(&self, element: &ElementHandle) -> E2eResult<bool>;

    async fn click(&self, element: &ElementHandle) -> E2eResult<()>;

    async fn double_click(&self, element: &ElementHandle) -> E2eResult<()>;

    async fn clear(&self, element: &ElementHandle) -> E2eResult<()>;

    /// Type text key by key; `\n` is sent as Enter
    async fn type_text(&self, element: &ElementHandle, text: &str) -> E2eResult<()>;

    /// Uncaught application errors seen since the last call
    fn drain_page_errors(&self) -> Vec<String>;
}
