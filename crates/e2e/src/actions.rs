//! Reusable UI workflows built on [`Page`]
//!
//! Every wait here is bounded by the suite configuration. Lookups resolve a
//! [`Target`] by taking the first selector alternative that currently matches.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};
use crate::page::{ElementHandle, Page};
use crate::target::{catalog, Selector, Target};

/// Entries of a note's contextual menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    Delete,
    Comment,
    Relations,
    Edit,
}

impl MenuAction {
    /// Labels the UI may render for this entry, in any supported locale
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            MenuAction::Delete => &["删除", "Delete"],
            MenuAction::Comment => &["评论", "Comment"],
            MenuAction::Relations => &["关系", "查看评论", "Relations"],
            MenuAction::Edit => &["编辑", "Edit"],
        }
    }
}

pub struct Actions<'a> {
    page: &'a dyn Page,
    config: &'a SuiteConfig,
}

impl<'a> Actions<'a> {
    pub fn new(page: &'a dyn Page, config: &'a SuiteConfig) -> Self {
        Self { page, config }
    }

    pub fn config(&self) -> &SuiteConfig {
        self.config
    }

    /// Poll `probe` until it yields a value or `timeout` runs out.
    /// Driver errors (stale handles during re-render) count as "not yet".
    pub async fn poll<T, F, Fut>(&self, timeout: Duration, mut probe: F) -> E2eResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<Option<T>>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match probe().await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(E2eError::Driver(msg)) => debug!("transient driver error: {}", msg),
                Err(e) => return Err(e),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.config.poll_interval().min(deadline - now)).await;
        }
    }

    async fn query(&self, selector: &Selector, scope: Option<&ElementHandle>) -> E2eResult<Vec<ElementHandle>> {
        let found = self.page.query_all(&selector.css, scope).await?;
        let Some(needle) = &selector.contains else {
            return Ok(found);
        };
        let mut matching = Vec::new();
        for element in found {
            if self.page.text(&element).await?.contains(needle.as_str()) {
                matching.push(element);
            }
        }
        Ok(matching)
    }

    /// Elements of the first alternative with a current match; empty if none.
    pub async fn find_all(&self, target: &Target, scope: Option<&ElementHandle>) -> E2eResult<Vec<ElementHandle>> {
        for selector in &target.alternatives {
            let found = self.query(selector, scope).await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    /// First element of the first matching alternative, without waiting.
    pub async fn locate(&self, target: &Target, scope: Option<&ElementHandle>) -> E2eResult<ElementHandle> {
        self.find_all(target, scope)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| E2eError::NotFound(target.to_string()))
    }

    async fn first_visible(&self, target: &Target, scope: Option<&ElementHandle>) -> E2eResult<(bool, Option<ElementHandle>)> {
        let found = self.find_all(target, scope).await?;
        let any = !found.is_empty();
        for element in found {
            if self.page.is_visible(&element).await? {
                return Ok((any, Some(element)));
            }
        }
        Ok((any, None))
    }

    /// Wait for a visible element of `target`.
    pub async fn wait_visible(
        &self,
        target: &Target,
        scope: Option<&ElementHandle>,
        timeout: Duration,
    ) -> E2eResult<ElementHandle> {
        let seen = AtomicBool::new(false);
        let seen_ref = &seen;
        let found = self
            .poll(timeout, move || async move {
                let (any, visible) = self.first_visible(target, scope).await?;
                if any {
                    seen_ref.store(true, Ordering::Relaxed);
                }
                Ok(visible)
            })
            .await?;

        match found {
            Some(element) => Ok(element),
            None if seen.load(Ordering::Relaxed) => Err(E2eError::NotVisible(target.to_string())),
            None => Err(E2eError::NotFound(target.to_string())),
        }
    }

    /// Wait until `target` has no visible element left.
    pub async fn wait_gone(&self, target: &Target, scope: Option<&ElementHandle>, timeout: Duration) -> E2eResult<()> {
        let gone = self
            .poll(timeout, move || async move {
                let (_, visible) = self.first_visible(target, scope).await?;
                Ok(visible.is_none().then_some(()))
            })
            .await?;
        gone.ok_or_else(|| E2eError::timeout(format!("{} to disappear", target), timeout))
    }

    pub async fn count(&self, target: &Target, scope: Option<&ElementHandle>) -> E2eResult<usize> {
        Ok(self.find_all(target, scope).await?.len())
    }

    pub async fn click(&self, target: &Target, scope: Option<&ElementHandle>) -> E2eResult<()> {
        let element = self
            .wait_visible(target, scope, self.config.default_timeout())
            .await?;
        debug!("click {}", target);
        self.page.click(&element).await
    }

    pub async fn double_click(&self, target: &Target, scope: Option<&ElementHandle>) -> E2eResult<()> {
        let element = self
            .wait_visible(target, scope, self.config.default_timeout())
            .await?;
        debug!("dblclick {}", target);
        self.page.double_click(&element).await
    }

    /// Type into a visible element; `NotVisible` if it never shows.
    pub async fn type_into(
        &self,
        target: &Target,
        scope: Option<&ElementHandle>,
        text: &str,
        clear_first: bool,
    ) -> E2eResult<()> {
        let element = self
            .wait_visible(target, scope, self.config.default_timeout())
            .await?;
        if clear_first {
            self.page.clear(&element).await?;
        }
        debug!("type {} chars into {}", text.chars().count(), target);
        self.page.type_text(&element, text).await
    }

    /// Click `target` if it becomes visible within `timeout`. Absence is not
    /// an error: the result tells the caller which branch happened.
    pub async fn click_if_present(&self, target: &Target, timeout: Duration) -> E2eResult<bool> {
        let found = self
            .poll(timeout, move || async move {
                let (_, visible) = self.first_visible(target, None).await?;
                Ok(visible)
            })
            .await?;

        match found {
            Some(element) => {
                debug!("optional {} present, clicking", target);
                self.page.click(&element).await?;
                Ok(true)
            }
            None => {
                debug!("optional {} absent", target);
                Ok(false)
            }
        }
    }

    async fn innermost_item(&self, matcher: Option<&str>) -> E2eResult<Option<ElementHandle>> {
        let items = Target::named(catalog::NOTE_ITEM)?.containing(matcher);
        let found = self.find_all(&items, None).await?;
        if matcher.is_none() {
            return Ok(found.into_iter().next());
        }
        // Items can nest (a note carrying its comments); the shortest text is the innermost
        let mut best: Option<(usize, ElementHandle)> = None;
        for element in found {
            let len = self.page.text(&element).await?.chars().count();
            if best.as_ref().map_or(true, |(best_len, _)| len < *best_len) {
                best = Some((len, element));
            }
        }
        Ok(best.map(|(_, element)| element))
    }

    /// The list item whose text contains `matcher`, or the first item.
    pub async fn find_item(&self, matcher: Option<&str>) -> E2eResult<ElementHandle> {
        let found = self
            .poll(self.config.default_timeout(), move || self.innermost_item(matcher))
            .await?;
        found.ok_or_else(|| {
            E2eError::NotFound(match matcher {
                Some(m) => format!("note item containing \"{}\"", m),
                None => "any note item".to_string(),
            })
        })
    }

    /// Open the contextual menu of one item. The toggle is looked up inside
    /// that item only, since every item renders identical controls.
    pub async fn open_item_menu(&self, matcher: Option<&str>) -> E2eResult<ElementHandle> {
        let item = self.find_item(matcher).await?;
        let toggle = Target::named(catalog::ITEM_MENU_TOGGLE)?;
        self.click(&toggle, Some(&item)).await?;
        Ok(item)
    }

    async fn menu_entry(&self, action: MenuAction) -> E2eResult<Option<ElementHandle>> {
        let entries = Target::named(catalog::MENU_ENTRY)?;
        for element in self.find_all(&entries, None).await? {
            if !self.page.is_visible(&element).await? {
                continue;
            }
            let text = self.page.text(&element).await?;
            if action.labels().iter().any(|label| text.contains(label)) {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// Select the open menu's entry for `action`.
    pub async fn choose_menu_action(&self, action: MenuAction) -> E2eResult<()> {
        if self.choose_menu_action_within(action, self.config.default_timeout()).await? {
            Ok(())
        } else {
            Err(E2eError::NotFound(format!("menu entry {:?}", action)))
        }
    }

    /// Like [`Self::choose_menu_action`], but a missing entry yields `false`.
    pub async fn choose_menu_action_within(&self, action: MenuAction, timeout: Duration) -> E2eResult<bool> {
        match self.poll(timeout, move || self.menu_entry(action)).await? {
            Some(entry) => {
                debug!("menu -> {:?}", action);
                self.page.click(&entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Open the creation surface, type `content`, submit, and wait for the
    /// editor to close.
    pub async fn create_note(&self, content: &str) -> E2eResult<()> {
        info!("create note: {}", preview(content));
        self.click(&Target::named(catalog::CREATE_FAB)?, None).await?;
        self.type_into(&Target::named(catalog::EDITOR_INPUT)?, None, content, false)
            .await?;

        let submit_target = Target::named(catalog::EDITOR_SUBMIT)?;
        let submit_ref = &submit_target;
        let submit = self
            .poll(self.config.default_timeout(), move || async move {
                let (_, visible) = self.first_visible(submit_ref, None).await?;
                match visible {
                    Some(element) if self.page.is_enabled(&element).await? => Ok(Some(element)),
                    _ => Ok(None),
                }
            })
            .await?
            .ok_or_else(|| E2eError::SubmitFailed(submit_target.to_string()))?;
        self.page.click(&submit).await?;

        self.wait_gone(&submit_target, None, self.config.response_timeout())
            .await
    }

    /// Comment on an item (or the first item) and wait for the comment editor to close.
    pub async fn add_comment(&self, matcher: Option<&str>, text: &str) -> E2eResult<()> {
        info!("comment on {}: {}", matcher.unwrap_or("first item"), preview(text));
        self.open_item_menu(matcher).await?;
        self.choose_menu_action(MenuAction::Comment).await?;
        self.type_into(&Target::named(catalog::COMMENT_INPUT)?, None, text, false)
            .await?;
        self.click(&Target::named(catalog::COMMENT_SUBMIT)?, None).await?;
        self.wait_gone(
            &Target::named(catalog::COMMENT_EDITOR)?,
            None,
            self.config.response_timeout(),
        )
        .await
    }

    /// Open an item in the editor by double-click, replace its text and submit.
    pub async fn edit_item(&self, matcher: Option<&str>, text: &str) -> E2eResult<()> {
        info!("edit {}: {}", matcher.unwrap_or("first item"), preview(text));
        let item = self.find_item(matcher).await?;
        self.page.double_click(&item).await?;

        let editor = Target::named(catalog::EDITOR)?;
        self.wait_visible(&editor, None, self.config.default_timeout())
            .await?;
        self.type_into(&Target::named(catalog::EDIT_INPUT)?, None, text, true)
            .await?;
        let submit = Target::named(catalog::EDIT_SUBMIT)?;
        self.click(&submit, None).await?;
        self.wait_gone(&submit, None, self.config.response_timeout())
            .await
    }

    /// Close whichever editor is open without submitting.
    pub async fn cancel_editor(&self) -> E2eResult<()> {
        self.click(&Target::named(catalog::CANCEL_BUTTON)?, None).await
    }

    /// Delete the item containing `matcher`: menu, delete entry, optional
    /// confirmation, then wait for the list to drop it.
    pub async fn delete_item(&self, matcher: &str) -> E2eResult<()> {
        info!("delete note: {}", preview(matcher));
        self.open_item_menu(Some(matcher)).await?;
        self.choose_menu_action(MenuAction::Delete).await?;

        let confirm = Target::named(catalog::CONFIRM_BUTTON)?;
        if !self
            .click_if_present(&confirm, self.config.optional_timeout())
            .await?
        {
            debug!("no confirmation dialog, treating delete as confirmed");
        }

        let items = Target::named(catalog::NOTE_ITEM)?.containing(Some(matcher));
        let items_ref = &items;
        let gone = self
            .poll(self.config.default_timeout(), move || async move {
                Ok(self.find_all(items_ref, None).await?.is_empty().then_some(()))
            })
            .await?;
        gone.ok_or_else(|| E2eError::DeleteNotReflected(matcher.to_string()))
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(40).collect();
    if text.chars().count() > 40 {
        out.push('…');
    }
    out.replace('\n', "⏎")
}
