//! In-memory notes client implementing `Page`, for driving the harness
//! without a browser.
//!
//! The DOM is rebuilt from app state on every query, so element handles are
//! stable string ids ("note-3", "note-3-toggle", "editor-submit", ...).
//! HTTP calls the real client would make go through the shared `Interceptor`.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use notes_e2e::config::SuiteConfig;
use notes_e2e::network::{Interceptor, RouteDecision};
use notes_e2e::{E2eError, E2eResult, ElementHandle, Page};

/// Suite settings with short waits so failing paths finish quickly
pub fn fast_config() -> SuiteConfig {
    SuiteConfig {
        default_timeout_ms: 300,
        response_timeout_ms: 300,
        optional_timeout_ms: 60,
        poll_interval_ms: 5,
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct FakeOptions {
    /// Ask for confirmation before deleting
    pub confirm_dialog: bool,
    /// Whether the create editor's submit button can ever be enabled
    pub submit_enabled: bool,
    /// Uncaught error raised on every page load
    pub error_on_load: Option<String>,
    /// Every navigation fails as if the browser went away
    pub browser_gone: bool,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            confirm_dialog: true,
            submit_enabled: true,
            error_on_load: None,
            browser_gone: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Note {
    id: u64,
    content: String,
    parent: Option<u64>,
    comments: Vec<u64>,
}

#[derive(Debug, Default)]
struct AppState {
    loaded: bool,
    /// Newest first
    notes: Vec<Note>,
    next_id: u64,
    menu_open: Option<u64>,
    create_open: bool,
    draft: String,
    editing: Option<(u64, String)>,
    commenting: Option<(u64, String)>,
    pending_delete: Option<u64>,
    relations_open: Option<u64>,
    tag_filter: Option<String>,
    page_errors: Vec<String>,
    /// (method, path, status) of every request the client sent
    requests: Vec<(String, String, u16)>,
}

impl AppState {
    fn note(&self, id: u64) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    fn all_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for note in &self.notes {
            for tag in extract_tags(&note.content) {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }
        tags
    }

    fn close_overlays(&mut self) {
        self.menu_open = None;
        self.create_open = false;
        self.editing = None;
        self.commenting = None;
        self.pending_delete = None;
    }
}

fn extract_tags(text: &str) -> Vec<String> {
    text.split('#')
        .skip(1)
        .map(|part| part.chars().take_while(|c| !c.is_whitespace()).collect::<String>())
        .filter(|tag| !tag.is_empty())
        .collect()
}

pub struct FakeNotesApp {
    state: Mutex<AppState>,
    options: FakeOptions,
    interceptor: Arc<Interceptor>,
    base_url: String,
}

impl FakeNotesApp {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self::with_options(interceptor, FakeOptions::default())
    }

    pub fn with_options(interceptor: Arc<Interceptor>, options: FakeOptions) -> Self {
        let app = Self {
            state: Mutex::new(AppState {
                next_id: 1,
                ..Default::default()
            }),
            options,
            interceptor,
            base_url: SuiteConfig::default().base_url,
        };
        app.seed("欢迎使用收件箱 #入门");
        app.seed("第一条测试笔记 #测试");
        app
    }

    /// Add a note straight to the backend, as if created elsewhere
    pub fn seed(&self, content: &str) -> u64 {
        let mut s = self.state.lock();
        let id = s.next_id;
        s.next_id += 1;
        s.notes.insert(
            0,
            Note {
                id,
                content: content.to_string(),
                parent: None,
                comments: Vec::new(),
            },
        );
        id
    }

    pub fn contents(&self) -> Vec<String> {
        self.state.lock().notes.iter().map(|n| n.content.clone()).collect()
    }

    pub fn has_note(&self, needle: &str) -> bool {
        self.contents().iter().any(|c| c.contains(needle))
    }

    /// Content of the note whose menu is open
    pub fn open_menu_for(&self) -> Option<String> {
        let s = self.state.lock();
        s.menu_open.and_then(|id| s.note(id)).map(|n| n.content.clone())
    }

    pub fn comments_of(&self, needle: &str) -> Vec<String> {
        let s = self.state.lock();
        s.notes
            .iter()
            .find(|n| n.content.contains(needle))
            .map(|n| {
                n.comments
                    .iter()
                    .filter_map(|id| s.note(*id))
                    .map(|c| c.content.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<(String, String, u16)> {
        self.state.lock().requests.clone()
    }

    pub fn draft(&self) -> String {
        self.state.lock().draft.clone()
    }

    /// Send a request through the interceptor. `real` is what the backend
    /// would answer if the call is not stubbed.
    fn send(&self, s: &mut AppState, method: &str, path: &str, real: u16, body: &str) -> u16 {
        let url = format!("{}{}", self.base_url, path);
        let status = match self.interceptor.route(method, &url) {
            RouteDecision::PassThrough => real,
            RouteDecision::Observe(ticket) => {
                self.interceptor.complete(ticket, real, body.to_string());
                real
            }
            RouteDecision::Fulfill(stub) => stub.status,
        };
        s.requests.push((method.to_string(), path.to_string(), status));
        status
    }

    fn refresh(&self, s: &mut AppState) {
        let body = serde_json::to_string(
            &s.notes.iter().map(|n| n.content.clone()).collect::<Vec<_>>(),
        )
        .unwrap_or_default();
        self.send(s, "GET", "/inbox/notes", 200, &body);
    }

    fn create(&self, s: &mut AppState, content: String, parent: Option<u64>) -> bool {
        let status = self.send(s, "POST", "/inbox/notes", 200, "{}");
        if status >= 400 {
            return false;
        }
        let id = s.next_id;
        s.next_id += 1;
        s.notes.insert(
            0,
            Note {
                id,
                content,
                parent,
                comments: Vec::new(),
            },
        );
        if let Some(pid) = parent {
            if let Some(p) = s.notes.iter_mut().find(|n| n.id == pid) {
                p.comments.push(id);
            }
        }
        self.refresh(s);
        true
    }

    fn delete(&self, s: &mut AppState, id: u64) {
        let status = self.send(s, "DELETE", &format!("/inbox/notes/{}", id), 200, "{}");
        if status >= 400 {
            s.page_errors.push(format!("删除失败: HTTP {}", status));
            return;
        }
        s.notes.retain(|n| n.id != id);
        for note in s.notes.iter_mut() {
            note.comments.retain(|c| *c != id);
        }
        self.refresh(s);
    }

    fn render(&self, s: &AppState) -> Node {
        let mut app = Node::new("app", "div", &[]);
        if s.loaded {
            app = app
                .child(Node::new("status", "span", &["status-connected"]).text("✅"))
                .child(self.render_tags(s))
                .child(self.render_list(s))
                .child(
                    Node::new("fab", "button", &["fab"])
                        .attr("data-testid", "inbox-fab")
                        .text("+"),
                );
            if s.create_open {
                app = app.child(render_create_editor(&s.draft));
            }
            if let Some((_, buffer)) = &s.editing {
                app = app.child(
                    Node::new("edit-editor", "div", &["note-editor"])
                        .child(
                            Node::new("edit-input", "div", &["editor-content"])
                                .attr("contenteditable", "true")
                                .text(buffer),
                        )
                        .child(Node::new("edit-submit", "button", &["submit-button"]).text("保存"))
                        .child(Node::new("edit-cancel", "button", &["cancel-button"]).text("取消")),
                );
            }
            if let Some((_, buffer)) = &s.commenting {
                app = app.child(
                    Node::new("comment-editor", "div", &["comment-editor"])
                        .child(
                            Node::new("comment-input", "div", &["editor-content"])
                                .attr("contenteditable", "true")
                                .text(buffer),
                        )
                        .child(Node::new("comment-submit", "button", &["submit-button"]).text("评论"))
                        .child(Node::new("comment-cancel", "button", &["cancel-button"]).text("取消")),
                );
            }
            if s.pending_delete.is_some() {
                app = app.child(
                    Node::new("confirm-dialog", "div", &["modal"])
                        .child(Node::new("confirm-message", "p", &[]).text("删除这条笔记吗？"))
                        .child(Node::new("confirm", "button", &["confirm-delete"]).text("确定")),
                );
            }
            app = app.child(
                Node::new("hidden-input", "div", &["hidden-input"])
                    .hidden()
                    .child(Node::new("hidden-textarea", "textarea", &[])),
            );
        }
        Node::new("body", "body", &[]).child(app)
    }

    fn render_tags(&self, s: &AppState) -> Node {
        let mut filter = Node::new("tag-filter", "div", &["tag-filter"]);
        for (i, tag) in s.all_tags().iter().enumerate() {
            filter = filter.child(Node::new(format!("tag-{}", i), "span", &["tag"]).text(format!("#{}", tag)));
        }
        filter
    }

    fn render_list(&self, s: &AppState) -> Node {
        let mut list = Node::new("note-list", "div", &["note-list"]);
        for note in &s.notes {
            if let Some(tag) = &s.tag_filter {
                if !extract_tags(&note.content).contains(tag) {
                    continue;
                }
            }
            list = list.child(self.render_item(s, note));
        }
        list
    }

    fn render_item(&self, s: &AppState, note: &Note) -> Node {
        let id = note.id;
        let mut item = Node::new(format!("note-{}", id), "div", &["note-item"])
            .child(Node::new(format!("note-{}-content", id), "div", &["note-content"]).text(&note.content))
            .child(Node::new(format!("note-{}-toggle", id), "button", &["dropdown-toggle"]).text("..."));

        if s.menu_open == Some(id) {
            let mut menu = Node::new(format!("note-{}-menu", id), "ul", &["dropdown-menu"]);
            for (action, label) in [("comment", "评论"), ("relations", "关系"), ("edit", "编辑"), ("delete", "删除")] {
                menu = menu.child(Node::new(format!("menu-{}-{}", id, action), "li", &[]).text(label));
            }
            item = item.child(menu);
        }

        let comments: Vec<&Note> = note.comments.iter().filter_map(|c| s.note(*c)).collect();
        if !comments.is_empty() {
            let mut container = Node::new(format!("note-{}-comments", id), "div", &["comments-container"]);
            for c in &comments {
                container = container
                    .child(Node::new(format!("comment-{}", c.id), "div", &["comment-item"]).text(&c.content));
            }
            item = item.child(container);
        }

        if s.relations_open == Some(id) {
            let mut relations = Node::new(format!("note-{}-relations", id), "div", &["relations-container"]);
            for c in &comments {
                relations = relations
                    .child(Node::new(format!("relation-{}", c.id), "div", &["relation-item"]).text(&c.content));
            }
            item = item.child(relations);
        }
        item
    }

    fn with_dom<T>(&self, f: impl FnOnce(&AppState, &[Flat<'_>]) -> E2eResult<T>) -> E2eResult<T> {
        let s = self.state.lock();
        let root = self.render(&s);
        let flat = flatten(&root);
        f(&s, &flat)
    }

    fn check_alive(&self) -> E2eResult<()> {
        if self.options.browser_gone {
            return Err(E2eError::BridgeClosed("fake browser is gone".into()));
        }
        Ok(())
    }

    fn click_id(&self, id: &str) {
        let mut s = self.state.lock();
        match id {
            "fab" => {
                s.close_overlays();
                s.create_open = true;
            }
            "editor-submit" => {
                let draft = s.draft.trim().to_string();
                if self.options.submit_enabled && !draft.is_empty() && self.create(&mut s, draft, None) {
                    s.draft.clear();
                    s.create_open = false;
                }
            }
            "editor-cancel" => s.create_open = false,
            "edit-submit" => {
                if let Some((nid, buffer)) = s.editing.take() {
                    let status = self.send(&mut s, "PUT", &format!("/inbox/notes/{}", nid), 200, "{}");
                    if status < 400 {
                        if let Some(note) = s.notes.iter_mut().find(|n| n.id == nid) {
                            note.content = buffer;
                        }
                        self.refresh(&mut s);
                    }
                }
            }
            "edit-cancel" => s.editing = None,
            "comment-submit" => {
                if let Some((parent, buffer)) = s.commenting.clone() {
                    if !buffer.trim().is_empty() && self.create(&mut s, buffer, Some(parent)) {
                        s.commenting = None;
                    }
                }
            }
            "comment-cancel" => s.commenting = None,
            "confirm" => {
                if let Some(nid) = s.pending_delete.take() {
                    self.delete(&mut s, nid);
                }
            }
            other => {
                if let Some(i) = other.strip_prefix("tag-").and_then(|i| i.parse::<usize>().ok()) {
                    s.tag_filter = s.all_tags().get(i).cloned();
                } else if let Some(nid) = other
                    .strip_prefix("note-")
                    .and_then(|rest| rest.strip_suffix("-toggle"))
                    .and_then(|n| n.parse::<u64>().ok())
                {
                    s.menu_open = Some(nid);
                } else if let Some((nid, action)) = other.strip_prefix("menu-").and_then(|rest| {
                    let (n, a) = rest.split_once('-')?;
                    Some((n.parse::<u64>().ok()?, a))
                }) {
                    s.menu_open = None;
                    match action {
                        "comment" => {
                            s.close_overlays();
                            s.commenting = Some((nid, String::new()));
                        }
                        "relations" => s.relations_open = Some(nid),
                        "edit" => {
                            let content = s.note(nid).map(|n| n.content.clone()).unwrap_or_default();
                            s.close_overlays();
                            s.editing = Some((nid, content));
                        }
                        "delete" if self.options.confirm_dialog => s.pending_delete = Some(nid),
                        "delete" => self.delete(&mut s, nid),
                        _ => {}
                    }
                }
            }
        }
    }

    fn buffer_mut<'a>(s: &'a mut AppState, id: &str) -> E2eResult<&'a mut String> {
        match id {
            "editor-input" if s.create_open => Ok(&mut s.draft),
            "edit-input" => s
                .editing
                .as_mut()
                .map(|(_, b)| b)
                .ok_or_else(|| E2eError::Driver("edit editor is closed".into())),
            "comment-input" => s
                .commenting
                .as_mut()
                .map(|(_, b)| b)
                .ok_or_else(|| E2eError::Driver("comment editor is closed".into())),
            other => Err(E2eError::Driver(format!("element {} is not editable", other))),
        }
    }
}

fn render_create_editor(draft: &str) -> Node {
    let mut editor = Node::new("create-editor", "div", &["note-editor", "note-editor-container"])
        .child(Node::new("editor-input", "textarea", &[]).text(draft));
    for (i, tag) in extract_tags(draft).iter().enumerate() {
        editor = editor.child(Node::new(format!("highlight-{}", i), "span", &["content-tag"]).text(format!("#{}", tag)));
    }
    editor
        .child(Node::new("editor-submit", "button", &["submit-btn"]))
        .child(Node::new("editor-cancel", "button", &["cancel-button"]).text("取消"))
}

#[async_trait]
impl Page for FakeNotesApp {
    async fn goto(&self, url: &str) -> E2eResult<()> {
        self.check_alive()?;
        let mut s = self.state.lock();
        s.close_overlays();
        s.draft.clear();
        s.relations_open = None;
        s.tag_filter = None;
        s.loaded = url.starts_with(&self.base_url);
        if let Some(message) = &self.options.error_on_load {
            s.page_errors.push(message.clone());
        }
        if s.loaded {
            self.refresh(&mut s);
        }
        Ok(())
    }

    async fn query_all(&self, css: &str, scope: Option<&ElementHandle>) -> E2eResult<Vec<ElementHandle>> {
        self.check_alive()?;
        let selector = CssSelector::parse(css)?;
        self.with_dom(|_, flat| {
            if let Some(scope) = scope {
                if !flat.iter().any(|f| f.node.id == scope.0) {
                    return Err(E2eError::Driver(format!("stale element handle {}", scope)));
                }
            }
            Ok(flat
                .iter()
                .filter(|f| scope.map_or(true, |sc| f.ancestors.iter().any(|a| a.id == sc.0)))
                .filter(|f| selector.matches(f))
                .map(|f| ElementHandle(f.node.id.clone()))
                .collect())
        })
    }

    async fn text(&self, element: &ElementHandle) -> E2eResult<String> {
        self.with_dom(|_, flat| Ok(find(flat, element)?.node.full_text()))
    }

    async fn is_visible(&self, element: &ElementHandle) -> E2eResult<bool> {
        self.with_dom(|_, flat| {
            let f = find(flat, element)?;
            Ok(!f.node.hidden && !f.ancestors.iter().any(|a| a.hidden))
        })
    }

    async fn is_enabled(&self, element: &ElementHandle) -> E2eResult<bool> {
        self.with_dom(|s, flat| {
            find(flat, element)?;
            Ok(match element.0.as_str() {
                "editor-submit" => self.options.submit_enabled && !s.draft.trim().is_empty(),
                _ => true,
            })
        })
    }

    async fn click(&self, element: &ElementHandle) -> E2eResult<()> {
        self.with_dom(|_, flat| find(flat, element).map(|_| ()))?;
        self.click_id(&element.0);
        Ok(())
    }

    async fn double_click(&self, element: &ElementHandle) -> E2eResult<()> {
        self.with_dom(|_, flat| find(flat, element).map(|_| ()))?;
        let nid = element
            .0
            .strip_prefix("note-")
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(nid) = nid {
            let mut s = self.state.lock();
            let content = s.note(nid).map(|n| n.content.clone()).unwrap_or_default();
            s.close_overlays();
            s.editing = Some((nid, content));
        }
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> E2eResult<()> {
        let mut s = self.state.lock();
        Self::buffer_mut(&mut s, &element.0)?.clear();
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> E2eResult<()> {
        let mut s = self.state.lock();
        Self::buffer_mut(&mut s, &element.0)?.push_str(text);
        Ok(())
    }

    fn drain_page_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().page_errors)
    }
}

// Minimal DOM and CSS matching: descendant combinators over compounds of
// tag, .class, #id, [attr] and [attr="value"].

#[derive(Debug, Clone)]
struct Node {
    id: String,
    tag: &'static str,
    classes: Vec<&'static str>,
    attrs: Vec<(&'static str, String)>,
    text: String,
    hidden: bool,
    children: Vec<Node>,
}

impl Node {
    fn new(id: impl Into<String>, tag: &'static str, classes: &[&'static str]) -> Self {
        Self {
            id: id.into(),
            tag,
            classes: classes.to_vec(),
            attrs: Vec::new(),
            text: String::new(),
            hidden: false,
            children: Vec::new(),
        }
    }

    fn text(mut self, text: impl AsRef<str>) -> Self {
        self.text = text.as_ref().to_string();
        self
    }

    fn attr(mut self, name: &'static str, value: &str) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }

    fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    fn full_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(self.text.clone());
        }
        for child in &self.children {
            let t = child.full_text();
            if !t.is_empty() {
                parts.push(t);
            }
        }
        parts.join(" ")
    }
}

struct Flat<'a> {
    node: &'a Node,
    /// Outermost first
    ancestors: Vec<&'a Node>,
}

fn flatten(root: &Node) -> Vec<Flat<'_>> {
    fn walk<'a>(node: &'a Node, ancestors: &mut Vec<&'a Node>, out: &mut Vec<Flat<'a>>) {
        out.push(Flat {
            node,
            ancestors: ancestors.clone(),
        });
        ancestors.push(node);
        for child in &node.children {
            walk(child, ancestors, out);
        }
        ancestors.pop();
    }
    let mut out = Vec::new();
    walk(root, &mut Vec::new(), &mut out);
    out
}

fn find<'f, 'a>(flat: &'f [Flat<'a>], element: &ElementHandle) -> E2eResult<&'f Flat<'a>> {
    flat.iter()
        .find(|f| f.node.id == element.0)
        .ok_or_else(|| E2eError::Driver(format!("stale element handle {}", element)))
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    classes: Vec<String>,
    ids: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl Compound {
    fn parse(raw: &str) -> E2eResult<Self> {
        let mut compound = Compound::default();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        let ident = |i: &mut usize| {
            let start = *i;
            while *i < chars.len() && (chars[*i].is_alphanumeric() || chars[*i] == '-' || chars[*i] == '_') {
                *i += 1;
            }
            chars[start..*i].iter().collect::<String>()
        };

        if i < chars.len() && chars[i] == '*' {
            i += 1;
        } else {
            let tag = ident(&mut i);
            if !tag.is_empty() {
                compound.tag = Some(tag);
            }
        }

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    compound.classes.push(ident(&mut i));
                }
                '#' => {
                    i += 1;
                    compound.ids.push(ident(&mut i));
                }
                '[' => {
                    let end = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| i + p)
                        .ok_or_else(|| E2eError::Driver(format!("bad selector {}", raw)))?;
                    let inner: String = chars[i + 1..end].iter().collect();
                    match inner.split_once('=') {
                        Some((name, value)) => compound.attrs.push((
                            name.trim().to_string(),
                            Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                        )),
                        None => compound.attrs.push((inner.trim().to_string(), None)),
                    }
                    i = end + 1;
                }
                other => return Err(E2eError::Driver(format!("unsupported selector char {:?} in {}", other, raw))),
            }
        }
        Ok(compound)
    }

    fn matches(&self, node: &Node) -> bool {
        self.tag.as_deref().map_or(true, |t| t == node.tag)
            && self.classes.iter().all(|c| node.classes.contains(&c.as_str()))
            && self.ids.iter().all(|id| *id == node.id)
            && self.attrs.iter().all(|(name, value)| {
                node.attrs
                    .iter()
                    .any(|(n, v)| n == name && value.as_ref().map_or(true, |want| want == v))
            })
    }
}

struct CssSelector(Vec<Compound>);

impl CssSelector {
    fn parse(css: &str) -> E2eResult<Self> {
        let compounds = css
            .split_whitespace()
            .map(Compound::parse)
            .collect::<E2eResult<Vec<_>>>()?;
        if compounds.is_empty() {
            return Err(E2eError::Driver("empty selector".into()));
        }
        Ok(Self(compounds))
    }

    fn matches(&self, flat: &Flat<'_>) -> bool {
        let Some((last, rest)) = self.0.split_last() else {
            return false;
        };
        if !last.matches(flat.node) {
            return false;
        }
        let mut ancestors = flat.ancestors.iter().rev();
        'outer: for compound in rest.iter().rev() {
            for ancestor in ancestors.by_ref() {
                if compound.matches(ancestor) {
                    continue 'outer;
                }
            }
            return false;
        }
        true
    }
}
