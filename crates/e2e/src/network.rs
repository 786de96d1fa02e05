//! Network interception: match outgoing requests, stub or observe them, and
//! let scenarios wait on what was seen.
//!
//! The browser backend asks [`Interceptor::route`] what to do with every
//! request and reports observed responses back through
//! [`Interceptor::complete`]. Rules live for one scenario; [`Interceptor::reset`]
//! runs before each scenario starts.

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// URL glob: `**` spans `/`, `*` and `?` do not.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    raw: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(glob: &str) -> E2eResult<Self> {
        let mut re = String::with_capacity(glob.len() * 2 + 2);
        re.push('^');
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    re.push_str(".*");
                }
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');

        let regex = Regex::new(&re)
            .map_err(|e| E2eError::SpecParse(format!("bad url pattern `{}`: {}", glob, e)))?;
        Ok(Self {
            raw: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Canned response returned instead of hitting the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubResponse {
    #[serde(default = "default_status", alias = "statusCode")]
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
}

fn default_status() -> u16 {
    200
}

impl StubResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    /// Body as sent on the wire: strings verbatim, everything else as JSON
    pub fn body_text(&self) -> String {
        match &self.body {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match &self.body {
            serde_json::Value::String(_) | serde_json::Value::Null => "text/plain",
            _ => "application/json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterceptRule {
    pub method: String,
    pub pattern: UrlPattern,
    pub stub: Option<StubResponse>,
    pub alias: String,
}

impl InterceptRule {
    pub fn new(
        method: &str,
        url_glob: &str,
        stub: Option<StubResponse>,
        alias: &str,
    ) -> E2eResult<Self> {
        Ok(Self {
            method: method.to_ascii_uppercase(),
            pattern: UrlPattern::new(url_glob)?,
            stub,
            alias: normalize_alias(alias).to_string(),
        })
    }

    fn matches(&self, method: &str, url: &str) -> bool {
        (self.method == "*" || self.method.eq_ignore_ascii_case(method)) && self.pattern.matches(url)
    }
}

/// A request that matched a rule, with the response it got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedCall {
    pub alias: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub body: String,
    pub stubbed: bool,
}

/// Identifies an observed request until its response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    generation: u64,
    id: u64,
}

/// What the browser backend should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// No rule matched; let it through unrecorded
    PassThrough,
    /// Let it through and report the response with [`Interceptor::complete`]
    Observe(Ticket),
    /// Answer with the stub; already recorded
    Fulfill(StubResponse),
}

#[derive(Default)]
struct AliasCalls {
    calls: Vec<MatchedCall>,
    consumed: usize,
}

struct InFlight {
    alias: String,
    method: String,
    url: String,
}

#[derive(Default)]
struct State {
    generation: u64,
    next_ticket: u64,
    rules: Vec<InterceptRule>,
    calls: HashMap<String, AliasCalls>,
    in_flight: HashMap<u64, InFlight>,
}

/// Scenario-scoped rule set and call log.
#[derive(Default)]
pub struct Interceptor {
    state: Mutex<State>,
    recorded: Notify,
}

fn normalize_alias(alias: &str) -> &str {
    alias.strip_prefix('@').unwrap_or(alias)
}

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Later registrations take precedence over earlier ones.
    pub fn intercept(&self, rule: InterceptRule) -> String {
        let alias = rule.alias.clone();
        info!(
            "intercept {} {} as @{}{}",
            rule.method,
            rule.pattern.as_str(),
            alias,
            if rule.stub.is_some() { " (stubbed)" } else { "" }
        );
        let mut state = self.state.lock();
        state.calls.entry(alias.clone()).or_default();
        state.rules.push(rule);
        alias
    }

    /// Decide how to handle a request leaving the page.
    pub fn route(&self, method: &str, url: &str) -> RouteDecision {
        let mut state = self.state.lock();
        let Some(rule) = state.rules.iter().rev().find(|r| r.matches(method, url)) else {
            return RouteDecision::PassThrough;
        };
        let alias = rule.alias.clone();

        match rule.stub.clone() {
            Some(stub) => {
                debug!("stubbing {} {} -> {} (@{})", method, url, stub.status, alias);
                let call = MatchedCall {
                    alias: alias.clone(),
                    method: method.to_string(),
                    url: url.to_string(),
                    status: stub.status,
                    body: stub.body_text(),
                    stubbed: true,
                };
                state.calls.entry(alias).or_default().calls.push(call);
                drop(state);
                self.recorded.notify_waiters();
                RouteDecision::Fulfill(stub)
            }
            None => {
                state.next_ticket += 1;
                let ticket = Ticket {
                    generation: state.generation,
                    id: state.next_ticket,
                };
                state.in_flight.insert(
                    ticket.id,
                    InFlight {
                        alias,
                        method: method.to_string(),
                        url: url.to_string(),
                    },
                );
                RouteDecision::Observe(ticket)
            }
        }
    }

    /// Record the response of an observed request. Responses belonging to a
    /// previous scenario are dropped.
    pub fn complete(&self, ticket: Ticket, status: u16, body: String) {
        let mut state = self.state.lock();
        if ticket.generation != state.generation {
            debug!("dropping response from a previous scenario");
            return;
        }
        let Some(flight) = state.in_flight.remove(&ticket.id) else {
            return;
        };
        debug!("observed {} {} -> {} (@{})", flight.method, flight.url, status, flight.alias);
        let call = MatchedCall {
            alias: flight.alias.clone(),
            method: flight.method,
            url: flight.url,
            status,
            body,
            stubbed: false,
        };
        state.calls.entry(flight.alias).or_default().calls.push(call);
        drop(state);
        self.recorded.notify_waiters();
    }

    /// Forget an observed request whose response never arrived.
    pub fn abandon(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        if ticket.generation == state.generation {
            state.in_flight.remove(&ticket.id);
        }
    }

    /// Wait for the next unconsumed call recorded under `alias`.
    pub async fn wait_for_call(&self, alias: &str, timeout: Duration) -> E2eResult<MatchedCall> {
        let alias = normalize_alias(alias);
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            // Register interest before checking so a record in between is not lost
            notified.as_mut().enable();

            if let Some(call) = self.take_next(alias)? {
                return Ok(call);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(E2eError::timeout(format!("@{}", alias), start.elapsed()));
            }
        }
    }

    fn take_next(&self, alias: &str) -> E2eResult<Option<MatchedCall>> {
        let mut state = self.state.lock();
        let entry = state.calls.get_mut(alias).ok_or_else(|| {
            E2eError::NotFound(format!("no intercept registered as @{}", alias))
        })?;
        let call = entry.calls.get(entry.consumed).cloned();
        if call.is_some() {
            entry.consumed += 1;
        }
        Ok(call)
    }

    /// Every call recorded under `alias` so far
    pub fn calls(&self, alias: &str) -> Vec<MatchedCall> {
        self.state
            .lock()
            .calls
            .get(normalize_alias(alias))
            .map(|c| c.calls.clone())
            .unwrap_or_default()
    }

    pub fn rule_count(&self) -> usize {
        self.state.lock().rules.len()
    }

    /// Drop all rules, calls and in-flight observations.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.rules.clear();
        state.calls.clear();
        state.in_flight.clear();
    }
}
