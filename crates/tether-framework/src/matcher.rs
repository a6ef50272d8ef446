//! Matcher system.
//!
//! A [`Matcher`] groups handlers behind a common check. The check has two halves:
//!
//! - **rules**: every rule must pass (added with [`Matcher::rule`], combined with AND)
//! - **permissions**: at least one must pass (added with [`Matcher::permission`], combined
//!   with OR); a matcher without permissions is open to everyone
//!
//! When both halves pass, the handlers run in the order they were added. Matchers with a
//! higher priority are evaluated first; a matching matcher with `block` set ends the scan.
//!
//! # Example
//!
//! ```rust,ignore
//! let matcher = Matcher::on_command(false, ["/ban"])
//!     .name("ban")
//!     .permission(group_admin_or_owner(superusers))
//!     .priority(50)
//!     .block(true)
//!     .handler(ban_handler);
//! ```

use regex::Regex;

use crate::condition::{Permission, Rule};
use crate::context::DispatchContext;
use crate::handler::{Handler, HandlerFn};
use crate::rule;

/// Priority of matchers that do not set one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Rule + permission + priority + handlers.
#[derive(Clone, Debug)]
pub struct Matcher {
    name: Option<String>,
    rule: Option<Rule>,
    permission: Option<Permission>,
    priority: i32,
    block: bool,
    handlers: Vec<Handler>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    /// A matcher that accepts every event.
    pub fn new() -> Self {
        Self {
            name: None,
            rule: None,
            permission: None,
            priority: DEFAULT_PRIORITY,
            block: false,
            handlers: Vec::new(),
        }
    }

    /// Names the matcher. Names must be unique within a registry.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a rule; all rules must pass.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = Some(match self.rule.take() {
            Some(existing) => existing.and(rule),
            None => rule,
        });
        self
    }

    /// Adds a permission; any permission may pass.
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(match self.permission.take() {
            Some(existing) => existing.or(permission),
            None => permission,
        });
        self
    }

    /// Higher priorities are evaluated first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether a match stops lower-priority matchers from being evaluated.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Adds a handler; handlers run in the order they are added.
    pub fn handler<F, T>(mut self, f: F) -> Self
    where
        F: HandlerFn<T>,
        T: 'static,
    {
        self.handlers.push(Handler::new(f));
        self
    }

    /// Adds a pre-built handler.
    pub fn handler_boxed(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    pub fn is_blocking(&self) -> bool {
        self.block
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Evaluates rules, then permissions.
    pub fn matches(&self, ctx: &DispatchContext) -> bool {
        self.rule.as_ref().is_none_or(|r| r.check(ctx))
            && self.permission.as_ref().is_none_or(|p| p.check(ctx))
    }

    // ========================================================================
    // Shorthands
    // ========================================================================

    pub fn on_message() -> Self {
        Self::new().rule(rule::is_message())
    }

    pub fn on_notice() -> Self {
        Self::new().rule(rule::is_notice())
    }

    pub fn on_request() -> Self {
        Self::new().rule(rule::is_request())
    }

    pub fn on_meta() -> Self {
        Self::new().rule(rule::is_meta())
    }

    /// See [`rule::command`].
    pub fn on_command<I, S>(case_sensitive: bool, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().rule(rule::command(case_sensitive, commands))
    }

    pub fn on_keyword<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().rule(rule::keyword(keywords))
    }

    pub fn on_prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().rule(rule::starts_with(prefixes))
    }

    pub fn on_regex(pattern: Regex) -> Self {
        Self::new().rule(rule::regex(pattern))
    }
}
