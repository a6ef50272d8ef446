//! Built-in rules.
//!
//! Text rules look at the event's raw text and never match non-message events. Rules that
//! extract something from the text ([`command`], [`regex`]) leave it in the dispatch context so
//! that handlers can receive it as a parameter.

use regex::Regex;
use tether_core::{EventKind, InboundEvent, MessageType};

use crate::condition::{Predicate, Rule};
use crate::context::DispatchContext;

// =============================================================================
// Extracted values
// =============================================================================

/// The command a [`command`] rule matched, and the text after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    /// The candidate that matched, as registered.
    pub command: String,
    /// Remaining text with surrounding whitespace trimmed.
    pub raw_args: String,
}

impl CommandArgs {
    /// Whitespace-separated arguments.
    pub fn args(&self) -> Vec<&str> {
        self.raw_args.split_whitespace().collect()
    }
}

/// Capture groups of the last successful [`regex`] rule. Index 0 is the whole match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub captures: Vec<Option<String>>,
}

impl RegexMatch {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|c| c.as_deref())
    }
}

// =============================================================================
// Text rules
// =============================================================================

/// Matches when the trimmed raw text starts with one of `candidates`.
///
/// Candidates are tried in order and the first match wins. When `case_sensitive` is false both
/// sides are lowercased before comparing. On success a [`CommandArgs`] is stored in the context.
pub fn command<I, S>(case_sensitive: bool, candidates: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let candidates: Vec<String> = candidates.into_iter().map(Into::into).collect();
    Predicate::new(move |ctx: &DispatchContext, event: &InboundEvent| {
        if event.kind() != EventKind::Message {
            return false;
        }
        let text = event.raw_text().trim();

        for candidate in &candidates {
            let Some(head) = text.get(..candidate.len()) else {
                continue;
            };
            let hit = if case_sensitive {
                head == candidate
            } else {
                head.to_lowercase() == candidate.to_lowercase()
            };
            if hit {
                ctx.set_state(CommandArgs {
                    command: candidate.clone(),
                    raw_args: text[candidate.len()..].trim().to_string(),
                });
                return true;
            }
        }
        false
    })
}

/// Matches when the raw text starts with one of `prefixes`.
pub fn starts_with<I, S>(prefixes: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    text_rule(prefixes, |text, p| text.starts_with(p))
}

/// Matches when the raw text ends with one of `suffixes`.
pub fn ends_with<I, S>(suffixes: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    text_rule(suffixes, |text, s| text.ends_with(s))
}

/// Matches when the trimmed raw text equals one of `texts`.
pub fn full_match<I, S>(texts: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    text_rule(texts, |text, t| text.trim() == t)
}

/// Matches when the raw text contains one of `keywords`.
pub fn keyword<I, S>(keywords: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    text_rule(keywords, |text, k| text.contains(k))
}

/// Matches when `pattern` finds a match in the raw text; the captures are stored as a
/// [`RegexMatch`].
pub fn regex(pattern: Regex) -> Rule {
    Predicate::new(move |ctx: &DispatchContext, event: &InboundEvent| {
        if event.kind() != EventKind::Message {
            return false;
        }
        match pattern.captures(event.raw_text()) {
            Some(caps) => {
                ctx.set_state(RegexMatch {
                    captures: caps
                        .iter()
                        .map(|m| m.map(|m| m.as_str().to_string()))
                        .collect(),
                });
                true
            }
            None => false,
        }
    })
}

fn text_rule<I, S>(needles: I, test: fn(&str, &str) -> bool) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let needles: Vec<String> = needles.into_iter().map(Into::into).collect();
    Predicate::new(move |_: &DispatchContext, event: &InboundEvent| {
        event.kind() == EventKind::Message
            && needles.iter().any(|n| test(event.raw_text(), n))
    })
}

// =============================================================================
// Kind rules
// =============================================================================

fn kind_rule(kind: EventKind) -> Rule {
    Predicate::new(move |_: &DispatchContext, event: &InboundEvent| event.kind() == kind)
}

pub fn is_message() -> Rule {
    kind_rule(EventKind::Message)
}

pub fn is_notice() -> Rule {
    kind_rule(EventKind::Notice)
}

pub fn is_request() -> Rule {
    kind_rule(EventKind::Request)
}

pub fn is_meta() -> Rule {
    kind_rule(EventKind::Meta)
}

/// Private chat messages.
pub fn is_private() -> Rule {
    Predicate::new(|_: &DispatchContext, event: &InboundEvent| {
        event
            .as_message()
            .is_some_and(|m| m.message_type == MessageType::Private)
    })
}

/// Anything that happened in a group, message or not.
pub fn is_group() -> Rule {
    Predicate::new(|_: &DispatchContext, event: &InboundEvent| event.is_to_group())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{group_message, notice, private_message};

    fn ctx_for(event: std::sync::Arc<InboundEvent>) -> DispatchContext {
        DispatchContext::new(1, event, None)
    }

    #[test]
    fn command_first_candidate_wins() {
        let ctx = ctx_for(private_message(1, "  /echo hello  world "));
        let rule = command(true, ["/e", "/echo"]);

        assert!(rule.check(&ctx));
        let args = ctx.get_state::<CommandArgs>().unwrap();
        assert_eq!(args.command, "/e");
        assert_eq!(args.raw_args, "cho hello  world");
    }

    #[test]
    fn command_case_folding() {
        let ctx = ctx_for(private_message(1, "/HELP me"));

        assert!(!command(true, ["/help"]).check(&ctx));
        assert!(command(false, ["/help"]).check(&ctx));
        let args = ctx.get_state::<CommandArgs>().unwrap();
        assert_eq!(args.args(), vec!["me"]);
    }

    #[test]
    fn command_ignores_short_text_and_other_kinds() {
        assert!(!command(true, ["/help"]).check(&ctx_for(private_message(1, "/he"))));
        assert!(!command(true, ["/help"]).check(&ctx_for(notice("group_increase"))));
    }

    #[test]
    fn command_does_not_split_multibyte_text() {
        let ctx = ctx_for(private_message(1, "你好"));
        assert!(!command(true, ["ab"]).check(&ctx));
    }

    #[test]
    fn text_rules() {
        let ctx = ctx_for(private_message(1, "hello world"));

        assert!(starts_with(["hell"]).check(&ctx));
        assert!(ends_with(["xyz", "world"]).check(&ctx));
        assert!(keyword(["lo w"]).check(&ctx));
        assert!(full_match(["hello world"]).check(&ctx));
        assert!(!full_match(["hello"]).check(&ctx));
    }

    #[test]
    fn regex_stores_captures() {
        let ctx = ctx_for(private_message(1, "roll 3d6"));
        let rule = regex(Regex::new(r"(\d+)d(\d+)").unwrap());

        assert!(rule.check(&ctx));
        let m = ctx.get_state::<RegexMatch>().unwrap();
        assert_eq!(m.get(0), Some("3d6"));
        assert_eq!(m.get(2), Some("6"));
    }

    #[test]
    fn kind_rules() {
        let private = ctx_for(private_message(1, "x"));
        let group = ctx_for(group_message(1, 100, "member", "x"));
        let note = ctx_for(notice("group_increase"));

        assert!(is_message().check(&private));
        assert!(is_private().check(&private));
        assert!(!is_group().check(&private));
        assert!(is_group().check(&group));
        assert!(is_notice().check(&note));
        assert!(!is_request().check(&note));
        assert!(!is_meta().check(&note));
    }
}
