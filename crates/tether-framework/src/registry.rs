//! Priority-ordered matcher storage.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::matcher::Matcher;

/// Identifies a registered matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatcherHandle(u64);

struct Entry {
    handle: MatcherHandle,
    matcher: Matcher,
}

/// Matchers sorted by descending priority; equal priorities keep registration order.
#[derive(Default)]
pub struct MatcherRegistry {
    entries: RwLock<Vec<Entry>>,
    next_handle: AtomicU64,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a matcher at its priority position.
    ///
    /// # Panics
    ///
    /// Panics if a matcher with the same name is already registered.
    pub fn register(&self, matcher: Matcher) -> MatcherHandle {
        let mut entries = self.entries.write();

        if let Some(name) = matcher.get_name() {
            if entries.iter().any(|e| e.matcher.get_name() == Some(name)) {
                panic!("duplicate matcher registration: '{name}'");
            }
        }

        let handle = MatcherHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let priority = matcher.get_priority();
        let index = entries.partition_point(|e| e.matcher.get_priority() >= priority);

        debug!(
            matcher = matcher.get_name().unwrap_or("unnamed"),
            priority,
            position = index,
            handlers = matcher.handler_count(),
            "Matcher registered"
        );
        entries.insert(index, Entry { handle, matcher });
        handle
    }

    /// Removes a matcher; returns it if the handle was live.
    pub fn unregister(&self, handle: MatcherHandle) -> Option<Matcher> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|e| e.handle == handle)?;
        Some(entries.remove(index).matcher)
    }

    /// A copy of the current matchers in evaluation order.
    pub fn snapshot(&self) -> Vec<Matcher> {
        self.entries.read().iter().map(|e| e.matcher.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
