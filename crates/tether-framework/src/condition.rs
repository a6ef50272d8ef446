//! Predicates over a dispatch context and its event.
//!
//! Rules and permissions are the same thing at runtime: a [`Predicate`]. A matcher combines its
//! rules with [`all`] and its permissions with [`any`].

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use tether_core::InboundEvent;

use crate::context::DispatchContext;

/// Something that can accept or reject an event.
pub trait Condition: Send + Sync + 'static {
    fn check(&self, ctx: &DispatchContext, event: &InboundEvent) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&DispatchContext, &InboundEvent) -> bool + Send + Sync + 'static,
{
    fn check(&self, ctx: &DispatchContext, event: &InboundEvent) -> bool {
        self(ctx, event)
    }
}

/// A shareable, composable condition.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Condition>);

/// Predicate used as a rule: every rule of a matcher must pass.
pub type Rule = Predicate;

/// Predicate used as a permission: one permission of a matcher must pass.
pub type Permission = Predicate;

impl Predicate {
    pub fn new(condition: impl Condition) -> Self {
        Self(Arc::new(condition))
    }

    /// Accepts everything.
    pub fn always() -> Self {
        Self::new(|_: &DispatchContext, _: &InboundEvent| true)
    }

    /// Rejects everything.
    pub fn never() -> Self {
        Self::new(|_: &DispatchContext, _: &InboundEvent| false)
    }

    pub fn check(&self, ctx: &DispatchContext) -> bool {
        self.0.check(ctx, ctx.event())
    }

    /// Both must pass.
    pub fn and(self, other: Predicate) -> Self {
        all([self, other])
    }

    /// Either must pass.
    pub fn or(self, other: Predicate) -> Self {
        any([self, other])
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        not(self)
    }
}

/// Passes when every predicate passes, evaluated in order with short-circuit. Empty passes.
pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    let predicates: Vec<Predicate> = predicates.into_iter().collect();
    Predicate::new(move |ctx: &DispatchContext, _: &InboundEvent| {
        predicates.iter().all(|p| p.check(ctx))
    })
}

/// Passes when any predicate passes, evaluated in order with short-circuit. Empty fails.
pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    let predicates: Vec<Predicate> = predicates.into_iter().collect();
    Predicate::new(move |ctx: &DispatchContext, _: &InboundEvent| {
        predicates.iter().any(|p| p.check(ctx))
    })
}

/// Inverts a predicate.
pub fn not(predicate: Predicate) -> Predicate {
    Predicate::new(move |ctx: &DispatchContext, _: &InboundEvent| !predicate.check(ctx))
}
