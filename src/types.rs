//! Shared result types used across the update stages.
//!
//! Every freshness check (repository fetch, thumbnail pipeline, availability
//! refresh) answers the same question: did anything change? The answer is an
//! [`Outcome`] wrapped in the stage's own `Result`, so "ran fine, nothing to
//! do" and "failed" can never be confused.

/// Result of a stage that may or may not have changed anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The stage ran successfully and found nothing new.
    Unchanged,
    /// The stage ran successfully and changed something.
    Changed(T),
}

impl<T> Outcome<T> {
    pub fn is_changed(&self) -> bool {
        matches!(self, Outcome::Changed(_))
    }

    /// Details of the change, if any.
    pub fn changed(&self) -> Option<&T> {
        match self {
            Outcome::Changed(details) => Some(details),
            Outcome::Unchanged => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Changed(details) => Outcome::Changed(f(details)),
            Outcome::Unchanged => Outcome::Unchanged,
        }
    }
}
