use std::fmt;

mod closure;
mod demand;
pub use closure::*;
pub use demand::*;

/// Terminal signal delivered to a subscriber at most once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion<Failure> {
    Finished,
    Failure(Failure),
}

impl<Failure> Completion<Failure> {
    pub fn is_failure(&self) -> bool {
        matches!(self, Completion::Failure(_))
    }
}

impl<Failure: fmt::Display> fmt::Display for Completion<Failure> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Finished => write!(f, "finished"),
            Completion::Failure(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Consumer side of a broadcast.
///
/// Both methods are called synchronously on the publishing thread, never
/// while the publisher holds its bookkeeping locks, so an implementation
/// may call back into the publisher or its own [`crate::Subscription`].
pub trait Subscriber: Send + Sync {
    type Input;
    type Failure;

    /// Receives one value. The returned demand is added to what is left of
    /// the subscriber's outstanding demand after this delivery.
    fn receive(&self, input: Self::Input) -> Demand;

    /// Receives the terminal signal. Called at most once, and never followed
    /// by [`Subscriber::receive`].
    fn receive_completion(&self, completion: Completion<Self::Failure>);
}
