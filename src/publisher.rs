use std::error::Error;

use crate::{Completion, Demand, ForEach, Once, Subscriber};

mod simple;
mod stream;
mod subject;
mod subscription;
pub use simple::*;
pub use stream::*;
pub use subject::*;
pub use subscription::*;

use stream::StreamSubscriber;

/// A publisher delivers elements to one or more [`Subscriber`] instances.
///
/// Only [`Publisher::subscribe`] is required; the rest are conveniences
/// built on top of it.
pub trait Publisher {
    type Output: Clone + Send + 'static;
    type Failure: Error + Clone + Send + 'static;

    /// Registers a subscriber. It receives nothing until demand is requested
    /// through the returned [`Subscription`].
    fn subscribe<S>(&self, subscriber: S) -> Subscription
    where
        S: Subscriber<Input = Self::Output, Failure = Self::Failure> + 'static;

    /// Calls `on_value` for every value published from now on.
    fn sink<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(Self::Output) + Send + Sync + 'static,
    {
        self.sink_completion(on_value, |_| {})
    }

    /// Like [`Publisher::sink`], also observing the terminal completion.
    fn sink_completion<F, C>(&self, on_value: F, on_completion: C) -> Subscription
    where
        F: Fn(Self::Output) + Send + Sync + 'static,
        C: Fn(Completion<Self::Failure>) + Send + Sync + 'static,
    {
        let subscription = self.subscribe(ForEach::new(on_value, on_completion));
        subscription.request(Demand::unlimited());
        subscription
    }

    /// Calls `on_value` with the next published value only.
    fn once<F>(&self, on_value: F) -> Subscription
    where
        F: FnOnce(Self::Output) + Send + 'static,
    {
        let subscription = self.subscribe(Once::new(on_value));
        subscription.request(Demand::max(1));
        subscription
    }

    /// Create new receiver stream for this publisher
    fn receive(&self) -> SubjectStream<Self::Output, Self::Failure> {
        let subscriber = StreamSubscriber::new();
        let state = subscriber.state();

        SubjectStream::new(state, self.subscribe(subscriber))
    }
}
