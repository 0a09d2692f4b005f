use std::error::Error;

use super::{Publisher, Subject, Subscription};
use crate::{Completion, Subscriber};

/// Opt-in publisher: expose a [`Subject`] and get the producer hooks plus the
/// whole [`Publisher`] surface for free.
pub trait SimplePublisher {
    type Output: Clone + Send + 'static;
    type Failure: Error + Clone + Send + 'static;

    fn subject(&self) -> &Subject<Self::Output, Self::Failure>;

    fn publish(&self, output: Self::Output) {
        self.subject().publish(output)
    }

    fn complete(&self) {
        self.subject().complete()
    }

    fn fail(&self, failure: Self::Failure) {
        self.subject().fail(failure)
    }

    fn send_completion(&self, completion: Completion<Self::Failure>) {
        self.subject().send_completion(completion)
    }
}

impl<P> Publisher for P
where
    P: SimplePublisher,
{
    type Output = P::Output;
    type Failure = P::Failure;

    fn subscribe<S>(&self, subscriber: S) -> Subscription
    where
        S: Subscriber<Input = Self::Output, Failure = Self::Failure> + 'static,
    {
        self.subject().subscribe(subscriber)
    }
}

impl<T, E> SimplePublisher for Subject<T, E>
where
    T: Clone + Send + 'static,
    E: Error + Clone + Send + 'static,
{
    type Output = T;
    type Failure = E;

    fn subject(&self) -> &Subject<T, E> {
        self
    }
}
