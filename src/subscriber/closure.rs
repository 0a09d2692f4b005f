use std::marker::PhantomData;

use parking_lot::Mutex;

use super::{Completion, Demand, Subscriber};

/// Subscriber calling a closure for every value and another one on completion.
///
/// Replies with unlimited demand, so once any demand is requested it keeps
/// receiving until cancelled or completed.
pub struct ForEach<T, E, F, C> {
    on_value: F,
    on_completion: C,
    _marker: PhantomData<fn(T, E)>,
}

impl<T, E, F, C> ForEach<T, E, F, C>
where
    F: Fn(T) + Send + Sync,
    C: Fn(Completion<E>) + Send + Sync,
{
    pub fn new(on_value: F, on_completion: C) -> Self {
        ForEach {
            on_value,
            on_completion,
            _marker: PhantomData,
        }
    }
}

impl<T, E, F, C> Subscriber for ForEach<T, E, F, C>
where
    F: Fn(T) + Send + Sync,
    C: Fn(Completion<E>) + Send + Sync,
{
    type Input = T;
    type Failure = E;

    fn receive(&self, input: T) -> Demand {
        (self.on_value)(input);
        Demand::unlimited()
    }

    fn receive_completion(&self, completion: Completion<E>) {
        (self.on_completion)(completion)
    }
}

/// One-shot subscriber: the closure runs for the first value only.
pub struct Once<T, E, F> {
    on_value: Mutex<Option<F>>,
    _marker: PhantomData<fn(T, E)>,
}

impl<T, E, F> Once<T, E, F>
where
    F: FnOnce(T) + Send,
{
    pub fn new(on_value: F) -> Self {
        Once {
            on_value: Mutex::new(Some(on_value)),
            _marker: PhantomData,
        }
    }
}

impl<T, E, F> Subscriber for Once<T, E, F>
where
    F: FnOnce(T) + Send,
{
    type Input = T;
    type Failure = E;

    fn receive(&self, input: T) -> Demand {
        // taken before the call so a re-entrant publish cannot run it twice
        let on_value = self.on_value.lock().take();

        if let Some(on_value) = on_value {
            on_value(input);
        }

        Demand::none()
    }

    fn receive_completion(&self, _completion: Completion<E>) {
        let on_value = self.on_value.lock().take();
        drop(on_value);
    }
}
