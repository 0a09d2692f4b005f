use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use futures::Stream;
use parking_lot::Mutex;

use super::Subscription;
use crate::{Completion, Demand, Subscriber};

struct StreamState<T, E> {
    items: VecDeque<Result<T, E>>,
    waker: Option<Waker>,
    requested: bool,
    closed: bool,
}

impl<T, E> StreamState<T, E> {
    fn push(&mut self, item: Result<T, E>) {
        self.items.push_back(item);
        self.requested = false;
        self.wake();
    }

    fn close(&mut self) {
        self.closed = true;
        self.wake();
    }

    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Subscriber half of a [`SubjectStream`], owned by the publisher's tracker.
pub(crate) struct StreamSubscriber<T, E> {
    state: Arc<Mutex<StreamState<T, E>>>,
}

impl<T, E> StreamSubscriber<T, E> {
    pub(crate) fn new() -> Self {
        StreamSubscriber {
            state: Arc::new(Mutex::new(StreamState {
                items: VecDeque::new(),
                waker: None,
                requested: false,
                closed: false,
            })),
        }
    }

    pub(crate) fn state(&self) -> StreamHandle<T, E> {
        StreamHandle {
            state: self.state.clone(),
        }
    }
}

impl<T, E> Subscriber for StreamSubscriber<T, E>
where
    T: Send,
    E: Send,
{
    type Input = T;
    type Failure = E;

    fn receive(&self, input: T) -> Demand {
        self.state.lock().push(Ok(input));
        Demand::none()
    }

    fn receive_completion(&self, completion: Completion<E>) {
        let mut state = self.state.lock();

        if let Completion::Failure(err) = completion {
            state.items.push_back(Err(err));
        }

        state.close();
    }
}

// Released by the tracker on completion, cancellation, late subscription or
// publisher teardown. The stream must end in every one of those cases.
impl<T, E> Drop for StreamSubscriber<T, E> {
    fn drop(&mut self) {
        self.state.lock().close();
    }
}

pub(crate) struct StreamHandle<T, E> {
    state: Arc<Mutex<StreamState<T, E>>>,
}

/// Pull-based stream over a publisher.
///
/// Every poll that finds nothing buffered requests one more value, so the
/// publisher never delivers faster than the stream is consumed. A failure
/// completion is yielded as a single `Err` before the stream ends. Dropping
/// the stream cancels its subscription.
pub struct SubjectStream<T, E> {
    state: Arc<Mutex<StreamState<T, E>>>,
    subscription: Subscription,
}

impl<T, E> SubjectStream<T, E> {
    pub(crate) fn new(handle: StreamHandle<T, E>, subscription: Subscription) -> Self {
        SubjectStream {
            state: handle.state,
            subscription,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl<T, E> Stream for SubjectStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut state = this.state.lock();

        if let Some(item) = state.items.pop_front() {
            return Poll::Ready(Some(item));
        }

        if state.closed {
            return Poll::Ready(None);
        }

        state.waker = Some(cx.waker().clone());

        let needs_demand = !state.requested;
        state.requested = true;

        drop(state);

        if needs_demand {
            this.subscription.request(Demand::max(1));
        }

        Poll::Pending
    }
}
