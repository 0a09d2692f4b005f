use thiserror::Error;

use std::{
    error::Error as StdError,
    mem,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::Sink;
use parking_lot::{Mutex, ReentrantMutex};

use super::subscription::{DemandControl, DemandTracker, Registry, Subscription};
use crate::{Completion, Subscriber};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("Subject already completed")]
    Completed,
}

/// Multicast broadcaster delivering synchronously to subscribers with demand.
/// Subscribing after completion yields an inert [`Subscription`].
pub struct Subject<T, E> {
    inner: Arc<SubjectImpl<T, E>>,
}

impl<T, E> Subject<T, E>
where
    T: Clone + Send + 'static,
    E: StdError + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Subject {
            inner: Arc::new(SubjectImpl {
                emitting: ReentrantMutex::new(()),
                state: Mutex::new(SubjectState {
                    subscriptions: vec![],
                    completed: false,
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe<S>(&self, subscriber: S) -> Subscription
    where
        S: Subscriber<Input = T, Failure = E> + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let tracker = Arc::new(DemandTracker::new(id, Arc::new(subscriber)));

        let control: Arc<dyn DemandControl> = tracker.clone();
        let registry: Arc<dyn Registry> = self.inner.clone();
        let subscription = Subscription::new(id, Arc::downgrade(&control), Arc::downgrade(&registry));

        let mut state = self.inner.state.lock();

        if state.completed {
            drop(state);

            log::debug!("subscription {} arrived after completion", id);

            tracker.cancel();
            return subscription;
        }

        state.subscriptions.push(tracker);

        log::debug!(
            "subscription {} registered, {} active",
            id,
            state.subscriptions.len()
        );

        subscription
    }

    /// Delivers `value` to every subscriber with outstanding demand. No-op
    /// after completion.
    pub fn publish(&self, value: T) {
        let _emitting = self.inner.emitting.lock();

        let subscriptions = {
            let state = self.inner.state.lock();

            if state.completed {
                return;
            }

            state.subscriptions.clone()
        };

        let delivered = subscriptions
            .iter()
            .filter(|tracker| tracker.try_deliver(value.clone()))
            .count();

        log::trace!(
            "published to {} of {} subscriptions",
            delivered,
            subscriptions.len()
        );
    }

    pub fn complete(&self) {
        self.send_completion(Completion::Finished)
    }

    pub fn fail(&self, failure: E) {
        self.send_completion(Completion::Failure(failure))
    }

    /// Signals `completion` to every registered subscriber and closes the
    /// subject for good. Only the first call has any effect.
    pub fn send_completion(&self, completion: Completion<E>) {
        let _emitting = self.inner.emitting.lock();

        let subscriptions = {
            let mut state = self.inner.state.lock();

            if state.completed {
                return;
            }

            state.completed = true;
            mem::take(&mut state.subscriptions)
        };

        log::debug!(
            "subject completed ({}), signaling {} subscriptions",
            if completion.is_failure() { "failure" } else { "finished" },
            subscriptions.len()
        );

        for tracker in subscriptions {
            tracker.signal_completion(completion.clone());
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }
}

impl<E> Subject<(), E>
where
    E: StdError + Clone + Send + 'static,
{
    /// Publishes the unit value.
    pub fn signal(&self) {
        self.publish(())
    }
}

impl<T, E> Default for Subject<T, E>
where
    T: Clone + Send + 'static,
    E: StdError + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Drop for Subject<T, E> {
    fn drop(&mut self) {
        let subscriptions = {
            let mut state = self.inner.state.lock();
            state.completed = true;
            mem::take(&mut state.subscriptions)
        };

        if !subscriptions.is_empty() {
            log::debug!(
                "subject dropped, releasing {} subscriptions",
                subscriptions.len()
            );
        }

        for tracker in subscriptions {
            tracker.cancel();
        }
    }
}

impl<T, E> Sink<T> for Subject<T, E>
where
    T: Clone + Send + 'static,
    E: StdError + Clone + Send + 'static,
{
    type Error = SubjectError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_completed() {
            return Poll::Ready(Err(SubjectError::Completed));
        }

        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Self::Error> {
        if self.is_completed() {
            return Err(SubjectError::Completed);
        }

        self.publish(item);

        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.complete();

        Poll::Ready(Ok(()))
    }
}

struct SubjectState<T, E> {
    subscriptions: Vec<Arc<DemandTracker<T, E>>>,
    completed: bool,
}

struct SubjectImpl<T, E> {
    // serializes publish and completion; reentrant so subscribers may call back in
    emitting: ReentrantMutex<()>,
    state: Mutex<SubjectState<T, E>>,
    next_id: AtomicU64,
}

impl<T, E> Registry for SubjectImpl<T, E>
where
    T: Send,
    E: Send,
{
    fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();

        state.subscriptions.retain(|tracker| tracker.id() != id);

        if state.subscriptions.len() != before {
            log::debug!("subscription {} unregistered", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicBool, AtomicUsize},
        thread,
    };

    use super::*;
    use crate::{Demand, Publisher};
    use futures::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, Error)]
    #[error("{0}")]
    struct Failed(String);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Value(&'static str),
        Done(Completion<Failed>),
    }

    type Log = Arc<Mutex<Vec<(usize, Event)>>>;

    struct Recorder {
        name: usize,
        log: Log,
    }

    impl Subscriber for Recorder {
        type Input = &'static str;
        type Failure = Failed;

        fn receive(&self, input: &'static str) -> Demand {
            self.log.lock().push((self.name, Event::Value(input)));
            Demand::none()
        }

        fn receive_completion(&self, completion: Completion<Failed>) {
            self.log.lock().push((self.name, Event::Done(completion)));
        }
    }

    fn recorder(name: usize, log: &Log) -> Recorder {
        Recorder {
            name,
            log: log.clone(),
        }
    }

    #[test]
    fn test_demand_one_then_replenish() {
        crate::init_test_logger();

        let subject = Subject::<&'static str, Failed>::new();
        let log = Log::default();
        let c1 = subject.subscribe(recorder(1, &log));

        c1.request(Demand::max(1));
        subject.publish("a");
        subject.publish("b");

        c1.request(Demand::max(1));
        assert_eq!(log.lock().len(), 1, "nothing buffered for late demand");

        subject.publish("c");

        assert_eq!(
            *log.lock(),
            vec![(1, Event::Value("a")), (1, Event::Value("c"))]
        );
    }

    #[test]
    fn test_fan_out_and_completion() {
        let subject = Subject::<&'static str, Failed>::new();
        let log = Log::default();

        let c1 = subject.subscribe(recorder(1, &log));
        let c2 = subject.subscribe(recorder(2, &log));
        c1.request(Demand::unlimited());
        c2.request(Demand::unlimited());

        subject.publish("x");
        subject.complete();
        subject.complete();
        subject.publish("y");

        let c3 = subject.subscribe(recorder(3, &log));
        c3.request(Demand::unlimited());
        subject.publish("z");

        assert_eq!(
            *log.lock(),
            vec![
                (1, Event::Value("x")),
                (2, Event::Value("x")),
                (1, Event::Done(Completion::Finished)),
                (2, Event::Done(Completion::Finished)),
            ]
        );
        assert!(!c1.is_active());
        assert!(!c3.is_active());
        assert_eq!(subject.subscription_count(), 0);
    }

    #[test]
    fn test_failure_reaches_every_subscriber() {
        let subject = Subject::<&'static str, Failed>::new();
        let log = Log::default();
        let _c1 = subject.subscribe(recorder(1, &log));
        let _c2 = subject.subscribe(recorder(2, &log));

        subject.fail(Failed("broken".into()));
        subject.fail(Failed("again".into()));

        let failure = Completion::Failure(Failed("broken".into()));
        assert_eq!(
            *log.lock(),
            vec![(1, Event::Done(failure.clone())), (2, Event::Done(failure))]
        );
    }

    #[test]
    fn test_cancel_is_idempotent_and_isolated() {
        let subject = Subject::<&'static str, Failed>::new();
        let log = Log::default();
        let c1 = subject.subscribe(recorder(1, &log));
        let c2 = subject.subscribe(recorder(2, &log));
        c1.request(Demand::unlimited());
        c2.request(Demand::unlimited());

        c1.cancel();
        c1.cancel();
        c1.request(Demand::unlimited());
        assert_eq!(subject.subscription_count(), 1);

        subject.publish("a");
        subject.complete();

        assert_eq!(
            *log.lock(),
            vec![(2, Event::Value("a")), (2, Event::Done(Completion::Finished))]
        );
    }

    #[test]
    fn test_drop_releases_without_completion() {
        let subject = Subject::<&'static str, Failed>::new();
        let log = Log::default();
        let c1 = subject.subscribe(recorder(1, &log));
        c1.request(Demand::unlimited());

        drop(subject);

        assert!(!c1.is_active());
        c1.request(Demand::max(1));
        c1.cancel();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_reentrant_subscriber() {
        let subject = Arc::new(Subject::<u32, Infallible>::new());
        let seen = Arc::new(Mutex::new(vec![]));
        let handles = Arc::new(Mutex::new(vec![]));

        let inner_subject = subject.clone();
        let inner_seen = seen.clone();
        let inner_handles = handles.clone();
        let _outer = subject.sink(move |v| {
            inner_seen.lock().push(("outer", v));

            if v == 1 {
                let seen = inner_seen.clone();
                // not part of the current publish, sees the next one
                let late = inner_subject.sink(move |v| seen.lock().push(("late", v)));
                inner_subject.publish(10);
                inner_handles.lock().push(late);
            }
        });

        subject.publish(1);
        subject.publish(2);

        assert_eq!(
            *seen.lock(),
            vec![
                ("outer", 1),
                ("outer", 10),
                ("late", 10),
                ("outer", 2),
                ("late", 2)
            ]
        );
        assert_eq!(handles.lock().len(), 1);
    }

    #[test]
    fn test_dropping_handle_cancels() {
        let subject = Subject::<&'static str, Failed>::new();
        let log = Log::default();
        let kept = subject.subscribe(recorder(1, &log));
        let dropped = subject.subscribe(recorder(2, &log));
        kept.request(Demand::unlimited());
        dropped.request(Demand::unlimited());
        assert_eq!(subject.subscription_count(), 2);

        drop(dropped);
        assert_eq!(subject.subscription_count(), 1);

        subject.publish("a");

        assert_eq!(*log.lock(), vec![(1, Event::Value("a"))]);
    }

    #[test]
    fn test_request_none_pauses_through_handle() {
        let subject = Subject::<u32, Infallible>::new();
        let seen = Arc::new(Mutex::new(vec![]));

        let captured = seen.clone();
        let subscription = subject.sink(move |v| captured.lock().push(v));

        subject.publish(1);
        subscription.request(Demand::none());
        subject.publish(2);
        subject.publish(3);

        subscription.request(Demand::max(1));
        subject.publish(4);

        assert_eq!(*seen.lock(), vec![1, 4]);
        assert!(subscription.is_active());
    }

    #[test]
    fn test_cancel_from_own_callback() {
        let subject = Subject::<u32, Infallible>::new();
        let seen = Arc::new(Mutex::new(vec![]));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let captured = seen.clone();
        let own = slot.clone();
        let first = subject.sink(move |v| {
            captured.lock().push(("first", v));

            let subscription = own.lock().take();
            if let Some(subscription) = subscription {
                subscription.cancel();
            }
        });
        *slot.lock() = Some(first);

        let captured = seen.clone();
        let _second = subject.sink(move |v| captured.lock().push(("second", v)));

        subject.publish(1);
        subject.publish(2);

        assert_eq!(
            *seen.lock(),
            vec![("first", 1), ("second", 1), ("second", 2)]
        );
        assert_eq!(subject.subscription_count(), 1);
    }

    #[test]
    fn test_no_delivery_after_cancel_returns() {
        let subject = Arc::new(Subject::<u32, Infallible>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let counted = count.clone();
        let subscription = subject.sink(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        let producer = {
            let subject = subject.clone();
            let running = running.clone();
            thread::spawn(move || {
                let mut i = 0;
                while running.load(Ordering::SeqCst) {
                    subject.publish(i);
                    i = i.wrapping_add(1);
                }
            })
        };

        while count.load(Ordering::SeqCst) < 10 {
            thread::yield_now();
        }

        subscription.cancel();
        let at_cancel = count.load(Ordering::SeqCst);

        assert_eq!(subject.subscription_count(), 0);

        // let the producer run on for a while after the cancel
        thread::sleep(std::time::Duration::from_millis(20));
        running.store(false, Ordering::SeqCst);
        producer.join().unwrap();

        // at most the delivery already running when cancel was called
        assert!(count.load(Ordering::SeqCst) <= at_cancel + 1);
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_complete_from_callback() {
        let subject = Arc::new(Subject::<u32, Infallible>::new());
        let count = Arc::new(Mutex::new(0));

        let inner_subject = subject.clone();
        let first_count = count.clone();
        let _first = subject.sink(move |_| {
            *first_count.lock() += 1;
            inner_subject.complete();
        });
        let second_count = count.clone();
        let _second = subject.sink(move |_| *second_count.lock() += 1);

        subject.publish(1);
        subject.publish(2);

        assert_eq!(*count.lock(), 1);
        assert!(subject.is_completed());
    }

    /// Keeps asking for one more value until `limit` values were received.
    struct Counter {
        count: AtomicUsize,
        limit: usize,
    }

    impl Subscriber for Counter {
        type Input = u32;
        type Failure = Infallible;

        fn receive(&self, _input: u32) -> Demand {
            let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;

            if count < self.limit {
                Demand::max(1)
            } else {
                Demand::none()
            }
        }

        fn receive_completion(&self, _completion: Completion<Infallible>) {}
    }

    #[test]
    fn test_concurrent_publish_respects_demand() {
        let subject = Arc::new(Subject::<u32, Infallible>::new());
        let counter = Arc::new(Counter {
            count: AtomicUsize::new(0),
            limit: 100,
        });

        let subscription = subject.subscribe(SharedCounter(counter.clone()));
        subscription.request(Demand::max(1));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let subject = subject.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        subject.publish(i);
                    }
                })
            })
            .collect();

        let requester = {
            let subject = subject.clone();
            thread::spawn(move || {
                let extra = subject.subscribe(crate::ForEach::new(
                    |_: u32| {},
                    |_: Completion<Infallible>| {},
                ));
                for _ in 0..50 {
                    extra.request(Demand::max(1));
                }
                extra.cancel();
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        requester.join().unwrap();

        assert_eq!(counter.count.load(Ordering::SeqCst), 100);
    }

    struct SharedCounter(Arc<Counter>);

    impl Subscriber for SharedCounter {
        type Input = u32;
        type Failure = Infallible;

        fn receive(&self, input: u32) -> Demand {
            self.0.receive(input)
        }

        fn receive_completion(&self, completion: Completion<Infallible>) {
            self.0.receive_completion(completion)
        }
    }

    #[async_std::test]
    async fn test_subject_as_sink() -> Result<(), anyhow::Error> {
        crate::init_test_logger();

        let mut subject = Subject::<u32, Infallible>::new();
        let seen = Arc::new(Mutex::new(vec![]));
        let done = Arc::new(Mutex::new(false));

        let captured = seen.clone();
        let finished = done.clone();
        let _subscription = subject.sink_completion(
            move |v| captured.lock().push(v),
            move |_| *finished.lock() = true,
        );

        for i in 1..4 {
            log::debug!("send {}", i);
            subject.send(i).await?;
        }

        subject.close().await?;

        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert!(*done.lock());
        assert_eq!(subject.send(4).await, Err(SubjectError::Completed));

        Ok(())
    }
}
