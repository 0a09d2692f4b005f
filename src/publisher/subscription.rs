use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

use crate::{Completion, Demand, Subscriber};

/// Demand side of a tracker, with the value and failure types erased.
pub(crate) trait DemandControl: Send + Sync {
    fn request(&self, demand: Demand);
    fn cancel(&self);
    fn is_active(&self) -> bool;
}

/// Owner of registered trackers, able to forget one without signaling it.
pub(crate) trait Registry: Send + Sync {
    fn unregister(&self, id: u64);
}

struct TrackerState<T, E> {
    subscriber: Option<Arc<dyn Subscriber<Input = T, Failure = E>>>,
    demand: Demand,
    // deliveries whose reply has not been applied yet
    delivering: usize,
    // requests that arrived while a delivery was running, replayed after its reply
    deferred: Vec<Demand>,
}

impl<T, E> TrackerState<T, E> {
    fn apply(&mut self, demand: Demand) {
        if demand.is_none() {
            self.demand = Demand::none();
        } else {
            self.demand += demand;
        }
    }
}

/// Per-subscriber demand bookkeeping.
///
/// The subscriber is held until completion or cancellation and is released
/// exactly once; afterwards the tracker is inert and ignores every call.
pub(crate) struct DemandTracker<T, E> {
    id: u64,
    state: Mutex<TrackerState<T, E>>,
}

impl<T, E> DemandTracker<T, E> {
    pub(crate) fn new(id: u64, subscriber: Arc<dyn Subscriber<Input = T, Failure = E>>) -> Self {
        DemandTracker {
            id,
            state: Mutex::new(TrackerState {
                subscriber: Some(subscriber),
                demand: Demand::none(),
                delivering: 0,
                deferred: vec![],
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Adds `demand` to the outstanding demand; a request of exactly
    /// [`Demand::none`] resets it to zero instead.
    pub(crate) fn request(&self, demand: Demand) {
        let mut state = self.state.lock();

        if state.subscriber.is_none() {
            return;
        }

        if state.delivering > 0 {
            state.deferred.push(demand);
            return;
        }

        state.apply(demand);

        log::trace!("subscription {} demand now {}", self.id, state.demand);
    }

    /// Delivers `value` if there is outstanding demand. Returns whether the
    /// subscriber was called.
    ///
    /// The subscriber's reply is applied like a request: `none` resets the
    /// demand left after this delivery, anything else is added to it.
    pub(crate) fn try_deliver(&self, value: T) -> bool {
        let subscriber = {
            let mut state = self.state.lock();

            if state.demand.is_none() {
                return false;
            }

            let subscriber = match &state.subscriber {
                Some(subscriber) => subscriber.clone(),
                None => return false,
            };

            state.demand = state.demand.consume_one();
            state.delivering += 1;

            subscriber
        };

        let reply = subscriber.receive(value);

        let mut state = self.state.lock();
        state.delivering -= 1;

        // cancelled or completed while the subscriber was running
        if state.subscriber.is_some() {
            state.apply(reply);

            if state.delivering == 0 {
                for demand in mem::take(&mut state.deferred) {
                    state.apply(demand);
                }
            }
        }

        log::trace!("subscription {} delivered, demand now {}", self.id, state.demand);

        true
    }

    pub(crate) fn signal_completion(&self, completion: Completion<E>) {
        let subscriber = self.release();

        if let Some(subscriber) = subscriber {
            subscriber.receive_completion(completion);
        }
    }

    /// Releases the subscriber without signaling it.
    pub(crate) fn cancel(&self) {
        // dropped outside the lock, subscriber drop glue may call back in
        drop(self.release());
    }

    fn release(&self) -> Option<Arc<dyn Subscriber<Input = T, Failure = E>>> {
        let mut state = self.state.lock();
        state.demand = Demand::none();
        state.deferred.clear();
        state.subscriber.take()
    }
}

impl<T, E> DemandControl for DemandTracker<T, E>
where
    T: Send,
    E: Send,
{
    fn request(&self, demand: Demand) {
        DemandTracker::request(self, demand)
    }

    fn cancel(&self) {
        DemandTracker::cancel(self)
    }

    fn is_active(&self) -> bool {
        self.state.lock().subscriber.is_some()
    }
}

/// Handle returned to a subscriber, used to request demand or cancel.
///
/// The handle never keeps the publisher or its bookkeeping alive. Dropping it
/// cancels.
pub struct Subscription {
    id: u64,
    tracker: Weak<dyn DemandControl>,
    registry: Weak<dyn Registry>,
    cancelled: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: u64, tracker: Weak<dyn DemandControl>, registry: Weak<dyn Registry>) -> Self {
        Subscription {
            id,
            tracker,
            registry,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Grants the publisher permission to deliver `demand` more values.
    /// [`Demand::none`] pauses delivery by resetting outstanding demand.
    pub fn request(&self, demand: Demand) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }

        if let Some(tracker) = self.tracker.upgrade() {
            tracker.request(demand);
        }
    }

    /// Stops all further deliveries and completion signals. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!("subscription {} cancelled", self.id);

        if let Some(tracker) = self.tracker.upgrade() {
            tracker.cancel();
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }

    /// False once cancelled, completed, or the publisher is gone.
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self
                .tracker
                .upgrade()
                .map(|tracker| tracker.is_active())
                .unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
