//! Multicast, demand-regulated broadcaster.
//!
//! A [`Subject`] fans values out to any number of [`Subscriber`]s. Each
//! subscriber only receives as many values as it asked for through its
//! [`Subscription`], and nothing after its terminal [`Completion`].
//!
//! ```
//! use std::convert::Infallible;
//! use demand_broadcast::{Publisher, Subject};
//!
//! let subject = Subject::<u32, Infallible>::new();
//! let subscription = subject.sink(|value| println!("got {}", value));
//!
//! subject.publish(1);
//! subject.complete();
//!
//! assert!(!subscription.is_active());
//! ```

mod publisher;
mod subscriber;

pub use publisher::*;
pub use subscriber::*;

#[cfg(test)]
pub(crate) fn init_test_logger() {
    dotenv::dotenv().ok();
    _ = pretty_env_logger::try_init();
}
