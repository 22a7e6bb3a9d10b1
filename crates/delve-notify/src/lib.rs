//! Delve Notify - live event fan-out
//!
//! Many observers can watch one job; each gets its own bounded buffer and
//! sees that job's events in publish order. Slow or departed observers are
//! evicted instead of slowing the publisher.

#![warn(unreachable_pub)]

pub mod notifier;
pub mod subscription;

pub use notifier::Notifier;
pub use subscription::{SubscriberId, Subscription};
