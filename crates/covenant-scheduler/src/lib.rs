//! `covenant-scheduler`: tick-driven fulfillment of due subscriptions.
//!
//! # Overview
//!
//! A [`Scheduler`] tick asks the [`SubscriptionRegistry`] for active
//! subscriptions whose `next_due_at` has passed, oldest first. Each one is
//! claimed, advanced by one interval, and announced to an [`EventSink`] as a
//! [`FulfillmentEvent`]. A claim that loses a race is skipped silently; any
//! other per-subscription failure is recorded in the [`TickReport`] and the
//! tick carries on.
//!
//! The trigger is external: call [`Scheduler::tick`] directly, or hand the
//! scheduler to [`Scheduler::run`] for a fixed-interval background loop.
//!
//! [`SubscriptionRegistry`]: covenant_subscriptions::SubscriptionRegistry

pub mod engine;
pub mod error;
pub mod sink;
pub mod types;

pub use engine::{Scheduler, SchedulerOptions};
pub use error::{Result, SchedulerError, SinkError};
pub use sink::{ChannelSink, EventSink, LogSink};
pub use types::{FailureStage, FulfillmentEvent, TickFailure, TickReport};
