//! `covenant-subscriptions`: subscription records, the frequency policy,
//! storage, and the registry that coordinates them.
//!
//! # Layers
//!
//! | Module       | Role                                                        |
//! |--------------|-------------------------------------------------------------|
//! | `types`      | `Subscription`, `Frequency`, ids, paging                    |
//! | `policy`     | `next_due(frequency, from)`, the only interval arithmetic   |
//! | `store`      | `SubscriptionStore` trait and the in-process `MemoryStore`  |
//! | `sqlite`     | `SqliteStore` over a rusqlite connection                    |
//! | `registry`   | validation, per-id serialization, fulfillment claims        |

pub mod db;
pub mod error;
pub mod policy;
pub mod registry;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{Result, StoreError, StoreResult, SubscriptionError};
pub use policy::next_due;
pub use registry::{Claim, SubscriptionRegistry};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, SubscriptionStore};
pub use types::{
    Frequency, NewSubscription, Page, Subscription, SubscriptionChanges, SubscriptionId,
    SubscriptionStatus,
};
