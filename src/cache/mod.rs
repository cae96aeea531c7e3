//! Cache scopes and invalidation plumbing behind published snapshots.
//!
//! - **Elements cache**: converted property values shared by every snapshot
//! - **Snapshot cache**: elements materialized by one snapshot, dropped on dispose
//! - **Content type cache**: resolved type descriptors with their converters
//! - **Domain cache**: routing domains, independent of publication state
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! collect_interval_ms = 30000
//! notification_batch_limit = 100
//! collect_batch_size = 256
//! default_culture = ""
//! preview_enabled = true
//! ```

pub mod cancel;
pub mod collector;
pub mod config;
pub mod content_types;
pub mod domains;
pub mod elements;
pub mod events;
pub mod keys;
pub(crate) mod lock;
pub mod planner;
pub mod snapshot_cache;

pub use cancel::CancellationFlag;
pub use collector::spawn_periodic_collect;
pub use config::CacheConfig;
pub use content_types::ContentTypeCache;
pub use domains::DomainCache;
pub use elements::{ElementsCache, ElementsScope, SlotOrigin};
pub use events::{
    ContentChangePayload, ContentTypeChange, ContentTypeChangePayload, DataTypeChangePayload,
    DomainChange, DomainChangePayload, Epoch, MediaChangePayload, Notification,
    NotificationPayload, NotificationQueue, TreeChange, TreeChangePayload,
};
pub use keys::{ElementsCacheKey, SnapshotElementKey, ValueSlot};
pub use planner::{InvalidationPlan, PlannedChange};
pub use snapshot_cache::SnapshotCache;
