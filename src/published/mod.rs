//! Published model: snapshots, elements, properties and the snapshot service.

pub mod cache;
pub mod cache_level;
pub mod content_type;
pub mod element;
pub mod property;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod value;

pub use cache::PublishedCache;
pub use cache_level::{EffectiveLevel, effective_cache_level};
pub use content_type::{ContentTypeDescriptor, PropertyTypeDescriptor};
pub use element::{ElementContext, NodeInfo, PropertyRef, PublishedElement};
pub use service::{
    CollectSummary, DefaultSnapshotService, PublishedSnapshotService, RebuildSummary,
    ServiceDeps, ServiceState,
};
pub use snapshot::{ForcedPreview, PublishedSnapshot, SnapshotAccessor};
pub use store::{ContentChanges, ContentStore, ContentStores};
pub use value::{ObjectValue, PropertySource, PropertyValues, PublishedValue, SourceValue};
