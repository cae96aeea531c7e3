//! Change notification payloads and the in-process notification queue.
//!
//! Payloads are what a transport (a distributed messenger, a webhook, an
//! editor save hook) hands to the snapshot service. The queue lets such a
//! transport publish from its own thread while the service applies the
//! payloads in batches.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::domain::types::ItemKind;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_QUEUE_LEN: &str = "pubcache_notification_queue_len";

/// Monotonic epoch for ordering notifications.
pub type Epoch = u64;

/// What happened to a node of a tree (content, media).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeChange {
    /// The node itself changed.
    RefreshNode,
    /// The node and its descendants changed (move, sort, publish with descendants).
    RefreshBranch,
    /// The node and its descendants were deleted.
    Remove,
    /// Everything of this kind must be reloaded.
    RefreshAll,
}

impl TreeChange {
    pub fn as_str(self) -> &'static str {
        match self {
            TreeChange::RefreshNode => "refresh_node",
            TreeChange::RefreshBranch => "refresh_branch",
            TreeChange::Remove => "remove",
            TreeChange::RefreshAll => "refresh_all",
        }
    }
}

/// One change to a node of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChangePayload {
    pub id: i32,
    /// Affected descendants when the sender already knows them.
    #[serde(default)]
    pub descendant_ids: Option<Vec<i32>>,
    pub change: TreeChange,
}

impl TreeChangePayload {
    pub fn new(id: i32, change: TreeChange) -> Self {
        Self {
            id,
            descendant_ids: None,
            change,
        }
    }

    pub fn refresh_node(id: i32) -> Self {
        Self::new(id, TreeChange::RefreshNode)
    }

    pub fn refresh_branch(id: i32) -> Self {
        Self::new(id, TreeChange::RefreshBranch)
    }

    pub fn remove(id: i32) -> Self {
        Self::new(id, TreeChange::Remove)
    }

    pub fn refresh_all() -> Self {
        Self::new(0, TreeChange::RefreshAll)
    }

    pub fn with_descendants(mut self, ids: Vec<i32>) -> Self {
        self.descendant_ids = Some(ids);
        self
    }
}

pub type ContentChangePayload = TreeChangePayload;
pub type MediaChangePayload = TreeChangePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypeChange {
    Create,
    /// Structural change: property list, aliases, variation.
    RefreshMain,
    /// Cosmetic change that leaves stored content untouched.
    RefreshOther,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeChangePayload {
    pub kind: ItemKind,
    pub id: i32,
    pub change: ContentTypeChange,
}

impl ContentTypeChangePayload {
    pub fn new(kind: ItemKind, id: i32, change: ContentTypeChange) -> Self {
        Self { kind, id, change }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeChangePayload {
    pub id: i32,
    #[serde(default)]
    pub removed: bool,
}

impl DataTypeChangePayload {
    pub fn refreshed(id: i32) -> Self {
        Self { id, removed: false }
    }

    pub fn removed(id: i32) -> Self {
        Self { id, removed: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainChange {
    RefreshAll,
    Refresh,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainChangePayload {
    pub id: i32,
    pub change: DomainChange,
}

impl DomainChangePayload {
    pub fn new(id: i32, change: DomainChange) -> Self {
        Self { id, change }
    }

    pub fn refresh_all() -> Self {
        Self::new(0, DomainChange::RefreshAll)
    }
}

/// A batch of payloads of one shape, as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationPayload {
    Content(Vec<ContentChangePayload>),
    Media(Vec<MediaChangePayload>),
    ContentTypes(Vec<ContentTypeChangePayload>),
    DataTypes(Vec<DataTypeChangePayload>),
    Domains(Vec<DomainChangePayload>),
}

impl NotificationPayload {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPayload::Content(_) => "content",
            NotificationPayload::Media(_) => "media",
            NotificationPayload::ContentTypes(_) => "content_types",
            NotificationPayload::DataTypes(_) => "data_types",
            NotificationPayload::Domains(_) => "domains",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NotificationPayload::Content(items) | NotificationPayload::Media(items) => items.len(),
            NotificationPayload::ContentTypes(items) => items.len(),
            NotificationPayload::DataTypes(items) => items.len(),
            NotificationPayload::Domains(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `other` when both carry the same payload shape.
    pub(crate) fn try_merge(&mut self, other: NotificationPayload) -> Option<NotificationPayload> {
        match (self, other) {
            (NotificationPayload::Content(into), NotificationPayload::Content(from))
            | (NotificationPayload::Media(into), NotificationPayload::Media(from)) => {
                into.extend(from);
                None
            }
            (NotificationPayload::ContentTypes(into), NotificationPayload::ContentTypes(from)) => {
                into.extend(from);
                None
            }
            (NotificationPayload::DataTypes(into), NotificationPayload::DataTypes(from)) => {
                into.extend(from);
                None
            }
            (NotificationPayload::Domains(into), NotificationPayload::Domains(from)) => {
                into.extend(from);
                None
            }
            (_, other) => Some(other),
        }
    }
}

/// A queued notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub epoch: Epoch,
    pub payload: NotificationPayload,
    pub received_at: OffsetDateTime,
}

/// In-memory FIFO of pending notifications.
///
/// Contention is low (one transport, one applier), so a mutex is enough.
pub struct NotificationQueue {
    queue: Mutex<VecDeque<Notification>>,
    epoch_counter: AtomicU64,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, payload: NotificationPayload) -> Epoch {
        let epoch = self.next_epoch();
        info!(
            notification_epoch = epoch,
            payload_kind = payload.as_str(),
            payload_count = payload.len(),
            "Notification enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        queue.push_back(Notification {
            epoch,
            payload,
            received_at: OffsetDateTime::now_utc(),
        });
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        epoch
    }

    /// Drains up to `limit` notifications in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<Notification> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}
