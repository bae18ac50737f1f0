//! Eventual-consistency machinery between the canonical store and the
//! search index.
//!
//! A catalog mutation commits, the [`SyncTrigger`] enqueues a request, the
//! [`SyncQueue`] worker drains it into the [`IndexSynchronizer`], which
//! rebuilds or removes the affected documents. Nothing on this path can fail
//! the originating write: every error is caught, logged, retried within
//! bounds, and then dropped.

mod queue;
mod synchronizer;
mod trigger;

pub use queue::{SyncQueue, SyncQueueConfig};
pub use synchronizer::{IndexSynchronizer, ReindexReport};
pub use trigger::SyncTrigger;

/// Entity kinds the index mirrors. Closed set: adding a kind means adding a
/// formatter, not another string branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Item,
    Category,
    Brand,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Category => "category",
            EntityKind::Brand => "brand",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

/// One unit of sync work. `version` is assigned at enqueue time and strictly
/// increases, so the synchronizer can discard requests that arrive after a
/// newer one for the same entity was already applied.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    pub kind: EntityKind,
    pub id: i64,
    pub action: SyncAction,
    /// Resync documents that embed copies of this entity's display fields.
    pub cascade: bool,
    pub version: u64,
}
