//! Post-commit hook surface.
//!
//! The service layer calls these strictly after the canonical transaction
//! has committed. Every method is infallible and non-blocking with respect
//! to the index: it only enqueues.

use std::sync::Arc;

use super::{EntityKind, SyncAction, SyncQueue};

/// Display fields whose change makes embedded copies stale. A sort-order or
/// active-flag change only affects the entity's own document.
const CASCADE_FIELDS: [&str; 2] = ["name", "slug"];

pub struct SyncTrigger {
    queue: Arc<SyncQueue>,
}

impl SyncTrigger {
    pub fn new(queue: Arc<SyncQueue>) -> Self {
        SyncTrigger { queue }
    }

    pub fn after_create(&self, kind: EntityKind, id: i64) {
        self.queue.enqueue(kind, id, SyncAction::Create, false);
    }

    /// `changed` carries the names of fields the update touched, so a
    /// parent-entity edit that left its display fields alone skips the
    /// cascade.
    pub fn after_update(&self, kind: EntityKind, id: i64, changed: &[&str]) {
        let cascade = match kind {
            EntityKind::Category | EntityKind::Brand => changed
                .iter()
                .any(|field| CASCADE_FIELDS.contains(field)),
            EntityKind::Item => false,
        };
        self.queue.enqueue(kind, id, SyncAction::Update, cascade);
    }

    /// `affected_item_ids` must be captured before the delete commits: the
    /// relation rows a cascade would walk are gone afterwards.
    pub fn after_delete(&self, kind: EntityKind, id: i64, affected_item_ids: Vec<i64>) {
        self.queue.enqueue(kind, id, SyncAction::Delete, false);
        self.queue.enqueue_item_resync(affected_item_ids);
    }
}
