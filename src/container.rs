use crate::collection::LocalOrderedCollection;
use crate::models::{OrderableEntity, PushEnvelope};
use crate::reorder::{assign_contiguous_orders, reorder_ids};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prior `(id, order)` pairs of every entity touched by an optimistic
/// reorder. Applying it restores the exact pre-mutation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRecord {
    pub container_id: String,
    pub previous: BTreeMap<String, u32>,
}

impl UndoRecord {
    pub fn capture(collection: &LocalOrderedCollection) -> Self {
        Self {
            container_id: collection.container_id().to_string(),
            previous: collection.snapshot().into_iter().collect(),
        }
    }

    /// Entities deleted since the capture are skipped.
    pub fn apply(&self, collection: &mut LocalOrderedCollection) -> usize {
        collection.set_orders(self.previous.iter().map(|(id, order)| (id.as_str(), *order)))
    }
}

#[derive(Debug, Clone)]
pub enum ContainerAction {
    Reorder { entity_id: String, final_index: usize },
    Undo(UndoRecord),
    Push(PushEnvelope),
    Insert { entity_id: String, order: Option<u32> },
    Remove { entity_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Reordered(UndoRecord),
    Applied(usize),
    Skipped,
}

/// Local state of one container. All writes go through [`dispatch`], which
/// is the single place the last-write-wins push policy lives.
///
/// [`dispatch`]: ContainerState::dispatch
#[derive(Debug, Clone)]
pub struct ContainerState {
    collection: LocalOrderedCollection,
    last_push_version: Option<u64>,
    reject_stale_push: bool,
}

impl ContainerState {
    pub fn new(collection: LocalOrderedCollection, reject_stale_push: bool) -> Self {
        Self {
            collection,
            last_push_version: None,
            reject_stale_push,
        }
    }

    pub fn from_entities(
        container_id: impl Into<String>,
        entities: impl IntoIterator<Item = OrderableEntity>,
        reject_stale_push: bool,
    ) -> Self {
        Self::new(LocalOrderedCollection::from_entities(container_id, entities), reject_stale_push)
    }

    /// Baseline for version gating and resync, e.g. the store's newest event
    /// at load time.
    pub fn with_push_version(mut self, version: Option<u64>) -> Self {
        self.last_push_version = version;
        self
    }

    pub fn collection(&self) -> &LocalOrderedCollection {
        &self.collection
    }

    pub fn last_push_version(&self) -> Option<u64> {
        self.last_push_version
    }

    pub fn dispatch(&mut self, action: ContainerAction) -> ActionResult {
        match action {
            ContainerAction::Reorder { entity_id, final_index } => match self.reorder(&entity_id, final_index) {
                Some(undo) => ActionResult::Reordered(undo),
                None => ActionResult::Skipped,
            },
            ContainerAction::Undo(record) => {
                if record.container_id != self.collection.container_id() {
                    return ActionResult::Skipped;
                }
                ActionResult::Applied(record.apply(&mut self.collection))
            }
            ContainerAction::Push(envelope) => self.apply_push(envelope),
            ContainerAction::Insert { entity_id, order } => {
                self.collection.insert(entity_id, order);
                ActionResult::Applied(1)
            }
            ContainerAction::Remove { entity_id } => match self.collection.remove(&entity_id) {
                Some(_) => ActionResult::Applied(1),
                None => ActionResult::Skipped,
            },
        }
    }

    /// Moves `entity_id` to `final_index` and renumbers the whole container.
    /// Returns `None` when nothing would change.
    fn reorder(&mut self, entity_id: &str, final_index: usize) -> Option<UndoRecord> {
        let source_index = self.collection.index_of(entity_id)?;
        if source_index == final_index || final_index >= self.collection.len() {
            return None;
        }

        let undo = UndoRecord::capture(&self.collection);
        let next = reorder_ids(self.collection.sorted_ids(), source_index, final_index);
        let orders = assign_contiguous_orders(&next);
        self.collection
            .set_orders(orders.iter().map(|(id, order)| (id.as_str(), *order)));
        Some(undo)
    }

    fn apply_push(&mut self, envelope: PushEnvelope) -> ActionResult {
        if envelope.container_id != self.collection.container_id() {
            return ActionResult::Skipped;
        }
        if let Some(version) = envelope.version {
            if self.reject_stale_push && self.last_push_version.is_some_and(|last| version <= last) {
                tracing::debug!(
                    container_id = %envelope.container_id,
                    version,
                    last = self.last_push_version,
                    "dropping stale push event"
                );
                return ActionResult::Skipped;
            }
            self.last_push_version = Some(self.last_push_version.map_or(version, |last| last.max(version)));
        }

        let applied = self.collection.set_orders(
            envelope
                .patches
                .iter()
                .map(|patch| (patch.entity_id.as_str(), patch.new_order)),
        );
        ActionResult::Applied(applied)
    }
}
