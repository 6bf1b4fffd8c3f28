//! Drag session state machine.
//!
//! Adapts the raw lifecycle events of a drag-and-drop primitive
//! (`dragStart`, `dropTargetChange`, `dragLeave`, `drop`) into one of three
//! states:
//!
//! - `Idle`: nothing is being dragged.
//! - `Dragging`: a source is picked up but no valid target is hovered.
//! - `Over`: a target and closest edge are recorded as the drop preview.
//!
//! The preview never touches the collection. Only a `Drop` while `Over`
//! produces a [`DropIntent`]; every other way out of a session is a cancel.

use crate::models::ClosestEdge;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    Escape,
    WindowBlur,
    PointerLost,
    OutsideTarget,
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DragEvent {
    Start {
        source_id: String,
        source_index: usize,
    },
    Over {
        target_id: String,
        target_index: usize,
        edge: Option<ClosestEdge>,
    },
    Leave,
    Drop,
    Cancel(CancelReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSource {
    pub id: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragPhase {
    Idle,
    Dragging {
        source: DragSource,
    },
    Over {
        source: DragSource,
        target_id: String,
        target_index: usize,
        edge: Option<ClosestEdge>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropIntent {
    pub source: DragSource,
    pub target_id: String,
    pub target_index: usize,
    pub edge: Option<ClosestEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    /// State changed, nothing to commit.
    Updated,
    /// Event did not apply to the current phase.
    Ignored,
    Dropped(DropIntent),
    Cancelled(CancelReason),
}

#[derive(Debug, Clone)]
pub struct DragSession {
    phase: DragPhase,
}

impl Default for DragSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DragSession {
    pub fn new() -> Self {
        Self { phase: DragPhase::Idle }
    }

    pub fn phase(&self) -> &DragPhase {
        &self.phase
    }

    /// True while a source is picked up, hovered target or not.
    pub fn is_active(&self) -> bool {
        !matches!(self.phase, DragPhase::Idle)
    }

    pub fn source(&self) -> Option<&DragSource> {
        match &self.phase {
            DragPhase::Idle => None,
            DragPhase::Dragging { source } | DragPhase::Over { source, .. } => Some(source),
        }
    }

    /// Feeds one lifecycle event. A `Start` during an active session cancels
    /// it first; the caller sees `Cancelled(Superseded)` and the new session
    /// is already `Dragging`.
    pub fn handle(&mut self, event: DragEvent) -> DragOutcome {
        let phase = std::mem::replace(&mut self.phase, DragPhase::Idle);
        let (next, outcome) = match (phase, event) {
            (DragPhase::Idle, DragEvent::Start { source_id, source_index }) => (
                DragPhase::Dragging {
                    source: DragSource {
                        id: source_id,
                        index: source_index,
                    },
                },
                DragOutcome::Updated,
            ),
            (_, DragEvent::Start { source_id, source_index }) => (
                DragPhase::Dragging {
                    source: DragSource {
                        id: source_id,
                        index: source_index,
                    },
                },
                DragOutcome::Cancelled(CancelReason::Superseded),
            ),
            (DragPhase::Idle, _) => (DragPhase::Idle, DragOutcome::Ignored),
            (
                DragPhase::Dragging { source } | DragPhase::Over { source, .. },
                DragEvent::Over {
                    target_id,
                    target_index,
                    edge,
                },
            ) => (
                DragPhase::Over {
                    source,
                    target_id,
                    target_index,
                    edge,
                },
                DragOutcome::Updated,
            ),
            (DragPhase::Over { source, .. }, DragEvent::Leave) => {
                (DragPhase::Dragging { source }, DragOutcome::Updated)
            }
            (phase @ DragPhase::Dragging { .. }, DragEvent::Leave) => (phase, DragOutcome::Ignored),
            (
                DragPhase::Over {
                    source,
                    target_id,
                    target_index,
                    edge,
                },
                DragEvent::Drop,
            ) => (
                DragPhase::Idle,
                DragOutcome::Dropped(DropIntent {
                    source,
                    target_id,
                    target_index,
                    edge,
                }),
            ),
            (DragPhase::Dragging { .. }, DragEvent::Drop) => {
                (DragPhase::Idle, DragOutcome::Cancelled(CancelReason::OutsideTarget))
            }
            (_, DragEvent::Cancel(reason)) => (DragPhase::Idle, DragOutcome::Cancelled(reason)),
        };
        self.phase = next;
        outcome
    }
}
