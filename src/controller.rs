use crate::autoscroll::{AutoScrollConfig, AutoScrollGuard, AutoScroller, Point, ScrollRegion, ScrollTarget};
use crate::container::{ActionResult, ContainerAction, ContainerState, UndoRecord};
use crate::drag::{CancelReason, DragEvent, DragOutcome, DragSession, DropIntent};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ContainerScope, Notification, NotificationKind, OrderableEntity, PersistRequest, PushEnvelope, ReorderAccepted,
    ReorderSettings,
};
use crate::persistence::{ContainerSource, Persistence};
use crate::realtime::TopicHub;
use crate::reorder::{compute_bounded, ReorderOutcome};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

const NOTIFICATION_CAPACITY: usize = 64;

struct OpenContainer {
    scope: ContainerScope,
    state: ContainerState,
    session: DragSession,
    listener: JoinHandle<()>,
    auto_scroll: Option<AutoScrollGuard>,
}

impl OpenContainer {
    fn end_session(&mut self) {
        if let Some(guard) = self.auto_scroll.take() {
            guard.stop();
        }
    }
}

impl Drop for OpenContainer {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

type Containers = Arc<Mutex<HashMap<String, OpenContainer>>>;

#[derive(Debug)]
pub enum DragResponse {
    Updated,
    Ignored,
    /// Dropped where nothing changes: no mutation, no request.
    NoOp,
    Cancelled(CancelReason),
    /// Applied locally; `persist` resolves once the request settled and, on
    /// failure, the undo has been applied.
    Accepted {
        accepted: ReorderAccepted,
        persist: JoinHandle<()>,
    },
}

/// Client-side owner of every open container on this view.
#[derive(Clone)]
pub struct ReorderController {
    client_id: String,
    settings: ReorderSettings,
    persistence: Arc<dyn Persistence>,
    source: Arc<dyn ContainerSource>,
    hub: TopicHub,
    containers: Containers,
    notifications: broadcast::Sender<Notification>,
}

impl ReorderController {
    pub fn new(
        settings: ReorderSettings,
        persistence: Arc<dyn Persistence>,
        source: Arc<dyn ContainerSource>,
        hub: TopicHub,
    ) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Arc::new(Self {
            client_id: Uuid::new_v4().to_string(),
            settings,
            persistence,
            source,
            hub,
            containers: Arc::new(Mutex::new(HashMap::new())),
            notifications,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn settings(&self) -> &ReorderSettings {
        &self.settings
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Loads the container and starts applying its push events. Reopening an
    /// open container reloads it. Must run inside the tokio runtime: the push
    /// listener is a spawned task.
    pub fn open_container(&self, scope: ContainerScope) -> AppResult<Vec<OrderableEntity>> {
        // subscribed before loading so a push committed mid-load is buffered
        let mut subscription = self.hub.subscribe(&scope.topic());
        let version = self.source.latest_version(&scope)?;
        let entities = self.source.load(&scope)?;
        let state = ContainerState::from_entities(scope.id.clone(), entities, self.settings.reject_stale_push)
            .with_push_version(version);
        let loaded = state.collection().sorted().into_iter().cloned().collect::<Vec<_>>();

        let mut containers = self.lock()?;
        let shared = self.containers.clone();
        let container_id = scope.id.clone();
        // spawned under the lock, so the first envelope sees the container
        let listener = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                let Ok(mut guard) = shared.lock() else {
                    break;
                };
                match guard.get_mut(&container_id) {
                    Some(open) => {
                        open.state.dispatch(ContainerAction::Push(envelope));
                    }
                    None => break,
                }
            }
        });

        tracing::info!(container = %scope, entities = loaded.len(), version = ?version, "container opened");
        containers.insert(
            scope.id.clone(),
            OpenContainer {
                scope,
                state,
                session: DragSession::new(),
                listener,
                auto_scroll: None,
            },
        );
        Ok(loaded)
    }

    pub fn close_container(&self, container_id: &str) -> AppResult<bool> {
        let removed = self.lock()?.remove(container_id);
        if let Some(mut open) = removed {
            open.end_session();
            tracing::info!(container = %open.scope, "container closed");
            return Ok(true);
        }
        Ok(false)
    }

    pub fn snapshot(&self, container_id: &str) -> AppResult<Vec<(String, u32)>> {
        let containers = self.lock()?;
        let open = open_container(&containers, container_id)?;
        Ok(open.state.collection().snapshot())
    }

    pub fn entities(&self, container_id: &str) -> AppResult<Vec<OrderableEntity>> {
        let containers = self.lock()?;
        let open = open_container(&containers, container_id)?;
        Ok(open.state.collection().sorted().into_iter().cloned().collect())
    }

    pub fn is_dragging(&self, container_id: &str) -> AppResult<bool> {
        let containers = self.lock()?;
        Ok(open_container(&containers, container_id)?.session.is_active())
    }

    /// Feeds one drag lifecycle event. On a valid drop the container is
    /// mutated before this returns and the persistence request is in flight.
    pub fn handle_drag(&self, container_id: &str, event: DragEvent) -> AppResult<DragResponse> {
        let mut containers = self.lock()?;
        let open = open_container_mut(&mut containers, container_id)?;

        match open.session.handle(event) {
            DragOutcome::Updated => Ok(DragResponse::Updated),
            DragOutcome::Ignored => Ok(DragResponse::Ignored),
            DragOutcome::Cancelled(CancelReason::Superseded) => Ok(DragResponse::Cancelled(CancelReason::Superseded)),
            DragOutcome::Cancelled(reason) => {
                open.end_session();
                tracing::debug!(container = %open.scope, reason = ?reason, "drag cancelled");
                Ok(DragResponse::Cancelled(reason))
            }
            DragOutcome::Dropped(intent) => {
                open.end_session();
                let Some((entity_id, final_index, undo)) = apply_drop(open, &intent) else {
                    return Ok(DragResponse::NoOp);
                };
                let request = PersistRequest {
                    request_id: Uuid::new_v4().to_string(),
                    container_id: container_id.to_string(),
                    entity_id: entity_id.clone(),
                    new_order: final_index as u32,
                    client_id: self.client_id.clone(),
                };
                let accepted = ReorderAccepted {
                    request_id: request.request_id.clone(),
                    container_id: container_id.to_string(),
                    entity_id,
                    final_index,
                };
                drop(containers);
                let persist = self.spawn_persist(request, undo);
                Ok(DragResponse::Accepted { accepted, persist })
            }
        }
    }

    /// Starts auto-scrolling for the active drag of a container. The task
    /// ends with the drag session or when the container closes. A region
    /// without its own overflow band uses `autoScrollOverflowBand`.
    pub fn start_auto_scroll(
        &self,
        container_id: &str,
        target: Arc<dyn ScrollTarget>,
        mut region: ScrollRegion,
    ) -> AppResult<()> {
        let mut containers = self.lock()?;
        let open = open_container_mut(&mut containers, container_id)?;
        if !open.session.is_active() {
            return Err(AppError::Invalid(format!(
                "No active drag in container {} to auto-scroll for",
                container_id
            )));
        }
        let config = AutoScrollConfig::from_settings(&self.settings);
        if region.overflow_band <= 0.0 {
            region.overflow_band = self.settings.auto_scroll_overflow_band.max(0.0);
        }
        open.auto_scroll = Some(AutoScroller::start(target, region, config));
        Ok(())
    }

    pub fn update_pointer(&self, container_id: &str, pointer: Point) -> AppResult<()> {
        let containers = self.lock()?;
        let open = open_container(&containers, container_id)?;
        if let Some(guard) = &open.auto_scroll {
            guard.update_pointer(pointer);
        }
        Ok(())
    }

    pub fn is_auto_scrolling(&self, container_id: &str) -> AppResult<bool> {
        let containers = self.lock()?;
        let open = open_container(&containers, container_id)?;
        Ok(open.auto_scroll.as_ref().is_some_and(AutoScrollGuard::is_running))
    }

    /// Applies a push envelope the same way the topic listener does.
    pub fn apply_push(&self, envelope: PushEnvelope) -> AppResult<usize> {
        let mut containers = self.lock()?;
        let Some(open) = containers.get_mut(&envelope.container_id) else {
            return Ok(0);
        };
        match open.state.dispatch(ContainerAction::Push(envelope)) {
            ActionResult::Applied(count) => Ok(count),
            _ => Ok(0),
        }
    }

    /// Replays order events the container missed, e.g. after a reconnect.
    pub fn resync(&self, container_id: &str) -> AppResult<usize> {
        let (scope, after) = {
            let containers = self.lock()?;
            let open = open_container(&containers, container_id)?;
            (open.scope.clone(), open.state.last_push_version().unwrap_or(0))
        };
        let envelopes = self.source.events_since(&scope, after)?;
        let mut applied = 0usize;
        for envelope in envelopes {
            applied += self.apply_push(envelope)?;
        }
        Ok(applied)
    }

    pub fn insert_entity(&self, container_id: &str, entity_id: &str, order: Option<u32>) -> AppResult<()> {
        let mut containers = self.lock()?;
        let open = open_container_mut(&mut containers, container_id)?;
        open.state.dispatch(ContainerAction::Insert {
            entity_id: entity_id.to_string(),
            order,
        });
        Ok(())
    }

    pub fn remove_entity(&self, container_id: &str, entity_id: &str) -> AppResult<bool> {
        let mut containers = self.lock()?;
        let open = open_container_mut(&mut containers, container_id)?;
        let result = open.state.dispatch(ContainerAction::Remove {
            entity_id: entity_id.to_string(),
        });
        Ok(matches!(result, ActionResult::Applied(_)))
    }

    fn spawn_persist(&self, request: PersistRequest, undo: UndoRecord) -> JoinHandle<()> {
        let persistence = self.persistence.clone();
        let containers = self.containers.clone();
        let notifications = self.notifications.clone();
        let limit = Duration::from_millis(self.settings.persist_timeout_ms.max(1));

        tokio::spawn(async move {
            let result = match timeout(limit, persistence.persist(request.clone())).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Io(format!(
                    "Reorder request timed out after {}ms",
                    limit.as_millis()
                ))),
            };
            let Err(error) = result else {
                return;
            };

            tracing::warn!(
                container_id = %request.container_id,
                entity_id = %request.entity_id,
                request_id = %request.request_id,
                error = %error,
                "reorder could not be saved; reverting"
            );
            if let Ok(mut guard) = containers.lock() {
                if let Some(open) = guard.get_mut(&request.container_id) {
                    open.state.dispatch(ContainerAction::Undo(undo));
                }
            }
            let _ = notifications.send(Notification {
                kind: NotificationKind::SaveFailed,
                container_id: request.container_id,
                entity_id: request.entity_id,
                error_code: error.code().to_string(),
                message: "Changes could not be saved".to_string(),
                created_at: Utc::now(),
            });
        })
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<String, OpenContainer>>> {
        self.containers
            .lock()
            .map_err(|_| AppError::Internal("container state mutex poisoned".to_string()))
    }
}

/// Resolves a drop against the current collection and applies it. Indices
/// are re-read by id because push events may have moved things mid-drag.
fn apply_drop(open: &mut OpenContainer, intent: &DropIntent) -> Option<(String, usize, UndoRecord)> {
    let collection = open.state.collection();
    let source_index = collection.index_of(&intent.source.id).unwrap_or(intent.source.index);
    let target_index = collection.index_of(&intent.target_id).unwrap_or(intent.target_index);
    let outcome = compute_bounded(
        collection.len(),
        source_index,
        target_index,
        intent.edge,
        open.scope.kind.axis(),
    );
    let ReorderOutcome::MoveTo(final_index) = outcome else {
        return None;
    };

    match open.state.dispatch(ContainerAction::Reorder {
        entity_id: intent.source.id.clone(),
        final_index,
    }) {
        ActionResult::Reordered(undo) => Some((intent.source.id.clone(), final_index, undo)),
        _ => None,
    }
}

fn open_container<'a>(
    containers: &'a HashMap<String, OpenContainer>,
    container_id: &str,
) -> AppResult<&'a OpenContainer> {
    containers
        .get(container_id)
        .ok_or_else(|| AppError::NotFound(format!("Container {} is not open", container_id)))
}

fn open_container_mut<'a>(
    containers: &'a mut HashMap<String, OpenContainer>,
    container_id: &str,
) -> AppResult<&'a mut OpenContainer> {
    containers
        .get_mut(container_id)
        .ok_or_else(|| AppError::NotFound(format!("Container {} is not open", container_id)))
}
