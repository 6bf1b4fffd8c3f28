use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{ContainerScope, OrderableEntity, PersistRequest, PushEnvelope};
use crate::policy::PolicyEngine;
use crate::realtime::TopicHub;
use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type PersistFuture = Pin<Box<dyn Future<Output = AppResult<()>> + Send>>;

/// Persistence endpoint for reorders. Resolves on success, fails with an
/// inspectable [`AppError`] otherwise.
pub trait Persistence: Send + Sync {
    fn persist(&self, request: PersistRequest) -> PersistFuture;
}

/// Initial contents of a container when a view mounts.
pub trait ContainerSource: Send + Sync {
    fn load(&self, scope: &ContainerScope) -> AppResult<Vec<OrderableEntity>>;

    /// Newest push version the source has produced. Read before `load` so
    /// the loaded rows are at least this new.
    fn latest_version(&self, _scope: &ContainerScope) -> AppResult<Option<u64>> {
        Ok(None)
    }

    /// Push envelopes newer than `after_version`, oldest first.
    fn events_since(&self, _scope: &ContainerScope, _after_version: u64) -> AppResult<Vec<PushEnvelope>> {
        Ok(Vec::new())
    }
}

/// Server-side endpoint backed by SQLite. Every accepted move is fanned out
/// to the container's topic with the full renumbered order.
#[derive(Clone)]
pub struct SqlitePersistence {
    db: Arc<Database>,
    hub: TopicHub,
    policy: PolicyEngine,
}

impl SqlitePersistence {
    pub fn new(db: Arc<Database>, hub: TopicHub) -> Self {
        Self {
            db,
            hub,
            policy: PolicyEngine::new(),
        }
    }

    pub fn apply(&self, request: &PersistRequest) -> AppResult<PushEnvelope> {
        let outcome = self.db.move_entity(&self.policy, request)?;
        let envelope = PushEnvelope {
            container_id: outcome.container.id.clone(),
            version: Some(outcome.version),
            origin_client: Some(request.client_id.clone()),
            patches: outcome.patches,
            timestamp: Utc::now(),
        };
        let topic = ContainerScope::new(outcome.container.kind, outcome.container.id).topic();
        let delivered = self.hub.publish(&topic, envelope.clone());
        tracing::info!(
            topic = %topic,
            request_id = %request.request_id,
            entity_id = %request.entity_id,
            new_order = request.new_order,
            version = outcome.version,
            delivered,
            "reorder persisted"
        );
        Ok(envelope)
    }
}

impl Persistence for SqlitePersistence {
    fn persist(&self, request: PersistRequest) -> PersistFuture {
        let this = self.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || this.apply(&request).map(|_| ()))
                .await
                .map_err(|error| AppError::Internal(format!("persist task failed: {}", error)))?
        })
    }
}

impl ContainerSource for SqlitePersistence {
    fn load(&self, scope: &ContainerScope) -> AppResult<Vec<OrderableEntity>> {
        let container = self
            .db
            .get_container(&scope.id)?
            .ok_or_else(|| AppError::NotFound(format!("Container {} does not exist", scope.id)))?;
        if container.kind != scope.kind {
            return Err(AppError::Invalid(format!(
                "Container {} is a {} container, not {}",
                scope.id,
                container.kind.as_str(),
                scope.kind.as_str()
            )));
        }
        self.db.list_entities(&scope.id)
    }

    fn latest_version(&self, scope: &ContainerScope) -> AppResult<Option<u64>> {
        self.db.latest_event_seq(&scope.id)
    }

    fn events_since(&self, scope: &ContainerScope, after_version: u64) -> AppResult<Vec<PushEnvelope>> {
        self.db.order_events_since(&scope.id, after_version)
    }
}
