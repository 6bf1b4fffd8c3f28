pub mod autoscroll;
pub mod collection;
pub mod container;
pub mod controller;
pub mod db;
pub mod drag;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod policy;
pub mod realtime;
pub mod reorder;

use crate::controller::{DragResponse, ReorderController};
use crate::db::Database;
use crate::drag::DragEvent;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ContainerKind, ContainerRecord, ContainerScope, OrderableEntity, ReorderAccepted, ReorderSettings,
};
use crate::persistence::SqlitePersistence;
use crate::policy::PolicyEngine;
use crate::realtime::TopicHub;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Server store, push hub and one client controller wired together.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub hub: TopicHub,
    pub server: SqlitePersistence,
    pub controller: Arc<ReorderController>,
}

impl AppState {
    pub fn new(app_data_dir: PathBuf) -> AppResult<Self> {
        let db = Arc::new(Database::new(&app_data_dir.join("state.sqlite"))?);
        let settings = db.get_settings()?;
        let hub = TopicHub::new();
        let server = SqlitePersistence::new(db.clone(), hub.clone());
        let controller = ReorderController::new(
            settings,
            Arc::new(server.clone()),
            Arc::new(server.clone()),
            hub.clone(),
        );
        tracing::info!(path = %db.path().display(), client_id = %controller.client_id(), "reorder state ready");
        Ok(Self {
            db,
            hub,
            server,
            controller,
        })
    }

    /// A second controller on the same store and hub, as another connected
    /// session would have.
    pub fn connect_client(&self) -> AppResult<Arc<ReorderController>> {
        let settings = self.db.get_settings()?;
        Ok(ReorderController::new(
            settings,
            Arc::new(self.server.clone()),
            Arc::new(self.server.clone()),
            self.hub.clone(),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum DragEventResponse {
    Updated,
    Ignored,
    NoOp,
    Cancelled { reason: drag::CancelReason },
    Accepted(ReorderAccepted),
}

pub fn container_create(state: &AppState, kind: ContainerKind, container_id: String) -> Result<ContainerRecord, String> {
    state.db.create_container(&container_id, kind).map_err(to_client_error)
}

pub fn container_archive(state: &AppState, container_id: String, archived: bool) -> Result<(), String> {
    state
        .db
        .set_container_archived(&container_id, archived)
        .map_err(to_client_error)
}

pub fn entity_add(state: &AppState, container_id: String, entity_id: String) -> Result<OrderableEntity, String> {
    state
        .db
        .insert_entity(&PolicyEngine::new(), &container_id, &entity_id)
        .map_err(to_client_error)
}

/// Deletes the entity from the store and from this client's open container.
/// Siblings keep their orders until the next reorder.
pub fn entity_remove(state: &AppState, container_id: String, entity_id: String) -> Result<bool, String> {
    let deleted = state
        .db
        .delete_entity(&container_id, &entity_id)
        .map_err(to_client_error)?;
    if deleted {
        match state.controller.remove_entity(&container_id, &entity_id) {
            Ok(_) | Err(AppError::NotFound(_)) => {}
            Err(error) => return Err(to_client_error(error)),
        }
    }
    Ok(deleted)
}

/// Must run inside the tokio runtime: the container's push listener is
/// spawned here.
pub fn container_open(state: &AppState, topic: String) -> Result<Vec<OrderableEntity>, String> {
    let scope = ContainerScope::parse_topic(&topic).map_err(to_client_error)?;
    state.controller.open_container(scope).map_err(to_client_error)
}

pub fn container_close(state: &AppState, container_id: String) -> Result<bool, String> {
    state.controller.close_container(&container_id).map_err(to_client_error)
}

/// Must run inside the tokio runtime: an accepted drop spawns its request.
pub fn drag_event(state: &AppState, container_id: String, event: DragEvent) -> Result<DragEventResponse, String> {
    let response = state
        .controller
        .handle_drag(&container_id, event)
        .map_err(to_client_error)?;
    Ok(match response {
        DragResponse::Updated => DragEventResponse::Updated,
        DragResponse::Ignored => DragEventResponse::Ignored,
        DragResponse::NoOp => DragEventResponse::NoOp,
        DragResponse::Cancelled(reason) => DragEventResponse::Cancelled { reason },
        DragResponse::Accepted { accepted, .. } => DragEventResponse::Accepted(accepted),
    })
}

pub fn settings_get(state: &AppState) -> Result<ReorderSettings, String> {
    state.db.get_settings().map_err(to_client_error)
}

pub fn settings_update(state: &AppState, update: serde_json::Value) -> Result<ReorderSettings, String> {
    state.db.update_settings(update).map_err(to_client_error)
}

pub fn init_tracing(app_data_dir: &Path) -> Result<(), String> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "reorder.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
