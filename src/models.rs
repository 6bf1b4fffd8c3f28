use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static TOPIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(board|column|checklist|card):([A-Za-z0-9][A-Za-z0-9_\-]{0,127})$").expect("valid topic regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerKind {
    /// Columns of a board.
    Board,
    /// Cards of a column.
    Column,
    /// Items of a checklist.
    Checklist,
    /// Attachments of a card.
    Card,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Board => "board",
            Self::Column => "column",
            Self::Checklist => "checklist",
            Self::Card => "card",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "board" => Some(Self::Board),
            "column" => Some(Self::Column),
            "checklist" => Some(Self::Checklist),
            "card" => Some(Self::Card),
            _ => None,
        }
    }

    /// Layout direction the container's children are rendered in.
    pub fn axis(self) -> Axis {
        match self {
            Self::Board | Self::Card => Axis::Horizontal,
            Self::Column | Self::Checklist => Axis::Vertical,
        }
    }
}

/// The grouping boundary inside which `order` values must stay consistent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerScope {
    pub kind: ContainerKind,
    pub id: String,
}

impl ContainerScope {
    pub fn new(kind: ContainerKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn topic(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }

    pub fn parse_topic(topic: &str) -> AppResult<Self> {
        let caps = TOPIC_RE
            .captures(topic.trim())
            .ok_or_else(|| AppError::Invalid(format!("Malformed container topic '{}'", topic)))?;
        let kind = caps
            .get(1)
            .and_then(|m| ContainerKind::parse(m.as_str()))
            .ok_or_else(|| AppError::Invalid(format!("Unknown container kind in '{}'", topic)))?;
        let id = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        Ok(Self { kind, id })
    }
}

impl fmt::Display for ContainerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderableEntity {
    pub id: String,
    pub container_id: String,
    pub order: u32,
}

impl OrderableEntity {
    pub fn new(id: impl Into<String>, container_id: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    Vertical,
    Horizontal,
}

/// Side of the hover target the pointer is closest to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClosestEdge {
    Top,
    Bottom,
    Left,
    Right,
}

impl ClosestEdge {
    /// Resolves the edge to an insertion side, or `None` when the edge does
    /// not belong to the axis.
    pub fn side(self, axis: Axis) -> Option<InsertSide> {
        match (axis, self) {
            (Axis::Vertical, Self::Top) | (Axis::Horizontal, Self::Left) => Some(InsertSide::Before),
            (Axis::Vertical, Self::Bottom) | (Axis::Horizontal, Self::Right) => Some(InsertSide::After),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSide {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistRequest {
    pub request_id: String,
    pub container_id: String,
    pub entity_id: String,
    pub new_order: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    pub entity_id: String,
    pub new_order: u32,
}

/// Server-pushed order confirmation for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    pub container_id: String,
    pub version: Option<u64>,
    pub origin_client: Option<String>,
    pub patches: Vec<OrderPatch>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    SaveFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub container_id: String,
    pub entity_id: String,
    pub error_code: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderAccepted {
    pub request_id: String,
    pub container_id: String,
    pub entity_id: String,
    pub final_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub kind: ContainerKind,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReorderSettings {
    pub auto_scroll_max_speed: f32,
    pub auto_scroll_edge_band: f32,
    pub auto_scroll_overflow_band: f32,
    pub auto_scroll_tick_ms: u64,
    pub reject_stale_push: bool,
    pub persist_timeout_ms: u64,
}

impl Default for ReorderSettings {
    fn default() -> Self {
        Self {
            auto_scroll_max_speed: 20.0,
            auto_scroll_edge_band: 48.0,
            auto_scroll_overflow_band: 0.0,
            auto_scroll_tick_ms: 16,
            reject_stale_push: false,
            persist_timeout_ms: 10_000,
        }
    }
}
