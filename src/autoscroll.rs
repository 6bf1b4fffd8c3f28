use crate::models::ReorderSettings;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    fn inflate(&self, by: f32) -> Rect {
        Rect {
            x: self.x - by,
            y: self.y - by,
            width: self.width + by * 2.0,
            height: self.height + by * 2.0,
        }
    }
}

/// Scrollable element and how far outside it the pointer may still drive it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollRegion {
    pub rect: Rect,
    /// Zero disables overflow scrolling.
    pub overflow_band: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoScrollConfig {
    /// Pixels per tick at the very edge.
    pub max_speed: f32,
    /// Distance from an edge inside which scrolling starts.
    pub edge_band: f32,
    pub tick: Duration,
}

impl AutoScrollConfig {
    pub fn from_settings(settings: &ReorderSettings) -> Self {
        Self {
            max_speed: settings.auto_scroll_max_speed.max(0.0),
            edge_band: settings.auto_scroll_edge_band.max(1.0),
            tick: Duration::from_millis(settings.auto_scroll_tick_ms.max(1)),
        }
    }
}

impl Default for AutoScrollConfig {
    fn default() -> Self {
        Self::from_settings(&ReorderSettings::default())
    }
}

pub trait ScrollTarget: Send + Sync {
    fn scroll_by(&self, dx: f32, dy: f32);
}

/// Per-tick scroll delta for a pointer position. Positive values scroll
/// towards the bottom/right.
pub fn scroll_velocity(pointer: Point, region: &ScrollRegion, config: &AutoScrollConfig) -> (f32, f32) {
    let rect = region.rect;
    let inside = rect.contains(pointer);
    if !inside && (region.overflow_band <= 0.0 || !rect.inflate(region.overflow_band).contains(pointer)) {
        return (0.0, 0.0);
    }

    let dx = axis_velocity(pointer.x - rect.x, rect.x + rect.width - pointer.x, config);
    let dy = axis_velocity(pointer.y - rect.y, rect.y + rect.height - pointer.y, config);
    (dx, dy)
}

fn axis_velocity(from_start: f32, from_end: f32, config: &AutoScrollConfig) -> f32 {
    let speed_for = |distance: f32| {
        if distance <= 0.0 {
            // past the edge, inside the overflow band
            config.max_speed
        } else {
            config.max_speed * (1.0 - distance / config.edge_band).clamp(0.0, 1.0)
        }
    };
    if from_start < config.edge_band && from_start <= from_end {
        -speed_for(from_start)
    } else if from_end < config.edge_band {
        speed_for(from_end)
    } else {
        0.0
    }
}

pub struct AutoScroller;

impl AutoScroller {
    /// Starts a tick loop that scrolls `target` while the pointer sits near
    /// the region's edges. The loop lives exactly as long as the guard.
    pub fn start(target: Arc<dyn ScrollTarget>, region: ScrollRegion, config: AutoScrollConfig) -> AutoScrollGuard {
        let (pointer_tx, mut pointer_rx) = watch::channel::<Option<Point>>(None);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let pointer = *pointer_rx.borrow();
                        if let Some(pointer) = pointer {
                            let (dx, dy) = scroll_velocity(pointer, &region, &config);
                            if dx != 0.0 || dy != 0.0 {
                                target.scroll_by(dx, dy);
                            }
                        }
                    }
                    changed = pointer_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        tracing::debug!(tick_ms = config.tick.as_millis() as u64, "auto-scroll started");
        AutoScrollGuard {
            pointer: pointer_tx,
            handle: Some(handle),
        }
    }
}

/// Owns the auto-scroll task of one drag session.
pub struct AutoScrollGuard {
    pointer: watch::Sender<Option<Point>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoScrollGuard {
    pub fn update_pointer(&self, pointer: Point) {
        let _ = self.pointer.send(Some(pointer));
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|handle| !handle.is_finished()).unwrap_or(false)
    }

    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("auto-scroll stopped");
        }
    }
}

impl Drop for AutoScrollGuard {
    fn drop(&mut self) {
        self.abort();
    }
}
