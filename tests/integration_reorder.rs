use board_reorder_lib::controller::{DragResponse, ReorderController};
use board_reorder_lib::drag::DragEvent;
use board_reorder_lib::models::{ClosestEdge, ContainerKind, ContainerScope, NotificationKind, PersistRequest};
use board_reorder_lib::policy::PolicyEngine;
use board_reorder_lib::{container_open, drag_event, entity_remove, AppState, DragEventResponse};
use std::time::Duration;

fn seeded_state(dir: &tempfile::TempDir) -> AppState {
    let state = AppState::new(dir.path().to_path_buf()).expect("state");
    state
        .db
        .create_container("col-1", ContainerKind::Column)
        .expect("container");
    for id in ["a", "b", "c", "d"] {
        state
            .db
            .insert_entity(&PolicyEngine::new(), "col-1", id)
            .expect("entity");
    }
    state
}

fn ids(controller: &ReorderController) -> Vec<String> {
    controller
        .snapshot("col-1")
        .expect("snapshot")
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

fn stored_ids(state: &AppState) -> Vec<String> {
    state
        .db
        .list_entities("col-1")
        .expect("entities")
        .into_iter()
        .map(|entity| entity.id)
        .collect()
}

async fn wait_for_ids(controller: &ReorderController, expected: &[&str]) {
    for _ in 0..200 {
        if ids(controller) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(ids(controller), expected);
}

fn drop_on(controller: &ReorderController, source: (&str, usize), target: (&str, usize), edge: ClosestEdge) -> DragResponse {
    let events = [
        DragEvent::Start {
            source_id: source.0.to_string(),
            source_index: source.1,
        },
        DragEvent::Over {
            target_id: target.0.to_string(),
            target_index: target.1,
            edge: Some(edge),
        },
    ];
    for event in events {
        controller.handle_drag("col-1", event).expect("drag event");
    }
    controller.handle_drag("col-1", DragEvent::Drop).expect("drop")
}

#[tokio::test]
async fn reorder_persists_and_reaches_other_clients() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = seeded_state(&dir);
    let scope = ContainerScope::new(ContainerKind::Column, "col-1");
    let other = state.connect_client().expect("second client");
    state.controller.open_container(scope.clone()).expect("open a");
    other.open_container(scope).expect("open b");

    let DragResponse::Accepted { accepted, persist } =
        drop_on(&state.controller, ("d", 3), ("a", 0), ClosestEdge::Top)
    else {
        panic!("expected accepted drop");
    };
    assert_eq!(accepted.final_index, 0);
    assert_eq!(ids(&state.controller), vec!["d", "a", "b", "c"]);

    persist.await.expect("persist task");
    assert_eq!(stored_ids(&state), vec!["d", "a", "b", "c"]);
    wait_for_ids(&other, &["d", "a", "b", "c"]).await;
    assert_eq!(ids(&state.controller), vec!["d", "a", "b", "c"]);
}

#[tokio::test]
async fn rejected_reorder_reverts_only_the_dragging_client() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = seeded_state(&dir);
    state
        .controller
        .open_container(ContainerScope::new(ContainerKind::Column, "col-1"))
        .expect("open");
    let mut notifications = state.controller.subscribe_notifications();
    state.db.set_container_archived("col-1", true).expect("archive");

    let DragResponse::Accepted { persist, .. } = drop_on(&state.controller, ("a", 0), ("c", 2), ClosestEdge::Bottom)
    else {
        panic!("expected accepted drop");
    };
    assert_eq!(ids(&state.controller), vec!["b", "c", "a", "d"]);
    persist.await.expect("persist task");

    assert_eq!(ids(&state.controller), vec!["a", "b", "c", "d"]);
    assert_eq!(stored_ids(&state), vec!["a", "b", "c", "d"]);
    let notification = notifications.try_recv().expect("notification");
    assert_eq!(notification.kind, NotificationKind::SaveFailed);
    assert_eq!(notification.error_code, "permission-denied");
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn resync_replays_missed_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = seeded_state(&dir);
    let client = state.connect_client().expect("client");
    client
        .open_container(ContainerScope::new(ContainerKind::Column, "col-1"))
        .expect("open");

    // written straight to the store, so no push reaches the client
    state
        .db
        .move_entity(
            &PolicyEngine::new(),
            &PersistRequest {
                request_id: "offline-1".to_string(),
                container_id: "col-1".to_string(),
                entity_id: "b".to_string(),
                new_order: 3,
                client_id: "elsewhere".to_string(),
            },
        )
        .expect("move");
    assert_eq!(ids(&client), vec!["a", "b", "c", "d"]);

    assert_eq!(client.resync("col-1").expect("resync"), 4);
    assert_eq!(ids(&client), vec!["a", "c", "d", "b"]);
    assert_eq!(client.resync("col-1").expect("second resync"), 0);
}

#[tokio::test]
async fn facade_accepts_frontend_payloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = seeded_state(&dir);

    let loaded = container_open(&state, "column:col-1".to_string()).expect("open");
    assert_eq!(loaded.len(), 4);
    assert!(container_open(&state, "shelf:col-1".to_string())
        .expect_err("unknown kind")
        .starts_with("INVALID:"));

    let payloads = [
        r#"{"type":"start","payload":{"sourceId":"b","sourceIndex":1}}"#,
        r#"{"type":"over","payload":{"targetId":"c","targetIndex":2,"edge":"bottom"}}"#,
    ];
    for payload in payloads {
        let event: DragEvent = serde_json::from_str(payload).expect("event");
        let response = drag_event(&state, "col-1".to_string(), event).expect("drag event");
        assert!(matches!(response, DragEventResponse::Updated));
    }
    let response = drag_event(&state, "col-1".to_string(), DragEvent::Drop).expect("drop");
    let DragEventResponse::Accepted(accepted) = response else {
        panic!("expected accepted drop");
    };
    assert_eq!(accepted.entity_id, "b");
    assert_eq!(accepted.final_index, 2);

    for _ in 0..200 {
        if stored_ids(&state) == vec!["a", "c", "b", "d"] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(stored_ids(&state), vec!["a", "c", "b", "d"]);

    let json = serde_json::to_value(DragEventResponse::Cancelled {
        reason: board_reorder_lib::drag::CancelReason::Escape,
    })
    .expect("json");
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["reason"], "escape");
}

fn offline_move(state: &AppState, entity_id: &str, new_order: u32) {
    state
        .db
        .move_entity(
            &PolicyEngine::new(),
            &PersistRequest {
                request_id: format!("offline-{}", entity_id),
                container_id: "col-1".to_string(),
                entity_id: entity_id.to_string(),
                new_order,
                client_id: "elsewhere".to_string(),
            },
        )
        .expect("move");
}

#[tokio::test]
async fn opening_starts_from_the_stored_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = seeded_state(&dir);
    offline_move(&state, "a", 3);
    offline_move(&state, "c", 0);

    let client = state.connect_client().expect("client");
    client
        .open_container(ContainerScope::new(ContainerKind::Column, "col-1"))
        .expect("open");
    assert_eq!(ids(&client), vec!["c", "b", "d", "a"]);
    assert_eq!(client.resync("col-1").expect("resync"), 0);

    offline_move(&state, "d", 0);
    assert_eq!(client.resync("col-1").expect("resync"), 4);
    assert_eq!(ids(&client), vec!["d", "c", "b", "a"]);
}

#[tokio::test]
async fn removing_an_entity_updates_store_and_open_view() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = seeded_state(&dir);
    container_open(&state, "column:col-1".to_string()).expect("open");

    assert!(entity_remove(&state, "col-1".to_string(), "b".to_string()).expect("remove"));
    assert_eq!(ids(&state.controller), vec!["a", "c", "d"]);
    assert_eq!(stored_ids(&state), vec!["a", "c", "d"]);
    assert!(!entity_remove(&state, "col-1".to_string(), "b".to_string()).expect("remove again"));

    assert!(state.controller.close_container("col-1").expect("close"));
    assert!(entity_remove(&state, "col-1".to_string(), "c".to_string()).expect("remove while closed"));
    assert_eq!(stored_ids(&state), vec!["a", "d"]);
}
