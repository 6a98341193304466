use super::*;
use crate::event::Data;
use crate::state::test_helpers;
use tokio::time::{Duration, timeout};

async fn recv_event(rx: &mut mpsc::Receiver<Event>) -> Event {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("event receive timed out")
        .expect("channel closed unexpectedly")
}

async fn assert_no_event(rx: &mut mpsc::Receiver<Event>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no event"
    );
}

#[test]
fn join_is_idempotent() {
    let mut registry = RoomRegistry::new();
    let conn = Uuid::new_v4();
    let room = RoomKey::Chat(Uuid::new_v4());
    let (tx, _rx) = mpsc::channel(8);

    assert!(registry.join(conn, room, tx.clone()));
    assert!(!registry.join(conn, room, tx));
    assert_eq!(registry.members_of(room).len(), 1);
}

#[test]
fn leave_unjoined_room_is_noop() {
    let mut registry = RoomRegistry::new();
    let conn = Uuid::new_v4();
    let room = RoomKey::Chat(Uuid::new_v4());

    assert!(!registry.leave(conn, room));
    assert!(registry.members_of(room).is_empty());
}

#[test]
fn leave_evicts_empty_room() {
    let mut registry = RoomRegistry::new();
    let conn = Uuid::new_v4();
    let room = RoomKey::Chat(Uuid::new_v4());
    let (tx, _rx) = mpsc::channel(8);

    registry.join(conn, room, tx);
    assert!(registry.leave(conn, room));
    assert!(registry.members_of(room).is_empty());
    assert!(!registry.is_member(conn, room));
}

#[test]
fn personal_and_chat_rooms_are_distinct_keys() {
    let mut registry = RoomRegistry::new();
    let conn = Uuid::new_v4();
    let id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);

    registry.join(conn, RoomKey::User(id), tx.clone());
    assert!(registry.is_member(conn, RoomKey::User(id)));
    assert!(!registry.is_member(conn, RoomKey::Chat(id)));
}

#[test]
fn drop_connection_tears_down_all_memberships() {
    let mut registry = RoomRegistry::new();
    let conn = Uuid::new_v4();
    let other = Uuid::new_v4();
    let user_room = RoomKey::User(Uuid::new_v4());
    let chat_a = RoomKey::Chat(Uuid::new_v4());
    let chat_b = RoomKey::Chat(Uuid::new_v4());
    let (tx, _rx) = mpsc::channel(8);
    let (other_tx, _other_rx) = mpsc::channel(8);

    registry.join(conn, user_room, tx.clone());
    registry.join(conn, chat_a, tx.clone());
    registry.join(conn, chat_b, tx);
    registry.join(other, chat_a, other_tx);

    let left = registry.drop_connection(conn);
    assert_eq!(left.len(), 3);
    assert!(!registry.is_member(conn, user_room));
    assert!(!registry.is_member(conn, chat_a));
    assert!(!registry.is_member(conn, chat_b));
    // The shared room survives with its remaining member.
    assert_eq!(registry.members_of(chat_a), vec![other]);
}

#[test]
fn drop_unknown_connection_is_noop() {
    let mut registry = RoomRegistry::new();
    assert!(registry.drop_connection(Uuid::new_v4()).is_empty());
}

#[tokio::test]
async fn broadcast_chat_excludes_sender() {
    let state = test_helpers::test_app_state();
    let chat_id = Uuid::new_v4();
    let (conn_a, mut rx_a) = test_helpers::connect_client(&state, Uuid::new_v4()).await;
    let (conn_b, mut rx_b) = test_helpers::connect_client(&state, Uuid::new_v4()).await;
    test_helpers::join_chat(&state, conn_a, chat_id).await;
    test_helpers::join_chat(&state, conn_b, chat_id).await;

    let event = Event::request("typing:start", Data::new()).with_chat_id(chat_id);
    broadcast_chat(&state, chat_id, &event, Some(conn_a)).await;

    let received = recv_event(&mut rx_b).await;
    assert_eq!(received.op, "typing:start");
    assert_no_event(&mut rx_a).await;
}

#[tokio::test]
async fn broadcast_chat_skips_non_members() {
    let state = test_helpers::test_app_state();
    let chat_id = Uuid::new_v4();
    let (conn_a, mut rx_a) = test_helpers::connect_client(&state, Uuid::new_v4()).await;
    let (_conn_b, mut rx_b) = test_helpers::connect_client(&state, Uuid::new_v4()).await;
    test_helpers::join_chat(&state, conn_a, chat_id).await;

    let event = Event::request("message:received", Data::new()).with_chat_id(chat_id);
    broadcast_chat(&state, chat_id, &event, None).await;

    let received = recv_event(&mut rx_a).await;
    assert_eq!(received.op, "message:received");
    assert_no_event(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_to_empty_room_is_noop() {
    let state = test_helpers::test_app_state();
    let chat_id = Uuid::new_v4();
    // Room doesn't exist at all — must not panic or error.
    let event = Event::request("message:received", Data::new()).with_chat_id(chat_id);
    broadcast_chat(&state, chat_id, &event, None).await;
}

#[tokio::test]
async fn broadcast_user_reaches_every_device_of_one_user() {
    let state = test_helpers::test_app_state();
    let user = Uuid::new_v4();
    let (_conn_a, mut rx_a) = test_helpers::connect_client(&state, user).await;
    let (_conn_b, mut rx_b) = test_helpers::connect_client(&state, user).await;
    let (_conn_c, mut rx_c) = test_helpers::connect_client(&state, Uuid::new_v4()).await;

    let event = Event::request("chat:updated", Data::new());
    broadcast_user(&state, user, &event).await;

    assert_eq!(recv_event(&mut rx_a).await.op, "chat:updated");
    assert_eq!(recv_event(&mut rx_b).await.op, "chat:updated");
    assert_no_event(&mut rx_c).await;
}

#[tokio::test]
async fn broadcast_global_reaches_all_but_excluded() {
    let state = test_helpers::test_app_state();
    let (conn_a, mut rx_a) = test_helpers::connect_client(&state, Uuid::new_v4()).await;
    let (_conn_b, mut rx_b) = test_helpers::connect_client(&state, Uuid::new_v4()).await;
    let (_conn_c, mut rx_c) = test_helpers::connect_client(&state, Uuid::new_v4()).await;

    let event = Event::request("presence:online", Data::new());
    broadcast_global(&state, &event, Some(conn_a)).await;

    assert_eq!(recv_event(&mut rx_b).await.op, "presence:online");
    assert_eq!(recv_event(&mut rx_c).await.op, "presence:online");
    assert_no_event(&mut rx_a).await;
}
