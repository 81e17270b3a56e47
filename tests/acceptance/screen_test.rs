mod common;

use common::{eventually, fast_reconnect, mock_logout, signed_in, user, within};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use warden::error::ApiError;
use warden::notifier::events::{Frame, STRUCTURE_CHANGED, TABLE_UPDATED};
use warden::notifier::transport::{MemoryPeer, MemoryTransport};
use warden::notifier::{ConnectionState, Notifier};
use warden::policy::{Action, FactionCode, Resource, ResourceKind};
use warden::screen::{Screen, View};
use warden::session::SessionStatus;

fn week_table(department_id: &str) -> Resource {
    Resource::new(ResourceKind::WeekTable)
        .in_faction(FactionCode::Fsb)
        .in_department(department_id)
}

fn signed_out() -> watch::Receiver<SessionStatus> {
    watch::channel(SessionStatus::SignedOut).1
}

fn counting_fetch(counter: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<Result<usize, ApiError>> + Send + Sync + 'static {
    move || std::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1))
}

fn change(event: &str, department_id: &str, updated_by: &str, updated_by_id: Option<&str>) -> Frame {
    Frame::new(
        event,
        json!({
            "department_id": department_id,
            "updated_by": updated_by,
            "updated_by_id": updated_by_id,
        }),
    )
}

async fn live(
    role: &str,
    department_id: Option<&str>,
) -> (mockito::ServerGuard, watch::Receiver<SessionStatus>, Notifier, MemoryPeer) {
    let mut server = mockito::Server::new_async().await;
    let (session, _) = signed_in(
        &mut server,
        user("u1", "Ivan Petrov", role, Some("fsb"), department_id),
    )
    .await;
    let status = session.watch();

    let (transport, mut memory) = MemoryTransport::new();
    let notifier = Notifier::start(session, Arc::new(transport), fast_reconnect(3));

    let mut peer = within(memory.accept()).await.unwrap();
    within(peer.recv()).await.unwrap();
    peer.send(Frame::new("authenticated", json!({"user_id": "u1"})));
    let mut state = notifier.watch_state();
    within(state.wait_for(|s| *s == ConnectionState::Authenticated))
        .await
        .unwrap();

    (server, status, notifier, peer)
}

#[tokio::test]
async fn test_mount_evaluates_offered_actions() {
    let mut server = mockito::Server::new_async().await;
    let (session, _) = signed_in(
        &mut server,
        user("u3", "Pavel", "deputy_head", Some("fsb"), Some("d1")),
    )
    .await;

    let fetches = Arc::new(AtomicUsize::new(0));
    let screen = Screen::mount(
        session.watch(),
        None,
        week_table("d1"),
        &[Action::View, Action::Edit, Action::ManageTopics],
        counting_fetch(Arc::clone(&fetches)),
    );

    assert!(screen.allows(Action::View));
    assert!(screen.allows(Action::Edit));
    assert!(!screen.allows(Action::ManageTopics));
    assert!(!screen.allows(Action::Delete));

    let mut view = screen.watch();
    within(view.wait_for(|v| *v == View::Ready(1))).await.unwrap();
    assert_eq!(screen.fetch_count(), 1);
}

#[tokio::test]
async fn test_permissions_follow_session_changes() {
    let mut server = mockito::Server::new_async().await;
    let (session, _) = signed_in(
        &mut server,
        user("u3", "Pavel", "deputy_head", Some("fsb"), Some("d1")),
    )
    .await;
    let _logout = mock_logout(&mut server).await;

    let screen = Screen::mount(
        session.watch(),
        None,
        week_table("d1"),
        &[Action::View, Action::Edit],
        counting_fetch(Arc::new(AtomicUsize::new(0))),
    );
    assert!(screen.allows(Action::Edit));

    session.sign_out().await;

    assert!(!screen.allows(Action::View));
    assert!(!screen.allows(Action::Edit));
}

#[tokio::test]
async fn test_mount_while_loading_denies_everything() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let screen = Screen::mount(
        watch::channel(SessionStatus::Loading).1,
        None,
        week_table("d1"),
        &Action::ALL,
        counting_fetch(fetches),
    );

    for action in Action::ALL {
        assert!(!screen.allows(action));
    }
}

#[tokio::test]
async fn test_two_screens_refetch_once_per_change_in_their_department() {
    let (_server, status, notifier, mut peer) = live("gs", None).await;

    let first_fetches = Arc::new(AtomicUsize::new(0));
    let second_fetches = Arc::new(AtomicUsize::new(0));
    let first = Screen::mount(
        status.clone(),
        Some(&notifier),
        week_table("d1"),
        &[Action::Edit],
        counting_fetch(Arc::clone(&first_fetches)),
    );
    let second = Screen::mount(
        status.clone(),
        Some(&notifier),
        week_table("d1"),
        &[Action::Edit],
        counting_fetch(Arc::clone(&second_fetches)),
    );

    let join = within(peer.recv()).await.unwrap();
    assert_eq!(join.event, "join_department");
    assert_eq!(notifier.room_interest("d1"), 2);
    eventually(|| first.fetch_count() == 1 && second.fetch_count() == 1).await;

    peer.send(change(TABLE_UPDATED, "d1", "Olga Smirnova", Some("u9")));
    eventually(|| first.fetch_count() == 2 && second.fetch_count() == 2).await;

    peer.send(change(TABLE_UPDATED, "d2", "Olga Smirnova", Some("u9")));
    peer.send(change(STRUCTURE_CHANGED, "d1", "Olga Smirnova", Some("u9")));
    eventually(|| first.fetch_count() == 3 && second.fetch_count() == 3).await;

    let mut view = first.watch();
    within(view.wait_for(|v| *v == View::Ready(3))).await.unwrap();

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_own_changes_do_not_trigger_refetch() {
    let (_server, status, notifier, mut peer) = live("gs", None).await;

    let screen = Screen::mount(
        status.clone(),
        Some(&notifier),
        week_table("d1"),
        &[Action::Edit],
        counting_fetch(Arc::new(AtomicUsize::new(0))),
    );
    within(peer.recv()).await.unwrap();

    peer.send(change(TABLE_UPDATED, "d1", "Someone Else", Some("u1")));
    peer.send(change(TABLE_UPDATED, "d1", "Ivan Petrov", None));
    peer.send(change(TABLE_UPDATED, "d1", "Ivan Petrov", Some("u5")));
    eventually(|| screen.fetch_count() == 2).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(screen.fetch_count(), 2);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_unmount_releases_room_and_listeners() {
    let (_server, status, notifier, mut peer) = live("gs", None).await;
    let before = notifier.listener_count(TABLE_UPDATED);

    let mut first = Screen::mount(
        status.clone(),
        Some(&notifier),
        week_table("d1"),
        &[Action::View],
        counting_fetch(Arc::new(AtomicUsize::new(0))),
    );
    let second = Screen::mount(
        status.clone(),
        Some(&notifier),
        week_table("d1"),
        &[Action::View],
        counting_fetch(Arc::new(AtomicUsize::new(0))),
    );
    assert_eq!(within(peer.recv()).await.unwrap().event, "join_department");
    assert_eq!(notifier.listener_count(TABLE_UPDATED), before + 2);

    first.unmount();
    assert!(!first.is_mounted());
    assert_eq!(notifier.room_interest("d1"), 1);
    assert_eq!(notifier.listener_count(TABLE_UPDATED), before + 1);

    drop(second);
    assert_eq!(notifier.room_interest("d1"), 0);
    assert_eq!(notifier.listener_count(TABLE_UPDATED), before);
    assert_eq!(notifier.listener_count(STRUCTURE_CHANGED), 0);

    let leave = within(peer.recv()).await.unwrap();
    assert_eq!(leave.event, "leave_department");

    first.refresh();
    drop(first);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_fetch_landing_after_unmount_is_ignored() {
    let gate = Arc::new(Notify::new());
    let fetch_gate = Arc::clone(&gate);

    let mut screen = Screen::mount(signed_out(), None, week_table("d1"), &[Action::View], move || {
        let gate = Arc::clone(&fetch_gate);
        async move {
            gate.notified().await;
            Ok::<_, ApiError>("late".to_string())
        }
    });
    let view = screen.watch();

    screen.unmount();
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(*view.borrow(), View::Loading);
    assert_eq!(screen.view(), View::Loading);
}

#[tokio::test]
async fn test_failed_fetch_is_shown_and_can_be_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let screen = Screen::mount(signed_out(), None, week_table("d1"), &[], move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(ApiError::NotFound)
            } else {
                Ok(attempt)
            }
        }
    });

    let mut view = screen.watch();
    within(view.wait_for(|v| matches!(v, View::Failed(_)))).await.unwrap();

    screen.refresh();
    within(view.wait_for(|v| *v == View::Ready(1))).await.unwrap();
}
