//! Deferred deletions for offline recipients and their replay on reconnect.

mod common;

use common::TestApp;
use message_deletion_service::models::{user_topic, RealtimeEvent};
use message_deletion_service::policy::Transition;
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

#[tokio::test]
async fn test_grace_delete_queues_only_offline_recipients() {
    let app = TestApp::new();
    let (conv, _admin, members) = app.group_chat(3).await;
    let (y, z, w) = (members[0], members[1], members[2]);
    app.presence.set_online(z, true);
    let m = app.send(conv, y, "oops").await;

    let outcome = app
        .state
        .deletion
        .grace_delete(conv, y, &[m], &[z, w, Uuid::new_v4()])
        .await
        .unwrap();

    assert!(outcome.queued);
    assert_eq!(outcome.deleted_count, 1);
    assert_eq!(outcome.queued_for, vec![w]);
    assert_eq!(app.grace.len(w), 1);
    assert_eq!(app.grace.len(z), 0);
    assert!(app.message(m).await.deletion.deleted_for_everyone);

    let drained = app.state.deletion.drain_grace_queue(w).await.unwrap();
    assert_eq!(drained.applied_count, 1);
    assert_eq!(drained.entries_drained, 1);
    assert_eq!(app.grace.len(w), 0);

    let again = app.state.deletion.drain_grace_queue(w).await.unwrap();
    assert_eq!(again.applied_count, 0);
    assert_eq!(again.entries_drained, 0);
}

#[tokio::test]
async fn test_grace_delete_retry_still_queues() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m = app.send(conv, a, "retry me").await;

    app.state.deletion.grace_delete(conv, a, &[m], &[b]).await.unwrap();
    let retried = app.state.deletion.grace_delete(conv, a, &[m], &[b]).await.unwrap();

    assert!(retried.queued);
    assert_eq!(retried.deleted_count, 0);
    assert_eq!(app.grace.len(b), 2);

    // Replaying the duplicate entry is a no-op on the message.
    let drained = app.state.deletion.drain_grace_queue(b).await.unwrap();
    assert_eq!(drained.entries_drained, 2);
    assert!(app.message(m).await.deletion.deleted_for_everyone);
}

#[tokio::test]
async fn test_drain_replays_in_enqueue_order() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m1 = app.send(conv, a, "first").await;
    let m2 = app.send(conv, a, "second").await;

    app.state.deletion.delete_for_everyone(conv, a, &[m1], None).await.unwrap();
    app.state.deletion.hard_delete(conv, a, &[m2], true).await.unwrap();
    assert_eq!(app.grace.len(b), 2);

    let mut events = app.notifier.subscribe();
    let drained = app.state.deletion.drain_grace_queue(b).await.unwrap();
    assert_eq!(drained.applied_count, 2);

    let mut replayed = Vec::new();
    loop {
        match events.try_recv() {
            Ok((topic, RealtimeEvent::DeferredDeletion { message_ids, transition, .. })) => {
                assert_eq!(topic, user_topic(b));
                replayed.push((message_ids, transition));
            }
            Ok(_) => {}
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("unexpected receive error: {e}"),
        }
    }
    assert_eq!(
        replayed,
        vec![
            (vec![m1], Transition::DeleteForEveryone),
            (vec![m2], Transition::HardDelete),
        ]
    );
}

#[tokio::test]
async fn test_private_hide_is_never_queued_for_others() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m = app.send(conv, a, "hi").await;
    let mut events = app.notifier.subscribe();

    let outcome = app.state.deletion.delete_for_me(conv, b, &[m]).await.unwrap();

    assert!(outcome.queued_for.is_empty());
    assert_eq!(app.grace.len(a), 0);
    let (topic, event) = events.try_recv().unwrap();
    assert_eq!(topic, user_topic(b));
    assert!(matches!(
        event,
        RealtimeEvent::MessageDeleted { transition: Transition::HideForMe, .. }
    ));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_online_recipients_get_the_live_event() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    app.presence.set_online(b, true);
    let m = app.send(conv, a, "live").await;
    let mut events = app.notifier.subscribe();

    let outcome = app.state.deletion.delete_for_everyone(conv, a, &[m], None).await.unwrap();

    assert!(outcome.queued_for.is_empty());
    let (topic, event) = events.try_recv().unwrap();
    assert_eq!(topic, format!("conversation:{}", conv));
    match event {
        RealtimeEvent::MessageDeleted { message_ids, actor_id, .. } => {
            assert_eq!(message_ids, vec![m]);
            assert_eq!(actor_id, a);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
