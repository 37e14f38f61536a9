//! Deletion operations end to end against the in-memory backends.

mod common;

use chrono::Duration;
use common::TestApp;
use message_deletion_service::policy::BulkMode;
use message_deletion_service::services::{BulkOptions, IngestMessage, MediaDeleteOptions};
use uuid::Uuid;

#[tokio::test]
async fn test_repeated_delete_for_me_is_idempotent() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m = app.send(conv, a, "hello").await;

    let first = app.state.deletion.delete_for_me(conv, b, &[m]).await.unwrap();
    let second = app.state.deletion.delete_for_me(conv, b, &[m]).await.unwrap();

    assert_eq!(first.deleted_count(), 1);
    assert_eq!(second.deleted_count(), 0);
    assert_eq!(second.already_satisfied, vec![m]);
    assert_eq!(app.message(m).await.deleted_by.len(), 1);
    assert!(app.visible_ids(conv, b).await.is_empty());
}

#[tokio::test]
async fn test_hard_delete_cannot_be_weakened() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m = app.send(conv, a, "gone").await;

    app.state.deletion.hard_delete(conv, a, &[m], true).await.unwrap();

    let deletion = &app.state.deletion;
    assert_eq!(deletion.delete_for_everyone(conv, a, &[m], None).await.unwrap().deleted_count(), 0);
    assert_eq!(deletion.soft_delete(conv, a, &[m]).await.unwrap().deleted_count(), 0);
    assert_eq!(deletion.delete_for_me(conv, b, &[m]).await.unwrap().deleted_count(), 0);
    assert_eq!(deletion.set_auto_delete(conv, a, &[m], 60).await.unwrap().deleted_count(), 0);
    assert_eq!(deletion.unsent_delete(conv, a, &[m]).await.unwrap().deleted_count(), 0);
    assert_eq!(deletion.hard_delete(conv, a, &[m], true).await.unwrap().deleted_count(), 0);

    let stored = app.message(m).await;
    assert!(stored.deletion.hard_deleted);
    assert!(stored.deleted_by.is_empty());
    assert!(app.visible_ids(conv, a).await.is_empty());
    assert!(app.visible_ids(conv, b).await.is_empty());
}

#[tokio::test]
async fn test_soft_delete_outranks_delete_for_everyone() {
    let app = TestApp::new();
    let (conv, a, _) = app.direct_chat().await;
    let m = app.send(conv, a, "draft").await;

    app.state.deletion.soft_delete(conv, a, &[m]).await.unwrap();
    let outcome = app
        .state
        .deletion
        .delete_for_everyone(conv, a, &[m], None)
        .await
        .unwrap();

    assert_eq!(outcome.deleted_count(), 0);
    // Soft delete hides the message from the sender too.
    assert!(app.visible_ids(conv, a).await.is_empty());
}

#[tokio::test]
async fn test_delete_window_boundaries() {
    let app = TestApp::new();
    let (conv, admin, members) = app.group_chat(2).await;
    let y = members[0];
    let early = app.send(conv, y, "early").await;
    let late = app.send(conv, y, "late").await;
    let by_admin_early = app.send(conv, y, "admin early").await;
    let by_admin_late = app.send(conv, y, "admin late").await;
    let window = app.state.config.policy.delete_window_secs;

    let created = app.message(early).await.created_at;
    app.clock.set(created + Duration::seconds(window - 1));
    let ok = app
        .state
        .deletion
        .delete_for_everyone(conv, y, &[early], None)
        .await
        .unwrap();
    assert_eq!(ok.deleted_count(), 1);

    let created = app.message(by_admin_early).await.created_at;
    app.clock.set(created + Duration::seconds(window - 1));
    let ok = app.state.deletion.admin_delete(conv, admin, &[by_admin_early]).await.unwrap();
    assert_eq!(ok.deleted_count(), 1);

    let created = app.message(late).await.created_at;
    app.clock.set(created + Duration::seconds(window + 1));
    let err = app
        .state
        .deletion
        .delete_for_everyone(conv, y, &[late], None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "window_expired");
    assert!(!app.message(late).await.deletion.deleted_for_everyone);

    let created = app.message(by_admin_late).await.created_at;
    app.clock.set(created + Duration::seconds(window + 1));
    let ok = app.state.deletion.admin_delete(conv, admin, &[by_admin_late]).await.unwrap();
    assert_eq!(ok.deleted_count(), 1);
}

#[tokio::test]
async fn test_window_override_is_clamped() {
    let app = TestApp::new();
    let (conv, a, _) = app.direct_chat().await;
    let m = app.send(conv, a, "old").await;
    let max_override = app.state.config.policy.max_window_override_secs;

    app.clock.advance(Duration::seconds(max_override + 10));
    let err = app
        .state
        .deletion
        .delete_for_everyone(conv, a, &[m], Some(i64::MAX))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "window_expired");

    app.clock.advance(Duration::seconds(-20));
    let ok = app
        .state
        .deletion
        .delete_for_everyone(conv, a, &[m], Some(max_override))
        .await
        .unwrap();
    assert_eq!(ok.deleted_count(), 1);
}

#[tokio::test]
async fn test_group_member_cannot_recall_others_but_admin_can() {
    let app = TestApp::new();
    let (conv, x, members) = app.group_chat(2).await;
    let (y, z) = (members[0], members[1]);
    let m = app.send(conv, y, "from y").await;

    let err = app
        .state
        .deletion
        .delete_for_everyone(conv, z, &[m], None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "access_denied");

    app.clock.advance(Duration::hours(2));
    let outcome = app.state.deletion.admin_delete(conv, x, &[m]).await.unwrap();
    assert_eq!(outcome.deleted_count(), 1);
    assert!(!app.visible_ids(conv, z).await.contains(&m));

    let err = app.state.deletion.admin_delete(conv, z, &[m]).await.unwrap_err();
    assert_eq!(err.code(), "access_denied");
}

#[tokio::test]
async fn test_admin_delete_requires_group_chat() {
    let app = TestApp::new();
    let (conv, a, _) = app.direct_chat().await;
    let m = app.send(conv, a, "hi").await;

    let err = app.state.deletion.admin_delete(conv, a, &[m]).await.unwrap_err();
    assert_eq!(err.code(), "access_denied");
}

#[tokio::test]
async fn test_non_participant_is_refused() {
    let app = TestApp::new();
    let (conv, a, _) = app.direct_chat().await;
    let m = app.send(conv, a, "hi").await;

    let err = app
        .state
        .deletion
        .delete_for_me(conv, Uuid::new_v4(), &[m])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "access_denied");

    let err = app
        .state
        .deletion
        .delete_for_me(Uuid::new_v4(), a, &[m])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn test_bulk_delete_reports_refusals() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let stale = app.send(conv, a, "stale").await;
    app.clock.advance(Duration::hours(1));
    let mine = app.send(conv, a, "mine").await;
    let theirs = app.send(conv, b, "theirs").await;
    let unknown = Uuid::new_v4();

    let outcome = app
        .state
        .deletion
        .bulk_delete(
            conv,
            a,
            &[stale, mine, theirs, unknown],
            BulkMode::ForEveryone,
            BulkOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.message_ids, vec![mine]);
    let reasons: Vec<(Uuid, &str)> = outcome
        .skipped
        .iter()
        .map(|s| (s.message_id, s.reason.as_str()))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (stale, "window_expired"),
            (theirs, "forbidden"),
            (unknown, "not_found"),
        ]
    );
}

#[tokio::test]
async fn test_bulk_delete_for_me_accepts_any_message() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m1 = app.send(conv, a, "one").await;
    let m2 = app.send(conv, b, "two").await;

    let outcome = app
        .state
        .deletion
        .bulk_delete(conv, b, &[m1, m2, m1], BulkMode::ForMe, BulkOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.deleted_count(), 2);
    assert!(outcome.skipped.is_empty());
    assert!(app.visible_ids(conv, b).await.is_empty());
    assert_eq!(app.visible_ids(conv, a).await, vec![m1, m2]);
}

#[tokio::test]
async fn test_batch_size_limit() {
    let mut config = common::test_config();
    config.policy.max_batch_size = 2;
    let app = TestApp::with_config(config);
    let (conv, a, _) = app.direct_chat().await;
    let ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

    let err = app.state.deletion.delete_for_me(conv, a, &ids).await.unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_unsent_delete_only_before_first_read() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let seen = app.send(conv, a, "seen").await;
    let unseen = app.send(conv, a, "unseen").await;
    app.state.visibility.mark_read(conv, b, &[seen]).await.unwrap();

    let err = app.state.deletion.unsent_delete(conv, a, &[seen]).await.unwrap_err();
    assert_eq!(err.code(), "bad_request");

    let outcome = app.state.deletion.unsent_delete(conv, a, &[unseen]).await.unwrap();
    assert_eq!(outcome.deleted_count(), 1);
    assert_eq!(app.visible_ids(conv, b).await, vec![seen]);

    let err = app.state.deletion.unsent_delete(conv, b, &[seen]).await.unwrap_err();
    assert_eq!(err.code(), "access_denied");
}

#[tokio::test]
async fn test_auto_delete_validation() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m = app.send(conv, a, "tick").await;

    let err = app.state.deletion.set_auto_delete(conv, a, &[m], 0).await.unwrap_err();
    assert_eq!(err.code(), "bad_request");

    let err = app.state.deletion.set_auto_delete(conv, b, &[m], 60).await.unwrap_err();
    assert_eq!(err.code(), "access_denied");

    let outcome = app.state.deletion.set_auto_delete(conv, a, &[m], 60).await.unwrap();
    assert_eq!(outcome.deleted_count(), 1);

    // A longer timer never extends an earlier deadline.
    let outcome = app.state.deletion.set_auto_delete(conv, a, &[m], 600).await.unwrap();
    assert_eq!(outcome.deleted_count(), 0);
    let expires_at = app.message(m).await.auto_delete.unwrap().expires_at;
    assert_eq!(expires_at, app.clock_now() + Duration::seconds(60));
}

#[tokio::test]
async fn test_auto_delete_rejects_oversized_durations() {
    let app = TestApp::new();
    let (conv, a, _) = app.direct_chat().await;
    let m = app.send(conv, a, "tick").await;

    for duration_secs in [i64::MAX, 10_000_000_000_000_000, 365 * 24 * 60 * 60 + 1] {
        let err = app
            .state
            .deletion
            .set_auto_delete(conv, a, &[m], duration_secs)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }
    assert!(app.message(m).await.auto_delete.is_none());

    let err = app
        .state
        .conversations
        .ingest_message(
            conv,
            a,
            IngestMessage {
                content: "forever".into(),
                media_ref: None,
                auto_delete_secs: Some(i64::MAX),
                created_at: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_hard_delete_can_keep_the_blob() {
    let app = TestApp::new();
    let (conv, a, _) = app.direct_chat().await;
    let m = app
        .send_with(conv, a, "photo", Some("media/keep.jpg"), None)
        .await;

    app.state.deletion.hard_delete(conv, a, &[m], false).await.unwrap();

    let stored = app.message(m).await;
    assert!(stored.deletion.hard_deleted);
    assert!(stored.media_ref.is_none());
    assert!(stored.media_release.is_none());
    assert!(app.blobs.contains("media/keep.jpg"));
}

#[tokio::test]
async fn test_media_delete_variants() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let keep_message = app.send_with(conv, a, "one", Some("media/1.jpg"), None).await;
    let drop_message = app.send_with(conv, a, "two", Some("media/2.jpg"), None).await;
    let local_only = app.send_with(conv, a, "three", Some("media/3.jpg"), None).await;
    let text_only = app.send(conv, a, "four").await;

    let outcome = app
        .state
        .deletion
        .delete_media(conv, a, keep_message, MediaDeleteOptions::default())
        .await
        .unwrap();
    assert!(outcome.media_released);
    assert!(!outcome.message_deleted);
    assert!(!app.blobs.contains("media/1.jpg"));
    assert!(app.visible_ids(conv, b).await.contains(&keep_message));
    assert!(app.message(keep_message).await.media_ref.is_none());

    let outcome = app
        .state
        .deletion
        .delete_media(
            conv,
            a,
            drop_message,
            MediaDeleteOptions {
                delete_message: true,
                delete_local_only: false,
            },
        )
        .await
        .unwrap();
    assert!(outcome.media_released);
    assert!(outcome.message_deleted);
    assert!(app.message(drop_message).await.deletion.hard_deleted);
    assert!(!app.blobs.contains("media/2.jpg"));

    let outcome = app
        .state
        .deletion
        .delete_media(
            conv,
            a,
            local_only,
            MediaDeleteOptions {
                delete_message: false,
                delete_local_only: true,
            },
        )
        .await
        .unwrap();
    assert!(outcome.hidden_for_actor);
    assert!(!outcome.media_released);
    assert!(app.blobs.contains("media/3.jpg"));
    assert!(!app.visible_ids(conv, a).await.contains(&local_only));
    assert!(app.visible_ids(conv, b).await.contains(&local_only));

    let err = app
        .state
        .deletion
        .delete_media(conv, b, local_only, MediaDeleteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "access_denied");

    let err = app
        .state
        .deletion
        .delete_media(conv, a, text_only, MediaDeleteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_failed_media_release_does_not_fail_hard_delete() {
    let app = TestApp::new();
    let (conv, a, b) = app.direct_chat().await;
    let m = app.send_with(conv, a, "clip", Some("media/clip.mp4"), None).await;
    app.blobs.fail_next_releases(1);

    let outcome = app.state.deletion.hard_delete(conv, a, &[m], true).await.unwrap();

    assert_eq!(outcome.deleted_count(), 1);
    assert!(app.visible_ids(conv, b).await.is_empty());
    let pending = app.message(m).await.media_release.unwrap();
    assert_eq!(pending.attempts, 1);
    assert_eq!(
        pending.next_attempt_at,
        app.clock_now() + app.state.config.retention.media_release_backoff(0)
    );
}
