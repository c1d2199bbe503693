mod support;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

use support::*;
use verifydesk_uploads::analytics::RecordingTracker;
use verifydesk_uploads::config::UploadPolicyConfig;
use verifydesk_uploads::error::UploadError;
use verifydesk_uploads::events::{UploadEvent, UploadEventPayload};
use verifydesk_uploads::network::{ManualNetworkObserver, NetworkState};
use verifydesk_uploads::uploads::{MediaMetadata, SourceFile, UploadState};
use verifydesk_uploads::validation::UploadPolicy;

fn drain(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn next_matching(
    rx: &mut broadcast::Receiver<UploadEvent>,
    predicate: impl Fn(&UploadEventPayload) -> bool,
) -> UploadEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event.payload) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("expected event")
}

#[tokio::test]
async fn test_mixed_batch_admits_valid_files_and_names_rejected_one() {
    let h = harness();
    let files = vec![
        png("front.png", 32, 32),
        png("back.png", 32, 32),
        SourceFile::new("scan.tiff", "image/tiff", vec![1u8; 64]),
        pdf("plan.pdf"),
    ];

    let report = h.manager.add_files(files).unwrap();
    assert_eq!(report.admitted.len(), 3);
    assert_eq!(report.rejected.len(), 1);

    let message = report.validation_message().unwrap();
    assert!(message.contains("scan.tiff"));
    assert!(!message.contains("plan.pdf"));

    let names: Vec<String> = h.manager.items().into_iter().map(|i| i.filename).collect();
    assert_eq!(names, vec!["front.png", "back.png", "plan.pdf"]);

    settle(&h.manager).await;
    assert_eq!(h.manager.counts().done, 3);
}

#[tokio::test]
async fn test_batch_over_ceiling_is_refused_whole() {
    let h = harness_with(|b| b.max_files(3));
    h.manager.add_files(vec![pdf("a.pdf"), pdf("b.pdf")]).unwrap();

    let err = h
        .manager
        .add_files(vec![pdf("c.pdf"), pdf("d.pdf")])
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::TooManyFiles {
            max: 3,
            current: 2,
            incoming: 2
        }
    ));
    assert_eq!(h.manager.items().len(), 2);
    assert_eq!(h.previews.created().len(), 2);
}

#[tokio::test]
async fn test_refused_batch_is_published() {
    let h = harness_with(|b| b.max_files(1));
    let mut rx = h.manager.subscribe();

    assert!(h.manager.add_files(vec![pdf("a.pdf"), pdf("b.pdf")]).is_err());

    let rejected: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e.payload {
            UploadEventPayload::BatchRejected { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].contains("at most 1 files"));
}

#[test]
fn test_add_files_without_runtime_admits_nothing() {
    let h = harness();

    let err = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap_err();
    assert!(err.to_string().contains("No async runtime"));

    assert!(h.manager.items().is_empty());
    assert!(h.previews.created().is_empty());
    assert_eq!(h.manager.previews().live_count(), 0);
    assert_eq!(h.manager.gate_report().blocking, vec!["Add at least one file".to_string()]);
}

#[tokio::test]
async fn test_pdf_upload_completes_with_remote_url() {
    let h = harness();
    let mut rx = h.manager.subscribe();
    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let id = &report.admitted[0];

    let item = wait_for(&h.manager, id, |i| i.status == UploadState::Done).await;
    assert_eq!(item.progress, 100);
    assert_eq!(item.uploaded_url.as_deref(), Some("https://cdn.test/1/plan.pdf"));
    assert_eq!(item.metadata.url, item.uploaded_url);
    assert!(item.error.is_none());

    // progress never goes backwards within the attempt
    let progress: Vec<u8> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e.payload {
            UploadEventPayload::Progress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_image_is_compressed_before_upload() {
    let h = harness();
    let report = h.manager.add_files(vec![png("site.png", 1600, 900)]).unwrap();
    let id = &report.admitted[0];

    let item = wait_for(&h.manager, id, |i| i.status == UploadState::Done).await;
    assert_eq!(item.uploaded_url.as_deref(), Some("https://cdn.test/1/site.jpg"));

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content_type, "image/jpeg");
}

#[tokio::test]
async fn test_undecodable_image_fails_without_uploading() {
    let h = harness();
    let broken = SourceFile::new("broken.png", "image/png", vec![0u8; 128]);
    let report = h.manager.add_files(vec![broken]).unwrap();

    let item = wait_for(&h.manager, &report.admitted[0], |i| i.status == UploadState::Error).await;
    assert!(item.error.unwrap().contains("broken.png"));
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.signer.calls(), 0);
}

#[tokio::test]
async fn test_cancel_returns_item_to_idle_immediately() {
    let h = harness();
    h.transport.script("walk.mp4", vec![Step::Hang]);
    let video = SourceFile::new("walk.mp4", "video/mp4", vec![0u8; 8192]);
    let report = h.manager.add_files(vec![video]).unwrap();
    let id = report.admitted[0].clone();

    wait_for(&h.manager, &id, |i| i.status == UploadState::Uploading && i.progress > 0).await;

    assert!(h.manager.cancel(&id).unwrap());
    let item = h.manager.item(&id).unwrap();
    assert_eq!(item.status, UploadState::Idle);
    assert_eq!(item.progress, 0);
    assert!(item.error.is_none());

    settle(&h.manager).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let item = h.manager.item(&id).unwrap();
    assert_eq!(item.status, UploadState::Idle);
    assert!(item.error.is_none());

    // cancelling again is a no-op
    assert!(!h.manager.cancel(&id).unwrap());

    h.manager.retry(&id).unwrap();
    let item = wait_for(&h.manager, &id, |i| i.status == UploadState::Done).await;
    assert_eq!(item.attempt, 2);
}

#[tokio::test]
async fn test_cancel_all_only_touches_in_flight_items() {
    let h = harness();
    h.transport.script("a.pdf", vec![Step::Hang]);
    h.transport.script("b.pdf", vec![Step::Hang]);
    let report = h
        .manager
        .add_files(vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
        .unwrap();

    let done_id = &report.admitted[2];
    wait_for(&h.manager, done_id, |i| i.status == UploadState::Done).await;
    wait_for(&h.manager, &report.admitted[0], |i| i.status == UploadState::Uploading).await;
    wait_for(&h.manager, &report.admitted[1], |i| i.status == UploadState::Uploading).await;

    assert_eq!(h.manager.cancel_all(), 2);
    let counts = h.manager.counts();
    assert_eq!(counts.idle, 2);
    assert_eq!(counts.done, 1);
    assert_eq!(counts.in_flight(), 0);
}

#[tokio::test]
async fn test_expired_url_resumes_without_error() {
    let h = harness();
    h.transport.script("plan.pdf", vec![Step::ExpireOnce]);
    let mut rx = h.manager.subscribe();

    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let id = report.admitted[0].clone();
    let item = wait_for(&h.manager, &id, |i| i.status == UploadState::Done).await;

    assert_eq!(item.uploaded_url.as_deref(), Some("https://cdn.test/2/plan.pdf"));
    assert_eq!(h.signer.calls(), 2);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(&e.payload, UploadEventPayload::UrlRenewed { item_id } if *item_id == id)));
    assert!(!events.iter().any(|e| matches!(
        e.payload,
        UploadEventPayload::StatusChanged { status: UploadState::Error, .. }
    )));

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e.payload {
            UploadEventPayload::Progress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_conflict_is_success_with_existing_url() {
    let h = harness();
    h.transport.script(
        "plan.pdf",
        vec![Step::Duplicate(Some("https://cdn.test/existing/plan.pdf".to_string()))],
    );
    h.transport.script("deed.pdf", vec![Step::Duplicate(None)]);

    let report = h
        .manager
        .add_files(vec![pdf("plan.pdf"), pdf("deed.pdf")])
        .unwrap();
    settle(&h.manager).await;

    let plan = h.manager.item(&report.admitted[0]).unwrap();
    assert_eq!(plan.status, UploadState::Done);
    assert_eq!(plan.uploaded_url.as_deref(), Some("https://cdn.test/existing/plan.pdf"));

    let deed = h.manager.item(&report.admitted[1]).unwrap();
    assert_eq!(deed.status, UploadState::Done);
    assert!(deed.uploaded_url.unwrap().ends_with("/deed.pdf"));
}

#[tokio::test]
async fn test_failure_then_retry_resets_progress() {
    let h = harness();
    h.transport.script("plan.pdf", vec![Step::Fail(500, "storage unavailable")]);

    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let id = report.admitted[0].clone();

    let failed = wait_for(&h.manager, &id, |i| i.status == UploadState::Error).await;
    assert!(failed.error.as_deref().unwrap().contains("storage unavailable"));
    assert!(failed.uploaded_url.is_none());

    let mut rx = h.manager.subscribe();
    h.manager.retry(&id).unwrap();
    let restarted = next_matching(&mut rx, |p| {
        matches!(p, UploadEventPayload::StatusChanged { status: UploadState::Uploading, .. })
    })
    .await;
    assert!(matches!(
        restarted.payload,
        UploadEventPayload::StatusChanged {
            progress: 0,
            error: None,
            ..
        }
    ));

    let done = wait_for(&h.manager, &id, |i| i.status == UploadState::Done).await;
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_retry_of_done_item_is_refused() {
    let h = harness();
    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let id = &report.admitted[0];
    wait_for(&h.manager, id, |i| i.status == UploadState::Done).await;

    assert!(matches!(
        h.manager.retry(id),
        Err(UploadError::InvalidTransition { .. })
    ));
    assert_eq!(h.manager.item(id).unwrap().status, UploadState::Done);
}

#[tokio::test]
async fn test_signed_url_failure_marks_item_failed() {
    let h = harness();
    h.signer
        .fail_next(UploadError::transport("Upload URL request failed with status 401", Some(401)));

    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let item = wait_for(&h.manager, &report.admitted[0], |i| i.status == UploadState::Error).await;
    assert!(item.error.unwrap().contains("401"));
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_remove_aborts_upload_and_releases_preview_once() {
    let h = harness();
    h.transport.script("walk.mp4", vec![Step::Hang]);
    let report = h
        .manager
        .add_files(vec![SourceFile::new("walk.mp4", "video/mp4", vec![0u8; 4096])])
        .unwrap();
    let id = report.admitted[0].clone();
    let preview = h.manager.item(&id).unwrap().preview.unwrap();

    wait_for(&h.manager, &id, |i| i.status == UploadState::Uploading).await;
    h.manager.remove(&id).unwrap();

    assert!(h.manager.item(&id).is_none());
    assert_eq!(h.previews.revoke_count(&preview), 1);
    assert!(matches!(h.manager.remove(&id), Err(UploadError::ItemNotFound(_))));

    settle(&h.manager).await;
    drop(h.manager);
    assert_eq!(h.previews.revoke_count(&preview), 1);
}

#[tokio::test]
async fn test_large_video_gets_warning_not_abort() {
    let h = harness_with(|b| {
        b.policy(UploadPolicy::from_config(&UploadPolicyConfig {
            video_max_bytes: 200 * 1024 * 1024,
            ..UploadPolicyConfig::default()
        }))
    });
    let mut rx = h.manager.subscribe();
    let big = SourceFile::new("tour.mp4", "video/mp4", vec![0u8; 51 * 1024 * 1024]);

    let report = h.manager.add_files(vec![big]).unwrap();
    let id = report.admitted[0].clone();

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        UploadEventPayload::LargeUploadWarning { item_id, .. } if *item_id == id
    )));

    wait_for(&h.manager, &id, |i| i.status == UploadState::Done).await;
}

#[tokio::test]
async fn test_back_online_retries_failed_items() {
    let h = harness();
    let observer = ManualNetworkObserver::new(NetworkState::Online);
    h.manager.watch_network(&observer).unwrap();
    let mut rx = h.manager.subscribe();

    h.transport.script("plan.pdf", vec![Step::Fail(503, "offline")]);
    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let id = report.admitted[0].clone();
    wait_for(&h.manager, &id, |i| i.status == UploadState::Error).await;

    observer.set(NetworkState::Offline);
    next_matching(&mut rx, |p| matches!(p, UploadEventPayload::NetworkOffline)).await;
    assert_eq!(h.manager.item(&id).unwrap().status, UploadState::Error);

    observer.set(NetworkState::Online);
    let online = next_matching(&mut rx, |p| matches!(p, UploadEventPayload::NetworkOnline { .. })).await;
    assert!(matches!(online.payload, UploadEventPayload::NetworkOnline { retried: 1 }));

    let item = wait_for(&h.manager, &id, |i| i.status == UploadState::Done).await;
    assert_eq!(item.attempt, 2);
}

#[tokio::test]
async fn test_uploads_run_concurrently() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        h.transport.script(name, vec![Step::Gated(gate.clone())]);
    }

    h.manager
        .add_files(vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
        .unwrap();

    // all three reach the transport before any is allowed to finish
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.transport.sent().len() < 3 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.manager.counts().uploading, 3);

    gate.add_permits(3);
    settle(&h.manager).await;
    assert_eq!(h.manager.counts().done, 3);
}

#[tokio::test]
async fn test_metadata_updates_are_validated() {
    let h = harness();
    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    let id = report.admitted[0].clone();

    let short = MediaMetadata {
        media_type: Some(survey_plan()),
        title: "ab".to_string(),
        ..MediaMetadata::default()
    };
    assert!(matches!(
        h.manager.update_metadata(&id, short),
        Err(UploadError::Metadata(_))
    ));

    let foreign = MediaMetadata {
        media_type: Some(verifydesk_uploads::uploads::MediaType::new(
            "deed",
            verifydesk_uploads::uploads::MediaKind::Pdf,
            "Deed",
        )),
        title: "Deed of assignment".to_string(),
        ..MediaMetadata::default()
    };
    assert!(h.manager.update_metadata(&id, foreign).is_err());

    let good = MediaMetadata {
        media_type: Some(survey_plan()),
        title: "Survey plan".to_string(),
        description: "Lot 14".to_string(),
        url: Some("https://elsewhere.test/forged".to_string()),
    };
    h.manager.update_metadata(&id, good).unwrap();

    let item = wait_for(&h.manager, &id, |i| i.status == UploadState::Done).await;
    assert_eq!(item.metadata.title, "Survey plan");
    assert_eq!(item.metadata.url, item.uploaded_url);

    assert!(matches!(
        h.manager.update_metadata("missing", MediaMetadata::default()),
        Err(UploadError::ItemNotFound(_))
    ));
}

#[tokio::test]
async fn test_tracker_receives_session_events() {
    let tracker = Arc::new(RecordingTracker::new());
    let h = harness_with(|b| b.tracker(tracker.clone()));

    let report = h.manager.add_files(vec![pdf("plan.pdf")]).unwrap();
    wait_for(&h.manager, &report.admitted[0], |i| i.status == UploadState::Done).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let names = tracker.names();
        if names.iter().any(|n| n == "media_upload_status_changed")
            && names.iter().any(|n| n == "media_upload_item_added")
        {
            assert!(!names.iter().any(|n| n == "media_upload_progress"));
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tracker saw {:?}", names);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
