mod common;

use common::{Engine, Harness, MP4_MAGIC, RecordingSink};
use tokio_util::sync::CancellationToken;
use video_transcoder::config::settings::DispatchMode;
use video_transcoder::modules::video::events::{JobMessage, ProgressEvent};
use video_transcoder::modules::video::model::VideoState;
use video_transcoder::modules::video::service::VideoService;
use video_transcoder::workers::transcoder::{JobError, JobOutcome, run_job};

async fn queued_job(h: &Harness, format: &str) -> JobMessage {
    let record = h.seed_video("mov").await;
    VideoService::request_conversion(&h.state, record.video_id, format)
        .await
        .unwrap()
}

#[tokio::test]
async fn completed_job_publishes_output_and_ends_at_100() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let job = queued_job(&h, "mp4").await;
    let sink = RecordingSink::default();

    let outcome = run_job(&h.state.jobs, &job, &sink, &Harness::never_cancelled())
        .await
        .unwrap();

    let key = format!("transcoded/{}.mp4", job.video_id);
    assert_eq!(outcome, JobOutcome::Completed { object_key: key.clone() });

    let record = h.store.snapshot(job.video_id).unwrap();
    assert_eq!(record.state, VideoState::Completed);
    assert_eq!(record.transcoded_object_key.as_deref(), Some(key.as_str()));
    assert_eq!(record.transcoded_format.as_deref(), Some("mp4"));
    assert!(h.objects.bytes(&key).unwrap().starts_with(MP4_MAGIC));

    let percents = sink.percents();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert!(!sink.events().iter().any(|e| matches!(e, ProgressEvent::Error { .. })));

    assert!(h.scratch_entries().is_empty());
}

#[tokio::test]
async fn engine_crash_fails_the_record_and_removes_scratch() {
    let h = Harness::new(DispatchMode::Queue, Engine::CrashesMidEncode).await;
    let job = queued_job(&h, "webm").await;
    let sink = RecordingSink::default();

    let err = run_job(&h.state.jobs, &job, &sink, &Harness::never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Engine(_)), "{err}");
    assert!(!err.is_permanent());

    let events = sink.events();
    assert_eq!(events.last(), Some(&ProgressEvent::Error { video_id: job.video_id }));
    assert_eq!(
        events.iter().filter(|e| matches!(e, ProgressEvent::Error { .. })).count(),
        1
    );

    let record = h.store.snapshot(job.video_id).unwrap();
    assert_eq!(record.state, VideoState::Failed);
    assert!(record.transcoded_object_key.is_none());
    assert!(!h.objects.contains(&format!("transcoded/{}.webm", job.video_id)));
    assert!(h.scratch_entries().is_empty(), "{:?}", h.scratch_entries());
}

#[tokio::test]
async fn redelivered_job_is_idempotent() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let job = queued_job(&h, "mp4").await;
    let cancel = Harness::never_cancelled();

    let first = run_job(&h.state.jobs, &job, &RecordingSink::default(), &cancel)
        .await
        .unwrap();
    assert!(matches!(first, JobOutcome::Completed { .. }));

    let sink = RecordingSink::default();
    let second = run_job(&h.state.jobs, &job, &sink, &cancel).await.unwrap();
    assert_eq!(second, JobOutcome::AlreadyCompleted);
    assert_eq!(sink.percents(), vec![100]);

    let record = h.store.snapshot(job.video_id).unwrap();
    assert_eq!(record.state, VideoState::Completed);
    assert!(h.objects.contains(record.transcoded_object_key.as_deref().unwrap()));
    assert!(h.scratch_entries().is_empty());
}

#[tokio::test]
async fn job_from_a_superseded_request_is_stale() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let webm = queued_job(&h, "webm").await;
    let cancel = Harness::never_cancelled();

    run_job(&h.state.jobs, &webm, &RecordingSink::default(), &cancel)
        .await
        .unwrap();
    let mp4 = VideoService::request_conversion(&h.state, webm.video_id, "mp4")
        .await
        .unwrap();

    // The webm message comes back after its lease expired.
    let err = run_job(&h.state.jobs, &webm, &RecordingSink::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Stale { state: VideoState::Queued, .. }), "{err}");
    assert!(err.is_permanent());

    let record = h.store.snapshot(webm.video_id).unwrap();
    assert_eq!(record.state, VideoState::Queued);
    assert_eq!(record.requested_format.as_deref(), Some("mp4"));

    let outcome = run_job(&h.state.jobs, &mp4, &RecordingSink::default(), &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, JobOutcome::Completed { .. }));

    let record = h.store.snapshot(webm.video_id).unwrap();
    assert_eq!(record.state, VideoState::Completed);
    assert_eq!(record.transcoded_format.as_deref(), Some("mp4"));
    assert!(!h.objects.contains(&format!("transcoded/{}.webm", webm.video_id)));
    assert!(h.scratch_entries().is_empty());
}

#[tokio::test]
async fn racing_duplicates_both_leave_a_completed_record() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let job = queued_job(&h, "flv").await;
    let cancel = Harness::never_cancelled();
    let (a, b) = (RecordingSink::default(), RecordingSink::default());

    let (first, second) = tokio::join!(
        run_job(&h.state.jobs, &job, &a, &cancel),
        run_job(&h.state.jobs, &job, &b, &cancel),
    );
    assert!(first.is_ok() && second.is_ok(), "{first:?} {second:?}");

    let record = h.store.snapshot(job.video_id).unwrap();
    assert_eq!(record.state, VideoState::Completed);
    assert_eq!(
        record.transcoded_object_key,
        Some(format!("transcoded/{}.flv", job.video_id))
    );
    assert!(h.scratch_entries().is_empty());
}

#[tokio::test]
async fn unknown_target_format_is_rejected_before_the_engine() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let mut job = queued_job(&h, "mp4").await;
    job.target_format = "mkv".to_string();
    let sink = RecordingSink::default();

    let err = run_job(&h.state.jobs, &job, &sink, &Harness::never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::UnsupportedFormat(_)));
    assert!(err.is_permanent());
    assert_eq!(sink.percents(), Vec::<u8>::new());
    assert_eq!(h.store.snapshot(job.video_id).unwrap().state, VideoState::Failed);
}

#[tokio::test]
async fn job_for_a_deleted_video_is_permanent() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let job = queued_job(&h, "mp4").await;
    VideoService::delete(&h.state, job.video_id).await.unwrap();

    let err = run_job(
        &h.state.jobs,
        &job,
        &RecordingSink::default(),
        &Harness::never_cancelled(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, JobError::VideoNotFound(id) if id == job.video_id));
    assert!(err.is_permanent());
    assert!(h.objects.keys().is_empty());
}

#[tokio::test]
async fn expired_source_url_falls_back_to_a_fresh_signature() {
    let h = Harness::new(DispatchMode::Queue, Engine::Succeeds).await;
    let mut job = queued_job(&h, "avi").await;
    let record = h.store.snapshot(job.video_id).unwrap();
    job.source_url = h.objects.expired_url(&record.original_object_key);

    let outcome = run_job(
        &h.state.jobs,
        &job,
        &RecordingSink::default(),
        &Harness::never_cancelled(),
    )
    .await
    .unwrap();

    assert!(matches!(outcome, JobOutcome::Completed { .. }));
    assert_eq!(h.store.snapshot(job.video_id).unwrap().state, VideoState::Completed);
}

#[tokio::test]
async fn cancelled_job_fails_and_cleans_up() {
    let h = Harness::new(DispatchMode::Inline, Engine::Succeeds).await;
    let job = queued_job(&h, "mp4").await;
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_job(&h.state.jobs, &job, &sink, &cancel).await.unwrap_err();

    assert!(matches!(err, JobError::Cancelled));
    assert_eq!(sink.events().last(), Some(&ProgressEvent::Error { video_id: job.video_id }));
    assert_eq!(h.store.snapshot(job.video_id).unwrap().state, VideoState::Failed);
    assert!(h.scratch_entries().is_empty());
}
