//! Time-based reaping of stored media.
//!
//! A reap deletes the media payload and clears `file_path` and
//! `cleanup_deadline`; the video record and everything else on it stay.
//! Videos in an in-flight status are never reaped, whatever their deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tubeflow_models::{Video, VideoId, VideoPatch};
use tubeflow_state::{StateError, VideoStore};
use tubeflow_storage::MediaStore;

use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::error::WorkerResult;
use crate::metrics::{record_reaped, record_sweep_failures};
use crate::retry::FailureTracker;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub reaped: usize,
    pub skipped_in_flight: usize,
    pub failed: usize,
}

enum ReapOutcome {
    Reaped,
    InFlight,
    /// Deadline moved or status changed since the listing.
    Stale,
}

pub struct CleanupScheduler {
    videos: Arc<dyn VideoStore>,
    media: Arc<dyn MediaStore>,
    interval: Duration,
    batch_size: usize,
}

impl CleanupScheduler {
    pub fn new(ctx: &PipelineContext, config: &WorkerConfig) -> Self {
        Self {
            videos: Arc::clone(&ctx.videos),
            media: Arc::clone(&ctx.media),
            interval: config.cleanup_sweep_interval,
            batch_size: config.cleanup_batch_size.max(1),
        }
    }

    /// Set or replace the deadline after which the media is reaped.
    pub async fn schedule_cleanup(&self, id: &VideoId, deadline: DateTime<Utc>) -> WorkerResult<Video> {
        let video = self.videos.set_cleanup_deadline(id, Some(deadline)).await?;
        info!(video_id = %id, deadline = %deadline, "Scheduled cleanup");
        Ok(video)
    }

    /// Clear the deadline. Cancelling a video without one is a no-op.
    pub async fn cancel_cleanup(&self, id: &VideoId) -> WorkerResult<Video> {
        let video = self.videos.get(id).await?;
        if video.cleanup_deadline.is_none() {
            return Ok(video);
        }

        let video = self.videos.set_cleanup_deadline(id, None).await?;
        info!(video_id = %id, "Cancelled cleanup");
        Ok(video)
    }

    /// Reap every due video at rest, up to the batch size.
    pub async fn sweep(&self, now: DateTime<Utc>) -> WorkerResult<SweepReport> {
        let due = self.videos.list_cleanup_due(now, self.batch_size).await?;
        let mut report = SweepReport {
            examined: due.len(),
            ..Default::default()
        };

        for video in due {
            if video.status.is_in_flight() {
                debug!(video_id = %video.id, status = %video.status, "Skipping in-flight video");
                report.skipped_in_flight += 1;
                continue;
            }

            match self.reap(&video.id, now).await {
                Ok(ReapOutcome::Reaped) => report.reaped += 1,
                Ok(ReapOutcome::InFlight) => report.skipped_in_flight += 1,
                Ok(ReapOutcome::Stale) => {}
                Err(e) => {
                    warn!(video_id = %video.id, "Cleanup failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        record_reaped(report.reaped as u64);
        record_sweep_failures(report.failed as u64);
        Ok(report)
    }

    async fn reap(&self, id: &VideoId, now: DateTime<Utc>) -> WorkerResult<ReapOutcome> {
        // The listing may be stale; re-read before touching anything.
        let video = self.videos.get(id).await?;
        if video.status.is_in_flight() {
            return Ok(ReapOutcome::InFlight);
        }
        if !video.is_reapable(now) {
            return Ok(ReapOutcome::Stale);
        }

        // Claim by CAS on the current status so a step starting concurrently
        // either wins (and we skip) or sees the file already gone.
        let claim = VideoPatch::new().clear_file().cleanup_deadline(None);
        match self.videos.transition(id, &[video.status], video.status, claim).await {
            Ok(_) => {}
            Err(StateError::Conflict { .. }) => return Ok(ReapOutcome::Stale),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.media.delete(id).await {
            // Put the deadline back so the next sweep retries the delete.
            if let Err(restore) = self.videos.set_cleanup_deadline(id, Some(now)).await {
                warn!(video_id = %id, "Could not restore cleanup deadline: {}", restore);
            }
            return Err(e.into());
        }

        info!(video_id = %id, status = %video.status, "Reaped stored media");
        Ok(ReapOutcome::Reaped)
    }

    /// Sweep on a fixed interval until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        info!(interval = ?self.interval, batch = self.batch_size, "Cleanup sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.sweep(Utc::now()).await {
                Ok(report) => {
                    failures.record_success();
                    if report.examined > 0 {
                        info!(
                            reaped = report.reaped,
                            skipped_in_flight = report.skipped_in_flight,
                            failed = report.failed,
                            "Cleanup sweep finished"
                        );
                    }
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Cleanup sweep failed: {}", e);
                    }
                }
            }
        }

        info!("Cleanup sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use tubeflow_models::VideoStatus;

    use super::*;
    use crate::testing::{harness, Harness};

    async fn ready_with_media(h: &Harness) -> Video {
        let upload = h.dir.path().join("in.mov");
        tokio::fs::write(&upload, b"raw").await.unwrap();
        let video = h
            .orchestrator
            .register("user-1", tubeflow_models::VideoSource::uploaded(upload.to_string_lossy(), "in.mov"))
            .await
            .unwrap();
        h.orchestrator.ingest_upload(&video.id, &upload).await.unwrap();
        assert!(h.orchestrator.runner().wait_idle(Duration::from_secs(5)).await);
        h.videos.get(&video.id).await.unwrap()
    }

    fn scheduler(h: &Harness) -> CleanupScheduler {
        CleanupScheduler::new(h.context(), h.orchestrator.config())
    }

    #[tokio::test]
    async fn test_sweep_reaps_due_media() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;
        let past = Utc::now() - ChronoDuration::minutes(1);
        cleanup.schedule_cleanup(&video.id, past).await.unwrap();

        let report = cleanup.sweep(Utc::now()).await.unwrap();

        assert_eq!(report.reaped, 1);
        assert!(!h.media_exists(&video.id).await);
        let reaped = h.videos.get(&video.id).await.unwrap();
        assert_eq!(reaped.status, VideoStatus::Ready);
        assert!(reaped.file_path.is_none());
        assert!(reaped.cleanup_deadline.is_none());
        // Metadata survives the reap.
        assert_eq!(reaped.transcript, video.transcript);
        assert_eq!(reaped.duration_seconds, video.duration_seconds);
    }

    #[tokio::test]
    async fn test_sweep_never_reaps_in_flight() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;
        cleanup
            .schedule_cleanup(&video.id, Utc::now() - ChronoDuration::hours(1))
            .await
            .unwrap();
        h.videos
            .transition(&video.id, &VideoStatus::ALL, VideoStatus::Processing, VideoPatch::new())
            .await
            .unwrap();

        let report = cleanup.sweep(Utc::now()).await.unwrap();

        assert_eq!(report.reaped, 0);
        assert_eq!(report.skipped_in_flight, 1);
        assert!(h.media_exists(&video.id).await);
        let video = h.videos.get(&video.id).await.unwrap();
        assert!(video.file_path.is_some());
        assert!(video.cleanup_deadline.is_some());
    }

    #[tokio::test]
    async fn test_future_deadline_is_left_alone() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;

        // Registration set the default deadline 30 minutes out.
        assert!(video.cleanup_deadline.unwrap() > Utc::now());
        assert_eq!(cleanup.sweep(Utc::now()).await.unwrap(), SweepReport::default());
        assert!(h.media_exists(&video.id).await);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;

        let first = cleanup.cancel_cleanup(&video.id).await.unwrap();
        assert!(first.cleanup_deadline.is_none());
        let second = cleanup.cancel_cleanup(&video.id).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_schedule_then_cancel_leaves_nothing_to_sweep() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;

        cleanup
            .schedule_cleanup(&video.id, Utc::now() - ChronoDuration::seconds(5))
            .await
            .unwrap();
        cleanup.cancel_cleanup(&video.id).await.unwrap();

        let report = cleanup.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.examined, 0);
        assert!(h.media_exists(&video.id).await);
    }

    #[tokio::test]
    async fn test_reaped_video_cannot_publish() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;
        cleanup.schedule_cleanup(&video.id, Utc::now()).await.unwrap();
        cleanup.sweep(Utc::now()).await.unwrap();

        let err = h
            .orchestrator
            .publish(&video.id, Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::WorkerError::MediaMissing(_)));
        assert_eq!(h.platform.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_video_is_not_found() {
        let h = harness();
        let err = scheduler(&h).cancel_cleanup(&VideoId::from("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let cleanup = scheduler(&h);
        let video = ready_with_media(&h).await;
        cleanup
            .schedule_cleanup(&video.id, Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { cleanup.run(rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        assert!(!h.media_exists(&video.id).await);
    }
}
