//! Conversion job orchestration.
//!
//! `submit` validates a request, records the job and pushes it on a bounded
//! work queue. A worker later calls `run`, which drives the job through
//! Queued -> Downloading -> Converting -> Completed | Failed: the source is
//! copied from the object store into a job-id-named scratch file, the engine
//! converts it while ticks are relayed to the broadcaster, the artifact is
//! uploaded back to the object store, and both scratch files are removed
//! before the terminal state is published.
//!
//! Finished jobs stay in memory for the retention period only. After that,
//! lookups are answered from the video table.

use super::broadcaster::ProgressBroadcaster;
use super::engine::{ConvertRequest, EngineEvent, TranscodeEngine};
use super::error::{JobError, LookupError, SubmitError};
use super::model::{ConversionJob, JobStatus, ProgressEvent, Resolution, TargetFormat, VideoRecord};
use super::notifier::{notify_best_effort, StatusMessage, StatusNotifier};
use super::repository::{TableError, VideoTable};
use crate::infrastructure::storage::{ObjectStore, ObjectStream};
use async_channel::TrySendError;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External services a job talks to.
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub table: Arc<dyn VideoTable>,
    pub engine: Arc<dyn TranscodeEngine>,
    pub notifier: Arc<dyn StatusNotifier>,
    pub broadcaster: ProgressBroadcaster,
}

struct JobEntry {
    job: ConversionJob,
    cancel: CancellationToken,
}

struct Inner {
    store: Arc<dyn ObjectStore>,
    table: Arc<dyn VideoTable>,
    engine: Arc<dyn TranscodeEngine>,
    notifier: Arc<dyn StatusNotifier>,
    broadcaster: ProgressBroadcaster,
    work_dir: PathBuf,
    retention: Duration,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    queue: async_channel::Sender<Uuid>,
}

/// Scratch files owned by one job, named from its id so concurrent jobs never
/// collide in the shared work directory.
pub struct JobPaths {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl JobPaths {
    pub fn for_job(work_dir: &Path, job: &ConversionJob) -> Self {
        Self {
            input: work_dir.join(format!("{}.source", job.job_id)),
            output: work_dir.join(format!("{}.out.{}", job.job_id, job.target_format.extension())),
        }
    }
}

/// Object-store key the converted artifact is uploaded to.
pub fn output_key(job: &ConversionJob) -> String {
    format!(
        "processed/{}/{}.{}",
        job.owner_id,
        job.job_id,
        job.target_format.extension()
    )
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, SubmitError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SubmitError::Validation(format!("{} is required", field)));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    /// Returns the orchestrator and the receiving end of its work queue, which
    /// the worker pool consumes. Terminal jobs are evicted from memory once
    /// `retention` has passed since their last transition.
    pub fn new(
        collaborators: Collaborators,
        work_dir: PathBuf,
        queue_capacity: usize,
        retention: Duration,
    ) -> (Self, async_channel::Receiver<Uuid>) {
        let (queue, receiver) = async_channel::bounded(queue_capacity.max(1));
        let Collaborators {
            store,
            table,
            engine,
            notifier,
            broadcaster,
        } = collaborators;

        let orchestrator = Self {
            inner: Arc::new(Inner {
                store,
                table,
                engine,
                notifier,
                broadcaster,
                work_dir,
                retention,
                jobs: RwLock::new(HashMap::new()),
                queue,
            }),
        };
        (orchestrator, receiver)
    }

    pub async fn submit(
        &self,
        owner_id: &str,
        source_key: &str,
        target_format: &str,
        target_resolution: &str,
    ) -> Result<Uuid, SubmitError> {
        self.evict_finished();

        let owner_id = required("ownerId", owner_id)?;
        let source_key = required("sourceKey", source_key)?;
        let format_label = required("targetFormat", target_format)?;
        let resolution_label = required("targetResolution", target_resolution)?;

        let format = TargetFormat::parse(format_label).ok_or_else(|| {
            SubmitError::Validation(format!(
                "unsupported target format '{}', expected one of mp4, avi, mov, mkv",
                format_label
            ))
        })?;
        let resolution = Resolution::from_label(resolution_label);

        let job = ConversionJob::new(owner_id, source_key, format, resolution);
        let job_id = job.job_id;
        self.persist(VideoRecord::from(&job)).await;
        self.jobs_mut().insert(
            job_id,
            JobEntry {
                job,
                cancel: CancellationToken::new(),
            },
        );

        let rejection = match self.inner.queue.try_send(job_id) {
            Ok(()) => {
                info!(
                    "📥 Queued job {} ({} -> {} @ {}) for {}",
                    job_id, source_key, format, resolution, owner_id
                );
                return Ok(job_id);
            }
            Err(TrySendError::Full(_)) => SubmitError::QueueFull,
            Err(TrySendError::Closed(_)) => SubmitError::ShuttingDown,
        };

        warn!("Rejected job {}: {}", job_id, rejection);
        let failed = self.with_job(job_id, |job| {
            job.fail(rejection.to_string());
            job.clone()
        });
        if let Some(job) = failed {
            self.inner.broadcaster.publish(ProgressEvent::error(job_id));
            notify_best_effort(self.inner.notifier.as_ref(), StatusMessage::failed(&job)).await;
            self.persist(VideoRecord::from(&job)).await;
        }
        Err(rejection)
    }

    pub fn status(&self, job_id: Uuid) -> Option<ConversionJob> {
        self.jobs().get(&job_id).map(|entry| entry.job.clone())
    }

    /// Snapshot of a job, hidden from anyone but its owner. Jobs evicted from
    /// memory are rebuilt from the video table.
    pub async fn job_for_owner(&self, job_id: Uuid, owner_id: &str) -> Result<ConversionJob, LookupError> {
        if let Some(job) = self.status(job_id) {
            return Some(job)
                .filter(|job| job.owner_id == owner_id)
                .ok_or(LookupError::NotFound);
        }

        let record = self
            .inner
            .table
            .get(job_id)
            .await
            .map_err(|e| LookupError::Storage(e.to_string()))?;
        record
            .filter(|record| record.owner_id == owner_id)
            .map(ConversionJob::from)
            .ok_or(LookupError::NotFound)
    }

    /// Requests cancellation. A queued job fails without downloading; a running
    /// one has its encoder stopped.
    pub async fn cancel(&self, job_id: Uuid, owner_id: &str) -> Result<ConversionJob, LookupError> {
        let requested = {
            let jobs = self.jobs();
            jobs.get(&job_id).map(|entry| {
                if entry.job.owner_id != owner_id {
                    return Err(LookupError::NotFound);
                }
                if entry.job.status.is_terminal() {
                    return Err(LookupError::AlreadyFinished);
                }
                entry.cancel.cancel();
                Ok(entry.job.clone())
            })
        };

        match requested {
            Some(result) => {
                if result.is_ok() {
                    info!("🛑 Cancellation requested for job {}", job_id);
                }
                result
            }
            // Only terminal jobs ever leave memory.
            None => self
                .job_for_owner(job_id, owner_id)
                .await
                .and(Err(LookupError::AlreadyFinished)),
        }
    }

    /// Opens the uploaded artifact of a completed job.
    pub async fn open_artifact(
        &self,
        job_id: Uuid,
        owner_id: &str,
    ) -> Result<(ConversionJob, ObjectStream), LookupError> {
        let job = self.job_for_owner(job_id, owner_id).await?;
        let key = match (&job.status, &job.output_key) {
            (JobStatus::Completed, Some(key)) => key.clone(),
            _ => return Err(LookupError::NotCompleted),
        };
        let stream = self
            .inner
            .store
            .get(&key)
            .await
            .map_err(|e| LookupError::Storage(e.to_string()))?;
        Ok((job, stream))
    }

    /// Removes a finished job's artifact and its video record.
    pub async fn delete_video(&self, job_id: Uuid, owner_id: &str) -> Result<VideoRecord, LookupError> {
        let job = self.job_for_owner(job_id, owner_id).await?;
        if !job.status.is_terminal() {
            return Err(LookupError::StillRunning);
        }

        if let Some(key) = &job.output_key {
            self.inner
                .store
                .delete(key)
                .await
                .map_err(|e| LookupError::Storage(e.to_string()))?;
        }
        self.inner
            .table
            .delete(job_id, &job.owner_id)
            .await
            .map_err(|e| LookupError::Storage(e.to_string()))?;
        self.jobs_mut().remove(&job_id);

        info!("🗑️ Deleted video of job {}", job_id);
        Ok(VideoRecord::from(&job))
    }

    pub async fn list_videos(&self, owner_id: &str) -> Result<Vec<VideoRecord>, TableError> {
        self.inner.table.query(owner_id).await
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.inner.broadcaster
    }

    /// Stops accepting submissions. Already queued jobs are still handed out.
    pub fn close_queue(&self) -> bool {
        self.inner.queue.close()
    }

    /// Drives one queued job to a terminal state. Called by the worker pool.
    pub async fn run(&self, job_id: Uuid) {
        let Some((job, cancel)) = self
            .jobs()
            .get(&job_id)
            .map(|entry| (entry.job.clone(), entry.cancel.clone()))
        else {
            warn!("Job {} vanished before it could run", job_id);
            return;
        };
        if job.status != JobStatus::Queued {
            debug!("Job {} is {:?}, nothing to run", job_id, job.status);
            return;
        }

        let paths = JobPaths::for_job(&self.inner.work_dir, &job);
        let outcome = self.execute(&job, &paths, &cancel).await;
        self.cleanup(&paths).await;

        match outcome {
            Ok(key) => self.finish_completed(job_id, key, &cancel).await,
            Err(e) => self.finish_failed(job_id, e).await,
        }
        self.evict_finished();
    }

    async fn execute(
        &self,
        job: &ConversionJob,
        paths: &JobPaths,
        cancel: &CancellationToken,
    ) -> Result<String, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        self.transition(job.job_id, JobStatus::Downloading);
        notify_best_effort(self.inner.notifier.as_ref(), StatusMessage::started(job)).await;

        info!("⬇️ Downloading {} for job {}", job.source_key, job.job_id);
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = self.download(&job.source_key, &paths.input) => result?,
        };
        info!("⬇️ Downloaded {} bytes for job {}", bytes, job.job_id);

        self.transition(job.job_id, JobStatus::Converting);
        self.inner.broadcaster.publish(ProgressEvent::percent(job.job_id, 0));
        let output = self.convert(job, paths, cancel).await?;

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.hand_off(job, &output).await
    }

    async fn download(&self, source_key: &str, dest: &Path) -> Result<u64, JobError> {
        let mut stream = self
            .inner
            .store
            .get(source_key)
            .await
            .map_err(|e| JobError::SourceFetch(e.to_string()))?;

        tokio::fs::create_dir_all(&self.inner.work_dir).await.map_err(|e| {
            JobError::SourceFetch(format!("cannot prepare {}: {}", self.inner.work_dir.display(), e))
        })?;
        let local = |e: io::Error| JobError::SourceFetch(format!("cannot write {}: {}", dest.display(), e));
        let mut file = tokio::fs::File::create(dest).await.map_err(local)?;

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| JobError::SourceFetch(format!("download interrupted: {}", e)))?;
            file.write_all(&chunk).await.map_err(local)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(local)?;

        Ok(written)
    }

    async fn convert(
        &self,
        job: &ConversionJob,
        paths: &JobPaths,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, JobError> {
        let request = ConvertRequest {
            input: paths.input.clone(),
            output: paths.output.clone(),
            format: job.target_format,
            resolution: job.target_resolution,
        };
        let mut events = self.inner.engine.convert(request, cancel.clone());

        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Progress(percent) => self.relay_progress(job.job_id, percent),
                EngineEvent::Done(path) => {
                    self.relay_progress(job.job_id, 100);
                    return Ok(path);
                }
                EngineEvent::Failed(detail) if cancel.is_cancelled() => {
                    debug!("Job {} engine stopped after cancellation: {}", job.job_id, detail);
                    return Err(JobError::Cancelled);
                }
                EngineEvent::Failed(detail) => return Err(JobError::Engine(detail)),
            }
        }

        Err(JobError::Engine("encoder stopped without reporting an outcome".to_string()))
    }

    fn relay_progress(&self, job_id: Uuid, percent: u8) {
        let advanced = self
            .with_job(job_id, |job| job.record_progress(percent))
            .unwrap_or(false);
        if advanced {
            self.inner.broadcaster.publish(ProgressEvent::percent(job_id, percent));
        }
    }

    async fn hand_off(&self, job: &ConversionJob, output: &Path) -> Result<String, JobError> {
        let key = output_key(job);
        let size = tokio::fs::metadata(output).await.map(|m| m.len()).map_err(|e| {
            JobError::ArtifactStore(format!("cannot read {}: {}", output.display(), e))
        })?;

        info!("⬆️ Uploading {} bytes to {}", size, key);
        self.inner
            .store
            .put_file(&key, output, &job.target_format.content_type())
            .await
            .map_err(|e| JobError::ArtifactStore(e.to_string()))?;

        Ok(key)
    }

    /// Removal failures are logged only; they never change the job outcome.
    async fn cleanup(&self, paths: &JobPaths) {
        for path in [&paths.input, &paths.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("🧹 Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("🧹 Failed to remove temporary file {}: {}", path.display(), e),
            }
        }
    }

    /// The token is checked under the registry lock, so a cancel answered
    /// with 202 never ends in Completed.
    async fn finish_completed(&self, job_id: Uuid, output_key: String, cancel: &CancellationToken) {
        let completed = self
            .with_job(job_id, |job| {
                if cancel.is_cancelled() {
                    return None;
                }
                job.complete(output_key.clone()).then(|| job.clone())
            })
            .flatten();
        let Some(job) = completed else {
            if cancel.is_cancelled() {
                self.discard_artifact(&output_key).await;
                self.finish_failed(job_id, JobError::Cancelled).await;
            } else {
                warn!("Job {} could not be marked completed", job_id);
            }
            return;
        };

        info!("✅ Job {} completed: {}", job_id, job.output_key.as_deref().unwrap_or_default());
        self.inner.broadcaster.publish(ProgressEvent::complete(job_id));
        notify_best_effort(self.inner.notifier.as_ref(), StatusMessage::completed(&job)).await;
        self.persist(VideoRecord::from(&job)).await;
    }

    async fn finish_failed(&self, job_id: Uuid, err: JobError) {
        let detail = err.to_string();
        let failed = self
            .with_job(job_id, |job| job.fail(detail.clone()).then(|| job.clone()))
            .flatten();
        let Some(job) = failed else {
            warn!("Job {} could not be marked failed: {}", job_id, detail);
            return;
        };

        error!("❌ Job {} failed: {}", job_id, detail);
        self.inner.broadcaster.publish(ProgressEvent::error(job_id));
        notify_best_effort(self.inner.notifier.as_ref(), StatusMessage::failed(&job)).await;
        self.persist(VideoRecord::from(&job)).await;
    }

    async fn discard_artifact(&self, key: &str) {
        match self.inner.store.delete(key).await {
            Ok(()) => debug!("🧹 Discarded artifact {} of cancelled job", key),
            Err(e) => warn!("🧹 Failed to discard artifact {}: {}", key, e),
        }
    }

    /// Drops terminal jobs whose last transition is older than the retention
    /// period. Their records remain in the video table.
    fn evict_finished(&self) -> usize {
        let retention = time::Duration::try_from(self.inner.retention).unwrap_or(time::Duration::MAX);
        let Some(cutoff) = OffsetDateTime::now_utc().checked_sub(retention) else {
            return 0;
        };

        let mut jobs = self.jobs_mut();
        let before = jobs.len();
        jobs.retain(|_, entry| !(entry.job.status.is_terminal() && entry.job.updated_at <= cutoff));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("Evicted {} finished job(s) from memory", evicted);
        }
        evicted
    }

    fn transition(&self, job_id: Uuid, status: JobStatus) -> bool {
        let moved = self
            .with_job(job_id, |job| job.advance(status))
            .unwrap_or(false);
        if !moved {
            warn!("Job {} refused transition to {:?}", job_id, status);
        }
        moved
    }

    async fn persist(&self, record: VideoRecord) {
        if let Err(e) = self.inner.table.put(&record).await {
            warn!("Failed to store video record for job {}: {}", record.job_id, e);
        }
    }

    fn with_job<R>(&self, job_id: Uuid, f: impl FnOnce(&mut ConversionJob) -> R) -> Option<R> {
        self.jobs_mut().get_mut(&job_id).map(|entry| f(&mut entry.job))
    }

    fn jobs(&self) -> RwLockReadGuard<'_, HashMap<Uuid, JobEntry>> {
        self.inner.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn jobs_mut(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, JobEntry>> {
        self.inner.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::conversion::broadcaster::{Subscription, SubscriptionFilter};
    use crate::modules::conversion::model::ProgressKind;
    use crate::modules::conversion::notifier::{STATUS_COMPLETE, STATUS_ERROR, STATUS_STARTED};
    use crate::modules::conversion::testing::*;
    use std::sync::atomic::Ordering;

    fn statuses(job: &ConversionJob) -> Vec<JobStatus> {
        job.history.iter().map(|c| c.status).collect()
    }

    fn drain(sub: &mut Subscription) -> Vec<ProgressKind> {
        std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind).collect()
    }

    async fn submit_clip(h: &Harness, resolution: &str) -> Uuid {
        h.orchestrator
            .submit("alice", "uploads/clip.mp4", "mp4", resolution)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn converts_to_720p_and_hands_off_artifact() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[10, 55, 90], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;
        assert_eq!(h.queue.recv().await.unwrap(), job_id);

        h.orchestrator.run(job_id).await;
        let job = h.orchestrator.status(job_id).unwrap();

        assert_eq!(
            statuses(&job),
            vec![
                JobStatus::Queued,
                JobStatus::Downloading,
                JobStatus::Converting,
                JobStatus::Completed
            ]
        );
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.error_detail, None);

        let key = format!("processed/alice/{}.mp4", job_id);
        assert_eq!(job.output_key.as_deref(), Some(key.as_str()));
        let (body, content_type) = h.store.object(&key).unwrap();
        assert_eq!(&body[..], b"converted");
        assert_eq!(content_type, "video/mp4");

        let requests = h.engine.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].resolution.scale_filter(), "1280:720");
        assert!(h.engine.saw_input());
        assert!(dir_is_empty(&h.scratch()));

        assert_eq!(h.notifier.statuses(), vec![STATUS_STARTED, STATUS_COMPLETE]);
        assert_eq!(h.notifier.sent()[1].output_file_path.as_deref(), Some(key.as_str()));

        let record = h.table.record(job_id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.output_key.as_deref(), Some(key.as_str()));
    }

    #[tokio::test]
    async fn missing_source_fails_before_converting() {
        let h = Harness::new(
            MemoryStore::default(),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "480p").await;
        let mut sub = h.broadcaster.subscribe(SubscriptionFilter::Job(job_id));

        h.orchestrator.run(job_id).await;
        let job = h.orchestrator.status(job_id).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(!statuses(&job).contains(&JobStatus::Converting));
        assert!(job.error_detail.unwrap().starts_with("failed to fetch source video"));
        assert!(h.engine.requests().is_empty());
        assert_eq!(drain(&mut sub), vec![ProgressKind::Error]);
        assert_eq!(h.notifier.statuses(), vec![STATUS_STARTED, STATUS_ERROR]);
        assert_eq!(h.table.record(job_id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn engine_failure_keeps_last_progress_and_cleans_up() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[40], Outcome::Fail("Invalid data found when processing input".into())),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "1080p").await;

        h.orchestrator.run(job_id).await;
        let job = h.orchestrator.status(job_id).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress_percent, 40);
        assert_eq!(
            job.error_detail.as_deref(),
            Some("conversion failed: Invalid data found when processing input")
        );
        assert_eq!(job.output_key, None);
        assert_eq!(h.store.len(), 1);
        assert!(dir_is_empty(&h.scratch()));
    }

    #[tokio::test]
    async fn upload_failure_fails_the_job() {
        let store = MemoryStore::with_object("uploads/clip.mp4", b"source-bytes");
        store.reject_puts.store(true, Ordering::SeqCst);
        let h = Harness::new(
            store,
            ScriptedEngine::new(&[50], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;

        h.orchestrator.run(job_id).await;
        let job = h.orchestrator.status(job_id).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_detail.unwrap().starts_with("failed to store converted video"));
        assert!(dir_is_empty(&h.scratch()));
    }

    #[tokio::test]
    async fn unreachable_notifier_does_not_change_outcome() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::unreachable(),
        );
        let job_id = submit_clip(&h, "720p").await;

        h.orchestrator.run(job_id).await;

        assert_eq!(h.orchestrator.status(job_id).unwrap().status, JobStatus::Completed);
        assert_eq!(h.notifier.attempts(), 2);
    }

    #[tokio::test]
    async fn subscribers_share_one_ordered_sequence() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[25, 50, 50, 75], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;
        let mut first = h.broadcaster.subscribe(SubscriptionFilter::Job(job_id));
        let mut second = h.broadcaster.subscribe(SubscriptionFilter::AllJobs);

        h.orchestrator.run(job_id).await;

        let expected = vec![
            ProgressKind::Percent(0),
            ProgressKind::Percent(25),
            ProgressKind::Percent(50),
            ProgressKind::Percent(75),
            ProgressKind::Percent(100),
            ProgressKind::Complete,
        ];
        assert_eq!(drain(&mut first), expected);
        assert_eq!(drain(&mut second), expected);

        let mut late = h.broadcaster.subscribe(SubscriptionFilter::Job(job_id));
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn submit_validates_fields() {
        let h = Harness::new(
            MemoryStore::default(),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );

        let err = h.orchestrator.submit("alice", "  ", "mp4", "720p").await.unwrap_err();
        assert_eq!(err.to_string(), "sourceKey is required");

        let err = h.orchestrator.submit("alice", "clip.mp4", "", "720p").await.unwrap_err();
        assert_eq!(err.to_string(), "targetFormat is required");

        let err = h.orchestrator.submit("alice", "clip.mp4", "webm", "720p").await.unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(h.queue.is_empty());

        let job_id = h.orchestrator.submit("alice", "clip.mp4", "MKV", "4k").await.unwrap();
        let job = h.orchestrator.status(job_id).unwrap();
        assert_eq!(job.target_format, TargetFormat::Mkv);
        assert_eq!(job.target_resolution, Resolution::P1080);
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn full_queue_rejects_and_records_failure() {
        let h = Harness::with_capacity(
            MemoryStore::default(),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
            1,
        );
        let accepted = submit_clip(&h, "720p").await;
        let err = h
            .orchestrator
            .submit("alice", "uploads/other.mp4", "mp4", "720p")
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::QueueFull));

        let records = h.orchestrator.list_videos("alice").await.unwrap();
        assert_eq!(records.len(), 2);
        let rejected = records.iter().find(|r| r.job_id != accepted).unwrap();
        assert_eq!(rejected.status, JobStatus::Failed);
        assert_eq!(rejected.error_detail.as_deref(), Some("job queue is full, try again later"));

        assert_eq!(h.notifier.statuses(), vec![STATUS_ERROR]);
        let sent = h.notifier.sent();
        assert_eq!(sent[0].job_id, rejected.job_id);
        assert_eq!(sent[0].error.as_deref(), Some("job queue is full, try again later"));
    }

    #[tokio::test]
    async fn rejected_job_is_broadcast_as_error() {
        let h = Harness::with_capacity(
            MemoryStore::default(),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
            1,
        );
        submit_clip(&h, "720p").await;
        let mut sub = h.broadcaster.subscribe(SubscriptionFilter::AllJobs);

        h.orchestrator
            .submit("alice", "uploads/other.mp4", "mp4", "720p")
            .await
            .unwrap_err();

        let events: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ProgressKind::Error);
        assert_eq!(h.orchestrator.status(events[0].job_id).unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn closed_queue_refuses_submissions() {
        let h = Harness::new(
            MemoryStore::default(),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        assert!(h.orchestrator.close_queue());
        let err = h.orchestrator.submit("alice", "clip.mp4", "mp4", "720p").await.unwrap_err();
        assert!(matches!(err, SubmitError::ShuttingDown));
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_skips_download() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;

        h.orchestrator.cancel(job_id, "alice").await.unwrap();
        h.orchestrator.run(job_id).await;

        let job = h.orchestrator.status(job_id).unwrap();
        assert_eq!(statuses(&job), vec![JobStatus::Queued, JobStatus::Failed]);
        assert_eq!(job.error_detail.as_deref(), Some("conversion cancelled"));
        assert_eq!(h.store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(h.notifier.statuses(), vec![STATUS_ERROR]);
    }

    #[tokio::test]
    async fn cancelling_a_running_job_stops_the_engine() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[30], Outcome::Hang),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;

        let worker = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(job_id).await })
        };
        wait_for_status(&h.orchestrator, job_id, |job| job.progress_percent == 30).await;

        h.orchestrator.cancel(job_id, "alice").await.unwrap();
        worker.await.unwrap();

        let job = wait_for_terminal(&h.orchestrator, job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("conversion cancelled"));
        assert!(dir_is_empty(&h.scratch()));
        assert!(matches!(
            h.orchestrator.cancel(job_id, "alice").await,
            Err(LookupError::AlreadyFinished)
        ));
    }

    #[tokio::test]
    async fn jobs_are_private_to_their_owner() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;

        assert!(matches!(
            h.orchestrator.job_for_owner(job_id, "mallory").await,
            Err(LookupError::NotFound)
        ));
        assert!(matches!(h.orchestrator.cancel(job_id, "mallory").await, Err(LookupError::NotFound)));
        assert!(matches!(
            h.orchestrator.open_artifact(job_id, "alice").await,
            Err(LookupError::NotCompleted)
        ));

        h.orchestrator.run(job_id).await;

        let (job, mut stream) = h.orchestrator.open_artifact(job_id, "alice").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"converted");
        assert!(h.orchestrator.list_videos("mallory").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_jobs_leave_memory_but_stay_queryable() {
        let h = Harness::without_retention(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[60], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;
        let running = submit_clip(&h, "480p").await;

        h.orchestrator.run(job_id).await;

        assert!(h.orchestrator.status(job_id).is_none());
        assert_eq!(h.orchestrator.status(running).unwrap().status, JobStatus::Queued);

        let job = h.orchestrator.job_for_owner(job_id, "alice").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress_percent, 100);
        let key = format!("processed/alice/{}.mp4", job_id);
        assert_eq!(job.output_key.as_deref(), Some(key.as_str()));

        assert!(matches!(
            h.orchestrator.job_for_owner(job_id, "mallory").await,
            Err(LookupError::NotFound)
        ));
        assert!(matches!(
            h.orchestrator.cancel(job_id, "alice").await,
            Err(LookupError::AlreadyFinished)
        ));
        assert!(h.orchestrator.open_artifact(job_id, "alice").await.is_ok());
    }

    #[tokio::test]
    async fn retained_jobs_stay_in_memory() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;
        h.orchestrator.run(job_id).await;
        submit_clip(&h, "720p").await;

        assert_eq!(h.orchestrator.status(job_id).unwrap().history.len(), 4);
    }

    #[tokio::test]
    async fn delete_video_removes_artifact_and_record() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes"),
            ScriptedEngine::new(&[], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;

        assert!(matches!(
            h.orchestrator.delete_video(job_id, "alice").await,
            Err(LookupError::StillRunning)
        ));

        h.orchestrator.run(job_id).await;
        let key = format!("processed/alice/{}.mp4", job_id);
        assert!(h.store.object(&key).is_some());

        assert!(matches!(
            h.orchestrator.delete_video(job_id, "mallory").await,
            Err(LookupError::NotFound)
        ));
        let deleted = h.orchestrator.delete_video(job_id, "alice").await.unwrap();
        assert_eq!(deleted.output_key.as_deref(), Some(key.as_str()));

        assert!(h.store.object(&key).is_none());
        assert!(h.store.object("uploads/clip.mp4").is_some());
        assert!(h.table.record(job_id).is_none());
        assert!(h.orchestrator.status(job_id).is_none());
        assert!(matches!(
            h.orchestrator.job_for_owner(job_id, "alice").await,
            Err(LookupError::NotFound)
        ));
    }

    #[tokio::test]
    async fn cancel_during_upload_never_completes() {
        let h = Harness::new(
            MemoryStore::with_object("uploads/clip.mp4", b"source-bytes").holding_puts(),
            ScriptedEngine::new(&[80], Outcome::Succeed),
            RecordingNotifier::default(),
        );
        let job_id = submit_clip(&h, "720p").await;
        let mut sub = h.broadcaster.subscribe(SubscriptionFilter::Job(job_id));

        let worker = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(job_id).await })
        };
        h.store.put_started.notified().await;

        let snapshot = h.orchestrator.cancel(job_id, "alice").await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Converting);
        h.store.put_released.notify_one();
        worker.await.unwrap();

        let job = h.orchestrator.status(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("conversion cancelled"));
        assert!(h.store.object(&format!("processed/alice/{}.mp4", job_id)).is_none());
        assert_eq!(drain(&mut sub).last(), Some(&ProgressKind::Error));
        assert_eq!(h.notifier.statuses(), vec![STATUS_STARTED, STATUS_ERROR]);
        assert!(dir_is_empty(&h.scratch()));
    }
}
