//! In-memory collaborators for exercising the conversion pipeline in tests.

use super::broadcaster::ProgressBroadcaster;
use super::engine::{ConvertRequest, EngineEvent, TranscodeEngine};
use super::model::{ConversionJob, VideoRecord};
use super::notifier::{NotifierError, StatusMessage, StatusNotifier};
use super::orchestrator::{Collaborators, JobOrchestrator};
use super::repository::{TableError, VideoTable};
use crate::infrastructure::storage::{ObjectStore, ObjectStream, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    pub gets: AtomicUsize,
    pub reject_puts: AtomicBool,
    hold_puts: bool,
    /// Signalled when a held upload has started.
    pub put_started: Notify,
    /// Lets a held upload finish.
    pub put_released: Notify,
}

impl MemoryStore {
    pub fn with_object(key: &str, body: &'static [u8]) -> Self {
        let store = Self::default();
        store
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from_static(body), "video/mp4".to_string()));
        store
    }

    /// Every upload waits for `put_released` before storing anything.
    pub fn holding_puts(mut self) -> Self {
        self.hold_puts = true;
        self
    }

    pub fn object(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<ObjectStream, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let (body, _) = self
            .object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        // Split in two to exercise chunked writes.
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StorageError> {
        if self.hold_puts {
            self.put_started.notify_one();
            self.put_released.notified().await;
        }
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Request(format!("PUT {}: access denied", key)));
        }
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from(body), content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTable {
    records: Mutex<HashMap<Uuid, VideoRecord>>,
}

impl MemoryTable {
    pub fn record(&self, job_id: Uuid) -> Option<VideoRecord> {
        self.records.lock().unwrap().get(&job_id).cloned()
    }
}

#[async_trait]
impl VideoTable for MemoryTable {
    async fn put(&self, record: &VideoRecord) -> Result<(), TableError> {
        self.records.lock().unwrap().insert(record.job_id, record.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<VideoRecord>, TableError> {
        Ok(self.record(job_id))
    }

    async fn query(&self, owner_id: &str) -> Result<Vec<VideoRecord>, TableError> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    async fn delete(&self, job_id: Uuid, _owner_id: &str) -> Result<(), TableError> {
        self.records.lock().unwrap().remove(&job_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub unreachable: bool,
    sent: Mutex<Vec<StatusMessage>>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn statuses(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.status).collect()
    }

    pub fn sent(&self) -> Vec<StatusMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn notify(&self, message: &StatusMessage) -> Result<(), NotifierError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(NotifierError("connection refused".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Fail(String),
    /// Never finishes on its own; reports failure once cancelled.
    Hang,
}

/// Engine that replays scripted ticks, then the scripted outcome.
pub struct ScriptedEngine {
    ticks: Vec<u8>,
    outcome: Outcome,
    requests: Mutex<Vec<ConvertRequest>>,
    saw_input: AtomicBool,
}

impl ScriptedEngine {
    pub fn new(ticks: &[u8], outcome: Outcome) -> Self {
        Self {
            ticks: ticks.to_vec(),
            outcome,
            requests: Mutex::new(Vec::new()),
            saw_input: AtomicBool::new(false),
        }
    }

    pub fn requests(&self) -> Vec<ConvertRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn saw_input(&self) -> bool {
        self.saw_input.load(Ordering::SeqCst)
    }
}

impl TranscodeEngine for ScriptedEngine {
    fn convert(&self, request: ConvertRequest, cancel: CancellationToken) -> mpsc::Receiver<EngineEvent> {
        self.saw_input.store(request.input.is_file(), Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let (tx, rx) = mpsc::channel(8);
        let ticks = self.ticks.clone();
        let outcome = self.outcome.clone();

        tokio::spawn(async move {
            for tick in ticks {
                let _ = tx.send(EngineEvent::Progress(tick)).await;
            }
            let terminal = match outcome {
                Outcome::Succeed => {
                    let written = tokio::fs::write(&request.output, b"converted").await;
                    match written {
                        Ok(()) => EngineEvent::Done(request.output.clone()),
                        Err(e) => EngineEvent::Failed(e.to_string()),
                    }
                }
                Outcome::Fail(detail) => EngineEvent::Failed(detail),
                Outcome::Hang => {
                    cancel.cancelled().await;
                    EngineEvent::Failed("conversion cancelled".to_string())
                }
            };
            let _ = tx.send(terminal).await;
        });

        rx
    }
}

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub queue: async_channel::Receiver<Uuid>,
    pub store: Arc<MemoryStore>,
    pub table: Arc<MemoryTable>,
    pub engine: Arc<ScriptedEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub broadcaster: ProgressBroadcaster,
    pub work_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(store: MemoryStore, engine: ScriptedEngine, notifier: RecordingNotifier) -> Self {
        Self::build(store, engine, notifier, 8, Duration::from_secs(3600))
    }

    pub fn with_capacity(
        store: MemoryStore,
        engine: ScriptedEngine,
        notifier: RecordingNotifier,
        capacity: usize,
    ) -> Self {
        Self::build(store, engine, notifier, capacity, Duration::from_secs(3600))
    }

    /// Finished jobs leave memory as soon as they are terminal.
    pub fn without_retention(store: MemoryStore, engine: ScriptedEngine, notifier: RecordingNotifier) -> Self {
        Self::build(store, engine, notifier, 8, Duration::ZERO)
    }

    fn build(
        store: MemoryStore,
        engine: ScriptedEngine,
        notifier: RecordingNotifier,
        capacity: usize,
        retention: Duration,
    ) -> Self {
        let store = Arc::new(store);
        let table = Arc::new(MemoryTable::default());
        let engine = Arc::new(engine);
        let notifier = Arc::new(notifier);
        let broadcaster = ProgressBroadcaster::new(64);
        let work_dir = tempfile::tempdir().unwrap();

        let (orchestrator, queue) = JobOrchestrator::new(
            Collaborators {
                store: store.clone(),
                table: table.clone(),
                engine: engine.clone(),
                notifier: notifier.clone(),
                broadcaster: broadcaster.clone(),
            },
            work_dir.path().join("scratch"),
            capacity,
            retention,
        );

        Self {
            orchestrator,
            queue,
            store,
            table,
            engine,
            notifier,
            broadcaster,
            work_dir,
        }
    }

    pub fn scratch(&self) -> std::path::PathBuf {
        self.work_dir.path().join("scratch")
    }
}

pub async fn wait_for_status(
    orchestrator: &JobOrchestrator,
    job_id: Uuid,
    done: impl Fn(&ConversionJob) -> bool,
) -> ConversionJob {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(job) = orchestrator.status(job_id).filter(|job| done(job)) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach the expected state in time")
}

pub async fn wait_for_terminal(orchestrator: &JobOrchestrator, job_id: Uuid) -> ConversionJob {
    wait_for_status(orchestrator, job_id, |job| job.status.is_terminal()).await
}

pub fn dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
