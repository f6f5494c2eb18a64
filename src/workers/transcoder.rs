use crate::modules::conversion::orchestrator::JobOrchestrator;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Spawns `concurrency` workers pulling job ids off the shared queue. At most
/// that many conversions run at once. Workers exit once the queue is closed
/// and drained.
pub fn start_transcoder_workers(
    orchestrator: JobOrchestrator,
    queue: async_channel::Receiver<Uuid>,
    concurrency: usize,
) -> Vec<JoinHandle<()>> {
    info!("🎥 Starting {} transcoder worker(s)...", concurrency.max(1));

    (0..concurrency.max(1))
        .map(|worker| {
            let orchestrator = orchestrator.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Ok(job_id) = queue.recv().await {
                    info!("📦 Worker {} picked up job {}", worker, job_id);
                    orchestrator.run(job_id).await;
                }
                info!("🎥 Transcoder worker {} stopped", worker);
            })
        })
        .collect()
}
