//! Transcode engine adapter.
//!
//! Wraps the `ffmpeg` binary: builds the scale/muxer invocation for a
//! conversion request and turns the encoder's `-progress` output into a
//! channel of percent ticks closed by exactly one terminal event.

use super::model::{Resolution, TargetFormat};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 32;
const CANCELLED: &str = "conversion cancelled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Progress(u8),
    Done(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: TargetFormat,
    pub resolution: Resolution,
}

/// Runs one conversion per call. The returned receiver yields monotonic
/// `Progress` ticks followed by exactly one `Done` or `Failed`, then closes.
pub trait TranscodeEngine: Send + Sync {
    fn convert(&self, request: ConvertRequest, cancel: CancellationToken) -> mpsc::Receiver<EngineEvent>;
}

pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn build_args(request: &ConvertRequest) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-y".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-i".to_string(),
            request.input.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!("scale={}", request.resolution.scale_filter()),
            "-f".to_string(),
            request.format.muxer().to_string(),
            request.output.to_string_lossy().into_owned(),
        ]
    }
}

impl TranscodeEngine for FfmpegEngine {
    fn convert(&self, request: ConvertRequest, cancel: CancellationToken) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let binary = self.binary.clone();

        tokio::spawn(async move {
            info!(
                "🎞️ ffmpeg {} -> {} (scale={}, format={})",
                request.input.display(),
                request.output.display(),
                request.resolution.scale_filter(),
                request.format
            );

            let terminal = match run_ffmpeg(&binary, &request, &tx, &cancel).await {
                Ok(()) if output_exists(&request.output).await => EngineEvent::Done(request.output.clone()),
                Ok(()) => EngineEvent::Failed(format!(
                    "encoder exited cleanly but wrote no output at {}",
                    request.output.display()
                )),
                Err(detail) => EngineEvent::Failed(detail),
            };

            if tx.send(terminal).await.is_err() {
                debug!("Engine event receiver dropped before the terminal event");
            }
        });

        rx
    }
}

async fn output_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn run_ffmpeg(
    binary: &Path,
    request: &ConvertRequest,
    tx: &mpsc::Sender<EngineEvent>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let mut child = Command::new(binary)
        .args(FfmpegEngine::build_args(request))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to start {}: {}", binary.display(), e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "encoder stdout unavailable".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "encoder stderr unavailable".to_string())?;

    let mut progress_lines = BufReader::new(stdout).lines();
    let mut log_lines = BufReader::new(stderr).lines();
    let mut tracker = ProgressTracker::default();
    let mut last_log_line: Option<String> = None;
    let (mut progress_open, mut log_open) = (true, true);

    while progress_open || log_open {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill cancelled encoder: {}", e);
                }
                return Err(CANCELLED.to_string());
            }
            line = progress_lines.next_line(), if progress_open => match line {
                Ok(Some(line)) => {
                    if let Some(percent) = tracker.observe_progress_line(&line) {
                        debug!("encoder progress {}%", percent);
                        // A dropped receiver only loses ticks; keep draining.
                        let _ = tx.send(EngineEvent::Progress(percent)).await;
                    }
                }
                _ => progress_open = false,
            },
            line = log_lines.next_line(), if log_open => match line {
                Ok(Some(line)) => {
                    tracker.observe_log_line(&line);
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        last_log_line = Some(trimmed.to_string());
                    }
                }
                _ => log_open = false,
            },
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill cancelled encoder: {}", e);
            }
            return Err(CANCELLED.to_string());
        }
        status = child.wait() => status.map_err(|e| format!("failed to wait for encoder: {}", e))?,
    };

    if status.success() {
        Ok(())
    } else {
        Err(last_log_line.unwrap_or_else(|| format!("encoder exited with {}", status)))
    }
}

/// Derives whole-percent progress from ffmpeg output: the total duration comes
/// from the `Duration:` banner on stderr, the position from `out_time_us=` /
/// `out_time_ms=` (both microseconds) in the `-progress` stream.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration_us: Option<u64>,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    pub fn observe_log_line(&mut self, line: &str) {
        if self.duration_us.is_none() {
            self.duration_us = parse_duration(line).filter(|d| *d > 0);
        }
    }

    /// Returns a percent only when it rose since the last returned value.
    pub fn observe_progress_line(&mut self, line: &str) -> Option<u8> {
        let raw = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))?;
        let elapsed: u64 = raw.trim().parse().ok()?;
        let total = self.duration_us?;

        let percent = ((elapsed as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8;
        if self.last_percent.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }
}

/// Parses `  Duration: 00:01:02.50, start: ...` into microseconds.
pub fn parse_duration(line: &str) -> Option<u64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let stamp = rest.split(',').next()?.trim();
    parse_timestamp(stamp)
}

fn parse_timestamp(stamp: &str) -> Option<u64> {
    let mut parts = stamp.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let whole = (hours * 3600 + minutes * 60) as f64;
    Some(((whole + seconds) * 1_000_000.0).round() as u64)
}
