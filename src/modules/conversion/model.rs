use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Mp4,
    Avi,
    Mov,
    Mkv,
}

impl TargetFormat {
    /// Unknown containers are rejected, unlike resolutions.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
        }
    }

    /// ffmpeg muxer name passed to `-f`.
    pub fn muxer(&self) -> &'static str {
        match self {
            Self::Mkv => "matroska",
            other => other.extension(),
        }
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_ext(self.extension())
            .first_or_octet_stream()
            .to_string()
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Resolution {
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
}

impl Resolution {
    /// Anything unrecognized is treated as 1080p.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "720p" => Self::P720,
            "480p" => Self::P480,
            _ => Self::P1080,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::P1080 => (1920, 1080),
            Self::P720 => (1280, 720),
            Self::P480 => (640, 480),
        }
    }

    /// Argument for ffmpeg's `scale` filter, e.g. `1280:720`.
    pub fn scale_filter(&self) -> String {
        let (width, height) = self.dimensions();
        format!("{}:{}", width, height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum JobStatus {
    Queued,
    Downloading,
    Converting,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only edges of the job state machine.
    fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, next),
            (Queued, Downloading)
                | (Downloading, Converting)
                | (Queued | Downloading | Converting, Failed)
                | (Converting, Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// One submitted conversion and its lifecycle.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub job_id: Uuid,
    pub source_key: String,
    pub owner_id: String,
    pub target_format: TargetFormat,
    pub target_resolution: Resolution,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub output_key: Option<String>,
    pub error_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub history: Vec<StatusChange>,
}

impl ConversionJob {
    pub fn new(
        owner_id: &str,
        source_key: &str,
        target_format: TargetFormat,
        target_resolution: Resolution,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            job_id: Uuid::new_v4(),
            source_key: source_key.to_string(),
            owner_id: owner_id.to_string(),
            target_format,
            target_resolution,
            status: JobStatus::Queued,
            progress_percent: 0,
            output_key: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
            history: vec![StatusChange {
                status: JobStatus::Queued,
                at: now,
            }],
        }
    }

    /// Moves the job along the state machine. Illegal edges, including any
    /// move out of a terminal state, are refused and leave the job untouched.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        let now = OffsetDateTime::now_utc();
        self.status = next;
        self.updated_at = now;
        self.history.push(StatusChange { status: next, at: now });
        true
    }

    /// Records engine progress. Only increases are kept, and only while
    /// converting.
    pub fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != JobStatus::Converting || percent <= self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        self.updated_at = OffsetDateTime::now_utc();
        true
    }

    pub fn complete(&mut self, output_key: String) -> bool {
        if !self.advance(JobStatus::Completed) {
            return false;
        }
        self.progress_percent = 100;
        self.output_key = Some(output_key);
        true
    }

    pub fn fail(&mut self, detail: String) -> bool {
        if !self.advance(JobStatus::Failed) {
            return false;
        }
        self.error_detail = Some(detail);
        true
    }
}

/// Row kept in the metadata table for every job a user submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub job_id: Uuid,
    pub owner_id: String,
    pub source_key: String,
    pub format: TargetFormat,
    pub resolution: Resolution,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub output_key: Option<String>,
    pub error_detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&ConversionJob> for VideoRecord {
    fn from(job: &ConversionJob) -> Self {
        Self {
            job_id: job.job_id,
            owner_id: job.owner_id.clone(),
            source_key: job.source_key.clone(),
            format: job.target_format,
            resolution: job.target_resolution,
            status: job.status,
            progress_percent: job.progress_percent,
            output_key: job.output_key.clone(),
            error_detail: job.error_detail.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Rebuilds a snapshot of a job that is no longer held in memory. Only the
/// last transition survives in `history`.
impl From<VideoRecord> for ConversionJob {
    fn from(record: VideoRecord) -> Self {
        Self {
            job_id: record.job_id,
            source_key: record.source_key,
            owner_id: record.owner_id,
            target_format: record.format,
            target_resolution: record.resolution,
            status: record.status,
            progress_percent: record.progress_percent,
            output_key: record.output_key,
            error_detail: record.error_detail,
            created_at: record.created_at,
            updated_at: record.updated_at,
            history: vec![StatusChange {
                status: record.status,
                at: record.updated_at,
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Percent(u8),
    Complete,
    Error,
}

/// Ephemeral progress notice for live subscribers. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn percent(job_id: Uuid, percent: u8) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Percent(percent.min(100)),
        }
    }

    pub fn complete(job_id: Uuid) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Complete,
        }
    }

    pub fn error(job_id: Uuid) -> Self {
        Self {
            job_id,
            kind: ProgressKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, ProgressKind::Percent(_))
    }

    pub fn frame(&self) -> ProgressFrame {
        let progress = match self.kind {
            ProgressKind::Percent(p) => ProgressValue::Percent(p),
            ProgressKind::Complete => ProgressValue::Sentinel("Complete"),
            ProgressKind::Error => ProgressValue::Sentinel("Error"),
        };
        ProgressFrame {
            job_id: self.job_id,
            progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressValue {
    Percent(u8),
    Sentinel(&'static str),
}

/// Wire shape pushed to progress sockets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFrame {
    pub job_id: Uuid,
    pub progress: ProgressValue,
}
