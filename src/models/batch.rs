use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Telemetry batch lifecycle. Transitions are monotonic:
/// `queued → processing → {completed | partial | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "queued" => Ok(BatchStatus::Queued),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "partial" => Ok(BatchStatus::Partial),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(CoreError::Corrupt(format!("unknown batch status {other:?}"))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Partial | BatchStatus::Failed
        )
    }

    /// Derive the terminal status from the final event counts.
    pub fn from_counts(total: u32, processed: u32, failed: u32) -> Self {
        if failed == 0 && processed == total {
            BatchStatus::Completed
        } else if processed == 0 && failed == total {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        }
    }
}

/// A telemetry batch row (relational).
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryBatch {
    pub id: String,
    pub project_id: String,
    pub batch_metadata: serde_json::Value,
    pub total_events: u32,
    pub processed_events: u32,
    pub failed_events: u32,
    pub status: BatchStatus,
    pub processing_time_ms: Option<i64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// A telemetry event row (relational): one per submitted event, carrying the
/// outcome and retry bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEventRecord {
    pub id: String,
    pub batch_id: String,
    pub event_type: String,
    pub event_payload: serde_json::Value,
    pub processed_at: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: String,
}

/// An ingest submission: a project-scoped batch of tagged events.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub project_id: String,
    #[serde(default)]
    pub batch_metadata: Option<serde_json::Value>,
    pub events: Vec<crate::models::signal::TelemetryEventBody>,
}

/// Outcome of one batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_events: u32,
    pub processed_events: u32,
    pub failed_events: u32,
    pub duplicate_events: u32,
    pub processing_time_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(BatchStatus::from_counts(3, 3, 0), BatchStatus::Completed);
        assert_eq!(BatchStatus::from_counts(3, 0, 3), BatchStatus::Failed);
        assert_eq!(BatchStatus::from_counts(3, 2, 1), BatchStatus::Partial);
        assert_eq!(BatchStatus::from_counts(3, 2, 0), BatchStatus::Partial);
        assert_eq!(BatchStatus::from_counts(0, 0, 0), BatchStatus::Completed);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Partial.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::Queued.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            BatchStatus::Queued,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Partial,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(BatchStatus::parse("done").is_err());
    }
}
