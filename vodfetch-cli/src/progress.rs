//! Terminal reporting: one progress bar per job plus summary lines.

use std::path::PathBuf;

use indicatif::{HumanBytes, HumanDuration, ProgressStyle};
use serde::Serialize;
use tracing::{Span, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use vodfetch_engine::hls::{JobObserver, JobOutcome, JobStatus, ProgressSnapshot};

/// Drives the progress bar attached to a job's span.
pub struct BarObserver {
    span: Span,
    label: String,
}

impl BarObserver {
    pub fn new(span: Span, label: impl Into<String>) -> Self {
        let label = label.into();
        let style = ProgressStyle::with_template(
            "{span_child_prefix}{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        span.pb_set_style(&style);
        span.pb_set_message(&label);
        Self { span, label }
    }
}

pub fn describe(snapshot: &ProgressSnapshot) -> String {
    let eta = snapshot
        .eta
        .map(|eta| format!(", ETA {}", HumanDuration(eta)))
        .unwrap_or_default();
    format!(
        "{:.1}% {} / ~{} @ {}/s{eta}",
        snapshot.percent,
        HumanBytes(snapshot.bytes_downloaded),
        HumanBytes(snapshot.estimated_total_bytes),
        HumanBytes(snapshot.throughput_bytes_per_sec as u64),
    )
}

impl JobObserver for BarObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.span.pb_set_length(snapshot.total_segments as u64);
        self.span.pb_set_position(snapshot.completed_segments as u64);
        self.span
            .pb_set_message(&format!("{} {}", self.label, describe(snapshot)));
    }

    fn on_complete(&self, outcome: &JobOutcome) {
        match outcome.status {
            JobStatus::Succeeded => info!(job = %self.label, "{}", outcome.message),
            JobStatus::Cancelled => warn!(job = %self.label, "Cancelled"),
            _ => warn!(job = %self.label, "Failed: {}", outcome.message),
        }
    }
}

/// One line of the final report.
#[derive(Debug, Serialize)]
pub struct SummaryEntry {
    pub url: String,
    pub status: JobStatus,
    pub success: bool,
    pub message: String,
    pub output: Option<PathBuf>,
}

impl SummaryEntry {
    pub fn new(url: &str, outcome: &JobOutcome) -> Self {
        Self {
            url: url.to_string(),
            status: outcome.status,
            success: outcome.success(),
            message: outcome.message.clone(),
            output: outcome.output.clone(),
        }
    }

    pub fn line(&self) -> String {
        format!("[{}] {} - {}", self.status, self.url, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vodfetch_engine::hls::JobId;

    #[test]
    fn description_includes_rates_and_eta() {
        let snapshot = ProgressSnapshot {
            job_id: JobId::new(),
            percent: 50.0,
            bytes_downloaded: 2048,
            estimated_total_bytes: 4096,
            throughput_bytes_per_sec: 1024.0,
            eta: Some(Duration::from_secs(2)),
            completed_segments: 1,
            total_segments: 2,
        };
        let text = describe(&snapshot);
        assert!(text.starts_with("50.0% 2.00 KiB / ~4.00 KiB"), "{text}");
        assert!(text.contains("ETA"), "{text}");
    }

    #[test]
    fn summary_serializes_status_in_lowercase() {
        let outcome = JobOutcome {
            job_id: JobId::new(),
            status: JobStatus::Failed,
            message: "segment 3 failed after 4 attempts".to_string(),
            output: None,
        };
        let entry = SummaryEntry::new("https://x/a.m3u8", &outcome);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["success"], false);
        assert_eq!(entry.line(), "[failed] https://x/a.m3u8 - segment 3 failed after 4 attempts");
    }
}
