//! Sequential segment probing.
//!
//! Probes run strictly one at a time with a pause between them; a
//! conformance pass must never look like a load test to the origin.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde::Serialize;
use url::Url;

use crate::{
    error::ValidatorResult,
    headers::HeaderSet,
    policy::{default_segment_policy, SegmentPolicy},
    transport::Transport,
    util::url::merge_baseurls,
};

/// Default pause between the completion of one probe and the start of the
/// next.
pub const DEFAULT_PROBE_SPACING: Duration = Duration::from_millis(50);

/// Hard floor for the probe pause. The rate limit can be tuned but never
/// removed.
pub const MIN_PROBE_SPACING: Duration = Duration::from_millis(10);

/// How a segment is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMethod {
    /// HEAD request; headers only.
    #[default]
    Head,
    /// GET request with the full body downloaded and discarded.
    Get,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentOk {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    /// The response arrived but the delivery policy rejected its headers.
    Policy,
    /// The probe itself failed; the error text is kept verbatim.
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentFailed {
    pub uri: String,
    pub reason: FailureReason,
    /// Response headers, when the probe got far enough to capture them.
    pub headers: Option<HeaderSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SegmentOutcome {
    Ok(SegmentOk),
    Failed(SegmentFailed),
}

/// Partition of the probed segments. Every input segment lands in exactly
/// one of the two lists.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub ok: Vec<SegmentOk>,
    pub failed: Vec<SegmentFailed>,
}

impl VerificationReport {
    pub fn record(&mut self, outcome: SegmentOutcome) {
        match outcome {
            SegmentOutcome::Ok(segment) => self.ok.push(segment),
            SegmentOutcome::Failed(segment) => self.failed.push(segment),
        }
    }

    pub fn total(&self) -> usize {
        self.ok.len() + self.failed.len()
    }

    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Probes segments one by one against a delivery policy.
pub struct SegmentVerifier {
    transport: Transport,
    base: Url,
    spacing: Duration,
}

impl SegmentVerifier {
    /// `base` anchors relative segment URIs, typically the manifest URL.
    pub fn new(transport: Transport, base: Url) -> Self {
        Self {
            transport,
            base,
            spacing: DEFAULT_PROBE_SPACING,
        }
    }

    /// Sets the pause between probes. Values below [`MIN_PROBE_SPACING`]
    /// are clamped up to it.
    pub fn with_probe_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing.max(MIN_PROBE_SPACING);
        self
    }

    /// Probes `segments` in order, pausing between consecutive probes.
    /// A failing probe is recorded and the walk continues; the report always
    /// accounts for every input segment.
    pub async fn verify(
        &self,
        policy: Option<SegmentPolicy>,
        segments: &[String],
        method: ProbeMethod,
    ) -> VerificationReport {
        let policy: SegmentPolicy = policy.unwrap_or_else(|| Arc::new(default_segment_policy));
        let mut report = VerificationReport::default();

        for (index, uri) in segments.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.spacing).await;
            }
            report.record(self.probe(&policy, uri, method).await);
        }

        if report.failed.is_empty() {
            log::info!("All {} segments passed.", report.ok.len());
        } else {
            log::error!(
                "{} of {} segments failed:",
                report.failed.len(),
                report.total()
            );
            for segment in &report.failed {
                log::error!("  - {}", segment.uri);
            }
        }
        report
    }

    async fn probe(&self, policy: &SegmentPolicy, uri: &str, method: ProbeMethod) -> SegmentOutcome {
        match self.request(uri, method).await {
            Ok(headers) => {
                if policy(&headers) {
                    SegmentOutcome::Ok(SegmentOk {
                        uri: uri.to_string(),
                    })
                } else {
                    log::debug!("Segment {uri} rejected by delivery policy.");
                    SegmentOutcome::Failed(SegmentFailed {
                        uri: uri.to_string(),
                        reason: FailureReason::Policy,
                        headers: Some(headers),
                    })
                }
            }
            Err(error) => {
                log::warn!("Probing {uri} failed, recording and moving on. {error}");
                SegmentOutcome::Failed(SegmentFailed {
                    uri: uri.to_string(),
                    reason: FailureReason::Transport(error.to_string()),
                    headers: None,
                })
            }
        }
    }

    async fn request(&self, uri: &str, method: ProbeMethod) -> ValidatorResult<HeaderSet> {
        let url = merge_baseurls(&self.base, uri)?;
        match method {
            ProbeMethod::Head => self.transport.fetch_segment_headers(&url).await,
            ProbeMethod::Get => self.transport.fetch_segment_full(&url).await,
        }
    }
}

/// Uniform sample with replacement: `count` independent draws, so the same
/// segment may be probed more than once.
pub fn sample_with_replacement(segments: &[String], count: usize) -> Vec<String> {
    if segments.is_empty() || count == 0 {
        return Vec::new();
    }
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| segments[rng.gen_range(0..segments.len())].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_with_replacement_draws_exactly_count() {
        let segments: Vec<String> = (0..3).map(|i| format!("seg-{i}.m4s")).collect();
        assert_eq!(sample_with_replacement(&segments, 10).len(), 10);
        assert_eq!(sample_with_replacement(&segments, 1).len(), 1);
    }

    #[test]
    fn test_sample_with_replacement_empty_cases() {
        let segments: Vec<String> = vec!["seg-0.m4s".to_string()];
        assert!(sample_with_replacement(&[], 5).is_empty());
        assert!(sample_with_replacement(&segments, 0).is_empty());
    }

    #[test]
    fn test_sample_draws_come_from_population() {
        let segments: Vec<String> = (0..4).map(|i| format!("seg-{i}.m4s")).collect();
        for drawn in sample_with_replacement(&segments, 32) {
            assert!(segments.contains(&drawn));
        }
    }

    #[test]
    fn test_report_serializes_failure_reasons() {
        let mut report = VerificationReport::default();
        report.record(SegmentOutcome::Failed(SegmentFailed {
            uri: "seg-1.m4s".to_string(),
            reason: FailureReason::Policy,
            headers: None,
        }));
        report.record(SegmentOutcome::Failed(SegmentFailed {
            uri: "seg-2.m4s".to_string(),
            reason: FailureReason::Transport("404 Not Found".to_string()),
            headers: None,
        }));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["failed"][0]["reason"], "policy");
        assert_eq!(value["failed"][1]["reason"]["transport"], "404 Not Found");
    }

    #[test]
    fn test_probe_spacing_floor() {
        let verifier = SegmentVerifier::new(
            Transport::default(),
            Url::parse("http://localhost/stream.mpd").unwrap(),
        )
        .with_probe_spacing(Duration::from_millis(1));
        assert_eq!(verifier.spacing, MIN_PROBE_SPACING);

        let verifier = SegmentVerifier::new(
            Transport::default(),
            Url::parse("http://localhost/stream.mpd").unwrap(),
        )
        .with_probe_spacing(Duration::from_millis(200));
        assert_eq!(verifier.spacing, Duration::from_millis(200));
    }
}
