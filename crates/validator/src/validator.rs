use std::time::Duration;

use chrono::TimeDelta;
use url::Url;

use crate::{
    error::{ValidatorError, ValidatorResult},
    headers::HeaderSet,
    manifest::{self, Manifest},
    monitor::{LiveMonitor, MonitorEvent, RunState, RunSummary, StopHandle},
    policy::{self, ManifestCheck, ManifestPolicy, SegmentPolicy, TimestampResult,
        DEFAULT_ALLOWED_DRIFT_MS},
    transport::Transport,
    util::{http::HttpClient, url::manifest_base_url},
    verify::{sample_with_replacement, ProbeMethod, SegmentVerifier, VerificationReport,
        DEFAULT_PROBE_SPACING},
};

/// Binds one manifest URL to the whole validation surface: loading,
/// segment probing, timestamp and header checks, and live monitoring.
///
/// ```no_run
/// # async fn run() -> dash_validator::ValidatorResult<()> {
/// use dash_validator::{DashValidator, ProbeMethod};
///
/// let mut validator = DashValidator::new("https://example.com/live/stream.mpd")?;
/// validator.load().await?;
///
/// let report = validator.verify_all_segments(None, ProbeMethod::Head).await?;
/// println!("{} ok / {} failed", report.ok.len(), report.failed.len());
/// # Ok(())
/// # }
/// ```
pub struct DashValidator {
    src: Url,
    base: Url,
    transport: Transport,
    probe_spacing: Duration,
    allowed_drift: TimeDelta,
    manifest: Option<Manifest>,
    manifest_headers: HeaderSet,
    monitor: LiveMonitor,
}

impl DashValidator {
    pub fn new(src: &str) -> ValidatorResult<Self> {
        Self::with_client(src, HttpClient::default())
    }

    /// Uses a caller-configured HTTP client, e.g. with custom headers,
    /// cookies or timeouts.
    pub fn with_client(src: &str, client: HttpClient) -> ValidatorResult<Self> {
        let src = Url::parse(src)?;
        let base = manifest_base_url(&src)?;
        Ok(Self {
            src,
            base,
            transport: Transport::new(client),
            probe_spacing: DEFAULT_PROBE_SPACING,
            allowed_drift: TimeDelta::milliseconds(DEFAULT_ALLOWED_DRIFT_MS),
            manifest: None,
            manifest_headers: HeaderSet::new(),
            monitor: LiveMonitor::new(),
        })
    }

    /// Pause between segment probes; values below the floor are clamped.
    pub fn with_probe_spacing(mut self, spacing: Duration) -> Self {
        self.probe_spacing = spacing;
        self
    }

    /// Live-edge drift tolerated by [`Self::verify_timestamps`] and the
    /// monitoring run.
    pub fn with_allowed_drift(mut self, allowed_drift: TimeDelta) -> Self {
        self.allowed_drift = allowed_drift;
        self.monitor = std::mem::take(&mut self.monitor).with_allowed_drift(allowed_drift);
        self
    }

    /// Header policy applied to every manifest refresh during monitoring.
    pub fn with_manifest_policy(mut self, policy: ManifestPolicy) -> Self {
        self.monitor = std::mem::take(&mut self.monitor).with_manifest_policy(policy);
        self
    }

    pub fn manifest_url(&self) -> &Url {
        &self.src
    }

    /// Fetches and parses the manifest. Everything that needs manifest data
    /// requires a successful `load` first.
    pub async fn load(&mut self) -> ValidatorResult<()> {
        let (body, headers) = self.transport.fetch_manifest(&self.src).await?;
        let manifest = manifest::parse(&body, &self.src)?;
        tracing::info!(
            url = %self.src,
            kind = %manifest.kind(),
            segments = manifest.segments().len(),
            "manifest loaded"
        );
        self.manifest = Some(manifest);
        self.manifest_headers = headers;
        Ok(())
    }

    pub fn duration(&self) -> ValidatorResult<Duration> {
        Ok(self.manifest()?.total_duration())
    }

    pub fn is_live(&self) -> ValidatorResult<bool> {
        Ok(self.manifest()?.is_live())
    }

    /// Segment URIs of the loaded manifest; empty before `load`.
    pub fn segment_urls(&self) -> &[String] {
        self.manifest
            .as_ref()
            .map(Manifest::segments)
            .unwrap_or_default()
    }

    /// Headers of the manifest response; empty before `load`.
    pub fn manifest_headers(&self) -> &HeaderSet {
        &self.manifest_headers
    }

    fn manifest(&self) -> ValidatorResult<&Manifest> {
        self.manifest.as_ref().ok_or(ValidatorError::ManifestNotLoaded)
    }

    fn verifier(&self) -> SegmentVerifier {
        SegmentVerifier::new(self.transport.clone(), self.base.clone())
            .with_probe_spacing(self.probe_spacing)
    }

    /// Probes the given segments, which may be relative to the manifest URL.
    /// Works without a loaded manifest.
    pub async fn verify_segments(
        &self,
        policy: Option<SegmentPolicy>,
        segments: &[String],
        method: ProbeMethod,
    ) -> VerificationReport {
        self.verifier().verify(policy, segments, method).await
    }

    /// Probes every segment of the loaded manifest, in manifest order.
    pub async fn verify_all_segments(
        &self,
        policy: Option<SegmentPolicy>,
        method: ProbeMethod,
    ) -> ValidatorResult<VerificationReport> {
        let segments = self.manifest()?.segments();
        Ok(self.verifier().verify(policy, segments, method).await)
    }

    /// Probes `sample_count` segments drawn uniformly, with replacement,
    /// from the loaded manifest.
    pub async fn spotcheck_segments(
        &self,
        policy: Option<SegmentPolicy>,
        sample_count: usize,
        method: ProbeMethod,
    ) -> ValidatorResult<VerificationReport> {
        let sample = sample_with_replacement(self.manifest()?.segments(), sample_count);
        Ok(self.verifier().verify(policy, &sample, method).await)
    }

    /// Compares the manifest head against the wall clock. `None` uses the
    /// validator's configured drift.
    pub fn verify_timestamps(
        &self,
        allowed_drift: Option<TimeDelta>,
    ) -> ValidatorResult<TimestampResult> {
        let allowed = allowed_drift.unwrap_or(self.allowed_drift);
        Ok(policy::verify_timestamps(self.manifest()?, allowed))
    }

    /// Applies a header policy (or the default) to the manifest response
    /// headers captured by the last `load`.
    pub fn verify_manifest(
        &self,
        policy: Option<ManifestPolicy>,
    ) -> ValidatorResult<ManifestCheck> {
        let kind = self.manifest()?.kind();
        Ok(policy::check_manifest_headers(
            kind,
            &self.manifest_headers,
            policy,
        ))
    }

    /// Registers a monitoring listener; see [`LiveMonitor::on`] for the
    /// event names.
    pub fn on<F>(&mut self, event: &str, listener: F)
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        self.monitor.on(event, listener);
    }

    pub fn monitor_state(&self) -> RunState {
        self.monitor.state()
    }

    /// Handle for stopping a monitoring run from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.monitor.stop_handle()
    }

    /// Monitors the manifest for `iterations` refresh cycles, emitting
    /// events for every violation. The manifest held by the validator
    /// afterwards is the last one a refresh produced.
    pub async fn validate_dynamic_manifest(&mut self, iterations: u64) -> RunSummary {
        let transport = self.transport.clone();
        let src = self.src.clone();

        let summary = self
            .monitor
            .start(iterations, move || {
                let transport = transport.clone();
                let src = src.clone();
                async move {
                    let (body, headers) = transport.fetch_manifest(&src).await?;
                    let manifest = manifest::parse(&body, &src)?;
                    Ok((manifest, headers))
                }
            })
            .await;

        if let Some(manifest) = &summary.manifest {
            self.manifest = Some(manifest.clone());
        }
        summary
    }
}
