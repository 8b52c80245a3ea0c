//! Delivery-conformance checks for MPEG-DASH streams.
//!
//! Given a manifest URL, this crate fetches and expands the MPD, probes
//! media segments one at a time (HEAD by default, full GET on request)
//! against configurable header policies, compares a dynamic manifest's
//! live edge with the wall clock, and can keep re-validating a live
//! stream over many refresh cycles, emitting an event per violation.
//!
//! Entry point: [`DashValidator`]. The pieces it is built from
//! ([`SegmentVerifier`], [`LiveMonitor`], the policy functions) are public
//! so they can be wired up separately.

pub mod error;
pub mod headers;
pub mod manifest;
pub mod monitor;
pub mod policy;
pub mod transport;
pub mod util;
pub mod validator;
pub mod verify;

pub use error::{ValidatorError, ValidatorResult};
pub use headers::HeaderSet;
pub use manifest::{DynamicManifest, Manifest, ManifestKind, StaticManifest};
pub use monitor::{LiveMonitor, MonitorEvent, RunState, RunSummary, StopHandle};
pub use policy::{
    default_manifest_policy, default_segment_policy, ClockStatus, ManifestCheck, ManifestPolicy,
    SegmentPolicy, TimestampResult, DEFAULT_ALLOWED_DRIFT_MS,
};
pub use transport::Transport;
pub use util::http::HttpClient;
pub use validator::DashValidator;
pub use verify::{
    FailureReason, ProbeMethod, SegmentFailed, SegmentOk, SegmentOutcome, SegmentVerifier,
    VerificationReport, DEFAULT_PROBE_SPACING, MIN_PROBE_SPACING,
};
