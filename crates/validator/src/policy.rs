//! Delivery policies: predicates over response headers, plus the live-edge
//! timestamp check.
//!
//! Policies are plain closures behind [`Arc`] so callers can swap in their
//! own CDN rules; the defaults encode what a well-behaved origin for DASH
//! delivery is expected to send.

use std::sync::{Arc, LazyLock};

use chrono::{TimeDelta, Utc};
use regex::Regex;
use serde::Serialize;

use crate::{
    headers::HeaderSet,
    manifest::{Manifest, ManifestKind},
};

/// Decides whether one media segment's response headers pass.
pub type SegmentPolicy = Arc<dyn Fn(&HeaderSet) -> bool + Send + Sync>;

/// Decides whether the manifest's response headers pass, given how the
/// presentation is served.
pub type ManifestPolicy = Arc<dyn Fn(&HeaderSet, ManifestKind) -> bool + Send + Sync>;

/// Offset between wall clock and the manifest head tolerated by default.
pub const DEFAULT_ALLOWED_DRIFT_MS: i64 = 10_000;

/// A dynamic manifest must not be cached longer than this, or players keep
/// replaying a stale live edge.
const DYNAMIC_MANIFEST_MAX_AGE_SECS: u64 = 10;

static MAX_AGE_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"max-age=(\d+)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClockStatus {
    Ok,
    Bad,
}

/// Result of the live-edge drift check.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampResult {
    pub clock: ClockStatus,
    /// Absolute offset between wall clock and the manifest head, reported
    /// whenever the manifest has a head to compare against.
    pub clock_offset_ms: Option<i64>,
}

/// Result of checking the manifest's own response headers.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestCheck {
    pub ok: bool,
    /// The headers the verdict was based on.
    pub headers: HeaderSet,
}

/// Default expectations for a media segment response:
/// a `Cache-Control` header, `Date` exposed to cross-origin scripts and
/// `origin` allowed as a request header.
pub fn default_segment_policy(headers: &HeaderSet) -> bool {
    headers.contains("cache-control")
        && has_list_token(headers, "access-control-expose-headers", "Date")
        && has_list_token(headers, "access-control-allow-headers", "origin")
}

/// Default expectations for the manifest response. Static manifests may be
/// cached indefinitely; dynamic ones must carry a short, explicit `max-age`.
pub fn default_manifest_policy(headers: &HeaderSet, kind: ManifestKind) -> bool {
    match kind {
        ManifestKind::Static => true,
        ManifestKind::Dynamic => {
            max_age(headers).is_some_and(|secs| secs <= DYNAMIC_MANIFEST_MAX_AGE_SECS)
        }
    }
}

/// Looks for `token` in a comma-separated header value. Tokens are compared
/// case-sensitively after trimming whitespace.
fn has_list_token(headers: &HeaderSet, name: &str, token: &str) -> bool {
    headers
        .get(name)
        .is_some_and(|value| value.split(',').any(|part| part.trim() == token))
}

fn max_age(headers: &HeaderSet) -> Option<u64> {
    let cache_control = headers.get("cache-control")?;
    let captures = MAX_AGE_DIRECTIVE.captures(cache_control)?;
    captures[1].parse().ok()
}

/// Compares the manifest head against the wall clock.
///
/// Static manifests have no head and always pass. For dynamic manifests the
/// offset is reported even when it is within bounds.
pub fn verify_timestamps(manifest: &Manifest, allowed_drift: TimeDelta) -> TimestampResult {
    match manifest.time_at_head() {
        None => TimestampResult {
            clock: ClockStatus::Ok,
            clock_offset_ms: None,
        },
        Some(head) => {
            let offset = (Utc::now() - head).abs();
            let clock = if offset > allowed_drift {
                ClockStatus::Bad
            } else {
                ClockStatus::Ok
            };
            TimestampResult {
                clock,
                clock_offset_ms: Some(offset.num_milliseconds()),
            }
        }
    }
}

/// Applies `policy` (or the default) to the manifest response headers.
pub fn check_manifest_headers(
    kind: ManifestKind,
    headers: &HeaderSet,
    policy: Option<ManifestPolicy>,
) -> ManifestCheck {
    let ok = match policy {
        Some(policy) => policy(headers, kind),
        None => default_manifest_policy(headers, kind),
    };
    ManifestCheck {
        ok,
        headers: headers.clone(),
    }
}
