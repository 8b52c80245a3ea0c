//! Repeated validation of a dynamic manifest.
//!
//! A [`LiveMonitor`] drives refresh cycles: each cycle announces itself,
//! pulls a fresh manifest through the caller-supplied refresh future, swaps
//! it in and re-evaluates the live-edge drift and header policies, emitting
//! an event for every violation. A failed refresh is counted and the run
//! moves on; a live check must outlive origin hiccups.

use std::{
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{
    error::ValidatorResult,
    headers::HeaderSet,
    manifest::{Manifest, ManifestKind},
    policy::{self, ClockStatus, ManifestPolicy, DEFAULT_ALLOWED_DRIFT_MS},
};

pub const EVENT_CHECKING: &str = "checking";
pub const EVENT_INVALID_PLAYHEAD: &str = "invalidplayhead";
pub const EVENT_INVALID_HEADERS: &str = "invalidheaders";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MonitorEvent {
    /// A refresh cycle is about to start. `iteration` counts from zero.
    Checking { iteration: u64 },
    /// The manifest head drifted further from the wall clock than allowed.
    InvalidPlayhead {
        offset_ms: i64,
        threshold_ms: i64,
        time_at_head: DateTime<Utc>,
    },
    /// The manifest response headers violate the delivery policy.
    InvalidHeaders {
        headers: HeaderSet,
        kind: ManifestKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

/// What a monitoring run observed.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Refresh cycles attempted, failed ones included.
    pub iterations: u64,
    pub invalid_playheads: u64,
    pub invalid_headers: u64,
    pub refresh_failures: u64,
    /// The manifest held when the run ended.
    pub manifest: Option<Manifest>,
}

/// Cooperative stop switch for a running monitor. Cloneable and callable
/// from any thread; the monitor honors it between iterations, never in the
/// middle of one.
#[derive(Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

type Listener = Box<dyn Fn(&MonitorEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    checking: Vec<Listener>,
    invalid_playhead: Vec<Listener>,
    invalid_headers: Vec<Listener>,
}

pub struct LiveMonitor {
    state: RunState,
    manifest: Option<Manifest>,
    headers: HeaderSet,
    iteration: u64,
    invalid_playheads: u64,
    invalid_headers: u64,
    refresh_failures: u64,
    allowed_drift: TimeDelta,
    manifest_policy: ManifestPolicy,
    listeners: Listeners,
    stop: StopHandle,
}

impl Default for LiveMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveMonitor {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            manifest: None,
            headers: HeaderSet::new(),
            iteration: 0,
            invalid_playheads: 0,
            invalid_headers: 0,
            refresh_failures: 0,
            allowed_drift: TimeDelta::milliseconds(DEFAULT_ALLOWED_DRIFT_MS),
            manifest_policy: Arc::new(policy::default_manifest_policy),
            listeners: Listeners::default(),
            stop: StopHandle::default(),
        }
    }

    pub fn with_allowed_drift(mut self, allowed_drift: TimeDelta) -> Self {
        self.allowed_drift = allowed_drift;
        self
    }

    pub fn with_manifest_policy(mut self, policy: ManifestPolicy) -> Self {
        self.manifest_policy = policy;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// Handle for stopping a run from another task or thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Registers a listener for one of the named events: `"checking"`,
    /// `"invalidplayhead"` or `"invalidheaders"`.
    ///
    /// Unknown names are ignored without error, so callers written against a
    /// newer event vocabulary keep working against this one.
    pub fn on<F>(&mut self, event: &str, listener: F)
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        match event {
            EVENT_CHECKING => self.listeners.checking.push(Box::new(listener)),
            EVENT_INVALID_PLAYHEAD => self.listeners.invalid_playhead.push(Box::new(listener)),
            EVENT_INVALID_HEADERS => self.listeners.invalid_headers.push(Box::new(listener)),
            other => tracing::debug!(event = other, "ignoring listener for unknown event"),
        }
    }

    /// Replaces the held manifest and headers, then immediately re-evaluates
    /// the drift and header policies against the new values, emitting an
    /// event per violation. Listeners only ever observe the swapped-in state.
    pub fn update_mpd(&mut self, manifest: Manifest, headers: HeaderSet) {
        let mut events = Vec::new();

        let timestamps = policy::verify_timestamps(&manifest, self.allowed_drift);
        if timestamps.clock == ClockStatus::Bad {
            if let (Some(offset_ms), Some(time_at_head)) =
                (timestamps.clock_offset_ms, manifest.time_at_head())
            {
                self.invalid_playheads += 1;
                events.push(MonitorEvent::InvalidPlayhead {
                    offset_ms,
                    threshold_ms: self.allowed_drift.num_milliseconds(),
                    time_at_head,
                });
            }
        }

        if !(self.manifest_policy)(&headers, manifest.kind()) {
            self.invalid_headers += 1;
            events.push(MonitorEvent::InvalidHeaders {
                headers: headers.clone(),
                kind: manifest.kind(),
            });
        }

        self.manifest = Some(manifest);
        self.headers = headers;

        for event in &events {
            self.emit(event);
        }
    }

    /// Runs up to `iterations` refresh cycles and resolves with a summary of
    /// everything observed. `refresh` produces the next manifest and its
    /// response headers; its errors are counted, logged and skipped.
    ///
    /// The stop handle is honored between iterations only. Once the run
    /// ends the monitor is [`RunState::Stopped`] for good; calling `start`
    /// again returns the summary immediately.
    pub async fn start<F, Fut>(&mut self, iterations: u64, mut refresh: F) -> RunSummary
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ValidatorResult<(Manifest, HeaderSet)>>,
    {
        if self.state == RunState::Stopped {
            tracing::warn!("monitor is stopped and cannot be restarted");
            return self.summary();
        }
        self.state = RunState::Running;

        while self.iteration < iterations && !self.stop.is_stopped() {
            self.emit(&MonitorEvent::Checking {
                iteration: self.iteration,
            });

            match refresh().await {
                Ok((manifest, headers)) => self.update_mpd(manifest, headers),
                Err(error) => {
                    self.refresh_failures += 1;
                    tracing::warn!(%error, iteration = self.iteration, "manifest refresh failed");
                }
            }

            self.iteration += 1;
        }

        self.state = RunState::Stopped;
        self.summary()
    }

    fn emit(&self, event: &MonitorEvent) {
        let listeners = match event {
            MonitorEvent::Checking { .. } => &self.listeners.checking,
            MonitorEvent::InvalidPlayhead { .. } => &self.listeners.invalid_playhead,
            MonitorEvent::InvalidHeaders { .. } => &self.listeners.invalid_headers,
        };
        for listener in listeners {
            // A panicking listener must not take the run down with it.
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!("event listener panicked");
            }
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            iterations: self.iteration,
            invalid_playheads: self.invalid_playheads,
            invalid_headers: self.invalid_headers,
            refresh_failures: self.refresh_failures,
            manifest: self.manifest.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_unknown_event_names_are_ignored() {
        let mut monitor = LiveMonitor::new();
        monitor.on("onmanifestchange", |_| panic!("must never fire"));
        monitor.on("checking", |_| {});
        assert!(monitor.listeners.checking.len() == 1);
        assert!(monitor.listeners.invalid_playhead.is_empty());
        assert!(monitor.listeners.invalid_headers.is_empty());
    }

    #[test]
    fn test_update_mpd_swaps_before_emitting() {
        use crate::manifest::DynamicManifest;

        let stale = Manifest::Dynamic(DynamicManifest {
            total_duration: std::time::Duration::ZERO,
            time_at_head: Utc::now() - TimeDelta::hours(1),
            segments: vec!["seg-1.m4s".to_string()],
        });

        let fired = Arc::new(AtomicU64::new(0));
        let mut monitor = LiveMonitor::new();
        {
            let fired = fired.clone();
            monitor.on(EVENT_INVALID_PLAYHEAD, move |event| {
                let MonitorEvent::InvalidPlayhead {
                    offset_ms,
                    threshold_ms,
                    ..
                } = event
                else {
                    panic!("wrong event type");
                };
                assert!(*offset_ms > *threshold_ms);
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        monitor.update_mpd(stale, HeaderSet::new());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.invalid_playheads, 1);
        assert!(monitor.manifest().is_some());
    }

    #[test]
    fn test_listener_panic_does_not_abort() {
        use crate::manifest::StaticManifest;

        let after = Arc::new(AtomicU64::new(0));
        let mut monitor = LiveMonitor::new().with_manifest_policy(Arc::new(|_, _| false));
        monitor.on(EVENT_INVALID_HEADERS, |_| panic!("listener bug"));
        {
            let after = after.clone();
            monitor.on(EVENT_INVALID_HEADERS, move |_| {
                after.fetch_add(1, Ordering::SeqCst);
            });
        }

        let manifest = Manifest::Static(StaticManifest {
            total_duration: std::time::Duration::from_secs(10),
            segments: vec![],
        });
        monitor.update_mpd(manifest, HeaderSet::new());

        // The second listener still ran and the violation was counted.
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.invalid_headers, 1);
    }
}
