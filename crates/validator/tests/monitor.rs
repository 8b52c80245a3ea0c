use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{TimeDelta, Utc};
use dash_validator::{
    DynamicManifest, HeaderSet, LiveMonitor, Manifest, RunState, ValidatorError,
};

fn manifest_with_head_age(age: TimeDelta) -> Manifest {
    Manifest::Dynamic(DynamicManifest {
        total_duration: Duration::ZERO,
        time_at_head: Utc::now() - age,
        segments: vec!["seg-1.m4s".to_string()],
    })
}

fn stale_manifest() -> Manifest {
    manifest_with_head_age(TimeDelta::hours(1))
}

fn fresh_manifest() -> Manifest {
    manifest_with_head_age(TimeDelta::zero())
}

fn short_cache_headers() -> HeaderSet {
    HeaderSet::from_iter([("Cache-Control", "max-age=5")])
}

fn long_cache_headers() -> HeaderSet {
    HeaderSet::from_iter([("Cache-Control", "max-age=300")])
}

fn counter() -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(0))
}

#[tokio::test]
async fn test_every_iteration_checks_the_fresh_manifest() -> anyhow::Result<()> {
    let mut monitor = LiveMonitor::new();

    let checking = counter();
    let playheads = counter();
    let headers = counter();
    for (event, count) in [
        ("checking", checking.clone()),
        ("invalidplayhead", playheads.clone()),
        ("invalidheaders", headers.clone()),
    ] {
        monitor.on(event, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    let summary = monitor
        .start(3, || async { Ok((stale_manifest(), long_cache_headers())) })
        .await;

    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.invalid_playheads, 3);
    assert_eq!(summary.invalid_headers, 3);
    assert_eq!(summary.refresh_failures, 0);
    assert!(summary.manifest.is_some());

    assert_eq!(checking.load(Ordering::SeqCst), 3);
    assert_eq!(playheads.load(Ordering::SeqCst), 3);
    assert_eq!(headers.load(Ordering::SeqCst), 3);
    assert_eq!(monitor.state(), RunState::Stopped);

    Ok(())
}

#[tokio::test]
async fn test_conforming_stream_raises_nothing() -> anyhow::Result<()> {
    let mut monitor = LiveMonitor::new();

    let violations = counter();
    for event in ["invalidplayhead", "invalidheaders"] {
        let violations = violations.clone();
        monitor.on(event, move |_| {
            violations.fetch_add(1, Ordering::SeqCst);
        });
    }

    let summary = monitor
        .start(3, || async { Ok((fresh_manifest(), short_cache_headers())) })
        .await;

    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.invalid_playheads, 0);
    assert_eq!(summary.invalid_headers, 0);
    assert_eq!(violations.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_refresh_errors_are_counted_not_fatal() -> anyhow::Result<()> {
    let calls = counter();

    let mut monitor = LiveMonitor::new();
    let summary = monitor
        .start(3, {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                        Err(ValidatorError::InvalidManifest("truncated body".to_string()))
                    } else {
                        Ok((fresh_manifest(), short_cache_headers()))
                    }
                }
            }
        })
        .await;

    // The failed cycle still counts as an iteration and the run completes.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.refresh_failures, 1);
    assert!(summary.manifest.is_some());

    Ok(())
}

#[tokio::test]
async fn test_checking_fires_before_each_refresh() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let mut monitor = LiveMonitor::new();
    {
        let log = log.clone();
        monitor.on("checking", move |_| log.lock().unwrap().push("checking"));
    }

    monitor
        .start(2, {
            let log = log.clone();
            move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push("refresh");
                    Ok((fresh_manifest(), short_cache_headers()))
                }
            }
        })
        .await;

    assert_eq!(
        *log.lock().unwrap(),
        ["checking", "refresh", "checking", "refresh"]
    );

    Ok(())
}

#[tokio::test]
async fn test_listeners_fire_in_registration_order() -> anyhow::Result<()> {
    let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let mut monitor = LiveMonitor::new();
    for name in ["first", "second", "third"] {
        let log = log.clone();
        monitor.on("checking", move |_| log.lock().unwrap().push(name));
    }

    monitor
        .start(1, || async { Ok((fresh_manifest(), short_cache_headers())) })
        .await;

    assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);

    Ok(())
}

#[tokio::test]
async fn test_stop_handle_ends_the_run_between_iterations() -> anyhow::Result<()> {
    let mut monitor = LiveMonitor::new();
    let handle = monitor.stop_handle();
    monitor.on("checking", move |_| handle.stop());

    let refreshes = counter();
    let summary = monitor
        .start(10, {
            let refreshes = refreshes.clone();
            move || {
                let refreshes = refreshes.clone();
                async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok((fresh_manifest(), short_cache_headers()))
                }
            }
        })
        .await;

    // The iteration that saw the stop request still completes.
    assert_eq!(summary.iterations, 1);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.state(), RunState::Stopped);

    Ok(())
}

#[tokio::test]
async fn test_stopped_monitor_does_not_restart() -> anyhow::Result<()> {
    let mut monitor = LiveMonitor::new();
    monitor
        .start(1, || async { Ok((fresh_manifest(), short_cache_headers())) })
        .await;
    assert_eq!(monitor.state(), RunState::Stopped);

    let refreshes = counter();
    let summary = monitor
        .start(5, {
            let refreshes = refreshes.clone();
            move || {
                let refreshes = refreshes.clone();
                async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok((fresh_manifest(), short_cache_headers()))
                }
            }
        })
        .await;

    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(summary.iterations, 1);

    Ok(())
}

#[tokio::test]
async fn test_custom_manifest_policy_drives_header_events() -> anyhow::Result<()> {
    let mut monitor = LiveMonitor::new()
        .with_manifest_policy(Arc::new(|headers, _| headers.contains("x-verified")));

    let summary = monitor
        .start(2, || async { Ok((fresh_manifest(), short_cache_headers())) })
        .await;

    assert_eq!(summary.invalid_headers, 2);

    Ok(())
}

#[tokio::test]
async fn test_allowed_drift_is_configurable() -> anyhow::Result<()> {
    let mut monitor = LiveMonitor::new().with_allowed_drift(TimeDelta::hours(2));

    let summary = monitor
        .start(2, || async { Ok((stale_manifest(), short_cache_headers())) })
        .await;

    // One hour behind is fine when two hours are allowed.
    assert_eq!(summary.invalid_playheads, 0);

    Ok(())
}
