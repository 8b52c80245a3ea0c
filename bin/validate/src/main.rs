use std::{str::FromStr, time::Duration};

use anyhow::bail;
use chrono::TimeDelta;
use clap::Parser;
use dash_validator::{
    ClockStatus, DashValidator, HttpClient, MonitorEvent, ProbeMethod, RunSummary,
};
use fake_user_agent::get_chrome_rua;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

#[derive(Parser, Debug, Clone)]
#[clap(name = "dash-validate", version, about = "Delivery conformance checks for MPEG-DASH streams")]
pub struct ValidateArgs {
    /// Probe every media segment listed in the manifest
    #[clap(long, conflicts_with = "spotcheck")]
    all: bool,

    /// Probe N segments drawn randomly (with replacement) from the manifest
    #[clap(long, value_name = "N")]
    spotcheck: Option<usize>,

    /// Download segment bodies instead of HEAD probing
    #[clap(long)]
    download: bool,

    /// Keep re-validating a dynamic manifest for N refresh cycles
    #[clap(long, value_name = "N")]
    monitor: Option<u64>,

    /// Allowed offset between the wall clock and the live edge, in milliseconds
    #[clap(long, default_value = "10000", value_name = "MS")]
    allowed_drift: i64,

    /// Pause between segment probes, in milliseconds
    #[clap(long, default_value = "50", value_name = "MS")]
    probe_spacing: u64,

    /// Cookies sent with every request
    #[clap(long)]
    cookies: Option<String>,

    /// Custom header. eg. "Authorization: Bearer xxxxx"
    #[clap(short = 'H', long)]
    headers: Vec<String>,

    /// Request timeout in seconds
    #[clap(long, default_value = "30")]
    timeout: u64,

    /// Print results as JSON instead of text
    #[clap(long)]
    json: bool,

    /// Manifest URL
    mpd: String,
}

impl ValidateArgs {
    fn client(&self) -> HttpClient {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let (key, value) = header.split_once(':').expect("Invalid header");
            headers.insert(
                HeaderName::from_str(key.trim()).expect("Invalid header name"),
                HeaderValue::from_str(value.trim()).expect("Invalid header value"),
            );
        }

        HttpClient::new(
            reqwest::ClientBuilder::new()
                .default_headers(headers)
                .user_agent(get_chrome_rua())
                .timeout(Duration::from_secs(self.timeout)),
        )
    }

    fn probe_method(&self) -> ProbeMethod {
        if self.download {
            ProbeMethod::Get
        } else {
            ProbeMethod::Head
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = ValidateArgs::parse();

    let mpd = reqwest::Url::parse(&args.mpd)?;
    let client = args.client();
    if let Some(cookies) = &args.cookies {
        client.add_cookies(cookies, &mpd);
    }

    let validator = DashValidator::with_client(mpd.as_str(), client)?
        .with_probe_spacing(Duration::from_millis(args.probe_spacing))
        .with_allowed_drift(TimeDelta::milliseconds(args.allowed_drift));

    match args.monitor {
        Some(iterations) => run_monitor(validator, iterations, args.json).await,
        None => run_checks(validator, &args).await,
    }
}

async fn run_checks(mut validator: DashValidator, args: &ValidateArgs) -> anyhow::Result<()> {
    validator.load().await?;

    log::info!(
        "Loaded {} manifest with {} segments.",
        if validator.is_live()? { "dynamic" } else { "static" },
        validator.segment_urls().len(),
    );

    let manifest = validator.verify_manifest(None)?;
    let timestamps = validator.verify_timestamps(None)?;

    let segments = if args.all {
        Some(
            validator
                .verify_all_segments(None, args.probe_method())
                .await?,
        )
    } else if let Some(count) = args.spotcheck {
        Some(
            validator
                .spotcheck_segments(None, count, args.probe_method())
                .await?,
        )
    } else {
        None
    };

    let failed_segments = segments
        .as_ref()
        .map(|report| report.failed.len())
        .unwrap_or(0);

    if args.json {
        let report = serde_json::json!({
            "manifest": &manifest,
            "timestamps": &timestamps,
            "segments": &segments,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "manifest headers: {}",
            if manifest.ok { "ok" } else { "violation" }
        );
        match timestamps.clock_offset_ms {
            Some(offset) => println!(
                "live edge: {} (offset {offset}ms)",
                clock_word(timestamps.clock)
            ),
            None => println!("live edge: not applicable"),
        }
        if let Some(report) = &segments {
            println!(
                "segments: {} ok, {} failed",
                report.ok.len(),
                report.failed.len()
            );
            for failed in &report.failed {
                println!("  - {}", failed.uri);
            }
        }
    }

    if !manifest.ok || timestamps.clock == ClockStatus::Bad || failed_segments > 0 {
        bail!("conformance violations found");
    }
    Ok(())
}

async fn run_monitor(
    mut validator: DashValidator,
    iterations: u64,
    json: bool,
) -> anyhow::Result<()> {
    validator.on("checking", |event| {
        if let MonitorEvent::Checking { iteration } = event {
            log::info!("Refresh cycle {iteration} starting...");
        }
    });
    validator.on("invalidplayhead", |event| {
        if let MonitorEvent::InvalidPlayhead {
            offset_ms,
            threshold_ms,
            ..
        } = event
        {
            log::error!("Live edge is {offset_ms}ms from the wall clock (allowed: {threshold_ms}ms).");
        }
    });
    validator.on("invalidheaders", |event| {
        if let MonitorEvent::InvalidHeaders { headers, .. } = event {
            log::error!(
                "Manifest headers violate the delivery policy. Cache-Control: {}",
                headers.get("cache-control").unwrap_or("<missing>")
            );
        }
    });

    let handle = validator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current cycle...");
            handle.stop();
        }
    });

    let summary = validator.validate_dynamic_manifest(iterations).await;
    print_summary(&summary, json)?;

    if summary.invalid_playheads > 0 || summary.invalid_headers > 0 || summary.refresh_failures > 0
    {
        bail!("conformance violations found");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!(
            "{} iterations: {} playhead violations, {} header violations, {} refresh failures",
            summary.iterations,
            summary.invalid_playheads,
            summary.invalid_headers,
            summary.refresh_failures
        );
    }
    Ok(())
}

fn clock_word(clock: ClockStatus) -> &'static str {
    match clock {
        ClockStatus::Ok => "ok",
        ClockStatus::Bad => "out of sync",
    }
}
