//! MPD parsing, reduced to what conformance checks need: the presentation
//! kind, its duration, the addressable media segment URIs, and (for dynamic
//! manifests) the wall-clock time at the head of the stream.
//!
//! The heavy lifting of XML deserialization is left to [`dash_mpd`]; this
//! module walks the result and expands the segment addressing schemes
//! (`SegmentList`, `SegmentTemplate` with `$Number$` / `SegmentTimeline`,
//! plain `BaseURL`) into absolute URIs.

use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeDelta, Utc};
use dash_mpd::{AdaptationSet, Representation, SegmentList, SegmentTemplate, MPD};
use serde::Serialize;
use url::Url;

use crate::{
    error::{ValidatorError, ValidatorResult},
    util::url::merge_baseurls,
};

mod template;

use template::TemplateVars;

/// Upper bound on the segments expanded for one representation of a dynamic
/// manifest, so a deep timeshift buffer cannot turn a probe run into a crawl.
const MAX_WINDOW_SEGMENTS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Static,
    Dynamic,
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestKind::Static => write!(f, "static"),
            ManifestKind::Dynamic => write!(f, "dynamic"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StaticManifest {
    pub total_duration: StdDuration,
    /// Media segment URIs, absolute, in manifest order.
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DynamicManifest {
    pub total_duration: StdDuration,
    /// Wall-clock presentation time of the newest segment across all
    /// representations.
    pub time_at_head: DateTime<Utc>,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Manifest {
    Static(StaticManifest),
    Dynamic(DynamicManifest),
}

impl Manifest {
    pub fn kind(&self) -> ManifestKind {
        match self {
            Manifest::Static(_) => ManifestKind::Static,
            Manifest::Dynamic(_) => ManifestKind::Dynamic,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Manifest::Dynamic(_))
    }

    pub fn total_duration(&self) -> StdDuration {
        match self {
            Manifest::Static(m) => m.total_duration,
            Manifest::Dynamic(m) => m.total_duration,
        }
    }

    pub fn segments(&self) -> &[String] {
        match self {
            Manifest::Static(m) => &m.segments,
            Manifest::Dynamic(m) => &m.segments,
        }
    }

    /// `None` for static manifests, which have no live edge.
    pub fn time_at_head(&self) -> Option<DateTime<Utc>> {
        match self {
            Manifest::Static(_) => None,
            Manifest::Dynamic(m) => Some(m.time_at_head),
        }
    }
}

/// Parses an MPD document and expands its segment addressing.
///
/// `manifest_url` anchors relative `BaseURL` chains and segment URIs.
pub fn parse(text: &str, manifest_url: &Url) -> ValidatorResult<Manifest> {
    let mpd = dash_mpd::parse(text)?;
    from_mpd(&mpd, manifest_url)
}

fn from_mpd(mpd: &MPD, manifest_url: &Url) -> ValidatorResult<Manifest> {
    let kind = match mpd.mpdtype.as_deref() {
        Some("dynamic") => ManifestKind::Dynamic,
        _ => ManifestKind::Static,
    };

    let availability_start = mpd.availabilityStartTime;
    if kind == ManifestKind::Dynamic && availability_start.is_none() {
        return Err(ValidatorError::InvalidManifest(
            "dynamic MPD is missing availabilityStartTime".to_string(),
        ));
    }

    let mut mpd_base = manifest_url.clone();
    if let Some(base) = mpd.base_url.first() {
        mpd_base = merge_baseurls(&mpd_base, &base.base)?;
    }

    let now = Utc::now();
    let presentation_delay =
        TimeDelta::from_std(mpd.suggestedPresentationDelay.unwrap_or(StdDuration::ZERO))?;
    let buffer_depth = mpd
        .timeShiftBufferDepth
        .map(TimeDelta::from_std)
        .transpose()?;

    let mut segments = Vec::new();
    let mut head: Option<DateTime<Utc>> = None;

    for period in &mpd.periods {
        let mut period_base = mpd_base.clone();
        if let Some(base) = period.BaseURL.first() {
            period_base = merge_baseurls(&period_base, &base.base)?;
        }

        let period_duration = period.duration.or_else(|| {
            // A single period with no explicit duration spans the whole
            // presentation.
            (mpd.periods.len() == 1)
                .then_some(mpd.mediaPresentationDuration)
                .flatten()
        });

        let live = match (kind, availability_start) {
            (ManifestKind::Dynamic, Some(start)) => {
                let period_start =
                    TimeDelta::from_std(period.start.unwrap_or(StdDuration::ZERO))?;
                Some(LiveWindow {
                    period_epoch: start + period_start,
                    live_edge: now - presentation_delay,
                    buffer_depth,
                })
            }
            _ => None,
        };

        for adaptation in &period.adaptations {
            let mut adaptation_base = period_base.clone();
            if let Some(base) = adaptation.BaseURL.first() {
                adaptation_base = merge_baseurls(&adaptation_base, &base.base)?;
            }

            for representation in &adaptation.representations {
                let mut base = adaptation_base.clone();
                if let Some(base_url) = representation.BaseURL.first() {
                    base = merge_baseurls(&base, &base_url.base)?;
                }

                let walked =
                    walk_representation(&base, representation, adaptation, period_duration, live)?;
                segments.extend(walked.uris);

                if let (Some(window), Some(end)) = (live, walked.media_end) {
                    let rep_head = window.period_epoch + end;
                    head = Some(head.map_or(rep_head, |h| h.max(rep_head)));
                }
            }
        }
    }

    let total_duration = mpd.mediaPresentationDuration.unwrap_or_else(|| {
        mpd.periods
            .iter()
            .filter_map(|period| period.duration)
            .sum()
    });

    match kind {
        ManifestKind::Static => Ok(Manifest::Static(StaticManifest {
            total_duration,
            segments,
        })),
        ManifestKind::Dynamic => {
            let time_at_head = head
                .or(mpd.publishTime)
                .or(availability_start)
                .ok_or_else(|| {
                    ValidatorError::InvalidManifest(
                        "dynamic MPD has no usable head time".to_string(),
                    )
                })?;
            Ok(Manifest::Dynamic(DynamicManifest {
                total_duration,
                time_at_head,
                segments,
            }))
        }
    }
}

/// Availability window of one period of a dynamic presentation.
#[derive(Debug, Clone, Copy)]
struct LiveWindow {
    /// Wall-clock time where this period's media timeline starts.
    period_epoch: DateTime<Utc>,
    /// Newest presentation time a client is expected to play.
    live_edge: DateTime<Utc>,
    buffer_depth: Option<TimeDelta>,
}

struct WalkedSegments {
    uris: Vec<String>,
    /// Presentation end of the newest segment, relative to the period start.
    media_end: Option<TimeDelta>,
}

impl WalkedSegments {
    fn empty() -> Self {
        WalkedSegments {
            uris: Vec::new(),
            media_end: None,
        }
    }
}

fn walk_representation(
    base: &Url,
    representation: &Representation,
    adaptation: &AdaptationSet,
    period_duration: Option<StdDuration>,
    live: Option<LiveWindow>,
) -> ValidatorResult<WalkedSegments> {
    let vars = TemplateVars {
        representation_id: representation.id.clone().unwrap_or_default(),
        bandwidth: representation
            .bandwidth
            .map(|b| b.to_string())
            .unwrap_or_default(),
        ..Default::default()
    };

    // Representation-level addressing wins over the adaptation set's.
    let segment_template = representation
        .SegmentTemplate
        .as_ref()
        .or(adaptation.SegmentTemplate.as_ref());
    let segment_list = representation
        .SegmentList
        .as_ref()
        .or(adaptation.SegmentList.as_ref());

    if let Some(template) = segment_template {
        walk_template(base, template, vars, period_duration, live)
    } else if let Some(list) = segment_list {
        walk_list(base, list)
    } else if !representation.BaseURL.is_empty() {
        // Single-segment representation; `base` already folded its BaseURL.
        Ok(WalkedSegments {
            uris: vec![base.to_string()],
            media_end: None,
        })
    } else {
        tracing::warn!(
            representation = representation.id.as_deref().unwrap_or("?"),
            "representation has no segment addressing, skipping"
        );
        Ok(WalkedSegments::empty())
    }
}

fn walk_list(base: &Url, list: &SegmentList) -> ValidatorResult<WalkedSegments> {
    let mut uris = Vec::new();
    for segment_url in &list.segment_urls {
        match &segment_url.media {
            Some(media) => uris.push(merge_baseurls(base, media)?.to_string()),
            // A SegmentURL without @media addresses a byte range of the
            // BaseURL; probing the whole object once is enough.
            None => {
                if !uris.contains(&base.to_string()) {
                    uris.push(base.to_string());
                }
            }
        }
    }

    let timescale = list.timescale.unwrap_or(1).max(1);
    let media_end = list.duration.map(|duration| {
        pts_delta((uris.len() as u64).saturating_mul(duration), timescale)
    });

    Ok(WalkedSegments { uris, media_end })
}

fn walk_template(
    base: &Url,
    template: &SegmentTemplate,
    vars: TemplateVars,
    period_duration: Option<StdDuration>,
    live: Option<LiveWindow>,
) -> ValidatorResult<WalkedSegments> {
    let Some(media) = template.media.as_deref() else {
        tracing::warn!("SegmentTemplate without @media, skipping representation");
        return Ok(WalkedSegments::empty());
    };
    let timescale = template.timescale.unwrap_or(1).max(1);
    let start_number = template.startNumber.unwrap_or(1);

    if let Some(timeline) = &template.SegmentTimeline {
        walk_timeline(
            base,
            media,
            vars,
            timeline,
            timescale,
            start_number,
            period_duration,
        )
    } else if let Some(duration) = template.duration {
        walk_numbered(
            base,
            media,
            vars,
            duration,
            timescale,
            start_number,
            period_duration,
            live,
        )
    } else {
        tracing::warn!("SegmentTemplate carries neither a timeline nor @duration, skipping");
        Ok(WalkedSegments::empty())
    }
}

fn walk_timeline(
    base: &Url,
    media: &str,
    mut vars: TemplateVars,
    timeline: &dash_mpd::SegmentTimeline,
    timescale: u64,
    start_number: u64,
    period_duration: Option<StdDuration>,
) -> ValidatorResult<WalkedSegments> {
    let mut time = timeline.segments.first().and_then(|s| s.t).unwrap_or(0);
    let mut number = start_number;
    let mut uris = Vec::new();
    let mut media_end = None;

    for (index, s) in timeline.segments.iter().enumerate() {
        if let Some(t) = s.t {
            time = t;
        }
        let duration = s.d.max(1);
        let repeats = match s.r.unwrap_or(0) {
            r if r >= 0 => r as u64,
            // Negative @r repeats until the next timed entry, or until the
            // period ends.
            _ => {
                let fill_until = timeline
                    .segments
                    .get(index + 1)
                    .and_then(|next| next.t)
                    .or_else(|| {
                        period_duration
                            .map(|d| (d.as_secs_f64() * timescale as f64) as u64)
                    });
                match fill_until {
                    Some(end) if end > time => ((end - time) / duration).saturating_sub(1),
                    _ => 0,
                }
            }
        };

        for _ in 0..=repeats {
            vars.number = Some(number);
            vars.time = Some(time);
            uris.push(merge_baseurls(base, &vars.resolve(media))?.to_string());
            time += duration;
            number += 1;
        }
        media_end = Some(pts_delta(time, timescale));
    }

    Ok(WalkedSegments { uris, media_end })
}

#[allow(clippy::too_many_arguments)]
fn walk_numbered(
    base: &Url,
    media: &str,
    mut vars: TemplateVars,
    segment_duration: f64,
    timescale: u64,
    start_number: u64,
    period_duration: Option<StdDuration>,
    live: Option<LiveWindow>,
) -> ValidatorResult<WalkedSegments> {
    let segment_secs = segment_duration / timescale as f64;
    if !(segment_secs > 0.0) {
        tracing::warn!("SegmentTemplate@duration is not positive, skipping representation");
        return Ok(WalkedSegments::empty());
    }

    let (first_number, count) = match live {
        None => {
            let Some(period_secs) = period_duration.map(|d| d.as_secs_f64()) else {
                tracing::warn!("static period has no duration, cannot expand $Number$ segments");
                return Ok(WalkedSegments::empty());
            };
            (start_number, (period_secs / segment_secs).ceil() as u64)
        }
        Some(window) => {
            let elapsed = window.live_edge - window.period_epoch;
            // Only whole segments behind the live edge are available.
            let available =
                (elapsed.num_milliseconds().max(0) as f64 / 1000.0 / segment_secs) as u64;
            if available == 0 {
                return Ok(WalkedSegments::empty());
            }
            let span = match window.buffer_depth {
                Some(depth) => {
                    ((depth.num_milliseconds().max(0) as f64 / 1000.0 / segment_secs) as u64)
                        .max(1)
                }
                None => available,
            };
            let count = span.min(available).min(MAX_WINDOW_SEGMENTS);
            (start_number + (available - count), count)
        }
    };

    let mut uris = Vec::with_capacity(count as usize);
    for number in first_number..first_number + count {
        vars.number = Some(number);
        vars.time = Some(((number - start_number) as f64 * segment_duration) as u64);
        uris.push(merge_baseurls(base, &vars.resolve(media))?.to_string());
    }

    let newest = (first_number - start_number) + count;
    let media_end = (count > 0).then(|| {
        TimeDelta::milliseconds((newest as f64 * segment_secs * 1000.0).round() as i64)
    });

    Ok(WalkedSegments { uris, media_end })
}

fn pts_delta(pts: u64, timescale: u64) -> TimeDelta {
    TimeDelta::milliseconds((pts as f64 / timescale as f64 * 1000.0).round() as i64)
}
