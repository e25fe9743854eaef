//! The stream-state machine: input URL resolution, the wait/poll loop,
//! quality selection, and signed-URL refresh.
//!
//! Everything here follows the same shape: probe, classify the
//! playability status, then either proceed, sleep and retry, or refuse.
//! Mid-capture the same classifications flip flags on the shared context
//! instead of refusing, so the assemblers can drain what remains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use url::Url;

use crate::config::WaitAction;
use crate::context::{Phase, RecordingContext, TrackKind};
use crate::error::CaptureError;
use crate::filename::sanitize_filename;
use crate::manifest::{self, FragmentUrl, is_fragmented};
use crate::probe::{
    InfoProbe, PLAYABLE_ERROR, PLAYABLE_OFFLINE, PLAYABLE_OK, PLAYABLE_UNPLAYABLE, PlayerResponse,
    StreamingData,
};
use crate::quality::{
    AUDIO_ITAG, AUDIO_ONLY_ITAG, AUDIO_ONLY_LABEL, BEST_LABEL, entry_for_label, known_labels,
    label_priority, parse_quality_list,
};

/// Minimum interval between refreshes; also the late-stream recheck cadence.
pub(crate) const RECHECK_INTERVAL: Duration = Duration::from_secs(15);

const HTML_VIDEO_LINK_TAG: &str =
    r#"<link rel="canonical" href="https://www.youtube.com/watch?v="#;

/// Answer to the wait-for-scheduled-stream question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChoice {
    No,
    Wait,
    /// Poll on the given interval in seconds instead of sleeping until the
    /// scheduled start time.
    Poll(u64),
}

/// Interactive decisions the engine cannot make on its own.
pub trait Prompter: Send + Sync {
    fn ask_wait_for_stream(&self, url: &str) -> Result<WaitChoice, CaptureError>;

    /// Ask for a slash-delimited quality preference given the selectable
    /// labels. `waiting` marks the pre-emptive selection before a
    /// scheduled stream goes live.
    fn select_quality(&self, available: &[String], waiting: bool) -> Result<String, CaptureError>;

    /// Ask for a direct media URL for the given track; `None` skips.
    fn direct_url(&self, track: TrackKind) -> Result<Option<String>, CaptureError>;
}

/// A validated direct (pre-signed) media URL.
pub(crate) struct DirectUrl {
    pub video_id: String,
    pub itag: u32,
    pub template: FragmentUrl,
}

/// Validate a googlevideo media URL for the given track.
pub(crate) fn parse_direct_url(raw: &str, expect: TrackKind) -> Result<DirectUrl, CaptureError> {
    let parsed =
        Url::parse(raw).map_err(|e| CaptureError::invalid_url(raw, e.to_string()))?;
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    if !host.ends_with(".googlevideo.com") {
        return Err(CaptureError::invalid_url(raw, "not a googlevideo media URL"));
    }

    let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    if !query.contains_key("noclen") {
        return Err(CaptureError::invalid_url(
            raw,
            "not a fragmented stream URL (no noclen parameter)",
        ));
    }

    let itag: u32 = query
        .get("itag")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| CaptureError::invalid_url(raw, "missing itag parameter"))?;
    if expect == TrackKind::Audio && itag != AUDIO_ITAG {
        return Err(CaptureError::invalid_url(
            raw,
            format!("audio URL must carry itag {AUDIO_ITAG}"),
        ));
    }
    if expect == TrackKind::Video && itag == AUDIO_ITAG {
        return Err(CaptureError::invalid_url(
            raw,
            "video URL carries the audio itag",
        ));
    }

    // The id parameter carries a spurious trailing ".1".
    let video_id = query
        .get("id")
        .map(|v| v.strip_suffix(".1").unwrap_or(v).to_string())
        .unwrap_or_default();

    Ok(DirectUrl {
        video_id,
        itag,
        template: FragmentUrl::from_query_url(raw),
    })
}

fn scrape_canonical_video_id(html: &str) -> Option<String> {
    let start = html.find(HTML_VIDEO_LINK_TAG)? + HTML_VIDEO_LINK_TAG.len();
    let end = html[start..].find('"')? + start;
    let vid = &html[start..end];
    (!vid.is_empty()).then(|| vid.to_string())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct StateController {
    ctx: Arc<RecordingContext>,
    probe: InfoProbe,
    prompter: Arc<dyn Prompter>,
    /// Serializes refreshes so concurrent 403s trigger one probe.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl StateController {
    pub(crate) fn new(
        ctx: Arc<RecordingContext>,
        probe: InfoProbe,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            ctx,
            probe,
            prompter,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    async fn cancellable_sleep(&self, duration: Duration) -> Result<(), CaptureError> {
        tokio::select! {
            _ = self.ctx.cancel_token().cancelled() => Err(CaptureError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Resolve the input URL to a video id, or complete direct-URL mode.
    pub(crate) async fn resolve_input(&self) -> Result<(), CaptureError> {
        if self.ctx.lock().direct_url_mode {
            self.complete_direct_mode()?;
            return Ok(());
        }

        let source = self.ctx.lock().source_url.clone();
        let parsed =
            Url::parse(&source).map_err(|e| CaptureError::invalid_url(&source, e.to_string()))?;
        let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
        let path = parsed.path().to_ascii_lowercase();

        if host == "www.youtube.com" || host == "youtube.com" {
            if path.starts_with("/watch") {
                let vid = parsed
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned())
                    .ok_or_else(|| {
                        CaptureError::invalid_url(&source, "watch URL missing the v= video id")
                    })?;
                self.ctx.lock().video_id = vid;
            } else if path.starts_with("/channel") && path.ends_with("live") {
                // The current or next scheduled broadcast id is only in the
                // page markup, as the canonical watch link.
                let html = self.probe.fetch_text(&source).await?;
                let vid = scrape_canonical_video_id(&html).ok_or_else(|| {
                    CaptureError::invalid_url(&source, "no canonical watch link on channel page")
                })?;
                self.ctx.lock().video_id = vid;
            } else {
                return Err(CaptureError::invalid_url(
                    &source,
                    "expected a /watch or /channel/.../live URL",
                ));
            }
        } else if host == "youtu.be" {
            self.ctx.lock().video_id = parsed.path().trim_matches('/').to_string();
        } else if host.ends_with(".googlevideo.com") {
            let itag: Option<u32> = parsed
                .query_pairs()
                .find(|(k, _)| k == "itag")
                .and_then(|(_, v)| v.parse().ok());
            let kind = match itag {
                Some(AUDIO_ITAG) => TrackKind::Audio,
                Some(_) => TrackKind::Video,
                None => {
                    return Err(CaptureError::invalid_url(&source, "missing itag parameter"));
                }
            };
            let direct = parse_direct_url(&source, kind)?;
            {
                let mut s = self.ctx.lock();
                s.direct_url_mode = true;
                if s.video_id.is_empty() {
                    s.video_id = direct.video_id;
                }
                if kind == TrackKind::Video {
                    s.set_chosen_itag(direct.itag);
                }
                if s.track(kind).download_url.is_none() {
                    s.track_mut(kind).download_url = Some(direct.template);
                }
            }
            self.complete_direct_mode()?;
        } else {
            return Err(CaptureError::invalid_url(
                &source,
                "not a known livestream URL",
            ));
        }

        if self.ctx.lock().video_id.is_empty() {
            return Err(CaptureError::invalid_url(&source, "could not find video id"));
        }
        Ok(())
    }

    /// Solicit whichever direct URL is still missing. Audio is mandatory;
    /// skipping the video URL makes this an audio-only capture.
    fn complete_direct_mode(&self) -> Result<(), CaptureError> {
        while self.ctx.track_url(TrackKind::Audio).is_none() {
            match self.prompter.direct_url(TrackKind::Audio)? {
                None => {
                    info!("an audio URL is required; video-only capture is not supported");
                }
                Some(raw) => match parse_direct_url(&raw, TrackKind::Audio) {
                    Ok(direct) => {
                        let mut s = self.ctx.lock();
                        s.track_mut(TrackKind::Audio).download_url = Some(direct.template);
                        if s.video_id.is_empty() {
                            s.video_id = direct.video_id;
                        }
                    }
                    Err(err) => warn!(error = %err, "unusable audio URL"),
                },
            }
        }

        let need_video = {
            let s = self.ctx.lock();
            s.track(TrackKind::Video).download_url.is_none() && s.chosen_itag.is_none()
        };
        if need_video {
            loop {
                match self.prompter.direct_url(TrackKind::Video)? {
                    None => {
                        self.ctx.lock().set_chosen_itag(AUDIO_ONLY_ITAG);
                        break;
                    }
                    Some(raw) => match parse_direct_url(&raw, TrackKind::Video) {
                        Ok(direct) => {
                            let mut s = self.ctx.lock();
                            s.track_mut(TrackKind::Video).download_url = Some(direct.template);
                            s.set_chosen_itag(direct.itag);
                            if s.video_id.is_empty() {
                                s.video_id = direct.video_id;
                            }
                            break;
                        }
                        Err(err) => warn!(error = %err, "unusable video URL"),
                    },
                }
            }
        }

        // No probe is possible; the id is the only naming info we get.
        let mut s = self.ctx.lock();
        if s.format_info.id.is_empty() {
            s.format_info.id = sanitize_filename(&s.video_id);
        }
        s.phase = Phase::Live;
        Ok(())
    }

    /// First discovery. Direct-URL mode skips probing entirely.
    pub(crate) async fn discover(&self) -> Result<(), CaptureError> {
        if self.ctx.lock().direct_url_mode {
            return Ok(());
        }
        if self.refresh().await? {
            Ok(())
        } else {
            Err(CaptureError::discovery(
                "could not retrieve initial video information",
            ))
        }
    }

    fn prompt_quality_list(
        &self,
        labels: &[&str],
        waiting: bool,
    ) -> Result<Vec<String>, CaptureError> {
        let display: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        loop {
            let input = self.prompter.select_quality(&display, waiting)?;
            let input = if input.trim().is_empty() {
                BEST_LABEL.to_string()
            } else {
                input
            };
            let parsed = parse_quality_list(labels, &input);
            if !parsed.is_empty() {
                return Ok(parsed);
            }
            info!("no valid qualities selected");
        }
    }

    /// Probe until the playability status is OK, waiting out scheduled
    /// streams as configured. `Ok(None)` means "no playable response right
    /// now" and, mid-capture, that the end-of-stream flags were updated.
    async fn playable_player_response(
        &self,
    ) -> Result<Option<(PlayerResponse, Vec<String>)>, CaptureError> {
        let known = known_labels();
        let (video_id, source_url, mut selected) = {
            let s = self.ctx.lock();
            (
                s.video_id.clone(),
                s.source_url.clone(),
                parse_quality_list(&known, &s.selected_quality),
            )
        };
        let mut first_wait = true;
        let mut secs_late: u64 = 0;

        loop {
            if self.ctx.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }

            let response = match self.probe.player_response(&video_id).await {
                Ok(r) => r,
                Err(err) => {
                    warn!(error = %err, "failed to retrieve video information");
                    return Ok(None);
                }
            };

            let in_progress = self.ctx.in_progress();

            let Some(details) = &response.video_details else {
                if in_progress {
                    warn!("video details no longer available mid-download");
                    warn!("the stream was likely privated after finishing");
                    warn!("continuing as long as fragments keep downloading");
                    let mut s = self.ctx.lock();
                    s.is_live = false;
                    s.is_unavailable = true;
                    s.phase = Phase::Finishing;
                    return Ok(None);
                }
                return Err(CaptureError::discovery(
                    "video details not found; the video is likely private or does not exist",
                ));
            };

            if !details.is_live_content {
                return Err(CaptureError::NotLivestream { url: source_url });
            }

            let (status, reason) = {
                let (status, reason) = response.playability();
                (status.to_string(), reason.map(str::to_string))
            };
            let reason = reason.as_deref();
            match status.as_str() {
                PLAYABLE_OK => {
                    return Ok(Some((response, selected)));
                }
                PLAYABLE_ERROR => {
                    warn!(
                        reason = reason.unwrap_or("unknown"),
                        "playability status: ERROR"
                    );
                    if in_progress {
                        info!("finishing download");
                        let mut s = self.ctx.lock();
                        s.is_live = false;
                        s.phase = Phase::Finishing;
                        return Ok(None);
                    }
                    return Err(CaptureError::unplayable(
                        reason.unwrap_or("playability status ERROR"),
                    ));
                }
                PLAYABLE_UNPLAYABLE => {
                    warn!(
                        reason = reason.unwrap_or("unknown"),
                        logged_in = response.logged_in(),
                        "playability status: unplayable"
                    );
                    warn!(
                        "for a members-only stream, make sure the supplied cookies file is fresh"
                    );
                    if in_progress {
                        let mut s = self.ctx.lock();
                        s.is_live = false;
                        s.is_unavailable = true;
                        s.phase = Phase::Finishing;
                        return Ok(None);
                    }
                    return Err(CaptureError::unplayable(
                        reason.unwrap_or("playability status UNPLAYABLE"),
                    ));
                }
                PLAYABLE_OFFLINE => {
                    if in_progress {
                        debug!("livestream reported offline mid-download");
                        return Ok(None);
                    }

                    if self.ctx.lock().wait == WaitAction::DoNot {
                        return Err(CaptureError::OptedNotToWait);
                    }

                    self.ctx.lock().phase = Phase::Waiting;

                    if first_wait
                        && self.ctx.lock().wait == WaitAction::Ask
                        && self.ctx.lock().retry_secs == 0
                    {
                        match self.prompter.ask_wait_for_stream(&source_url)? {
                            WaitChoice::No => return Err(CaptureError::OptedNotToWait),
                            WaitChoice::Wait => {}
                            WaitChoice::Poll(secs) => self.ctx.lock().retry_secs = secs,
                        }
                    }

                    // Quality must be picked up front when waiting; there is
                    // no way to list the stream's formats before it starts.
                    if first_wait && selected.is_empty() {
                        selected = self.prompt_quality_list(&known, true)?;
                    }

                    let retry_secs = self.ctx.lock().retry_secs;
                    if retry_secs > 0 {
                        let mut poll = Duration::from_secs(retry_secs);
                        if first_wait {
                            if let Some(server_delay) = response.poll_delay() {
                                if poll < server_delay {
                                    poll = server_delay;
                                    self.ctx.lock().retry_secs = server_delay.as_secs();
                                }
                            }
                            info!(
                                interval_secs = poll.as_secs(),
                                "waiting for stream, re-probing on an interval"
                            );
                        }
                        first_wait = false;
                        self.cancellable_sleep(poll).await?;
                        continue;
                    }

                    if let Some(scheduled) = response.scheduled_start_epoch() {
                        let wait_secs = scheduled - unix_now();
                        if wait_secs > 0 {
                            if !first_wait {
                                info!("stream rescheduled");
                            }
                            first_wait = false;
                            secs_late = 0;
                            info!(
                                seconds = wait_secs,
                                "stream starts later; sleeping until the scheduled time"
                            );
                            loop {
                                let remaining = scheduled - unix_now();
                                if remaining <= 0 {
                                    break;
                                }
                                // Bounded slices so cancellation is observed.
                                let slice = Duration::from_secs(
                                    (remaining as u64).min(RECHECK_INTERVAL.as_secs()),
                                );
                                self.cancellable_sleep(slice).await?;
                            }
                            continue;
                        }
                    }

                    if first_wait {
                        info!(
                            interval_secs = RECHECK_INTERVAL.as_secs(),
                            "stream should have started; checking back on an interval"
                        );
                        first_wait = false;
                    }
                    self.cancellable_sleep(RECHECK_INTERVAL).await?;
                    secs_late += RECHECK_INTERVAL.as_secs();
                    info!(seconds_late = secs_late, "stream is late");
                }
                other => {
                    warn!(status = %other, "unknown playability status");
                    if in_progress {
                        let mut s = self.ctx.lock();
                        s.is_live = false;
                        s.phase = Phase::Finishing;
                        return Ok(None);
                    }
                    return Err(CaptureError::discovery(format!(
                        "unknown playability status `{other}`"
                    )));
                }
            }
        }
    }

    /// Re-probe and rebind download URLs.
    ///
    /// No-op (`Ok(false)`) in direct-URL mode, after the stream became
    /// unavailable, or within [`RECHECK_INTERVAL`] of the last refresh.
    /// Hard refusals before capture starts surface as errors.
    pub(crate) async fn refresh(&self) -> Result<bool, CaptureError> {
        let _gate = self.refresh_gate.lock().await;

        {
            let s = self.ctx.lock();
            if s.direct_url_mode || s.is_unavailable {
                return Ok(false);
            }
            if let Some(last) = s.last_updated {
                if last.elapsed() < RECHECK_INTERVAL {
                    return Ok(false);
                }
            }
        }
        if self.ctx.is_cancelled() {
            return Ok(false);
        }

        let Some((response, selected)) = self.playable_player_response().await? else {
            return Ok(false);
        };

        let streaming_data = response
            .streaming_data
            .clone()
            .ok_or_else(|| CaptureError::discovery("player response has no streaming data"))?;
        let live_details = response
            .live_broadcast_details()
            .cloned()
            .ok_or_else(|| {
                CaptureError::discovery("player response has no live broadcast details")
            })?;
        let is_live = live_details.is_live_now;
        let in_progress = self.ctx.in_progress();

        if !is_live && !in_progress {
            // The broadcast already ended. A capture only makes sense while
            // the archive is still fragmented; anything else is VOD work.
            if live_details.end_timestamp.is_some() {
                match streaming_data
                    .adaptive_formats
                    .first()
                    .and_then(|f| f.url.as_deref())
                {
                    None => {
                        return Err(CaptureError::stream_over(
                            "the broadcast ended and is still being processed; download URLs are not available yet",
                        ));
                    }
                    Some(url) if !is_fragmented(url) => {
                        return Err(CaptureError::stream_over(
                            "the broadcast has been fully processed; use a VOD downloader instead",
                        ));
                    }
                    Some(_) => {}
                }
            } else {
                return Err(CaptureError::stream_over(
                    "stream is offline past its scheduled time with no end timestamp; try again later",
                ));
            }
        }

        {
            let mut s = self.ctx.lock();
            if let Some(dash) = &streaming_data.dash_manifest_url {
                s.dash_manifest_url = Some(dash.clone());
            }
            if let Some(td) = streaming_data
                .adaptive_formats
                .first()
                .and_then(|f| f.target_duration_sec)
            {
                s.target_duration = Duration::from_secs_f64(td.max(1.0));
            }
        }

        let dash_url = self.ctx.lock().dash_manifest_url.clone();
        let urls = manifest::resolve_download_urls(
            &self.probe,
            dash_url.as_deref(),
            &streaming_data.adaptive_formats,
        )
        .await;

        match self.ctx.chosen_itag() {
            None => self.select_quality(&streaming_data, &urls, selected)?,
            Some(itag) => {
                let mut s = self.ctx.lock();
                if let Some(u) = urls.get(&AUDIO_ITAG) {
                    s.track_mut(TrackKind::Audio).download_url = Some(u.clone());
                }
                if itag != AUDIO_ONLY_ITAG {
                    if let Some(u) = urls.get(&itag) {
                        s.track_mut(TrackKind::Video).download_url = Some(u.clone());
                    }
                }
            }
        }

        {
            let mut s = self.ctx.lock();
            if !s.in_progress {
                s.format_info.capture(&response);
                s.metadata.capture(&response);
                s.thumbnail_url = response.thumbnail_url().map(str::to_string);
                s.in_progress = true;
                s.phase = Phase::Live;
            }
            if let Some(expires) = streaming_data
                .expires_in_seconds
                .as_deref()
                .and_then(|v| v.parse::<u64>().ok())
            {
                s.expires_in = Duration::from_secs(expires);
            }
            s.is_live = is_live;
            if !is_live && s.phase == Phase::Live {
                s.phase = Phase::Finishing;
            }
            s.last_updated = Some(Instant::now());
        }

        Ok(true)
    }

    /// One-time quality resolution: walk the preference list against what
    /// the stream actually offers and fix the video itag for the run.
    fn select_quality(
        &self,
        streaming_data: &StreamingData,
        urls: &std::collections::BTreeMap<u32, FragmentUrl>,
        mut selected: Vec<String>,
    ) -> Result<(), CaptureError> {
        // Available labels, worst to best, assuming h264 exists for every
        // quality VP9 does.
        let mut available: Vec<String> = vec![AUDIO_ONLY_LABEL.to_string()];
        for fmt in &streaming_data.adaptive_formats {
            if !fmt.mime_type.starts_with("video/mp4") {
                continue;
            }
            let Some(label) = &fmt.quality_label else {
                continue;
            };
            let label = label.to_lowercase();
            let Some(priority) = label_priority(&label) else {
                continue;
            };
            if available.iter().any(|l| l == &label) {
                continue;
            }
            let idx = available
                .iter()
                .position(|l| label_priority(l).unwrap_or(0) > priority)
                .unwrap_or(available.len());
            available.insert(idx, label);
        }

        let vp9 = self.ctx.lock().vp9;
        let audio_url = urls
            .get(&AUDIO_ITAG)
            .cloned()
            .ok_or_else(|| CaptureError::discovery("no download URL for the audio itag"))?;

        loop {
            if selected.is_empty() {
                let labels: Vec<&str> = available.iter().map(String::as_str).collect();
                selected = self.prompt_quality_list(&labels, false)?;
            }

            for preference in &selected {
                let label = if preference == BEST_LABEL {
                    available
                        .last()
                        .cloned()
                        .unwrap_or_else(|| AUDIO_ONLY_LABEL.to_string())
                } else {
                    preference.clone()
                };

                if label == AUDIO_ONLY_LABEL {
                    let mut s = self.ctx.lock();
                    s.track_mut(TrackKind::Audio).download_url = Some(audio_url.clone());
                    s.track_mut(TrackKind::Video).download_url = None;
                    s.set_chosen_itag(AUDIO_ONLY_ITAG);
                    info!("selected quality: audio only");
                    return Ok(());
                }

                let Some(entry) = entry_for_label(&label) else {
                    continue;
                };
                let pick = if vp9 && urls.contains_key(&entry.vp9) {
                    Some((entry.vp9, "VP9"))
                } else if urls.contains_key(&entry.h264) {
                    Some((entry.h264, "h264"))
                } else {
                    None
                };

                if let Some((itag, codec)) = pick {
                    let mut s = self.ctx.lock();
                    s.track_mut(TrackKind::Audio).download_url = Some(audio_url.clone());
                    s.track_mut(TrackKind::Video).download_url = urls.get(&itag).cloned();
                    s.set_chosen_itag(itag);
                    info!(quality = %label, codec, "selected quality");
                    return Ok(());
                }
            }

            // Possible when waiting pre-emptively: the streamer never used
            // any of the qualities the user picked.
            warn!("none of the selected qualities are available for this stream");
            info!("you can now choose from the qualities that are available");
            selected.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingState;
    use crate::test_support::NoopPrompter;
    use reqwest::Client;

    fn controller(state: RecordingState) -> StateController {
        let ctx = Arc::new(RecordingContext::new(state));
        StateController::new(ctx, InfoProbe::new(Client::new()), Arc::new(NoopPrompter))
    }

    #[test]
    fn scrapes_canonical_video_id() {
        let html = format!(
            "<html><head>{}abc-123_XYZ\"></head></html>",
            HTML_VIDEO_LINK_TAG
        );
        assert_eq!(
            scrape_canonical_video_id(&html).as_deref(),
            Some("abc-123_XYZ")
        );
        assert_eq!(scrape_canonical_video_id("<html></html>"), None);
    }

    #[test]
    fn direct_url_validation() {
        let good =
            "https://r4---sn-x.googlevideo.com/videoplayback?noclen=1&itag=140&id=abc.1&sq=3";
        let direct = parse_direct_url(good, TrackKind::Audio).unwrap();
        assert_eq!(direct.itag, 140);
        assert_eq!(direct.video_id, "abc");
        let substituted = direct.template.for_seq(7);
        assert!(substituted.ends_with("&sq=7"));
        assert!(substituted.contains("noclen"));

        // Wrong host.
        assert!(
            parse_direct_url(
                "https://example.com/videoplayback?noclen=1&itag=140&id=x",
                TrackKind::Audio
            )
            .is_err()
        );
        // Not fragmented.
        assert!(
            parse_direct_url(
                "https://r4.googlevideo.com/videoplayback?clen=5&itag=140&id=x",
                TrackKind::Audio
            )
            .is_err()
        );
        // Audio itag on the video track and vice versa.
        assert!(
            parse_direct_url(
                "https://r4.googlevideo.com/videoplayback?noclen=1&itag=140&id=x",
                TrackKind::Video
            )
            .is_err()
        );
        assert!(
            parse_direct_url(
                "https://r4.googlevideo.com/videoplayback?noclen=1&itag=299&id=x",
                TrackKind::Audio
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn refresh_is_rate_limited() {
        let ctrl = controller(RecordingState {
            last_updated: Some(Instant::now()),
            ..Default::default()
        });
        // Inside the rate-limit window: no-op, no network traffic.
        assert!(!ctrl.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_noop_in_direct_mode() {
        let ctrl = controller(RecordingState {
            direct_url_mode: true,
            ..Default::default()
        });
        assert!(!ctrl.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_noop_when_unavailable() {
        let ctrl = controller(RecordingState {
            is_unavailable: true,
            ..Default::default()
        });
        assert!(!ctrl.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn resolve_watch_and_short_urls() {
        for url in [
            "https://www.youtube.com/watch?v=CnWDmKx9cQQ",
            "https://youtu.be/CnWDmKx9cQQ",
        ] {
            let ctrl = controller(RecordingState {
                source_url: url.to_string(),
                ..Default::default()
            });
            ctrl.resolve_input().await.unwrap();
            assert_eq!(ctrl.ctx.lock().video_id, "CnWDmKx9cQQ");
        }
    }

    #[tokio::test]
    async fn resolve_rejects_unknown_hosts_and_missing_ids() {
        for url in [
            "https://vimeo.com/12345",
            "https://www.youtube.com/watch?list=PL123",
            "https://www.youtube.com/feed/subscriptions",
        ] {
            let ctrl = controller(RecordingState {
                source_url: url.to_string(),
                ..Default::default()
            });
            assert!(ctrl.resolve_input().await.is_err(), "accepted {url}");
        }
    }
}
