//! Run orchestration: wire the controller, assemblers and reporter
//! together for one capture.

use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::mpsc;
use tracing::warn;

use crate::assembler::TrackAssembler;
use crate::config::{CaptureConfig, build_client};
use crate::context::{Phase, RecordingContext, RecordingState, TrackKind};
use crate::error::CaptureError;
use crate::probe::InfoProbe;
use crate::progress::{ProgressSnapshot, run_reporter};
use crate::quality::{AUDIO_ITAG, AUDIO_ONLY_ITAG, AUDIO_ONLY_LABEL};
use crate::state::{Prompter, StateController, parse_direct_url};

/// Totals for a finished (or stopped) capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureSummary {
    pub audio_fragments: u64,
    pub video_fragments: u64,
    pub total_bytes: u64,
    pub cancelled: bool,
}

pub struct Capture {
    ctx: Arc<RecordingContext>,
    state: Arc<StateController>,
    client: Client,
    thread_count: usize,
}

impl Capture {
    pub fn new(config: CaptureConfig, prompter: Arc<dyn Prompter>) -> Result<Self, CaptureError> {
        config.validate()?;
        let client = build_client(&config)?;

        let mut state = RecordingState {
            source_url: config.url.clone(),
            selected_quality: config.quality.clone(),
            vp9: config.vp9,
            wait: config.wait,
            retry_secs: config.retry_secs,
            ..Default::default()
        };

        if let Some(raw) = &config.direct_video_url {
            let direct = parse_direct_url(raw, TrackKind::Video)?;
            state.direct_url_mode = true;
            state.track_mut(TrackKind::Video).download_url = Some(direct.template);
            state.set_chosen_itag(direct.itag);
            if state.video_id.is_empty() {
                state.video_id = direct.video_id;
            }
            if state.source_url.is_empty() {
                state.source_url = raw.clone();
            }
        }
        if let Some(raw) = &config.direct_audio_url {
            let direct = parse_direct_url(raw, TrackKind::Audio)?;
            state.direct_url_mode = true;
            state.track_mut(TrackKind::Audio).download_url = Some(direct.template);
            if state.video_id.is_empty() {
                state.video_id = direct.video_id;
            }
            if state.source_url.is_empty() {
                state.source_url = raw.clone();
            }
        }
        if config.audio_only {
            if state.direct_url_mode {
                state.set_chosen_itag(AUDIO_ONLY_ITAG);
            } else {
                state.selected_quality = AUDIO_ONLY_LABEL.to_string();
            }
        }
        if state.source_url.is_empty() {
            return Err(CaptureError::configuration("no input URL given"));
        }

        let ctx = Arc::new(RecordingContext::new(state));
        let probe = InfoProbe::new(client.clone());
        let controller = Arc::new(StateController::new(ctx.clone(), probe, prompter));

        Ok(Self {
            ctx,
            state: controller,
            client,
            thread_count: config.thread_count,
        })
    }

    pub fn context(&self) -> Arc<RecordingContext> {
        self.ctx.clone()
    }

    /// Resolve the input URL and wait until the broadcast is live (or the
    /// direct URLs are complete). Refusals surface as errors.
    pub async fn discover(&self) -> Result<(), CaptureError> {
        self.state.resolve_input().await?;
        self.state.discover().await
    }

    /// Whether a video track will be captured alongside audio.
    pub fn has_video(&self) -> bool {
        self.ctx.track_url(TrackKind::Video).is_some()
    }

    /// Bind the per-track output bases `<dir>/<name>.f<itag>` inside the
    /// working directory. Must run after [`Self::discover`].
    pub fn prepare_output(&self, directory: &Path, base_name: &str) -> Result<(), CaptureError> {
        let chosen = self
            .ctx
            .chosen_itag()
            .ok_or_else(|| CaptureError::configuration("no quality chosen before output setup"))?;

        let mut s = self.ctx.lock();
        s.track_mut(TrackKind::Audio).base_path =
            directory.join(format!("{base_name}.f{AUDIO_ITAG}"));
        if chosen != AUDIO_ONLY_ITAG {
            s.track_mut(TrackKind::Video).base_path =
                directory.join(format!("{base_name}.f{chosen}"));
        }
        Ok(())
    }

    /// Path of a track's output file, as laid out by [`Self::prepare_output`].
    pub fn track_file(&self, track: TrackKind) -> std::path::PathBuf {
        self.ctx.lock().track(track).track_file()
    }

    /// Capture both tracks until the stream ends or the run is cancelled.
    /// One aggregated snapshot is published per written fragment.
    pub async fn run(
        &self,
        snapshots: mpsc::UnboundedSender<ProgressSnapshot>,
    ) -> Result<CaptureSummary, CaptureError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reporter = tokio::spawn(run_reporter(events_rx, snapshots));

        let mut tracks = vec![TrackKind::Audio];
        if self.has_video() {
            tracks.push(TrackKind::Video);
        }

        let mut tasks = Vec::with_capacity(tracks.len());
        for track in tracks {
            let assembler = TrackAssembler::new(
                track,
                self.ctx.clone(),
                self.state.clone(),
                self.client.clone(),
                self.thread_count,
                events_tx.clone(),
            );
            tasks.push((track, tokio::spawn(assembler.run())));
        }
        drop(events_tx);

        let mut failure: Option<CaptureError> = None;
        for (track, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(%track, error = %err, "track download failed");
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    warn!(%track, error = %err, "track task aborted");
                    failure.get_or_insert(CaptureError::Internal {
                        reason: format!("track task aborted: {err}"),
                    });
                }
            }
        }

        let totals = reporter.await.unwrap_or_default();
        let cancelled = self.ctx.is_cancelled();
        {
            let mut s = self.ctx.lock();
            s.phase = if failure.is_some() || cancelled {
                Phase::Aborted
            } else {
                Phase::Done
            };
        }

        if let Some(err) = failure {
            return Err(err);
        }

        Ok(CaptureSummary {
            audio_fragments: totals.audio_fragments,
            video_fragments: totals.video_fragments,
            total_bytes: totals.total_bytes,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaitAction;
    use crate::test_support::NoopPrompter;

    fn prompter() -> Arc<NoopPrompter> {
        Arc::new(NoopPrompter)
    }

    #[test]
    fn rejects_zero_workers() {
        let config = CaptureConfig {
            url: "https://www.youtube.com/watch?v=abc".into(),
            thread_count: 0,
            ..Default::default()
        };
        assert!(Capture::new(config, prompter()).is_err());
    }

    #[test]
    fn rejects_missing_url() {
        let config = CaptureConfig::default();
        assert!(Capture::new(config, prompter()).is_err());
    }

    #[test]
    fn direct_urls_enable_direct_mode() {
        let config = CaptureConfig {
            direct_audio_url: Some(
                "https://r1.googlevideo.com/videoplayback?noclen=1&itag=140&id=vid123.1&sq=0"
                    .into(),
            ),
            direct_video_url: Some(
                "https://r1.googlevideo.com/videoplayback?noclen=1&itag=299&id=vid123.1&sq=0"
                    .into(),
            ),
            wait: WaitAction::DoNot,
            ..Default::default()
        };
        let capture = Capture::new(config, prompter()).unwrap();
        let ctx = capture.context();
        assert!(ctx.lock().direct_url_mode);
        assert_eq!(ctx.video_id(), "vid123");
        assert_eq!(ctx.chosen_itag(), Some(299));
        assert!(capture.has_video());
    }

    #[test]
    fn audio_only_maps_to_quality_preference() {
        let config = CaptureConfig {
            url: "https://www.youtube.com/watch?v=abc".into(),
            audio_only: true,
            ..Default::default()
        };
        let capture = Capture::new(config, prompter()).unwrap();
        assert_eq!(capture.context().lock().selected_quality, "audio_only");
    }

    #[test]
    fn prepare_output_lays_out_track_bases() {
        let config = CaptureConfig {
            direct_audio_url: Some(
                "https://r1.googlevideo.com/videoplayback?noclen=1&itag=140&id=vid123.1&sq=0"
                    .into(),
            ),
            direct_video_url: Some(
                "https://r1.googlevideo.com/videoplayback?noclen=1&itag=299&id=vid123.1&sq=0"
                    .into(),
            ),
            ..Default::default()
        };
        let capture = Capture::new(config, prompter()).unwrap();
        capture
            .prepare_output(Path::new("/tmp/work"), "My Stream-vid123")
            .unwrap();
        assert_eq!(
            capture.track_file(TrackKind::Audio),
            Path::new("/tmp/work/My Stream-vid123.f140.ts")
        );
        assert_eq!(
            capture.track_file(TrackKind::Video),
            Path::new("/tmp/work/My Stream-vid123.f299.ts")
        );
    }
}
