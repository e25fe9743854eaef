//! Shared per-run state: one struct, one lock, one cancellation token.
//!
//! Every component holds an `Arc<RecordingContext>`. Mutable run state
//! lives behind a single mutex; fragments and progress travel over
//! channels, so the lock is only taken for flag reads and URL swaps.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::WaitAction;
use crate::filename::sanitize_filename;
use crate::manifest::FragmentUrl;
use crate::probe::{PlayerResponse, WATCH_URL_PREFIX};

/// The two media tracks captured per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream lifecycle, driven by probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    Waiting,
    Live,
    Finishing,
    Done,
    Aborted,
}

/// Per-track download state.
#[derive(Debug, Default)]
pub struct TrackState {
    /// Current URL template; rebound on refresh.
    pub download_url: Option<FragmentUrl>,
    /// Workers currently running for this track. Only ever decremented by
    /// an exiting worker.
    pub active_workers: u32,
    /// `<dir>/<name>.f<itag>`, set before capture starts.
    pub base_path: PathBuf,
}

impl TrackState {
    /// Temp file a fetched fragment is staged in before ordered writing.
    pub fn frag_path(&self, seq: u64) -> PathBuf {
        frag_path(&self.base_path, seq)
    }

    /// The track's output container file.
    pub fn track_file(&self) -> PathBuf {
        track_file(&self.base_path)
    }
}

/// `<base>.frag<seq>.ts`
pub(crate) fn frag_path(base: &std::path::Path, seq: u64) -> PathBuf {
    let mut os = base.to_path_buf().into_os_string();
    os.push(format!(".frag{seq}.ts"));
    PathBuf::from(os)
}

/// `<base>.ts`
pub(crate) fn track_file(base: &std::path::Path) -> PathBuf {
    let mut os = base.to_path_buf().into_os_string();
    os.push(".ts");
    PathBuf::from(os)
}

/// Fields available for output file name formatting, sanitized on capture.
#[derive(Debug, Clone, Default)]
pub struct FormatInfo {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel: String,
    pub upload_date: String,
}

impl FormatInfo {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "id" => Some(&self.id),
            "title" => Some(&self.title),
            "channel_id" => Some(&self.channel_id),
            "channel" => Some(&self.channel),
            "upload_date" => Some(&self.upload_date),
            _ => None,
        }
    }

    pub(crate) fn capture(&mut self, response: &PlayerResponse) {
        let Some(details) = &response.video_details else {
            return;
        };

        // `uploadDate` is when the broadcast was created; the actual start
        // date comes from the live broadcast details.
        let start_date = response
            .start_timestamp()
            .map(|ts| ts.replace('-', "").chars().take(8).collect::<String>())
            .unwrap_or_default();

        self.id = sanitize_filename(&details.video_id);
        self.title = sanitize_filename(&details.title);
        self.channel_id = sanitize_filename(&details.channel_id);
        self.channel = sanitize_filename(&details.author);
        self.upload_date = sanitize_filename(&start_date);
    }
}

/// Metadata embedded in the final container by the mux step.
#[derive(Debug, Clone, Default)]
pub struct MetaInfo {
    pub title: String,
    pub artist: String,
    pub date: String,
    pub comment: String,
}

impl MetaInfo {
    pub(crate) fn capture(&mut self, response: &PlayerResponse) {
        let Some(details) = &response.video_details else {
            return;
        };
        let start_date = response
            .start_timestamp()
            .map(|ts| ts.replace('-', "").chars().take(8).collect::<String>())
            .unwrap_or_default();

        self.title = details.title.clone();
        self.artist = details.author.clone();
        self.date = start_date;
        // MP4 has no URL metadata field; carry it at the top of the comment.
        self.comment = format!(
            "{}{}\n\n{}",
            WATCH_URL_PREFIX,
            details.video_id,
            details.short_description.as_deref().unwrap_or_default()
        );
    }

    /// `(key, value)` pairs for `-metadata` arguments, empty values skipped.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("TITLE", self.title.as_str()),
            ("ARTIST", self.artist.as_str()),
            ("DATE", self.date.as_str()),
            ("COMMENT", self.comment.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .collect()
    }
}

/// Mutable state shared across the controller, assemblers and fetchers.
#[derive(Debug)]
pub struct RecordingState {
    pub video_id: String,
    pub source_url: String,
    pub selected_quality: String,
    /// Fixed for the run once set; `AUDIO_ONLY_ITAG` means no video track.
    pub chosen_itag: Option<u32>,
    pub phase: Phase,
    pub is_live: bool,
    pub in_progress: bool,
    pub is_unavailable: bool,
    pub direct_url_mode: bool,
    pub vp9: bool,
    pub wait: WaitAction,
    pub retry_secs: u64,
    pub dash_manifest_url: Option<String>,
    pub expires_in: Duration,
    pub target_duration: Duration,
    pub last_updated: Option<Instant>,
    pub thumbnail_url: Option<String>,
    pub format_info: FormatInfo,
    pub metadata: MetaInfo,
    pub(crate) audio: TrackState,
    pub(crate) video: TrackState,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self {
            video_id: String::new(),
            source_url: String::new(),
            selected_quality: String::new(),
            chosen_itag: None,
            phase: Phase::Discovering,
            is_live: false,
            in_progress: false,
            is_unavailable: false,
            direct_url_mode: false,
            vp9: false,
            wait: WaitAction::Ask,
            retry_secs: 0,
            dash_manifest_url: None,
            // Usual 5h59m URL expiration.
            expires_in: Duration::from_secs(21_540),
            target_duration: Duration::from_secs(5),
            last_updated: None,
            thumbnail_url: None,
            format_info: FormatInfo::default(),
            metadata: MetaInfo::default(),
            audio: TrackState::default(),
            video: TrackState::default(),
        }
    }
}

impl RecordingState {
    pub fn track(&self, kind: TrackKind) -> &TrackState {
        match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        }
    }

    pub fn track_mut(&mut self, kind: TrackKind) -> &mut TrackState {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    /// Fix the chosen video itag for the rest of the run. Later calls with
    /// a different value are ignored.
    pub fn set_chosen_itag(&mut self, itag: u32) {
        if self.chosen_itag.is_none() {
            self.chosen_itag = Some(itag);
        }
    }
}

/// Shared context: the run state mutex plus the cancellation signal every
/// blocking loop observes.
pub struct RecordingContext {
    state: Mutex<RecordingState>,
    cancel: CancellationToken,
}

impl RecordingContext {
    pub fn new(state: RecordingState) -> Self {
        Self {
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Raise the global stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_live(&self) -> bool {
        self.lock().is_live
    }

    pub fn is_unavailable(&self) -> bool {
        self.lock().is_unavailable
    }

    pub fn in_progress(&self) -> bool {
        self.lock().in_progress
    }

    pub fn video_id(&self) -> String {
        self.lock().video_id.clone()
    }

    pub fn chosen_itag(&self) -> Option<u32> {
        self.lock().chosen_itag
    }

    pub fn format_info(&self) -> FormatInfo {
        self.lock().format_info.clone()
    }

    pub fn metadata(&self) -> MetaInfo {
        self.lock().metadata.clone()
    }

    pub fn thumbnail_url(&self) -> Option<String> {
        self.lock().thumbnail_url.clone()
    }

    pub fn track_url(&self, kind: TrackKind) -> Option<FragmentUrl> {
        self.lock().track(kind).download_url.clone()
    }

    /// Server-reported fragment duration, floored at one second so it is
    /// always usable as a timeout or sleep.
    pub fn target_duration(&self) -> Duration {
        self.lock().target_duration.max(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chosen_itag_is_write_once() {
        let mut state = RecordingState::default();
        state.set_chosen_itag(299);
        state.set_chosen_itag(303);
        assert_eq!(state.chosen_itag, Some(299));
    }

    #[test]
    fn target_duration_is_floored() {
        let ctx = RecordingContext::new(RecordingState {
            target_duration: Duration::ZERO,
            ..Default::default()
        });
        assert_eq!(ctx.target_duration(), Duration::from_secs(1));
    }

    #[test]
    fn track_paths_derive_from_base() {
        let track = TrackState {
            base_path: PathBuf::from("/tmp/work/stream.f140"),
            ..Default::default()
        };
        assert_eq!(track.track_file(), PathBuf::from("/tmp/work/stream.f140.ts"));
        assert_eq!(
            track.frag_path(42),
            PathBuf::from("/tmp/work/stream.f140.frag42.ts")
        );
    }
}
