//! Progress aggregation across the two track assemblers.

use tokio::sync::mpsc;

use crate::context::TrackKind;

/// Emitted by an assembler after each fragment is written to its track.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub track: TrackKind,
    pub bytes: u64,
    /// Highest server-reported sequence known to that track, 0 if unknown.
    pub max_seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub video_fragments: u64,
    pub audio_fragments: u64,
    pub total_bytes: u64,
    pub max_seq: u64,
}

impl ProgressSnapshot {
    pub fn status_line(&self, show_max_seq: bool) -> String {
        let mut line = format!(
            "Video fragments: {}; Audio fragments: {}; ",
            self.video_fragments, self.audio_fragments
        );
        if show_max_seq {
            line.push_str(&format!("Max sequence: {}; ", self.max_seq));
        }
        line.push_str(&format!(
            "Total Downloaded: {}",
            format_size(self.total_bytes)
        ));
        line
    }
}

#[derive(Debug, Default)]
pub struct ProgressAggregator {
    snapshot: ProgressSnapshot,
}

impl ProgressAggregator {
    pub fn apply(&mut self, event: &ProgressEvent) -> ProgressSnapshot {
        match event.track {
            TrackKind::Audio => self.snapshot.audio_fragments += 1,
            TrackKind::Video => self.snapshot.video_fragments += 1,
        }
        self.snapshot.total_bytes += event.bytes;
        if event.max_seq > self.snapshot.max_seq {
            self.snapshot.max_seq = event.max_seq;
        }
        self.snapshot
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
    }
}

/// Pretty formatting of a byte count. Terabyte streams are somebody
/// else's problem.
pub fn format_size(bytes: u64) -> String {
    const POSTFIXES: &[&str] = &["bytes", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut i = 0;
    while size > 1024.0 && i < POSTFIXES.len() - 1 {
        size /= 1024.0;
        i += 1;
    }
    format!("{size:.2}{}", POSTFIXES[i])
}

/// Drain progress events, publishing one snapshot per incoming event.
/// Returns the final totals once every assembler has hung up.
pub(crate) async fn run_reporter(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    snapshots: mpsc::UnboundedSender<ProgressSnapshot>,
) -> ProgressSnapshot {
    let mut aggregator = ProgressAggregator::default();
    while let Some(event) = events.recv().await {
        let snapshot = aggregator.apply(&event);
        // Best effort; the consumer may have gone away.
        let _ = snapshots.send(snapshot);
    }
    aggregator.snapshot()
}
