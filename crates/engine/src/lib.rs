//! Capture a live broadcast from its very first fragment.
//!
//! The engine is built to be launched *before* a broadcast goes live: it
//! discovers the stream, waits out the scheduled start, selects a quality,
//! and then drives two concurrent fragment pipelines (audio + video) that
//! download numbered media fragments in parallel, reorder them, strip the
//! `sidx` container box, and stream them into one well-formed file per
//! track. Signed URLs are refreshed on expiry, trailing fragment gaps are
//! tolerated, and a single cancellation signal drains everything cleanly.
//!
//! The caller supplies CLI parsing, prompts (via [`Prompter`]) and the
//! final mux step; the engine hands back two track files and a summary.

mod assembler;
mod capture;
pub mod config;
mod context;
pub mod error;
mod fetcher;
pub mod filename;
pub mod manifest;
pub mod probe;
pub mod progress;
pub mod quality;
mod state;

pub use capture::{Capture, CaptureSummary};
pub use config::{CaptureConfig, IpFamily, WaitAction};
pub use context::{FormatInfo, MetaInfo, Phase, RecordingContext, TrackKind};
pub use error::CaptureError;
pub use filename::{expand_template, sanitize_filename};
pub use progress::ProgressSnapshot;
pub use state::{Prompter, WaitChoice};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::context::TrackKind;
    use crate::error::CaptureError;
    use crate::state::{Prompter, WaitChoice};

    /// Non-interactive prompter for tests: never waits, never supplies
    /// URLs, always asks for `best`.
    pub(crate) struct NoopPrompter;

    impl Prompter for NoopPrompter {
        fn ask_wait_for_stream(&self, _url: &str) -> Result<WaitChoice, CaptureError> {
            Ok(WaitChoice::No)
        }

        fn select_quality(
            &self,
            _available: &[String],
            _waiting: bool,
        ) -> Result<String, CaptureError> {
            Ok("best".to_string())
        }

        fn direct_url(&self, _track: TrackKind) -> Result<Option<String>, CaptureError> {
            Ok(None)
        }
    }
}
