//! Per-track fragment download workers.
//!
//! Workers pull `(seq, head hint)` jobs from the track's work queue,
//! stream each fragment to a temp file, and hand completed fragments to
//! the assembler. Fetch errors never abort the run: a worker retries,
//! refreshes the signed URL, or sheds itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::{RecordingContext, TrackKind, frag_path};
use crate::error::CaptureError;
use crate::manifest::FragmentUrl;
use crate::state::StateController;

/// Retry budget for a single fragment.
const FRAG_MAX_TRIES: u32 = 10;
/// Consecutive empty work-queue waits before a worker reconsiders its life.
const MAX_STARVED_WAITS: u32 = 10;
/// Whole-fragment retry budget after the per-try budget is exhausted.
const FULL_RETRIES: u32 = 3;

const HEAD_SEQNUM_HEADER: &str = "X-Head-Seqnum";

/// A downloaded fragment staged on disk, ready for ordered writing.
/// Ownership of the temp file passes to the assembler on send.
#[derive(Debug)]
pub(crate) struct Fragment {
    pub seq: u64,
    pub path: PathBuf,
    /// Server's highest produced sequence at download time, 0 if unknown.
    pub head_seqnum: u64,
}

/// Work item: sequence to fetch plus the dispatcher's view of the head.
pub(crate) type SeqJob = (u64, u64);

pub(crate) fn spawn_worker(
    track: TrackKind,
    worker_id: u32,
    ctx: Arc<RecordingContext>,
    state: Arc<StateController>,
    client: Client,
    work_rx: kanal::AsyncReceiver<SeqJob>,
    frags_tx: mpsc::UnboundedSender<Fragment>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_worker(track, worker_id, &ctx, &state, &client, work_rx, frags_tx).await;
        let mut s = ctx.lock();
        let t = s.track_mut(track);
        t.active_workers = t.active_workers.saturating_sub(1);
        debug!(%track, worker_id, "fragment worker exiting");
    })
}

/// Whether a missing fragment at the tail of an ended stream should be
/// written off as never produced.
fn is_trailing_fragment(seq: u64, max_seq_hint: u64, is_live: bool) -> bool {
    max_seq_hint > 0 && !is_live && seq >= max_seq_hint.saturating_sub(2)
}

async fn run_worker(
    track: TrackKind,
    worker_id: u32,
    ctx: &RecordingContext,
    state: &StateController,
    client: &Client,
    work_rx: kanal::AsyncReceiver<SeqJob>,
    frags_tx: mpsc::UnboundedSender<Fragment>,
) {
    let Some(mut url) = ctx.track_url(track) else {
        return;
    };
    let base_path = ctx.lock().track(track).base_path.clone();
    let mut starved_waits = 0u32;

    'work: loop {
        if ctx.is_cancelled() {
            break;
        }

        let (seq, max_seq_hint) =
            match tokio::time::timeout(ctx.target_duration(), work_rx.recv()).await {
                Ok(Ok(job)) => {
                    starved_waits = 0;
                    job
                }
                // Dispatcher hung up; nothing more will be queued.
                Ok(Err(_)) => break,
                Err(_) => {
                    if ctx.is_cancelled() {
                        break;
                    }
                    starved_waits += 1;
                    if starved_waits >= MAX_STARVED_WAITS {
                        if ctx.lock().track(track).active_workers > 1 {
                            debug!(
                                %track,
                                worker_id,
                                "starved for sequence numbers with other workers active, shedding this one"
                            );
                            break;
                        }
                        // Last worker standing: make sure the stream is
                        // actually still live before giving up or looping.
                        if ctx.is_live() {
                            if let Err(err) = state.refresh().await {
                                debug!(%track, error = %err, "state refresh after starvation failed");
                            }
                        }
                        if !ctx.is_live() {
                            debug!(%track, worker_id, "starved for sequence numbers and the stream is offline");
                            break;
                        }
                        debug!(
                            %track,
                            worker_id,
                            waits = MAX_STARVED_WAITS,
                            "no sequence numbers and we are the only downloader; hoping this corrects itself"
                        );
                        starved_waits = 0;
                    }
                    continue;
                }
            };

        if max_seq_hint > 0 && !ctx.is_live() && seq >= max_seq_hint {
            debug!(%track, seq, "stream finished and the highest sequence was reached");
            break;
        }

        let path = frag_path(&base_path, seq);
        let mut tries = 0u32;
        let mut full_retries = FULL_RETRIES;
        let mut was_auth_failure = false;

        loop {
            if ctx.is_cancelled() {
                remove_file_quiet(&path).await;
                break 'work;
            }

            let request_url = url.for_seq(seq);
            match fetch_fragment(client, &request_url, 2 * ctx.target_duration(), &path).await {
                Ok((bytes, head_seqnum)) if bytes > 0 => {
                    let fragment = Fragment {
                        seq,
                        path: path.clone(),
                        head_seqnum,
                    };
                    if frags_tx.send(fragment).is_err() {
                        remove_file_quiet(&path).await;
                        break 'work;
                    }
                    continue 'work;
                }
                Ok(_) => {
                    // Success with an empty body; treat like a failed try.
                    debug!(%track, seq, "fragment fetch returned no data");
                    tries += 1;
                }
                Err(CaptureError::HttpStatus { status, .. })
                    if status == StatusCode::FORBIDDEN =>
                {
                    debug!(%track, seq, "fragment request returned 403, download URL likely expired");
                    was_auth_failure = true;
                    url = refreshed_url(track, ctx, state, url).await;
                    tries += 1;
                }
                Err(CaptureError::HttpStatus { status, .. })
                    if status == StatusCode::NOT_FOUND =>
                {
                    if is_trailing_fragment(seq, max_seq_hint, ctx.is_live()) {
                        debug!(
                            %track,
                            seq,
                            head = max_seq_hint,
                            "stream ended and a fragment within two of the head is missing; it was probably never produced"
                        );
                        remove_file_quiet(&path).await;
                        break 'work;
                    }
                    tries += 1;
                }
                Err(err) => {
                    debug!(%track, seq, error = %err, "error fetching fragment");
                    if is_trailing_fragment(seq, max_seq_hint, ctx.is_live()) {
                        debug!(
                            %track,
                            seq,
                            head = max_seq_hint,
                            "stream ended with this fragment within two of the head; giving it up"
                        );
                        remove_file_quiet(&path).await;
                        break 'work;
                    }
                    tries += 1;
                }
            }

            if tries >= FRAG_MAX_TRIES {
                remove_file_quiet(&path).await;
                full_retries = full_retries.saturating_sub(1);
                debug!(%track, seq, tries, "fragment retry budget exhausted");

                if ctx.is_live() {
                    if let Err(err) = state.refresh().await {
                        debug!(%track, error = %err, "state refresh after retry exhaustion failed");
                    }
                }

                if ctx.is_live() {
                    debug!(%track, seq, "stream still live, continuing download attempts");
                    tries = 0;
                } else if ctx.is_unavailable() && was_auth_failure {
                    warn!(
                        %track,
                        "download URL expired and the stream is private or members-only; cannot continue"
                    );
                    break 'work;
                } else if max_seq_hint > 0
                    && seq < max_seq_hint.saturating_sub(2)
                    && full_retries > 0
                {
                    debug!(
                        %track,
                        seq,
                        full_retries,
                        "fragment is well below the known head; trying it again"
                    );
                    tries = 0;
                } else {
                    break 'work;
                }
            } else {
                // Space retries out by one fragment duration.
                tokio::select! {
                    _ = ctx.cancel_token().cancelled() => {
                        remove_file_quiet(&path).await;
                        break 'work;
                    }
                    _ = tokio::time::sleep(ctx.target_duration()) => {}
                }
            }
        }
    }
}

/// After a 403: another worker may already have refreshed the URL; swap to
/// it. Otherwise ask the controller for a fresh one.
async fn refreshed_url(
    track: TrackKind,
    ctx: &RecordingContext,
    state: &StateController,
    current: FragmentUrl,
) -> FragmentUrl {
    if let Some(latest) = ctx.track_url(track) {
        if latest != current {
            return latest;
        }
    }

    debug!(%track, "attempting to retrieve a new download URL");
    match state.refresh().await {
        Ok(true) => ctx.track_url(track).unwrap_or(current),
        Ok(false) => current,
        Err(err) => {
            debug!(%track, error = %err, "download URL refresh failed");
            current
        }
    }
}

/// Stream one fragment to `path`, truncating any earlier attempt.
/// Returns the byte count and the server's reported head sequence.
async fn fetch_fragment(
    client: &Client,
    url: &str,
    timeout: Duration,
    path: &Path,
) -> Result<(u64, u64), CaptureError> {
    let mut response = client.get(url).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CaptureError::http_status(status, url, "fragment fetch"));
    }

    let head_seqnum = response
        .headers()
        .get(HEAD_SEQNUM_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut file = File::create(path).await?;
    let mut bytes_written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok((bytes_written, head_seqnum))
}

pub(crate) async fn remove_file_quiet(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to delete fragment file");
        }
    }
}
