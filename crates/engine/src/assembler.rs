//! Per-track reorder buffer and ordered writer.
//!
//! One assembler owns one output file. It feeds sequence numbers to the
//! track's worker pool, ingests completed fragments in whatever order they
//! finish, and writes them out strictly in order, passing the head of each
//! fragment through the `sidx` filter so concatenation stays playable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::{RecordingContext, TrackKind, track_file};
use crate::error::CaptureError;
use crate::fetcher::{Fragment, SeqJob, remove_file_quiet, spawn_worker};
use crate::progress::ProgressEvent;
use crate::state::StateController;

/// Write retry budget; exhausting it raises the global stop.
const WRITE_MAX_TRIES: u32 = 10;
const IDLE_SLEEP: Duration = Duration::from_millis(100);
/// Keep signed URLs fresh on long captures.
const URL_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Backlog size that justifies respawning shed workers.
const RESPAWN_BACKLOG: u64 = 100;
const CHUNK_SIZE: usize = 8192;

/// Dispatch rule: one past the advertised head is allowed, because
/// fragments can be fetched faster than the head header updates.
fn should_dispatch(next_seq: u64, max_seq: u64) -> bool {
    max_seq == 0 || next_seq <= max_seq + 1
}

/// Stream one staged fragment into the output, excising any `sidx` box
/// from the first chunk. Returns the bytes written.
async fn write_fragment(
    output: &mut BufWriter<File>,
    path: &Path,
) -> Result<u64, CaptureError> {
    let mut input = File::open(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_written = 0u64;

    let n = input.read(&mut buf).await?;
    let head = bmff::strip_sidx(Bytes::copy_from_slice(&buf[..n]));
    output.write_all(&head).await?;
    bytes_written += head.len() as u64;

    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
        bytes_written += n as u64;
    }

    Ok(bytes_written)
}

pub(crate) struct TrackAssembler {
    track: TrackKind,
    ctx: Arc<RecordingContext>,
    state: Arc<StateController>,
    client: Client,
    thread_count: usize,
    progress_tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl TrackAssembler {
    pub(crate) fn new(
        track: TrackKind,
        ctx: Arc<RecordingContext>,
        state: Arc<StateController>,
        client: Client,
        thread_count: usize,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            track,
            ctx,
            state,
            client,
            thread_count,
            progress_tx,
        }
    }

    /// Grow the worker pool back to `thread_count`, seeding one sequence
    /// number per new worker. No-op when the pool is already full.
    async fn top_up_workers(
        &self,
        handles: &mut Vec<tokio::task::JoinHandle<()>>,
        worker_id: &mut u32,
        work_tx: &kanal::AsyncSender<SeqJob>,
        work_rx: &kanal::AsyncReceiver<SeqJob>,
        frags_tx: &mpsc::UnboundedSender<Fragment>,
        next_seq: &mut u64,
        max_seq: u64,
        in_flight: &mut u64,
    ) {
        loop {
            {
                let mut s = self.ctx.lock();
                let t = s.track_mut(self.track);
                if (t.active_workers as usize) >= self.thread_count {
                    break;
                }
                t.active_workers += 1;
            }
            handles.push(spawn_worker(
                self.track,
                *worker_id,
                self.ctx.clone(),
                self.state.clone(),
                self.client.clone(),
                work_rx.clone(),
                frags_tx.clone(),
            ));
            *worker_id += 1;
            if work_tx.send((*next_seq, max_seq)).await.is_ok() {
                *next_seq += 1;
                *in_flight += 1;
            }
        }
    }

    pub(crate) async fn run(self) -> Result<(), CaptureError> {
        let base_path = self.ctx.lock().track(self.track).base_path.clone();
        let output_path = track_file(&base_path);
        let mut output = BufWriter::new(File::create(&output_path).await?);
        info!(track = %self.track, path = %output_path.display(), "starting download");

        let (work_tx, work_rx) = kanal::unbounded_async::<SeqJob>();
        let (frags_tx, mut frags_rx) = mpsc::unbounded_channel::<Fragment>();

        let mut handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();
        let mut worker_id = 0u32;
        let mut next_seq = 0u64;
        let mut write_cursor = 0u64;
        let mut max_seq = 0u64;
        let mut in_flight = 0u64;
        let mut write_tries = WRITE_MAX_TRIES;
        let mut pending: BTreeMap<u64, Fragment> = BTreeMap::new();
        let mut deferred_deletes: Vec<PathBuf> = Vec::new();

        self.top_up_workers(
            &mut handles,
            &mut worker_id,
            &work_tx,
            &work_rx,
            &frags_tx,
            &mut next_seq,
            max_seq,
            &mut in_flight,
        )
        .await;

        loop {
            let stopping = self.ctx.is_cancelled();
            let workers_alive = handles.iter().any(|h| !h.is_finished());

            // Dispatch: drain completed fragments, feed new sequences.
            let mut got_data = false;
            while let Ok(fragment) = frags_rx.try_recv() {
                got_data = true;
                in_flight = in_flight.saturating_sub(1);
                if fragment.head_seqnum > max_seq {
                    max_seq = fragment.head_seqnum;
                }
                pending.insert(fragment.seq, fragment);

                if workers_alive && !stopping && should_dispatch(next_seq, max_seq) {
                    if work_tx.send((next_seq, max_seq)).await.is_ok() {
                        next_seq += 1;
                        in_flight += 1;
                    }
                }
            }

            // Write everything contiguous from the cursor.
            while let Some(fragment) = pending.remove(&write_cursor) {
                match write_fragment(&mut output, &fragment.path).await {
                    Ok(bytes) => {
                        write_cursor += 1;
                        write_tries = WRITE_MAX_TRIES;
                        match tokio::fs::remove_file(&fragment.path).await {
                            Ok(()) => {}
                            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                            Err(err) => {
                                warn!(
                                    track = %self.track,
                                    seq = fragment.seq,
                                    error = %err,
                                    "could not delete fragment; will retry after the download finishes"
                                );
                                deferred_deletes.push(fragment.path.clone());
                            }
                        }
                        let _ = self.progress_tx.send(ProgressEvent {
                            track: self.track,
                            bytes,
                            max_seq,
                        });
                    }
                    Err(err) => {
                        write_tries = write_tries.saturating_sub(1);
                        warn!(
                            track = %self.track,
                            seq = fragment.seq,
                            error = %err,
                            tries_left = write_tries,
                            "error writing fragment to output"
                        );
                        pending.insert(fragment.seq, fragment);
                        if write_tries == 0 {
                            warn!(track = %self.track, "write retries exhausted, stopping the download");
                            self.ctx.cancel();
                        }
                        break;
                    }
                }
            }

            // Workers shed during a disk stall come back once the backlog
            // shows the pool cannot keep up.
            if !stopping && workers_alive && max_seq.saturating_sub(next_seq) > RESPAWN_BACKLOG {
                debug!(track = %self.track, backlog = max_seq - next_seq, "large backlog, topping the worker pool back up");
                self.top_up_workers(
                    &mut handles,
                    &mut worker_id,
                    &work_tx,
                    &work_rx,
                    &frags_tx,
                    &mut next_seq,
                    max_seq,
                    &mut in_flight,
                )
                .await;
            }

            // Hourly refresh keeps the signed URLs from expiring
            // mid-capture, notably for streams privated after ending.
            let refresh_due = {
                let s = self.ctx.lock();
                !s.is_unavailable
                    && s.last_updated
                        .is_some_and(|t| t.elapsed() > URL_REFRESH_INTERVAL)
            };
            if refresh_due {
                if let Err(err) = self.state.refresh().await {
                    debug!(track = %self.track, error = %err, "periodic URL refresh failed");
                }
            }

            if !workers_alive {
                break;
            }

            if !got_data {
                if pending.is_empty() && !stopping && in_flight == 0 {
                    // The queue drained with nothing outstanding; re-seed
                    // it so the pool cannot deadlock waiting for numbers.
                    debug!(
                        track = %self.track,
                        next_seq,
                        "no active downloads and nothing to write, re-seeding the work queue"
                    );
                    let workers = self.ctx.lock().track(self.track).active_workers as u64;
                    while in_flight < workers {
                        if work_tx.send((next_seq, max_seq)).await.is_err() {
                            break;
                        }
                        next_seq += 1;
                        in_flight += 1;
                    }
                }
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }

        // Close the queue so any straggler exits after its drain.
        drop(work_tx);
        for handle in handles {
            let _ = handle.await;
        }

        output.flush().await?;

        // Fragments never written are gap leftovers from early termination.
        while let Ok(fragment) = frags_rx.try_recv() {
            pending.insert(fragment.seq, fragment);
        }
        for fragment in pending.values() {
            remove_file_quiet(&fragment.path).await;
        }
        if !deferred_deletes.is_empty() {
            info!(track = %self.track, "retrying fragment deletions that failed earlier");
            for path in &deferred_deletes {
                remove_file_quiet(path).await;
            }
        }

        debug!(track = %self.track, fragments = write_cursor, "assembler closing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RecordingState, frag_path};
    use crate::probe::InfoProbe;
    use crate::test_support::NoopPrompter;

    fn make_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn dispatch_allows_one_past_head() {
        assert!(should_dispatch(0, 0));
        assert!(should_dispatch(50, 0));
        assert!(should_dispatch(10, 9));
        assert!(should_dispatch(10, 10));
        assert!(!should_dispatch(12, 10));
    }

    #[tokio::test]
    async fn write_fragment_strips_sidx_and_appends_rest() {
        let dir = tempfile::tempdir().unwrap();
        let frag = dir.path().join("in.frag0.ts");

        let styp = make_box(b"styp", &[1; 4]);
        let sidx = make_box(b"sidx", &[9; 40]);
        let moof = make_box(b"moof", &[2; 16]);
        // A payload larger than one read chunk, after the boxes.
        let tail = vec![0xABu8; CHUNK_SIZE * 2 + 17];

        let mut content = styp.clone();
        content.extend_from_slice(&sidx);
        content.extend_from_slice(&moof);
        content.extend_from_slice(&tail);
        tokio::fs::write(&frag, &content).await.unwrap();

        let out_path = dir.path().join("out.ts");
        let mut output = BufWriter::new(File::create(&out_path).await.unwrap());
        let bytes = write_fragment(&mut output, &frag).await.unwrap();
        output.flush().await.unwrap();

        let mut expected = styp;
        expected.extend_from_slice(&moof);
        expected.extend_from_slice(&tail);

        let written = tokio::fs::read(&out_path).await.unwrap();
        assert_eq!(written, expected);
        assert_eq!(bytes, expected.len() as u64);
    }

    #[tokio::test]
    async fn write_fragment_passthrough_without_sidx() {
        let dir = tempfile::tempdir().unwrap();
        let frag = dir.path().join("in.frag1.ts");
        let content = make_box(b"moof", &[7; 64]);
        tokio::fs::write(&frag, &content).await.unwrap();

        let out_path = dir.path().join("out.ts");
        let mut output = BufWriter::new(File::create(&out_path).await.unwrap());
        let bytes = write_fragment(&mut output, &frag).await.unwrap();
        output.flush().await.unwrap();

        assert_eq!(tokio::fs::read(&out_path).await.unwrap(), content);
        assert_eq!(bytes, content.len() as u64);
    }

    /// With no download URL bound, workers exit immediately and the
    /// assembler must terminate cleanly, leaving only the output file.
    #[tokio::test]
    async fn assembler_terminates_when_workers_have_no_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RecordingState::default();
        state.track_mut(TrackKind::Audio).base_path = dir.path().join("stream.f140");
        let ctx = Arc::new(RecordingContext::new(state));
        let controller = Arc::new(StateController::new(
            ctx.clone(),
            InfoProbe::new(Client::new()),
            Arc::new(NoopPrompter),
        ));
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let assembler = TrackAssembler::new(
            TrackKind::Audio,
            ctx.clone(),
            controller,
            Client::new(),
            2,
            progress_tx,
        );
        assembler.run().await.unwrap();

        assert!(dir.path().join("stream.f140.ts").exists());
        assert!(!frag_path(&dir.path().join("stream.f140"), 0).exists());
        assert_eq!(ctx.lock().track(TrackKind::Audio).active_workers, 0);
        assert!(progress_rx.try_recv().is_err());
    }
}
