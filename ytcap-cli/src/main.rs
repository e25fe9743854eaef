use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Text;
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use ytcap_engine::{
    Capture, CaptureConfig, FormatInfo, TrackKind, expand_template, sanitize_filename,
};

mod artifacts;
mod cli;
mod cookies;
mod mux;
mod prompt;

use cli::{Action, CliArgs};
use prompt::StdinPrompter;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let args = CliArgs::parse();

    let level = if args.debug {
        Level::DEBUG
    } else if args.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let cookie_header = match &args.cookies {
        Some(path) => {
            let header = cookies::load_cookie_header(path)?;
            info!(path = %path.display(), "loaded cookie file");
            Some(header)
        }
        None => None,
    };

    let url = match (&args.url, &args.video_url, &args.audio_url) {
        (Some(url), _, _) => url.clone(),
        (None, None, None) => {
            let input = Text::new("Enter a livestream URL:")
                .prompt()
                .context("no URL given")?;
            if input.trim().is_empty() {
                bail!("no URL given");
            }
            input.trim().to_string()
        }
        // A direct URL is the input.
        _ => String::new(),
    };

    // Catch unknown template keys before any network traffic.
    expand_template(&args.output, &FormatInfo::default())
        .context("invalid output template")?;

    let config = CaptureConfig {
        url,
        quality: args.quality.clone().unwrap_or_default(),
        wait: args.wait_action(),
        retry_secs: args.retry_stream.unwrap_or(0),
        thread_count: args.threads,
        vp9: args.vp9,
        ip_family: args.ip_family(),
        cookie_header,
        direct_video_url: args.video_url.clone(),
        direct_audio_url: args.audio_url.clone(),
        audio_only: args.no_video,
    };

    let capture = Capture::new(config, Arc::new(StdinPrompter))?;
    let ctx = capture.context();

    // First Ctrl-C raises the one stop flag; workers drain and exit.
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                warn!("interrupt received, stopping download");
                ctx.cancel();
            }
        });
    }

    capture.discover().await?;

    let format_info = ctx.format_info();
    let expanded = expand_template(&args.output, &format_info)?;
    let expanded_path = PathBuf::from(&expanded);
    let base_name = sanitize_filename(
        expanded_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(""),
    );
    if base_name.trim().is_empty() {
        bail!(
            "output file name is empty (expanded from `{}`)",
            args.output
        );
    }

    let mut out_dir = expanded_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    if out_dir.as_os_str().is_empty() {
        out_dir = PathBuf::from(".");
    }
    if let Err(err) = std::fs::create_dir_all(&out_dir) {
        warn!(
            error = %err,
            dir = %out_dir.display(),
            "could not create the output directory; using the working directory"
        );
        out_dir = PathBuf::from(".");
    }

    let tmpdir = tempfile::Builder::new()
        .prefix(&format!("{}__", ctx.video_id()))
        .tempdir_in(&out_dir)
        .context("failed to create working directory")?;
    capture.prepare_output(tmpdir.path(), &base_name)?;

    let thumbnail_file = tmpdir.path().join(format!("{base_name}.jpg"));
    let desc_file = tmpdir.path().join(format!("{base_name}.description"));
    let mut embed_thumbnail = args.thumbnail;
    let mut write_thumbnail = args.write_thumbnail;
    if embed_thumbnail || write_thumbnail {
        let downloaded = match ctx.thumbnail_url() {
            Some(url) => artifacts::download_thumbnail(&url, &thumbnail_file).await,
            None => false,
        };
        if !downloaded {
            embed_thumbnail = false;
            write_thumbnail = false;
        }
    }

    let metadata = ctx.metadata();
    if args.write_description && !metadata.comment.is_empty() {
        if let Err(err) = std::fs::write(&desc_file, &metadata.comment) {
            warn!(error = %err, "failed to write description file");
        }
    }

    let (snapshot_tx, mut snapshot_rx) =
        mpsc::unbounded_channel::<ytcap_engine::ProgressSnapshot>();
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    let render = progress.clone();
    let show_max_seq = args.debug;
    let progress_task = tokio::spawn(async move {
        while let Some(snapshot) = snapshot_rx.recv().await {
            render.set_message(snapshot.status_line(show_max_seq));
        }
    });

    let summary = capture.run(snapshot_tx).await?;
    let _ = progress_task.await;
    progress.finish_and_clear();

    let audio_tmp = capture.track_file(TrackKind::Audio);
    let video_tmp = capture
        .has_video()
        .then(|| capture.track_file(TrackKind::Video));

    if summary.cancelled {
        println!();
        let merge = match args.merge_action() {
            Action::Do => true,
            Action::DoNot => false,
            Action::Ask => {
                prompt::confirm("Download stopped prematurely. Merge the currently downloaded data?")
            }
        };
        if !merge {
            let save = match args.save_action() {
                Action::Do => true,
                Action::DoNot => false,
                Action::Ask => prompt::confirm("Save the created files?"),
            };
            if save {
                move_out(&audio_tmp, &out_dir);
                if let Some(video) = &video_tmp {
                    move_out(video, &out_dir);
                }
                move_out(&thumbnail_file, &out_dir);
                move_out(&desc_file, &out_dir);
            }
            drop(tmpdir);
            return Ok(2);
        }
    } else {
        println!("\nDownload finished");
    }

    if video_tmp.is_some() && summary.audio_fragments != summary.video_fragments {
        warn!(
            audio = summary.audio_fragments,
            video = summary.video_fragments,
            "mismatched audio and video fragment counts; the files should still merge, but data may be missing somewhere"
        );
    }

    let audio_file = move_out(&audio_tmp, &out_dir);
    let video_file = video_tmp.as_ref().map(|v| move_out(v, &out_dir));
    let thumb_file = move_out(&thumbnail_file, &out_dir);
    move_out(&desc_file, &out_dir);
    drop(tmpdir);

    let audio_only = video_file.is_none();
    let merged = out_dir.join(format!(
        "{base_name}.{}",
        if audio_only { "m4a" } else { "mp4" }
    ));
    if audio_only {
        println!("Correcting audio container");
    } else {
        println!("Muxing files");
    }

    let plan = mux::MuxPlan {
        audio: &audio_file,
        video: video_file.as_deref(),
        thumbnail: embed_thumbnail.then_some(thumb_file.as_path()),
        metadata: args.add_metadata.then_some(&metadata),
        output: &merged,
    };
    match mux::run(&mux::build_args(&plan)).await? {
        None => Ok(0),
        Some(0) => {
            artifacts::try_delete(&audio_file);
            if let Some(video) = &video_file {
                artifacts::try_delete(video);
            }
            if !write_thumbnail {
                artifacts::try_delete(&thumb_file);
            }
            println!("\nFinal file: {}", merged.display());
            Ok(0)
        }
        Some(code) => {
            error!(
                code,
                "ffmpeg failed; keeping the .ts files in case the merged file is broken"
            );
            Ok(code)
        }
    }
}

/// Move a file out of the temp directory, returning its final path.
fn move_out(src: &Path, dir: &Path) -> PathBuf {
    let dst = dir.join(src.file_name().unwrap_or_default());
    artifacts::try_move(src, &dst);
    dst
}
