//! Building and running the external ffmpeg merge command.

use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use tracing::{debug, error};
use ytcap_engine::MetaInfo;

pub struct MuxPlan<'a> {
    pub audio: &'a Path,
    pub video: Option<&'a Path>,
    pub thumbnail: Option<&'a Path>,
    pub metadata: Option<&'a MetaInfo>,
    pub output: &'a Path,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Full ffmpeg argv (program included) merging the captured tracks into
/// one container, copying streams and attaching the thumbnail when given.
pub fn build_args(plan: &MuxPlan<'_>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "ffmpeg".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-i".into(),
        path_arg(plan.audio),
    ];

    if let Some(thumbnail) = plan.thumbnail {
        args.push("-i".into());
        args.push(path_arg(thumbnail));
    }

    if let Some(video) = plan.video {
        args.push("-i".into());
        args.push(path_arg(video));
        args.push("-movflags".into());
        args.push("faststart".into());

        if plan.thumbnail.is_some() {
            for map in ["0", "1", "2"] {
                args.push("-map".into());
                args.push(map.into());
            }
        }
    }

    args.push("-c".into());
    args.push("copy".into());

    if plan.thumbnail.is_some() {
        args.push("-disposition:v:0".into());
        args.push("attached_pic".into());
    }

    if let Some(metadata) = plan.metadata {
        for (key, value) in metadata.pairs() {
            args.push("-metadata".into());
            args.push(format!("{key}={value}"));
        }
    }

    args.push(path_arg(plan.output));
    args
}

/// Run the merge. Returns `None` when ffmpeg is not installed, after
/// printing the command so the user can run it themselves.
pub async fn run(args: &[String]) -> anyhow::Result<Option<i32>> {
    debug!(command = %args.join(" "), "executing merge command");

    let spawned = tokio::process::Command::new(&args[0])
        .args(&args[1..])
        .stdin(Stdio::null())
        .output()
        .await;

    match spawned {
        Ok(output) => {
            if !output.status.success() {
                error!("{}", String::from_utf8_lossy(&output.stderr).trim_end());
            }
            Ok(Some(output.status.code().unwrap_or(-1)))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            println!("***COMMAND THAT WOULD HAVE BEEN RUN***\n");
            println!("{}", args.join(" "));
            println!(
                "\nffmpeg not found. Install ffmpeg, then run the above command to create the final file."
            );
            Ok(None)
        }
        Err(err) => Err(err).context("failed to spawn ffmpeg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_only_plan() {
        let plan = MuxPlan {
            audio: Path::new("a.f140.ts"),
            video: None,
            thumbnail: None,
            metadata: None,
            output: Path::new("out.m4a"),
        };
        let args = build_args(&plan);
        assert_eq!(
            args,
            vec![
                "ffmpeg",
                "-hide_banner",
                "-loglevel",
                "warning",
                "-i",
                "a.f140.ts",
                "-c",
                "copy",
                "out.m4a"
            ]
        );
    }

    #[test]
    fn full_plan_with_thumbnail_and_metadata() {
        let metadata = MetaInfo {
            title: "T".into(),
            artist: "A".into(),
            date: "20260801".into(),
            comment: String::new(),
        };
        let plan = MuxPlan {
            audio: Path::new("a.f140.ts"),
            video: Some(Path::new("v.f299.ts")),
            thumbnail: Some(Path::new("t.jpg")),
            metadata: Some(&metadata),
            output: Path::new("out.mp4"),
        };
        let args = build_args(&plan);

        assert_eq!(args[5], "a.f140.ts");
        assert_eq!(args[6..8], ["-i", "t.jpg"]);
        assert_eq!(args[8..10], ["-i", "v.f299.ts"]);
        assert!(args.windows(2).any(|w| w == ["-movflags", "faststart"]));
        assert!(args.windows(2).any(|w| w == ["-disposition:v:0", "attached_pic"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "TITLE=T"]));
        // Empty comment is skipped.
        assert!(!args.iter().any(|a| a.starts_with("COMMENT=")));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }
}
