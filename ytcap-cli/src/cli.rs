use std::path::PathBuf;

use clap::Parser;
use ytcap_engine::{IpFamily, WaitAction};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download livestreams from the very beginning", long_about = None)]
pub struct CliArgs {
    /// Livestream URL. Prompted for when omitted.
    pub url: Option<String>,

    /// Slash-delimited quality preference list, most to least wanted
    /// (e.g. "1080p60/720p60/best"). Prompted for when omitted.
    pub quality: Option<String>,

    /// Wait for a scheduled livestream without asking.
    #[arg(short, long, conflicts_with = "no_wait")]
    pub wait: bool,

    /// Do not wait for a scheduled livestream.
    #[arg(short = 'n', long)]
    pub no_wait: bool,

    /// While waiting, re-probe every SECONDS instead of sleeping until the
    /// scheduled start time. Floored by the poll delay the server suggests.
    #[arg(short = 'r', long, value_name = "SECONDS")]
    pub retry_stream: Option<u64>,

    /// Fragment download workers per track. Total tasks come out to
    /// roughly THREADS * 2 + 3; above 5 rarely helps.
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    pub threads: usize,

    /// Prefer the VP9 encode of the selected quality when available.
    #[arg(long)]
    pub vp9: bool,

    /// Make all connections over IPv4.
    #[arg(short = '4', long, conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Make all connections over IPv6.
    #[arg(short = '6', long)]
    pub ipv6: bool,

    /// Netscape-format cookies file, for members-only streams.
    #[arg(short, long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Output name template, excluding the extension. Keys: id, title,
    /// channel, channel_id, upload_date (each as %(key)s).
    #[arg(
        short,
        long,
        value_name = "TEMPLATE",
        default_value = "%(title)s-%(id)s"
    )]
    pub output: String,

    /// Use this googlevideo URL for the video track.
    #[arg(long, value_name = "URL")]
    pub video_url: Option<String>,

    /// Use this googlevideo URL for the audio track (itag 140).
    #[arg(long, value_name = "URL")]
    pub audio_url: Option<String>,

    /// Do not prompt for a video URL; capture audio only.
    #[arg(long)]
    pub no_video: bool,

    /// Run the mux step without asking when the download is interrupted.
    #[arg(long, conflicts_with = "no_merge")]
    pub merge: bool,

    /// Never run the mux step when the download is interrupted.
    #[arg(long)]
    pub no_merge: bool,

    /// Keep partial files without asking when not merging on interrupt.
    #[arg(long, conflicts_with = "no_save")]
    pub save: bool,

    /// Discard partial files without asking when not merging on interrupt.
    #[arg(long)]
    pub no_save: bool,

    /// Download the thumbnail and embed it in the final file.
    #[arg(short, long)]
    pub thumbnail: bool,

    /// Write the thumbnail to a separate file.
    #[arg(long)]
    pub write_thumbnail: bool,

    /// Write the video description to a separate file.
    #[arg(long)]
    pub write_description: bool,

    /// Embed basic metadata in the final file.
    #[arg(long)]
    pub add_metadata: bool,

    /// Print extra information.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print a lot of extra information.
    #[arg(long)]
    pub debug: bool,
}

/// Three-way decision for the interrupted-download prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ask,
    Do,
    DoNot,
}

impl Action {
    fn from_flags(do_flag: bool, do_not_flag: bool) -> Self {
        match (do_flag, do_not_flag) {
            (true, _) => Action::Do,
            (_, true) => Action::DoNot,
            _ => Action::Ask,
        }
    }
}

impl CliArgs {
    pub fn wait_action(&self) -> WaitAction {
        match Action::from_flags(self.wait, self.no_wait) {
            Action::Do => WaitAction::Do,
            Action::DoNot => WaitAction::DoNot,
            Action::Ask => WaitAction::Ask,
        }
    }

    pub fn merge_action(&self) -> Action {
        Action::from_flags(self.merge, self.no_merge)
    }

    pub fn save_action(&self) -> Action {
        Action::from_flags(self.save, self.no_save)
    }

    pub fn ip_family(&self) -> IpFamily {
        if self.ipv4 {
            IpFamily::V4
        } else if self.ipv6 {
            IpFamily::V6
        } else {
            IpFamily::Any
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::parse_from(["ytcap"]);
        assert_eq!(args.threads, 1);
        assert_eq!(args.output, "%(title)s-%(id)s");
        assert_eq!(args.wait_action(), WaitAction::Ask);
        assert_eq!(args.merge_action(), Action::Ask);
        assert_eq!(args.ip_family(), IpFamily::Any);
    }

    #[test]
    fn positional_url_and_quality() {
        let args = CliArgs::parse_from([
            "ytcap",
            "--threads",
            "3",
            "https://www.youtube.com/watch?v=x",
            "1080p60/best",
        ]);
        assert_eq!(args.url.as_deref(), Some("https://www.youtube.com/watch?v=x"));
        assert_eq!(args.quality.as_deref(), Some("1080p60/best"));
        assert_eq!(args.threads, 3);
    }

    #[test]
    fn action_flags() {
        let args = CliArgs::parse_from(["ytcap", "-n", "--no-merge", "--save"]);
        assert_eq!(args.wait_action(), WaitAction::DoNot);
        assert_eq!(args.merge_action(), Action::DoNot);
        assert_eq!(args.save_action(), Action::Do);
    }

    #[test]
    fn conflicting_flags_rejected() {
        assert!(CliArgs::try_parse_from(["ytcap", "-w", "-n"]).is_err());
        assert!(CliArgs::try_parse_from(["ytcap", "-4", "-6"]).is_err());
    }
}
