//! Interactive prompts on stdin, wired into the engine's `Prompter` seam.

use inquire::{Confirm, Select, Text};
use ytcap_engine::{CaptureError, Prompter, TrackKind, WaitChoice};

fn prompt_error(err: inquire::InquireError) -> CaptureError {
    CaptureError::prompt(err.to_string())
}

pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask_wait_for_stream(&self, url: &str) -> Result<WaitChoice, CaptureError> {
        println!("{url} is probably a future scheduled livestream.");
        let choice = Select::new(
            "Wait for the scheduled start time, poll until it starts, or give up?",
            vec!["no", "wait", "poll"],
        )
        .prompt()
        .map_err(prompt_error)?;

        match choice {
            "wait" => Ok(WaitChoice::Wait),
            "poll" => loop {
                let secs = Text::new("Poll interval in seconds (15 or more recommended):")
                    .prompt()
                    .map_err(prompt_error)?;
                match secs.trim().parse::<u64>() {
                    Ok(secs) => return Ok(WaitChoice::Poll(secs)),
                    Err(_) => println!("The poll interval must be a whole number."),
                }
            },
            _ => Ok(WaitChoice::No),
        }
    }

    fn select_quality(&self, available: &[String], waiting: bool) -> Result<String, CaptureError> {
        if waiting {
            println!(
                "Since you are going to wait for the stream, a video quality must be picked up front."
            );
            println!(
                "There is no way to know which qualities will exist before the stream starts, so all possible labels are listed."
            );
            println!(
                "Selection is slash-delimited, first to last preference. Default is 'best'."
            );
        }
        println!("Available video qualities: {}, best", available.join(", "));

        Text::new("Enter desired video quality:")
            .prompt()
            .map_err(prompt_error)
    }

    fn direct_url(&self, track: TrackKind) -> Result<Option<String>, CaptureError> {
        let input = Text::new(&format!("Enter the {track} URL, or nothing to skip:"))
            .prompt()
            .map_err(prompt_error)?;
        let input = input.trim();
        Ok((!input.is_empty()).then(|| input.to_string()))
    }
}

/// Yes/no question with a `no` default, for the interrupt prompts.
pub fn confirm(message: &str) -> bool {
    Confirm::new(message)
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}
