//! Run configuration and HTTP client construction.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};

use crate::error::CaptureError;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// What to do when the stream is a future scheduled broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitAction {
    /// Ask the user interactively.
    #[default]
    Ask,
    /// Wait without asking.
    Do,
    /// Abort without asking.
    DoNot,
}

/// Address family to pin outgoing connections to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl IpFamily {
    /// Local bind address forcing the family, as a client transport option.
    fn local_address(self) -> Option<IpAddr> {
        match self {
            IpFamily::Any => None,
            IpFamily::V4 => Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            IpFamily::V6 => Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Watch, channel `/live`, short-form, or direct media URL.
    pub url: String,
    /// Slash-delimited quality preference list; empty means prompt.
    pub quality: String,
    pub wait: WaitAction,
    /// Poll interval in seconds when waiting; 0 means sleep until the
    /// scheduled start time instead.
    pub retry_secs: u64,
    /// Fragment download workers per track.
    pub thread_count: usize,
    /// Prefer VP9 over h264 when the selected quality has both.
    pub vp9: bool,
    pub ip_family: IpFamily,
    /// Pre-rendered `Cookie` header value, e.g. from a cookies.txt file.
    pub cookie_header: Option<String>,
    /// Pre-signed media URL overrides; either one enables direct-URL mode.
    pub direct_video_url: Option<String>,
    pub direct_audio_url: Option<String>,
    /// Skip the video track entirely.
    pub audio_only: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            quality: String::new(),
            wait: WaitAction::Ask,
            retry_secs: 0,
            thread_count: 1,
            vp9: false,
            ip_family: IpFamily::Any,
            cookie_header: None,
            direct_video_url: None,
            direct_audio_url: None,
            audio_only: false,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.thread_count == 0 {
            return Err(CaptureError::configuration(
                "per-track worker count must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Build the shared HTTP client: browser user agent, optional cookie
/// header, optional address-family pin. Timeouts are per request.
pub(crate) fn build_client(config: &CaptureConfig) -> Result<Client, CaptureError> {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = &config.cookie_header {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| CaptureError::configuration(format!("invalid cookie header: {e}")))?;
        headers.insert(COOKIE, value);
    }

    let mut builder = Client::builder()
        .user_agent(DEFAULT_UA)
        .default_headers(headers);

    if let Some(addr) = config.ip_family.local_address() {
        builder = builder.local_address(addr);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_rejected() {
        let config = CaptureConfig {
            thread_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CaptureConfig::default().validate().is_ok());
    }

    #[test]
    fn ip_family_pins_local_address() {
        assert_eq!(IpFamily::Any.local_address(), None);
        assert_eq!(
            IpFamily::V4.local_address(),
            Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        );
        assert_eq!(
            IpFamily::V6.local_address(),
            Some(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
        );
    }
}
