//! Discovery endpoint client and the typed player response.
//!
//! A pure request/parse unit: fetch the video info endpoint, form-decode
//! the body, pull out the JSON player response. No retries here; the state
//! controller decides policy when this fails.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::error::CaptureError;

pub const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const INFO_URL: &str = "https://www.youtube.com/get_video_info";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub const PLAYABLE_OK: &str = "OK";
pub const PLAYABLE_OFFLINE: &str = "LIVE_STREAM_OFFLINE";
pub const PLAYABLE_UNPLAYABLE: &str = "UNPLAYABLE";
pub const PLAYABLE_ERROR: &str = "ERROR";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    pub playability_status: Option<PlayabilityStatus>,
    pub video_details: Option<VideoDetails>,
    pub streaming_data: Option<StreamingData>,
    pub microformat: Option<Microformat>,
    pub response_context: Option<ResponseContext>,
}

impl PlayerResponse {
    pub fn live_broadcast_details(&self) -> Option<&LiveBroadcastDetails> {
        self.microformat
            .as_ref()?
            .player_microformat_renderer
            .as_ref()?
            .live_broadcast_details
            .as_ref()
    }

    pub fn start_timestamp(&self) -> Option<&str> {
        self.live_broadcast_details()?.start_timestamp.as_deref()
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.microformat
            .as_ref()?
            .player_microformat_renderer
            .as_ref()?
            .thumbnail
            .as_ref()?
            .thumbnails
            .first()
            .map(|t| t.url.as_str())
    }

    pub fn playability(&self) -> (&str, Option<&str>) {
        match &self.playability_status {
            Some(p) => (p.status.as_deref().unwrap_or(""), p.reason.as_deref()),
            None => ("", None),
        }
    }

    /// Server-suggested poll interval when the stream is offline.
    pub fn poll_delay(&self) -> Option<Duration> {
        let ms: u64 = self
            .playability_status
            .as_ref()?
            .live_streamability
            .as_ref()?
            .live_streamability_renderer
            .as_ref()?
            .poll_delay_ms
            .as_deref()?
            .parse()
            .ok()?;
        Some(Duration::from_millis(ms))
    }

    /// Scheduled broadcast start as a unix timestamp.
    pub fn scheduled_start_epoch(&self) -> Option<i64> {
        self.playability_status
            .as_ref()?
            .live_streamability
            .as_ref()?
            .live_streamability_renderer
            .as_ref()?
            .offline_slate
            .as_ref()?
            .live_stream_offline_slate_renderer
            .as_ref()?
            .scheduled_start_time
            .as_deref()?
            .parse()
            .ok()
    }

    pub fn logged_in(&self) -> Option<bool> {
        self.response_context
            .as_ref()?
            .main_app_web_response_context
            .as_ref()?
            .logged_out
            .map(|out| !out)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    pub status: Option<String>,
    pub reason: Option<String>,
    pub live_streamability: Option<LiveStreamability>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamability {
    pub live_streamability_renderer: Option<LiveStreamabilityRenderer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamabilityRenderer {
    pub poll_delay_ms: Option<String>,
    pub offline_slate: Option<OfflineSlate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSlate {
    pub live_stream_offline_slate_renderer: Option<LiveStreamOfflineSlateRenderer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamOfflineSlateRenderer {
    pub scheduled_start_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub author: String,
    pub short_description: Option<String>,
    #[serde(default)]
    pub is_live_content: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    pub dash_manifest_url: Option<String>,
    #[serde(default)]
    pub adaptive_formats: Vec<AdaptiveFormat>,
    pub expires_in_seconds: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveFormat {
    pub itag: u32,
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    pub quality_label: Option<String>,
    pub target_duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Microformat {
    pub player_microformat_renderer: Option<PlayerMicroformatRenderer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMicroformatRenderer {
    pub live_broadcast_details: Option<LiveBroadcastDetails>,
    pub thumbnail: Option<ThumbnailList>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastDetails {
    #[serde(default)]
    pub is_live_now: bool,
    pub start_timestamp: Option<String>,
    pub end_timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailList {
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    pub main_app_web_response_context: Option<MainAppWebResponseContext>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainAppWebResponseContext {
    pub logged_out: Option<bool>,
}

/// Extract the JSON player response from a form-encoded video info body.
pub fn parse_player_response(body: &str) -> Result<PlayerResponse, CaptureError> {
    let raw = url::form_urlencoded::parse(body.as_bytes())
        .find(|(key, _)| key == "player_response")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| CaptureError::discovery("video info has no player_response field"))?;

    Ok(serde_json::from_str(&raw)?)
}

/// Client for the discovery endpoint and other small text fetches.
#[derive(Clone)]
pub struct InfoProbe {
    client: Client,
}

impl InfoProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch a URL as text with the short probe timeout.
    pub async fn fetch_text(&self, url: &str) -> Result<String, CaptureError> {
        let response = self
            .client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::http_status(status, url, "probe"));
        }

        Ok(response.text().await?)
    }

    /// Fetch and parse the player response for a video id.
    pub async fn player_response(&self, video_id: &str) -> Result<PlayerResponse, CaptureError> {
        let url = format!("{INFO_URL}?video_id={video_id}&el=detailpage");
        let body = self.fetch_text(&url).await?;
        if body.is_empty() {
            return Err(CaptureError::discovery("empty video info response"));
        }

        parse_player_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_form(json: &str) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("status", "ok")
            .append_pair("player_response", json)
            .finish()
    }

    #[test]
    fn parses_form_encoded_player_response() {
        let json = r#"{
            "playabilityStatus": {"status": "OK"},
            "videoDetails": {
                "videoId": "abc123",
                "title": "T & T",
                "channelId": "UCx",
                "author": "someone",
                "isLiveContent": true
            }
        }"#;
        let body = encode_form(json);

        let response = parse_player_response(&body).unwrap();
        let (status, reason) = response.playability();
        assert_eq!(status, PLAYABLE_OK);
        assert_eq!(reason, None);
        let details = response.video_details.unwrap();
        assert_eq!(details.video_id, "abc123");
        assert_eq!(details.title, "T & T");
        assert!(details.is_live_content);
    }

    #[test]
    fn missing_player_response_is_an_error() {
        assert!(parse_player_response("a=b&c=d").is_err());
    }

    #[test]
    fn offline_slate_fields_parse() {
        let json = r#"{
            "playabilityStatus": {
                "status": "LIVE_STREAM_OFFLINE",
                "reason": "Scheduled",
                "liveStreamability": {
                    "liveStreamabilityRenderer": {
                        "pollDelayMs": "15000",
                        "offlineSlate": {
                            "liveStreamOfflineSlateRenderer": {
                                "scheduledStartTime": "1770000000"
                            }
                        }
                    }
                }
            }
        }"#;
        let response: PlayerResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.playability().0, PLAYABLE_OFFLINE);
        assert_eq!(response.poll_delay(), Some(Duration::from_secs(15)));
        assert_eq!(response.scheduled_start_epoch(), Some(1_770_000_000));
    }

    #[test]
    fn logged_in_reads_response_context() {
        let json = r#"{
            "responseContext": {
                "mainAppWebResponseContext": {"loggedOut": true}
            }
        }"#;
        let response: PlayerResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.logged_in(), Some(false));
    }
}
