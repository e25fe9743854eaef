use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("player response decode error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("discovery failed: {reason}")]
    Discovery { reason: String },

    #[error("`{url}` is not a livestream; a regular VOD downloader is the better tool for it")]
    NotLivestream { url: String },

    #[error("stream appears to be a future scheduled stream, and we opted not to wait")]
    OptedNotToWait,

    #[error("video is unplayable: {reason}")]
    Unplayable { reason: String },

    #[error("livestream is over: {reason}")]
    StreamOver { reason: String },

    #[error("unknown output template key `{key}`")]
    Template { key: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("prompt failed: {reason}")]
    Prompt { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl CaptureError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn discovery(reason: impl Into<String>) -> Self {
        Self::Discovery {
            reason: reason.into(),
        }
    }

    pub fn unplayable(reason: impl Into<String>) -> Self {
        Self::Unplayable {
            reason: reason.into(),
        }
    }

    pub fn stream_over(reason: impl Into<String>) -> Self {
        Self::StreamOver {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn prompt(reason: impl Into<String>) -> Self {
        Self::Prompt {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }
}
