//! Backend-agnostic transfer request.

use serde::{Deserialize, Serialize};

/// Header name carrying the page the download was started from.
pub const REFERER_HEADER: &str = "Referer";

/// Private header used to correlate a transfer with its download when the
/// host service does not accept a Referer header.
pub const CORRELATION_HEADER: &str = "X-Download-Id";

/// A single HTTP request header, serialized as `{name, value}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn is_referrer(&self) -> bool {
        self.name.eq_ignore_ascii_case(REFERER_HEADER)
    }
}

pub(crate) fn strip_referrer(headers: &mut Vec<Header>) -> bool {
    let before = headers.len();
    headers.retain(|header| !header.is_referrer());
    headers.len() != before
}

/// What either backend needs to perform a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
}

impl TransferRequest {
    /// Build a request for `url`, posting `post_data` when present.
    ///
    /// The referrer travels as a Referer header, or as the correlation header
    /// carrying `download_id` when the host service cannot take a referrer.
    pub fn build(
        url: &str,
        referrer: Option<&str>,
        post_data: Option<&str>,
        download_id: &str,
        host_supports_referrer: bool,
    ) -> Self {
        let mut headers = Vec::new();
        if let Some(referrer) = referrer.filter(|r| !r.is_empty()) {
            if host_supports_referrer {
                headers.push(Header::new(REFERER_HEADER, referrer));
            } else {
                headers.push(Header::new(CORRELATION_HEADER, download_id));
            }
        }

        let (method, body) = match post_data {
            Some(data) => ("POST", Some(data.to_string())),
            None => ("GET", None),
        };

        Self {
            url: url.to_string(),
            method: method.to_string(),
            body,
            headers,
        }
    }
}
