//! Preflight inspection of a download's server response.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bridge::{BridgeConnector, BridgeRequest, PrerollQuery, protocol::PREROLL_RANGE};
use crate::domain::codes;
use crate::download::Header;
use crate::{Error, Result};

/// What the preroll step is asked to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerollRequest {
    pub url: String,
    pub referrer: Option<String>,
    pub headers: Vec<Header>,
}

/// Metadata learned by a preroll, or the error code that aborts the download.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerollOutcome {
    pub mime: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "finalURL")]
    pub final_url: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait Preroller: Send + Sync {
    fn should_preroll(&self, request: &PrerollRequest) -> bool;

    /// Inspect the server. `None` means nothing was learned.
    async fn roll(&self, request: &PrerollRequest) -> Result<Option<PrerollOutcome>>;
}

/// Preroller that never runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreroll;

#[async_trait]
impl Preroller for NoPreroll {
    fn should_preroll(&self, _request: &PrerollRequest) -> bool {
        false
    }

    async fn roll(&self, _request: &PrerollRequest) -> Result<Option<PrerollOutcome>> {
        Ok(None)
    }
}

/// Prerolls through the native helper's `preroll` request.
pub struct BridgePreroller {
    connector: Arc<dyn BridgeConnector>,
}

impl BridgePreroller {
    pub fn new(connector: Arc<dyn BridgeConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Preroller for BridgePreroller {
    fn should_preroll(&self, request: &PrerollRequest) -> bool {
        url::Url::parse(&request.url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    async fn roll(&self, request: &PrerollRequest) -> Result<Option<PrerollOutcome>> {
        let (channel, _events) = match self.connector.connect().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Preroll skipped, helper unavailable");
                return Ok(None);
            }
        };

        let reply = channel
            .request(BridgeRequest::Preroll(PrerollQuery {
                url: request.url.clone(),
                referrer: request.referrer.clone(),
                range: PREROLL_RANGE.to_string(),
                headers: request.headers.clone(),
            }))
            .await;
        channel.disconnect();

        let reply = match reply {
            Ok(reply) => reply,
            Err(Error::Bridge(message)) => {
                debug!(url = %request.url, error = %message, "Preroll request failed");
                return Ok(Some(PrerollOutcome {
                    error: Some(codes::NETWORK_FAILED.to_string()),
                    ..Default::default()
                }));
            }
            Err(e) => return Err(e),
        };

        Ok(Some(PrerollOutcome {
            mime: reply.header("Content-Type").and_then(parse_mime),
            name: reply
                .header("Content-Disposition")
                .and_then(parse_disposition_filename),
            final_url: reply.final_url.clone(),
            error: reply.status.and_then(status_error).map(str::to_string),
        }))
    }
}

/// Error code for an HTTP status, if the status aborts the download.
pub fn status_error(status: u16) -> Option<&'static str> {
    match status {
        401 => Some(codes::SERVER_UNAUTHORIZED),
        403 => Some(codes::SERVER_FORBIDDEN),
        404 | 410 => Some(codes::SERVER_BAD_CONTENT),
        500..=599 => Some(codes::SERVER_FAILED),
        _ => None,
    }
}

/// `text/html; charset=utf-8` -> `text/html`
pub fn parse_mime(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    (!mime.is_empty()).then_some(mime)
}

/// Extract the filename from a Content-Disposition value. The RFC 5987
/// `filename*` form wins over plain `filename`.
pub fn parse_disposition_filename(disposition: &str) -> Option<String> {
    let mut plain = None;
    for param in disposition.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "filename*" {
            let encoded = value.rsplit_once('\'').map(|(_, v)| v).unwrap_or(value);
            if let Ok(decoded) = urlencoding::decode(encoded.trim_matches('"')) {
                if !decoded.is_empty() {
                    return Some(decoded.into_owned());
                }
            }
        } else if key == "filename" && plain.is_none() {
            let name = value.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBridge;
    use serde_json::json;

    fn request() -> PrerollRequest {
        PrerollRequest {
            url: "https://example.com/file.bin".to_string(),
            referrer: Some("https://example.com/".to_string()),
            headers: Vec::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_error(200), None);
        assert_eq!(status_error(206), None);
        assert_eq!(status_error(401), Some("SERVER_UNAUTHORIZED"));
        assert_eq!(status_error(403), Some("SERVER_FORBIDDEN"));
        assert_eq!(status_error(410), Some("SERVER_BAD_CONTENT"));
        assert_eq!(status_error(503), Some("SERVER_FAILED"));
    }

    #[test]
    fn test_header_parsing() {
        assert_eq!(
            parse_mime("Application/Zip; charset=binary").as_deref(),
            Some("application/zip")
        );
        assert_eq!(parse_mime(" ; x"), None);

        assert_eq!(
            parse_disposition_filename("attachment; filename=\"report.pdf\"").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            parse_disposition_filename(
                "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt"
            )
            .as_deref(),
            Some("naïve file.txt")
        );
        assert_eq!(parse_disposition_filename("inline"), None);
    }

    #[test]
    fn test_only_http_is_prerolled() {
        let preroller = BridgePreroller::new(Arc::new(FakeBridge::new()));
        assert!(preroller.should_preroll(&request()));

        let mut ftp = request();
        ftp.url = "ftp://example.com/file".to_string();
        assert!(!preroller.should_preroll(&ftp));
    }

    #[tokio::test]
    async fn test_roll_through_bridge() {
        let bridge = FakeBridge::new().with_preroll_reply(json!({
            "ok": true,
            "headers": [
                ["Content-Type", "video/mp4"],
                ["Content-Disposition", "attachment; filename=\"clip.mp4\""],
            ],
            "finalUrl": "https://cdn.example.com/clip.mp4",
            "status": 206,
        }));
        let preroller = BridgePreroller::new(Arc::new(bridge.clone()));

        let outcome = preroller.roll(&request()).await.unwrap().unwrap();
        assert_eq!(outcome.mime.as_deref(), Some("video/mp4"));
        assert_eq!(outcome.name.as_deref(), Some("clip.mp4"));
        assert_eq!(
            outcome.final_url.as_deref(),
            Some("https://cdn.example.com/clip.mp4")
        );
        assert_eq!(outcome.error, None);

        let sent = bridge.requests_of("preroll");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["range"], "bytes=0-1");
        assert_eq!(sent[0]["referrer"], "https://example.com/");
    }

    #[tokio::test]
    async fn test_roll_maps_failures() {
        let forbidden = FakeBridge::new().with_preroll_reply(json!({
            "ok": true, "headers": [], "finalUrl": "https://example.com/file.bin", "status": 403
        }));
        let outcome = BridgePreroller::new(Arc::new(forbidden))
            .roll(&request())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("SERVER_FORBIDDEN"));

        let unreachable = FakeBridge::new()
            .with_preroll_reply(json!({"ok": false, "error": "timed out"}));
        let outcome = BridgePreroller::new(Arc::new(unreachable))
            .roll(&request())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("NETWORK_FAILED"));

        let offline = BridgePreroller::new(Arc::new(FakeBridge::new().refuse_connections()));
        assert_eq!(offline.roll(&request()).await.unwrap(), None);
    }
}
