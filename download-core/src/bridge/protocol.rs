//! Message vocabulary spoken with the native helper.
//!
//! Requests and events carry a `type` discriminator. Replies do not; every
//! request gets exactly one reply, in request order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::download::Header;
use crate::{Error, Result};

/// Byte range requested by a preroll probe.
pub const PREROLL_RANGE: &str = "bytes=0-1";

/// Request sent to the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    DownloadStart(DownloadStart),
    DownloadPause { id: String },
    DownloadResume { id: String },
    DownloadCancel { id: String },
    Move { src: String, dst: String },
    Preroll(PrerollQuery),
    StatPath(StatPath),
}

impl BridgeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DownloadStart(_) => "download_start",
            Self::DownloadPause { .. } => "download_pause",
            Self::DownloadResume { .. } => "download_resume",
            Self::DownloadCancel { .. } => "download_cancel",
            Self::Move { .. } => "move",
            Self::Preroll(_) => "preroll",
            Self::StatPath(_) => "stat_path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStart {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerollQuery {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub range: String,
    #[serde(default)]
    pub headers: Vec<Header>,
}

/// Ask the helper whether a directory is usable as a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatPath {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_bytes: Option<u64>,
    #[serde(default)]
    pub auto_create: bool,
}

/// Reply to a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BridgeReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Response headers of a preroll probe, as `[name, value]` pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<(String, String)>>,
    #[serde(
        rename = "finalUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<u64>,
}

impl BridgeReply {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Turn an `ok:false` reply into [`Error::Bridge`].
    pub fn into_result(self) -> Result<Self> {
        if self.ok {
            return Ok(self);
        }
        let message = match (self.error, self.msg) {
            (Some(error), Some(msg)) => format!("{error}: {msg}"),
            (Some(error), None) => error,
            (None, Some(msg)) => msg,
            (None, None) => "request failed".to_string(),
        };
        Err(Error::Bridge(message))
    }

    /// Case-insensitive lookup of a preroll response header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Unsolicited message from the helper about a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeEvent {
    Progress {
        id: String,
        downloaded: u64,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        path: Option<String>,
    },
    Paused {
        id: String,
        #[serde(default)]
        downloaded: u64,
    },
    Cancelled {
        id: String,
    },
    Done(DoneEvent),
    Error {
        id: String,
        #[serde(default)]
        error: String,
    },
}

impl BridgeEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Progress { id, .. }
            | Self::Paused { id, .. }
            | Self::Cancelled { id }
            | Self::Error { id, .. } => id,
            Self::Done(done) => &done.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneEvent {
    pub id: String,
    pub path: String,
    pub size: u64,
    #[serde(rename = "finalUrl", default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply(BridgeReply),
    Event(BridgeEvent),
}

impl Inbound {
    /// Classify a raw frame. Frames with a `type` field are events.
    pub fn from_value(value: Value) -> Result<Self> {
        if value.get("type").is_some() {
            Ok(Self::Event(serde_json::from_value(value)?))
        } else {
            Ok(Self::Reply(serde_json::from_value(value)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = BridgeRequest::DownloadStart(DownloadStart {
            url: "https://example.com/a.iso".to_string(),
            referrer: Some("https://example.com/".to_string()),
            headers: vec![Header::new("Accept", "*/*")],
            method: "GET".to_string(),
            body: None,
            filename: Some("a.iso".to_string()),
        });
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "type": "download_start",
                "url": "https://example.com/a.iso",
                "referrer": "https://example.com/",
                "headers": [{"name": "Accept", "value": "*/*"}],
                "method": "GET",
                "filename": "a.iso",
            })
        );

        let pause = BridgeRequest::DownloadPause {
            id: "job".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&pause).unwrap(),
            json!({"type": "download_pause", "id": "job"})
        );
        assert_eq!(pause.kind(), "download_pause");
    }

    #[test]
    fn test_inbound_routing() {
        let event = Inbound::from_value(json!({
            "type": "progress", "id": "j", "downloaded": 10, "path": "/tmp/x", "total": null
        }))
        .unwrap();
        assert_eq!(
            event,
            Inbound::Event(BridgeEvent::Progress {
                id: "j".to_string(),
                downloaded: 10,
                total: None,
                path: Some("/tmp/x".to_string()),
            })
        );

        let done = Inbound::from_value(json!({
            "type": "done", "id": "j", "path": "/tmp/x", "size": 42,
            "finalUrl": "https://cdn.example.com/x", "status": 200
        }))
        .unwrap();
        match done {
            Inbound::Event(BridgeEvent::Done(done)) => {
                assert_eq!(done.size, 42);
                assert_eq!(done.final_url.as_deref(), Some("https://cdn.example.com/x"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let reply = Inbound::from_value(json!({"ok": true, "id": "j"})).unwrap();
        assert_eq!(
            reply,
            Inbound::Reply(BridgeReply {
                ok: true,
                id: Some("j".to_string()),
                ..Default::default()
            })
        );

        assert!(Inbound::from_value(json!({"type": "mystery"})).is_err());
    }

    #[test]
    fn test_reply_errors_and_headers() {
        let reply: BridgeReply = serde_json::from_value(json!({
            "ok": true,
            "headers": [["Content-Type", "text/html; charset=utf-8"]],
            "finalUrl": "https://example.com/",
            "status": 200,
        }))
        .unwrap();
        assert_eq!(reply.header("content-type"), Some("text/html; charset=utf-8"));
        assert!(reply.into_result().is_ok());

        let err = BridgeReply::failure("unknown id").into_result().unwrap_err();
        assert!(matches!(err, Error::Bridge(ref m) if m == "unknown id"));

        let reply: BridgeReply = serde_json::from_value(json!({
            "ok": false, "error": "not_writable", "msg": "permission denied"
        }))
        .unwrap();
        let err = reply.into_result().unwrap_err();
        assert!(matches!(err, Error::Bridge(ref m) if m == "not_writable: permission denied"));
    }
}
