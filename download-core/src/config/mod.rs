//! Download preferences.
//!
//! Settings come from the preference store as a flat JSON object with
//! kebab-case keys, or from `DL_*` environment variables (a `.env` file is
//! honoured). Missing keys fall back to defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::RetryPolicy;
use crate::{Error, Result};

/// Filename-collision policy handed to the host download service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    #[default]
    Uniquify,
    Overwrite,
    Prompt,
}

impl ConflictAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uniquify => "uniquify",
            Self::Overwrite => "overwrite",
            Self::Prompt => "prompt",
        }
    }
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "uniquify" => Ok(Self::Uniquify),
            "overwrite" => Ok(Self::Overwrite),
            "prompt" => Ok(Self::Prompt),
            other => Err(Error::config(format!("unknown conflict action: {other}"))),
        }
    }
}

/// Preferences recognised by the download lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DownloadSettings {
    /// Maximum retry attempts for recoverable errors.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Minutes before a RETRYING download is eligible to resume.
    #[serde(default = "default_retry_time")]
    pub retry_time: u64,
    #[serde(default)]
    pub conflict_action: ConflictAction,
    /// Destination directory override for helper-completed files.
    #[serde(default)]
    pub native_download_folder: Option<PathBuf>,
}

fn default_retries() -> u32 {
    5
}

fn default_retry_time() -> u64 {
    5
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_time: default_retry_time(),
            conflict_action: ConflictAction::default(),
            native_download_folder: None,
        }
    }
}

impl DownloadSettings {
    pub const ENV_RETRIES: &'static str = "DL_RETRIES";
    pub const ENV_RETRY_TIME: &'static str = "DL_RETRY_TIME";
    pub const ENV_CONFLICT_ACTION: &'static str = "DL_CONFLICT_ACTION";
    pub const ENV_NATIVE_DOWNLOAD_FOLDER: &'static str = "DL_NATIVE_DOWNLOAD_FOLDER";

    /// Build settings from a preference-store object. Unknown keys are ignored.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| Error::config(format!("invalid download preferences: {e}"))),
            other => Err(Error::config(format!(
                "download preferences must be an object, got {other}"
            ))),
        }
    }

    /// Build settings from the process environment after loading `.env`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(raw) = lookup(Self::ENV_RETRIES) {
            settings.retries = raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{}: {e}", Self::ENV_RETRIES)))?;
        }
        if let Some(raw) = lookup(Self::ENV_RETRY_TIME) {
            settings.retry_time = raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("{}: {e}", Self::ENV_RETRY_TIME)))?;
        }
        if let Some(raw) = lookup(Self::ENV_CONFLICT_ACTION) {
            settings.conflict_action = raw.parse()?;
        }
        if let Some(raw) = lookup(Self::ENV_NATIVE_DOWNLOAD_FOLDER) {
            let raw = raw.trim();
            settings.native_download_folder = (!raw.is_empty()).then(|| PathBuf::from(raw));
        }

        Ok(settings)
    }

    /// The retry policy handed to each download.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_preferences(self.retries, self.retry_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = DownloadSettings::from_value(json!({})).unwrap();
        assert_eq!(settings, DownloadSettings::default());
        assert_eq!(settings.retries, 5);
        assert_eq!(settings.retry_time, 5);
        assert_eq!(settings.conflict_action, ConflictAction::Uniquify);
        assert!(settings.native_download_folder.is_none());
    }

    #[test]
    fn test_from_preference_object() {
        let settings = DownloadSettings::from_value(json!({
            "retries": 2,
            "retry-time": 10,
            "conflict-action": "overwrite",
            "native-download-folder": "/data/downloads",
            "unrelated-pref": true,
        }))
        .unwrap();

        assert_eq!(settings.retries, 2);
        assert_eq!(settings.retry_time, 10);
        assert_eq!(settings.conflict_action, ConflictAction::Overwrite);
        assert_eq!(
            settings.native_download_folder,
            Some(PathBuf::from("/data/downloads"))
        );

        let policy = settings.retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.retry_delay_ms, 600_000);
    }

    #[test]
    fn test_invalid_preferences() {
        assert!(DownloadSettings::from_value(json!({"retries": "many"})).is_err());
        assert!(DownloadSettings::from_value(json!([1, 2])).is_err());
        assert_eq!(
            DownloadSettings::from_value(Value::Null).unwrap(),
            DownloadSettings::default()
        );
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DL_RETRIES", "7"),
            ("DL_CONFLICT_ACTION", "Prompt"),
            ("DL_NATIVE_DOWNLOAD_FOLDER", " "),
        ]);
        let settings =
            DownloadSettings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.retries, 7);
        assert_eq!(settings.retry_time, 5);
        assert_eq!(settings.conflict_action, ConflictAction::Prompt);
        assert!(settings.native_download_folder.is_none());

        let bad: HashMap<&str, &str> = HashMap::from([("DL_RETRY_TIME", "soon")]);
        assert!(DownloadSettings::from_lookup(|key| bad.get(key).map(|v| v.to_string())).is_err());
    }
}
