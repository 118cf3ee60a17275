//! Configuration module for quillsync.
//!
//! Typed configuration structs mapping the YAML configuration file,
//! with per-field defaults, loading, validation, and masked secrets.
//! A file only needs to mention the keys it wants to change; every
//! missing key falls back to its default.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SecretString
// ---------------------------------------------------------------------------

/// Replacement value secrets serialize to.
pub const SECRET_PLACEHOLDER: &str = "<secret>";

/// String wrapper for values that must never reach logs or dumps.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The actual value, for handing to a transport.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(SECRET_PLACEHOLDER)
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str(SECRET_PLACEHOLDER)
        }
    }
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Absolute local directory the books are synced from.
    pub source: String,
    /// Destination root on the device, or the destination e-mail
    /// address in mail mode.
    pub target: String,
    /// Directory holding history databases.
    pub history: String,
    /// When set, only a device with this serial is accepted.
    pub device_serial: String,
    /// Filename suffixes identifying books (case-insensitive).
    pub book_extensions: Vec<String>,
    /// Filename suffixes identifying device-side thumbnails.
    pub thumb_extensions: Vec<String>,
    pub smtp: SmtpConfig,
    pub thumbnails: ThumbnailsConfig,
    pub logging: LoggingConfig,
    pub reporting: ReportingConfig,
}

/// SMTP settings, required in mail mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmtpConfig {
    pub from: String,
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
}

/// Target pixel dimensions for regenerated thumbnails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub width: u32,
    pub height: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file; empty logs to stderr only.
    pub file: String,
}

/// Debug report bundle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportingConfig {
    /// Directory debug report archives are written to.
    pub dir: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quillsync")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .to_string_lossy()
                .replace('\\', "/"),
            target: "documents/mybooks".to_string(),
            history: data_dir().join("history").to_string_lossy().into_owned(),
            device_serial: String::new(),
            book_extensions: [".azw3", ".mobi", ".kfx", ".epub", ".pdf", ".txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            thumb_extensions: [".jpg", ".jpeg"].iter().map(|s| s.to_string()).collect(),
            smtp: SmtpConfig::default(),
            thumbnails: ThumbnailsConfig::default(),
            logging: LoggingConfig::default(),
            reporting: ReportingConfig::default(),
        }
    }
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            width: 330,
            height: 470,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: String::new(),
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("reports").to_string_lossy().into_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and dumping
// ---------------------------------------------------------------------------

impl Config {
    /// Loads configuration from a YAML file. Keys absent from the file
    /// keep their defaults; unknown keys are an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// YAML rendition of the configuration, secrets masked.
    pub fn dump(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Lower-cases extension lists and forward-slashes paths so the
    /// rest of the program never has to.
    fn normalize(&mut self) {
        self.source = self.source.replace('\\', "/");
        while self.source.len() > 1 && self.source.ends_with('/') {
            self.source.pop();
        }
        self.target = self.target.replace('\\', "/");
        for ext in self
            .book_extensions
            .iter_mut()
            .chain(self.thumb_extensions.iter_mut())
        {
            *ext = ext.to_lowercase();
        }
    }

    /// True when the target is a mail address rather than a device path.
    pub fn is_mail_target(&self) -> bool {
        self.target.contains('@')
    }

    /// Creates the history directory if missing and returns it.
    pub fn ensure_history_dir(&self) -> anyhow::Result<PathBuf> {
        let dir = PathBuf::from(&self.history);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"smtp.server"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validates the configuration and returns every problem found.
    /// An empty vector means the configuration is usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.to_string(),
                message,
            });
        };

        if self.source.is_empty() {
            fail("source", "must not be empty".into());
        } else if !Path::new(&self.source).is_dir() {
            fail("source", format!("directory does not exist: {}", self.source));
        }

        if self.target.is_empty() {
            fail("target", "must not be empty".into());
        }
        if self.history.is_empty() {
            fail("history", "must not be empty".into());
        }

        if self.book_extensions.is_empty() {
            fail("book_extensions", "must not be empty".into());
        }
        for ext in &self.book_extensions {
            if !ext.starts_with('.') {
                fail("book_extensions", format!("'{ext}' must start with a dot"));
            }
        }
        if self.thumb_extensions.is_empty() {
            fail("thumb_extensions", "must not be empty".into());
        }
        for ext in &self.thumb_extensions {
            if !ext.starts_with('.') {
                fail("thumb_extensions", format!("'{ext}' must start with a dot"));
            }
        }

        if self.thumbnails.width == 0 {
            fail("thumbnails.width", "must be greater than 0".into());
        }
        if self.thumbnails.height == 0 {
            fail("thumbnails.height", "must be greater than 0".into());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            fail(
                "logging.level",
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }

        // Mail delivery needs a full SMTP setup; only checked when the
        // target actually is an address.
        if self.is_mail_target() {
            if self.smtp.from.is_empty() {
                fail("smtp.from", "sender address required for mail target".into());
            } else if !self.smtp.from.contains('@') {
                fail("smtp.from", format!("not a mail address: {}", self.smtp.from));
            }
            if self.smtp.server.is_empty() {
                fail("smtp.server", "server required for mail target".into());
            }
            if self.smtp.port == 0 {
                fail("smtp.port", "port required for mail target".into());
            }
            if self.smtp.user.is_empty() {
                fail("smtp.user", "user required for mail target".into());
            }
        }

        errors
    }
}
