//! Run configuration
//!
//! Loaded from a TOML file. A `.env` file is read first so that
//! secrets such as `TELEGRAM_BOT_TOKEN` can live outside the config.
//!
//! ```toml
//! timezone = "Atlantic/Canary"
//! placeholder = "-"
//!
//! [telegram]
//! token = "123456:ABC"
//!
//! [[mailboxes]]
//! host = "mail.example.com"
//! username = "alerts@example.com"
//! password = "secret"
//! inbox = "alerts@example.com"
//! chat_id = "-1001234567890"
//! ```

use crate::error::{Error, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_API_URL: &str = "https://api.telegram.org";
const DEFAULT_LOG_MAX_FILES: usize = 4;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA timezone dates are converted to before rendering.
    pub timezone: String,
    /// Literal rendered for any field that could not be extracted.
    pub placeholder: String,
    /// Append the originating inbox to the rendered message.
    pub include_inbox: bool,
    /// Send notifications through the chat destination.
    pub notify: bool,
    /// Delete messages once they have been dispatched.
    pub delete: bool,
    /// Optional plain-text log file.
    pub log_file: Option<PathBuf>,
    /// How often the log file is rolled over.
    pub log_rotation: LogRotation,
    /// Log files kept on disk, the current one included.
    pub log_max_files: usize,
    pub telegram: TelegramConfig,
    pub mailboxes: Vec<MailboxConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            placeholder: "-".to_string(),
            include_inbox: false,
            notify: true,
            delete: true,
            log_file: None,
            log_rotation: LogRotation::default(),
            log_max_files: DEFAULT_LOG_MAX_FILES,
            telegram: TelegramConfig::default(),
            mailboxes: Vec::new(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub api_url: String,
    pub parse_mode: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
            parse_mode: "Markdown".to_string(),
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .field("parse_mode", &self.parse_mode)
            .finish()
    }
}

/// Log file rollover period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// How the IMAP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain TCP upgraded with STARTTLS (port 143).
    #[default]
    StartTls,
    /// TLS from the first byte (port 993).
    Implicit,
}

/// One polled mailbox and where its alerts go.
#[derive(Clone, Deserialize)]
pub struct MailboxConfig {
    /// Label used in logs. Defaults to `username@host`.
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: TlsMode,
    /// Skip certificate verification (local bridges, self-signed certs).
    #[serde(default)]
    pub accept_invalid_certs: bool,
    pub username: String,
    pub password: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Only dispatch alerts received at this inbox.
    #[serde(default)]
    pub inbox: Option<String>,
    /// Treat a body that does not mention `inbox` as unparseable.
    #[serde(default)]
    pub require_inbox_in_body: bool,
    /// Chat the rendered alerts are sent to.
    pub chat_id: String,
}

const fn default_port() -> u16 {
    143
}

fn default_folder() -> String {
    "INBOX".to_string()
}

impl MailboxConfig {
    /// Label used in logs and reports.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}@{}", self.username, self.host))
    }

    /// The substring the body must contain, if verification is on.
    #[must_use]
    pub fn required_inbox(&self) -> Option<&str> {
        if self.require_inbox_in_body {
            self.inbox.as_deref()
        } else {
            None
        }
    }
}

impl fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("folder", &self.folder)
            .field("inbox", &self.inbox)
            .field("require_inbox_in_body", &self.require_inbox_in_body)
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl Config {
    /// Load and validate the configuration file.
    ///
    /// The path is taken from `path`, else `ALERTMAIL_CONFIG`, else
    /// `config.toml` in the working directory. `TELEGRAM_BOT_TOKEN`
    /// overrides `telegram.token` when set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.map_or_else(
            || {
                env::var("ALERTMAIL_CONFIG")
                    .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
            },
            Path::to_path_buf,
        );

        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {e}", path.display()))
        })?;

        let mut config = Self::from_toml(&text)?;
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            config.telegram.token = Some(token);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document without touching the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {e}")))
    }

    /// Check the invariants the dispatcher relies on.
    pub fn validate(&self) -> Result<()> {
        if self.mailboxes.is_empty() {
            return Err(Error::Config("No mailboxes configured".into()));
        }
        self.tz()?;
        if self.log_max_files == 0 {
            return Err(Error::Config("log_max_files must be at least 1".into()));
        }
        for mailbox in &self.mailboxes {
            if mailbox.host.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Mailbox {}: host is empty",
                    mailbox.label()
                )));
            }
            if mailbox.username.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Mailbox {}: username is empty",
                    mailbox.label()
                )));
            }
            if mailbox.chat_id.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Mailbox {}: chat_id is empty",
                    mailbox.label()
                )));
            }
            if mailbox.require_inbox_in_body && mailbox.inbox.is_none() {
                return Err(Error::Config(format!(
                    "Mailbox {}: require_inbox_in_body needs an inbox",
                    mailbox.label()
                )));
            }
        }
        Ok(())
    }

    /// The configured target timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| Error::Config(format!("Invalid timezone '{}': {e}", self.timezone)))
    }
}
