//! Worker configuration from the environment.
//!
//! Every knob is optional with a compiled default; the webhook signing
//! secret is the one value without a fallback, and its absence fail-stops
//! the webhook cycle (logged and skipped, never delivered unsigned).

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_POLL_MS: u64 = 5_000;
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_BACKOFF_CAP_MINUTES: u32 = 30;
pub const DEFAULT_CLAIM_LEASE_MINUTES: i64 = 15;
pub const DEFAULT_DB_PATH: &str = "reserve-outbox.db";
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";
pub const DEFAULT_FROM_EMAIL: &str = "bookings@reserve.example";
pub const DEFAULT_MAIL_API_URL: &str = "https://mail.reserve.example";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub db_path: PathBuf,
    pub template_dir: PathBuf,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_attempts: u32,
    /// Feature flag for both dispatchers; disabled workers keep polling but
    /// never dequeue.
    pub enabled: bool,
    pub backoff_cap_minutes: u32,
    /// Claims older than this are released on startup (crash recovery).
    pub claim_lease: chrono::Duration,
    /// Shared webhook signing secret. No default on purpose.
    pub webhook_secret: Option<String>,
    /// Base64-encoded 32-byte PII key for guest contact decryption.
    pub pii_key: Option<String>,
    pub from_email: String,
    pub from_number: Option<String>,
    pub mail_api_url: String,
    pub mail_api_key: Option<String>,
    pub sms_api_url: Option<String>,
    pub sms_api_key: Option<String>,
    pub log_json: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enabled: true,
            backoff_cap_minutes: DEFAULT_BACKOFF_CAP_MINUTES,
            claim_lease: chrono::Duration::minutes(DEFAULT_CLAIM_LEASE_MINUTES),
            webhook_secret: None,
            pii_key: None,
            from_email: DEFAULT_FROM_EMAIL.to_string(),
            from_number: None,
            mail_api_url: DEFAULT_MAIL_API_URL.to_string(),
            mail_api_key: None,
            sms_api_url: None,
            sms_api_key: None,
            log_json: false,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an injectable lookup, so tests don't have
    /// to mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(path) = get("RESERVE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(dir) = get("RESERVE_TEMPLATE_DIR") {
            config.template_dir = PathBuf::from(dir);
        }
        if let Some(ms) = get("RESERVE_OUTBOX_POLL_MS").and_then(|v| v.parse().ok()) {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(size) = get("RESERVE_OUTBOX_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            config.batch_size = size;
        }
        if let Some(n) = get("RESERVE_OUTBOX_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.max_attempts = n;
        }
        if let Some(flag) = get("RESERVE_OUTBOX_ENABLED") {
            config.enabled = parse_bool(&flag);
        }
        if let Some(cap) = get("RESERVE_BACKOFF_CAP_MINUTES").and_then(|v| v.parse().ok()) {
            config.backoff_cap_minutes = cap;
        }
        if let Some(minutes) = get("RESERVE_CLAIM_LEASE_MINUTES").and_then(|v| v.parse().ok()) {
            config.claim_lease = chrono::Duration::minutes(minutes);
        }

        config.webhook_secret = get("RESERVE_WEBHOOK_SECRET");
        config.pii_key = get("RESERVE_PII_KEY");

        if let Some(from) = get("RESERVE_FROM_EMAIL") {
            config.from_email = from;
        }
        config.from_number = get("RESERVE_FROM_NUMBER");

        if let Some(url) = get("RESERVE_MAIL_API_URL") {
            config.mail_api_url = url;
        }
        config.mail_api_key = get("RESERVE_MAIL_API_KEY");
        config.sms_api_url = get("RESERVE_SMS_API_URL");
        config.sms_api_key = get("RESERVE_SMS_API_KEY");

        if let Some(flag) = get("RESERVE_LOG_JSON") {
            config.log_json = parse_bool(&flag);
        }

        config
    }

    /// SMS is configured only when gateway URL, key and sender number are
    /// all present.
    pub fn sms_configured(&self) -> bool {
        self.sms_api_url.is_some() && self.sms_api_key.is_some() && self.from_number.is_some()
    }
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(raw: &str) -> bool {
    !matches!(raw.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off")
}
