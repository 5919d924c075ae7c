//! Parsed cracker output records.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Guess block inside a status blob.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HashcatGuess {
    #[serde(default)]
    pub guess_base: Option<String>,
    #[serde(default)]
    pub guess_base_count: i64,
    #[serde(default)]
    pub guess_base_offset: i64,
    #[serde(default)]
    pub guess_base_percent: f64,
    #[serde(default)]
    pub guess_mod: Option<String>,
    #[serde(default)]
    pub guess_mod_count: i64,
    #[serde(default)]
    pub guess_mod_offset: i64,
    #[serde(default)]
    pub guess_mod_percent: f64,
    #[serde(default)]
    pub guess_mode: i64,
}

/// Per-device block inside a status blob.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HashcatDevice {
    #[serde(default)]
    pub device_id: i64,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub speed: i64,
    #[serde(default)]
    pub util: i64,
    #[serde(default)]
    pub temp: i64,
}

/// One `--status-json` blob emitted by the cracker, annotated with the raw
/// line and the time it was observed.
#[derive(Debug, Clone, Deserialize)]
pub struct HashcatStatus {
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub guess: Option<HashcatGuess>,
    /// Two-element sequence: current, total.
    #[serde(default)]
    pub progress: Vec<i64>,
    #[serde(default)]
    pub restore_point: i64,
    /// Two-element sequence: recovered, total.
    #[serde(default)]
    pub recovered_hashes: Vec<i64>,
    /// Two-element sequence: recovered, total.
    #[serde(default)]
    pub recovered_salts: Vec<i64>,
    #[serde(default)]
    pub rejected: i64,
    #[serde(default)]
    pub devices: Vec<HashcatDevice>,
    /// Estimated start, seconds since the epoch.
    #[serde(default)]
    pub time_start: i64,
    /// Estimated stop, seconds since the epoch.
    #[serde(default)]
    pub estimated_stop: i64,
    /// Raw line the blob was parsed from; not part of the JSON.
    #[serde(skip)]
    pub original_line: String,
    /// When the blob was observed; not part of the JSON.
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl HashcatStatus {
    /// Parses a stdout line as a status blob, keeping the raw line.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        let mut status: Self = serde_json::from_str(trimmed).ok()?;
        status.original_line = line.to_string();
        status.received_at = Utc::now();
        Some(status)
    }

    /// Progress as a percentage when the total is known.
    #[must_use]
    pub fn progress_percent(&self) -> Option<f64> {
        match self.progress.as_slice() {
            [current, total, ..] if *total > 0 => {
                #[allow(clippy::cast_precision_loss)]
                Some((*current as f64 / *total as f64) * 100.0)
            }
            _ => None,
        }
    }
}

/// One cracked hash observed from the cracker's outfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrackResult {
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub plain_text: String,
}

impl CrackResult {
    /// Parses an outfile line of the form `hash:plaintext`, splitting on the
    /// first separator so plaintexts may contain colons.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let (hash, plain_text) = line.split_once(':')?;
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: Utc::now(),
            hash: hash.to_string(),
            plain_text: plain_text.to_string(),
        })
    }
}
