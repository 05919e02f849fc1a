//! Notification records — the core data model for scheduled alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tidings_core::error::{Result, TidingsError};

/// Reserved metadata key that carries a record's identifier through the
/// delivery store, so the record can be rebuilt from a native entry.
pub const IDENTIFIER_KEY: &str = "tidings.identifier";

/// A notification that is unscheduled, queued, or admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, fixed for the record's lifetime.
    identifier: String,
    /// Text shown to the user.
    pub alert_body: String,
    /// Optional action label.
    pub alert_action: Option<String>,
    /// When the notification is due. `None` until first scheduled.
    pub fire_date: Option<DateTime<Utc>>,
    /// How often the notification repeats after firing.
    #[serde(default)]
    pub repeat_interval: RepeatInterval,
    /// Free-form metadata. Always holds [`IDENTIFIER_KEY`].
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Repeat interval of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatInterval {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RepeatInterval {
    /// Next occurrence after `from`, or `None` for non-repeating records.
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RepeatInterval::None => None,
            RepeatInterval::Hourly => Some(from + chrono::Duration::hours(1)),
            RepeatInterval::Daily => Some(from + chrono::Duration::days(1)),
            RepeatInterval::Weekly => Some(from + chrono::Duration::weeks(1)),
            RepeatInterval::Monthly => from.checked_add_months(chrono::Months::new(1)),
            RepeatInterval::Yearly => from.checked_add_months(chrono::Months::new(12)),
        }
    }
}

impl RepeatInterval {
    /// Whether entries with this interval stay pending after firing.
    pub fn repeats(&self) -> bool {
        !matches!(self, RepeatInterval::None)
    }
}

impl std::fmt::Display for RepeatInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatInterval::None => write!(f, "none"),
            RepeatInterval::Hourly => write!(f, "hourly"),
            RepeatInterval::Daily => write!(f, "daily"),
            RepeatInterval::Weekly => write!(f, "weekly"),
            RepeatInterval::Monthly => write!(f, "monthly"),
            RepeatInterval::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for RepeatInterval {
    type Err = TidingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(RepeatInterval::None),
            "hourly" => Ok(RepeatInterval::Hourly),
            "daily" => Ok(RepeatInterval::Daily),
            "weekly" => Ok(RepeatInterval::Weekly),
            "monthly" => Ok(RepeatInterval::Monthly),
            "yearly" => Ok(RepeatInterval::Yearly),
            other => Err(TidingsError::invalid_record(format!(
                "unknown repeat interval '{other}'"
            ))),
        }
    }
}

/// A pending entry in the delivery store's own representation.
///
/// The store knows nothing about records; identity travels in `user_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeEntry {
    pub alert_body: String,
    pub alert_action: Option<String>,
    pub fire_date: DateTime<Utc>,
    pub repeat_interval: RepeatInterval,
    pub user_info: Map<String, Value>,
}

impl NativeEntry {
    /// Identifier stored under [`IDENTIFIER_KEY`], if present.
    pub fn identifier(&self) -> Option<&str> {
        self.user_info.get(IDENTIFIER_KEY).and_then(Value::as_str)
    }
}

impl Record {
    /// Create an unscheduled record with a generated identifier.
    pub fn new(alert_body: &str) -> Self {
        Self::with_identifier(alert_body, &uuid::Uuid::new_v4().to_string())
    }

    /// Create an unscheduled record with a caller-supplied identifier.
    pub fn with_identifier(alert_body: &str, identifier: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert(IDENTIFIER_KEY.into(), Value::String(identifier.to_string()));
        Self {
            identifier: identifier.to_string(),
            alert_body: alert_body.to_string(),
            alert_action: None,
            fire_date: None,
            repeat_interval: RepeatInterval::None,
            metadata,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Re-insert the reserved identifier key, e.g. after deserializing a
    /// record persisted by an older build.
    pub(crate) fn ensure_identifier_key(&mut self) {
        self.metadata
            .insert(IDENTIFIER_KEY.into(), Value::String(self.identifier.clone()));
    }

    /// Set a metadata value. The reserved identifier key cannot be overwritten.
    pub fn set_metadata(&mut self, key: &str, value: Value) {
        if key == IDENTIFIER_KEY {
            tracing::debug!("ignoring write to reserved metadata key on {}", self.identifier);
            return;
        }
        self.metadata.insert(key.to_string(), value);
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.alert_action = Some(action.to_string());
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatInterval) -> Self {
        self.repeat_interval = repeat;
        self
    }

    /// Check the fields required before the record can be placed.
    pub fn validate(&self) -> Result<()> {
        if self.alert_body.trim().is_empty() {
            return Err(TidingsError::invalid_record(format!(
                "record {} has an empty alert body",
                self.identifier
            )));
        }
        if self.fire_date.is_none() {
            return Err(TidingsError::invalid_record(format!(
                "record {} has no fire date",
                self.identifier
            )));
        }
        Ok(())
    }

    /// Convert to the delivery store's representation.
    pub fn to_native(&self) -> Result<NativeEntry> {
        let fire_date = self.fire_date.ok_or_else(|| {
            TidingsError::invalid_record(format!("record {} has no fire date", self.identifier))
        })?;
        let mut user_info = self.metadata.clone();
        user_info.insert(IDENTIFIER_KEY.into(), Value::String(self.identifier.clone()));
        Ok(NativeEntry {
            alert_body: self.alert_body.clone(),
            alert_action: self.alert_action.clone(),
            fire_date,
            repeat_interval: self.repeat_interval,
            user_info,
        })
    }

    /// Rebuild a record from a native entry. The entry must carry its
    /// identifier under [`IDENTIFIER_KEY`].
    pub fn from_native(entry: &NativeEntry) -> Result<Self> {
        let identifier = match entry.identifier() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(TidingsError::invalid_record(format!(
                    "native entry '{}' has no {IDENTIFIER_KEY}",
                    entry.alert_body
                )));
            }
        };
        Ok(Self {
            identifier,
            alert_body: entry.alert_body.clone(),
            alert_action: entry.alert_action.clone(),
            fire_date: Some(entry.fire_date),
            repeat_interval: entry.repeat_interval,
            metadata: entry.user_info.clone(),
        })
    }
}
