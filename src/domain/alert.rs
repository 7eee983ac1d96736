use std::collections::HashSet;
use std::str::FromStr;

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

pub const DEFAULT_FREQUENCY_SECS: i64 = 60;

pub(crate) const ALERT_COLUMNS: &str = "id, dashboard_id, panel_id, org_id, name, message, state, \
     settings, frequency, for_seconds, silenced, new_state_date, created, updated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Unknown,
    Ok,
    Alerting,
    NoData,
    Paused,
    Pending,
}

impl AlertState {
    pub const ALL: [AlertState; 6] = [
        AlertState::Unknown,
        AlertState::Ok,
        AlertState::Alerting,
        AlertState::NoData,
        AlertState::Paused,
        AlertState::Pending,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Unknown => "unknown",
            AlertState::Ok => "ok",
            AlertState::Alerting => "alerting",
            AlertState::NoData => "no_data",
            AlertState::Paused => "paused",
            AlertState::Pending => "pending",
        }
    }
}

impl FromStr for AlertState {
    type Err = AlertParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        AlertState::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| AlertParseError::UnknownState(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertParseError {
    #[error("unknown alert state '{0}'")]
    UnknownState(String),
    #[error("panel alert is missing a numeric panel id")]
    MissingPanelId,
    #[error("alert on panel {0} has no name")]
    MissingName(i64),
    #[error("more than one alert is defined for panel {0}")]
    DuplicatePanel(i64),
    #[error("invalid duration '{0}'; expected forms like 60s, 5m or 1h")]
    InvalidDuration(String),
}

/// Incoming alert rule for one panel, as declared in a dashboard payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub panel_id: i64,
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_frequency")]
    pub frequency: i64,
    #[serde(default)]
    pub for_seconds: i64,
    #[serde(default)]
    pub settings: Value,
}

fn default_frequency() -> i64 {
    DEFAULT_FREQUENCY_SECS
}

impl AlertDefinition {
    pub fn new(panel_id: i64, name: impl Into<String>) -> Self {
        Self {
            panel_id,
            name: name.into(),
            message: String::new(),
            frequency: DEFAULT_FREQUENCY_SECS,
            for_seconds: 0,
            settings: Value::Object(Default::default()),
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// `(key, value)` pairs from `settings.alertRuleTags`, sorted by key.
    pub fn rule_tags(&self) -> Vec<(String, String)> {
        let Some(raw) = self.settings.get("alertRuleTags").and_then(Value::as_object) else {
            return Vec::new();
        };
        let mut tags: Vec<(String, String)> = raw
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();
        tags.sort();
        tags
    }
}

/// A stored legacy alert bound to one dashboard panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub org_id: i64,
    pub name: String,
    pub message: String,
    pub state: AlertState,
    pub settings: Value,
    pub frequency: i64,
    pub for_seconds: i64,
    pub silenced: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub new_state_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

impl Alert {
    /// True when any user-editable field differs. Runtime state is never compared.
    pub fn contains_updates(&self, incoming: &AlertDefinition) -> bool {
        self.name != incoming.name
            || self.message != incoming.message
            || self.frequency != incoming.frequency
            || self.for_seconds != incoming.for_seconds
            || self.settings != incoming.settings
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let raw_state: String = row.get(6)?;
        let state = AlertState::from_str(&raw_state).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(err))
        })?;
        let raw_settings: String = row.get(7)?;
        let settings = serde_json::from_str(&raw_settings).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(err))
        })?;
        Ok(Alert {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            panel_id: row.get(2)?,
            org_id: row.get(3)?,
            name: row.get(4)?,
            message: row.get(5)?,
            state,
            settings,
            frequency: row.get(8)?,
            for_seconds: row.get(9)?,
            silenced: row.get(10)?,
            new_state_date: row.get(11)?,
            created: row.get(12)?,
            updated: row.get(13)?,
        })
    }
}

/// Collects the `alert` blocks of every panel, descending into row panels.
pub fn extract_panel_alerts(data: &Value) -> Result<Vec<AlertDefinition>, AlertParseError> {
    let mut definitions = Vec::new();
    if let Some(panels) = data.get("panels").and_then(Value::as_array) {
        collect_panel_alerts(panels, &mut definitions)?;
    }
    ensure_unique_panels(&definitions)?;
    Ok(definitions)
}

fn collect_panel_alerts(
    panels: &[Value],
    out: &mut Vec<AlertDefinition>,
) -> Result<(), AlertParseError> {
    for panel in panels {
        if let Some(nested) = panel.get("panels").and_then(Value::as_array) {
            collect_panel_alerts(nested, out)?;
        }
        let Some(alert) = panel.get("alert").filter(|alert| alert.is_object()) else {
            continue;
        };
        let panel_id = panel
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(AlertParseError::MissingPanelId)?;
        let name = alert
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(AlertParseError::MissingName(panel_id))?;
        let frequency = match alert.get("frequency").and_then(Value::as_str) {
            Some(raw) => parse_duration_secs(raw)?,
            None => DEFAULT_FREQUENCY_SECS,
        };
        let for_seconds = match alert.get("for").and_then(Value::as_str) {
            Some(raw) => parse_duration_secs(raw)?,
            None => 0,
        };
        out.push(AlertDefinition {
            panel_id,
            name: name.to_string(),
            message: alert
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            frequency,
            for_seconds,
            settings: alert.clone(),
        });
    }
    Ok(())
}

pub fn ensure_unique_panels(definitions: &[AlertDefinition]) -> Result<(), AlertParseError> {
    let mut seen = HashSet::new();
    for definition in definitions {
        if !seen.insert(definition.panel_id) {
            return Err(AlertParseError::DuplicatePanel(definition.panel_id));
        }
    }
    Ok(())
}

/// Parses `90`, `90s`, `5m`, `1h` or `1d` into seconds. Blank means zero.
pub fn parse_duration_secs(raw: &str) -> Result<i64, AlertParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let invalid = || AlertParseError::InvalidDuration(raw.to_string());
    let split = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(invalid()),
    };
    amount.checked_mul(multiplier).ok_or_else(invalid)
}
