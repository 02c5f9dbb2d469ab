use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Label and annotation sets. Ordered so rendered output is stable.
pub type LabelSet = BTreeMap<String, String>;

/// The body Alertmanager POSTs to a webhook receiver.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBatch {
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub truncated_alerts: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub receiver: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_labels: LabelSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub common_labels: LabelSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub common_annotations: LabelSet,
    #[serde(rename = "externalURL", default, deserialize_with = "null_as_default")]
    pub external_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: LabelSet,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: LabelSet,
    #[serde(default)]
    pub starts_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<FixedOffset>>,
    #[serde(rename = "generatorURL", default, deserialize_with = "null_as_default")]
    pub generator_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fingerprint: String,
}

/// The request body was not JSON, or not shaped like an Alertmanager webhook.
#[derive(Debug, Error)]
#[error("malformed alert payload: {0}")]
pub struct MalformedPayload(#[from] serde_json::Error);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("alert batch status is required")]
    MissingStatus,
    #[error("alert batch contains no alerts")]
    EmptyAlerts,
    #[error("alert {0} has no status")]
    AlertMissingStatus(usize),
    #[error("alert {0} has no labels")]
    AlertMissingLabels(usize),
}

// Alertmanager (and hand-written test payloads) sometimes send `null` for
// empty maps and strings.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl AlertBatch {
    pub fn from_slice(body: &[u8]) -> Result<Self, MalformedPayload> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Checks the batch is usable for rendering. The first violated rule is
    /// reported; alerts are checked in order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.status.is_empty() {
            return Err(ValidationError::MissingStatus);
        }
        if self.alerts.is_empty() {
            return Err(ValidationError::EmptyAlerts);
        }
        for (index, alert) in self.alerts.iter().enumerate() {
            if alert.status.is_empty() {
                return Err(ValidationError::AlertMissingStatus(index));
            }
            if alert.labels.is_empty() {
                return Err(ValidationError::AlertMissingLabels(index));
            }
        }
        Ok(())
    }

    /// `commonLabels.alertname`, then the first alert's `alertname` label.
    pub fn alert_name(&self) -> Option<&str> {
        self.common_labels
            .get("alertname")
            .or_else(|| {
                self.alerts
                    .first()
                    .and_then(|alert| alert.labels.get("alertname"))
            })
            .map(String::as_str)
    }
}
