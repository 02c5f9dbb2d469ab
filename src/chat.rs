//! Google Chat card messages and the rendering of Alertmanager batches into
//! them.

use crate::alertmanager::{Alert, AlertBatch, LabelSet};
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

const UNKNOWN_ALERT: &str = "Unknown Alert";

/// How a missing `startsAt` is rendered: Alertmanager's zero timestamp.
const ZERO_TIMESTAMP: &str = "0001-01-01T00:00:00Z";

/// A message accepted by a Google Chat incoming webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDocument {
    pub text: String,
    pub cards: Vec<Card>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<CardHeader>,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardHeader {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub widgets: Vec<Widget>,
}

/// The externally tagged representation matches the Chat wire format:
/// `{"textParagraph": {..}}`, `{"keyValue": {..}}` or `{"buttons": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Widget {
    TextParagraph(TextParagraph),
    KeyValue(KeyValue),
    Buttons(Vec<Button>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextParagraph {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    pub top_label: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content_multiline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Icon {
    Star,
    Check,
    Description,
}

impl Icon {
    pub fn for_status(status: &str) -> Self {
        match status {
            "firing" => Icon::Star,
            "resolved" => Icon::Check,
            _ => Icon::Description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Button {
    pub text_button: TextButton,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextButton {
    pub text: String,
    pub on_click: OnClick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnClick {
    pub open_link: OpenLink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLink {
    pub url: String,
}

impl Widget {
    fn text(text: &str) -> Self {
        Widget::TextParagraph(TextParagraph {
            text: text.to_string(),
        })
    }

    fn key_value(label: &str, content: String) -> Self {
        Widget::KeyValue(KeyValue {
            top_label: label.to_string(),
            content,
            content_multiline: false,
            icon: None,
        })
    }

    fn multiline(label: &str, content: String) -> Self {
        Widget::KeyValue(KeyValue {
            top_label: label.to_string(),
            content,
            content_multiline: true,
            icon: None,
        })
    }

    fn link_button(text: &str, url: &str) -> Self {
        Widget::Buttons(vec![Button {
            text_button: TextButton {
                text: text.to_string(),
                on_click: OnClick {
                    open_link: OpenLink {
                        url: url.to_string(),
                    },
                },
            },
        }])
    }
}

/// Renders an alert batch as a single-card chat message.
///
/// Never fails; callers are expected to have run
/// [`AlertBatch::validate`] first, but an unvalidated batch still renders.
pub fn transform(batch: &AlertBatch) -> ChatDocument {
    let status = batch.status.to_uppercase();
    let alert_name = batch.alert_name().unwrap_or(UNKNOWN_ALERT);
    let count = batch.alerts.len();
    let headline = format!("{} Alert: {}", status, alert_name);

    let mut sections = Vec::with_capacity(count + 2);
    sections.push(summary_section(batch));
    sections.extend(
        batch
            .alerts
            .iter()
            .enumerate()
            .map(|(i, alert)| alert_section(i + 1, alert)),
    );
    if !batch.external_url.is_empty() {
        sections.push(Section {
            header: None,
            widgets: vec![Widget::link_button(
                "View in AlertManager",
                &batch.external_url,
            )],
        });
    }

    ChatDocument {
        text: format!("{} ({} alerts)", headline, count),
        cards: vec![Card {
            header: Some(CardHeader {
                title: headline,
                subtitle: Some(format!("{} alert(s)", count)),
            }),
            sections,
        }],
    }
}

fn summary_section(batch: &AlertBatch) -> Section {
    let mut widgets = vec![Widget::KeyValue(KeyValue {
        top_label: "Status".to_string(),
        content: batch.status.clone(),
        content_multiline: false,
        icon: Some(Icon::for_status(&batch.status)),
    })];

    if !batch.common_labels.is_empty() {
        widgets.push(Widget::multiline(
            "Common Labels",
            bullet_list(&batch.common_labels),
        ));
    }
    if !batch.common_annotations.is_empty() {
        widgets.push(Widget::multiline(
            "Common Annotations",
            bullet_list(&batch.common_annotations),
        ));
    }

    Section {
        header: Some("Summary".to_string()),
        widgets,
    }
}

fn alert_section(number: usize, alert: &Alert) -> Section {
    let mut widgets = Vec::with_capacity(4);

    if let Some(text) = alert
        .annotations
        .get("description")
        .or_else(|| alert.annotations.get("summary"))
    {
        widgets.push(Widget::text(text));
    }
    if !alert.labels.is_empty() {
        widgets.push(Widget::multiline("Labels", bullet_list(&alert.labels)));
    }
    widgets.push(Widget::key_value("Started", format_timestamp(alert.starts_at)));
    if !alert.generator_url.is_empty() {
        widgets.push(Widget::link_button("View in Prometheus", &alert.generator_url));
    }

    Section {
        header: Some(format!("Alert #{}", number)),
        widgets,
    }
}

/// One `• key: value` line per entry, in key order.
fn bullet_list(labels: &LabelSet) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("• {}: {}\n", key, value))
        .collect()
}

fn format_timestamp(timestamp: Option<DateTime<FixedOffset>>) -> String {
    match timestamp {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => ZERO_TIMESTAMP.to_string(),
    }
}
