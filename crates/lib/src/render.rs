//! Turn dispatch outcomes into response bodies (Teams adaptive card or plain JSON).

use crate::backend::PodRecord;
use crate::channels::TeamsReply;
use crate::command::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Teams message with an adaptive card attachment.
    #[default]
    Teams,
    Json,
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "teams" => Ok(ResponseFormat::Teams),
            "json" => Ok(ResponseFormat::Json),
            other => Err(format!("unknown response type: {}", other)),
        }
    }
}

/// Response body for an outcome; serializes as the inner value.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Rendered {
    Teams(TeamsReply),
    Json(Value),
}

/// Render `outcome` in the given format. `now` is used for pod ages.
pub fn render_outcome(outcome: &Outcome, format: ResponseFormat, now: DateTime<Utc>) -> Rendered {
    match format {
        ResponseFormat::Teams => Rendered::Teams(teams_reply(outcome, now)),
        ResponseFormat::Json => Rendered::Json(match outcome {
            Outcome::Single(pod) => json!({ "kind": "single", "pod": pod }),
            Outcome::Collection(pods) => json!({ "kind": "collection", "pods": pods }),
            Outcome::Empty => json!({ "kind": "empty" }),
        }),
    }
}

/// Teams reply for an outcome: a pod card for records, "ok" when there is nothing to show.
pub fn teams_reply(outcome: &Outcome, now: DateTime<Utc>) -> TeamsReply {
    match outcome {
        Outcome::Single(pod) => TeamsReply::card("", pod_card(std::slice::from_ref(pod), now)),
        Outcome::Collection(pods) => TeamsReply::card("", pod_card(pods, now)),
        Outcome::Empty => TeamsReply::text("ok"),
    }
}

/// Adaptive card with a header and one fact set per pod.
pub fn pod_card(pods: &[PodRecord], now: DateTime<Utc>) -> Value {
    let mut body = vec![json!({
        "type": "TextBlock",
        "id": element_id(),
        "text": "Pod Detail",
        "wrap": true,
        "size": "Large",
        "weight": "Bolder",
        "color": "Accent",
        "horizontalAlignment": "Center"
    })];
    if pods.is_empty() {
        body.push(json!({
            "type": "TextBlock",
            "id": element_id(),
            "text": "No pods found",
            "wrap": true
        }));
    }
    for pod in pods {
        body.push(json!({
            "type": "Container",
            "id": element_id(),
            "padding": "None",
            "style": "emphasis",
            "items": [{
                "type": "FactSet",
                "id": element_id(),
                "facts": [
                    { "title": "Name", "value": pod.name },
                    { "title": "Age", "value": format_age(pod.created_at, now) },
                    { "title": "Status", "value": pod.phase },
                    { "title": "Namespace", "value": pod.namespace }
                ]
            }]
        }));
    }
    json!({
        "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
        "type": "AdaptiveCard",
        "version": "1.0",
        "body": body,
        "padding": "None"
    })
}

fn element_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Compact age the way `kubectl` prints it: `45s`, `12m`, `3h4m`, `2d5h`.
pub fn format_age(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(created) = created_at else {
        return "unknown".to_string();
    };
    let secs = (now - created).num_seconds().max(0);
    let (days, hours, mins) = (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60);
    match (days, hours, mins) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, 0) => format!("{}h", h),
        (0, h, m) => format!("{}h{}m", h, m),
        (d, 0, _) => format!("{}d", d),
        (d, h, _) => format!("{}d{}h", d, h),
    }
}
