//! Microsoft Teams outgoing webhook: activity payload, command extraction, reply message.

use serde::{Deserialize, Serialize};

/// The part of a Bot Framework activity the bridge reads. Other fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsActivity {
    #[serde(default, rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: TeamsAccount,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Synchronous reply to an outgoing webhook call.
#[derive(Debug, Clone, Serialize)]
pub struct TeamsReply {
    #[serde(rename = "type")]
    pub reply_type: &'static str,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<TeamsAttachment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsAttachment {
    pub content_type: &'static str,
    pub content: serde_json::Value,
}

pub const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

impl TeamsReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            reply_type: "message",
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn card(text: impl Into<String>, card: serde_json::Value) -> Self {
        Self {
            reply_type: "message",
            text: text.into(),
            attachments: vec![TeamsAttachment {
                content_type: ADAPTIVE_CARD_CONTENT_TYPE,
                content: card,
            }],
        }
    }
}

const MENTION_CLOSE: &str = "</at> ";

/// Pull the command out of a mention-prefixed message such as
/// `"<at>kontrol</at> get pods default\n"`.
///
/// The text must be one line ending in `\n`; the command is whatever follows the last
/// mention close tag.
pub fn extract_command_text(text: &str) -> Option<&str> {
    let line = text.strip_suffix('\n')?;
    if line.contains('\n') {
        return None;
    }
    let start = line.rfind(MENTION_CLOSE)? + MENTION_CLOSE.len();
    Some(&line[start..])
}
