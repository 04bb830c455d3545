//! Chat channels that deliver commands to the bridge.
//!
//! Only Microsoft Teams outgoing webhooks are supported: Teams POSTs an activity signed
//! with the shared secret and renders the synchronous reply in the conversation.

mod teams;

pub use teams::{
    extract_command_text, TeamsAccount, TeamsActivity, TeamsAttachment, TeamsReply,
    ADAPTIVE_CARD_CONTENT_TYPE,
};
