//! Wire types for the remote chat API and the live-update channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatId, Message, MessageId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Bare success flag returned by logout, send and join endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyChatsResponse {
    pub success: bool,
    #[serde(default)]
    pub chats: Vec<ChatRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderRef {
    pub username: String,
}

/// A chat message as the server ships it (Mongo-style `_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub sender: SenderRef,
    pub content: String,
    #[serde(rename = "sentAt", default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<MessagePayload> for Message {
    fn from(payload: MessagePayload) -> Self {
        Message {
            id: payload.id,
            sender_name: payload.sender.username,
            text: payload.content,
            sent_at: payload.sent_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedUser {
    pub id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<CreatedUser>,
}

/// Events the client emits over the live-update channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum LiveClientEvent {
    /// Announced once when the connection opens.
    #[serde(rename_all = "camelCase")]
    MountChat { chat_id: ChatId },
    #[serde(rename_all = "camelCase")]
    SendMessage { chat_id: ChatId, content: String },
}

/// Events the server pushes over the live-update channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum LiveServerEvent {
    NewMessage {
        success: bool,
        message: MessagePayload,
    },
    /// Acknowledgment of the most recent `send-message`.
    SendAck { success: bool },
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
