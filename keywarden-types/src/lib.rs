//! Wire types shared between the keywarden service and its clients
//! (the operator CLI and chat-platform adapters).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of an actor on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derived lifecycle status of a credential. Never stored; always
/// recomputed from the record and the current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Active,
    Expired,
    Locked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Locked => "locked",
        }
    }
}

/// A credential with its derived status, as returned by list calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialInfo {
    pub credential: String,
    pub expires_on: NaiveDate,
    pub status: CredentialStatus,
}

/// Payload returned after a successful create or renew.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub credential: String,
    pub expires_on: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// JSON envelope used by every API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok<S: Into<String>>(message: S, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn ok_empty<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Request body for `POST /api/credentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCredentialRequest {
    pub credential: String,
    pub days: u32,
}

/// Request body for `POST /api/credentials/{name}/renew`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewCredentialRequest {
    pub days: u32,
}

/// Response of `GET /api/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub domain: Option<String>,
    pub public_ip: String,
    pub city: String,
    pub isp: String,
    pub service: String,
    pub port: u16,
}

/// Response of `POST /api/sweep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub revoked: Vec<String>,
}

/// Which selection listing a pagination action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionFlow {
    Renew,
    Delete,
}

/// A menu trigger sent by the platform adapter when the actor presses
/// a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MenuAction {
    Main,
    Create,
    Renew,
    Delete,
    List,
    Info,
    Backup,
    Restore,
    ToggleMode,
    Cancel,
    Page { flow: SelectionFlow, page: usize },
    SelectRenew { credential: String },
    SelectDelete { credential: String },
    ConfirmDelete { credential: String },
}

/// An inbound event from the chat platform, addressed to one actor's
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    MenuSelect { action: MenuAction },
    Text { text: String },
    Document { name: String, #[serde(with = "b64")] data: Vec<u8> },
}

/// One button in a reply's menu grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuButton {
    pub label: String,
    pub action: MenuAction,
}

impl MenuButton {
    pub fn new<S: Into<String>>(label: S, action: MenuAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// A file attached to a reply (backup archives).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub name: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

/// A semantic reply for the platform adapter to render.
///
/// `supersedes` names the previous reply shown to the same actor; the
/// adapter should replace or delete that rendering. How text, menus
/// and documents are drawn is entirely up to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub menu: Vec<Vec<MenuButton>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentPayload>,
}

impl Reply {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            supersedes: None,
            text: text.into(),
            menu: Vec::new(),
            document: None,
        }
    }

    pub fn with_menu(mut self, menu: Vec<Vec<MenuButton>>) -> Self {
        self.menu = menu;
        self
    }

    pub fn with_document(mut self, document: DocumentPayload) -> Self {
        self.document = Some(document);
        self
    }
}

/// Request body for `POST /frontend/event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendEvent {
    pub actor: ActorId,
    pub inbound: Inbound,
}

/// Response body for `POST /frontend/event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendReplies {
    pub replies: Vec<Reply>,
}

/// An asynchronous reply pushed over the WebSocket stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub actor: ActorId,
    pub reply: Reply,
}

/// Base64 (de)serialization for binary payloads carried in JSON.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_action_round_trips() {
        let action = MenuAction::Page {
            flow: SelectionFlow::Renew,
            page: 2,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"page\""));
        let back: MenuAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn document_bytes_encode_as_base64() {
        let inbound = Inbound::Document {
            name: "backup.zip".to_string(),
            data: vec![0x50, 0x4b, 0x03, 0x04],
        };
        let json = serde_json::to_string(&inbound).unwrap();
        assert!(json.contains("UEsDBA=="));
        let back: Inbound = serde_json::from_str(&json).unwrap();
        match back {
            Inbound::Document { data, .. } => assert_eq!(data, vec![0x50, 0x4b, 0x03, 0x04]),
            _ => panic!("expected document"),
        }
    }
}
