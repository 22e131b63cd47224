//! Typed views over the backend's schemaless documents.
//!
//! Documents in the wild carry ad-hoc field sets (older clients, partial
//! writes), so every collection has an explicit schema version and a
//! defaulting decode: `from_doc` tolerates missing or older-version fields
//! and only rejects documents that are structurally unusable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::store::{server_timestamp, Document, Fields};

pub const USER_SCHEMA_VERSION: i64 = 1;
pub const CONTACT_SCHEMA_VERSION: i64 = 1;
pub const MESSAGE_SCHEMA_VERSION: i64 = 1;

// Wire field names follow the persisted layout, not Rust casing.
mod wire {
    pub const SCHEMA_VERSION: &str = "schemaVersion";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const DISPLAY_NAME_LOWER: &str = "displayNameLower";
    pub const USERNAME: &str = "username";
    pub const EMAIL: &str = "email";
    pub const PHOTO_URL: &str = "photoURL";
    pub const EMAIL_VERIFIED: &str = "emailVerified";
    pub const CREATED_AT: &str = "createdAt";
    pub const LAST_ACTIVE: &str = "lastActive";
    pub const USER_REF: &str = "userRef";
    pub const ADDED_AT: &str = "addedAt";
    pub const TEXT: &str = "text";
    pub const SENDER_ID: &str = "senderId";
    pub const SENDER_NAME: &str = "senderName";
    pub const RECIPIENT_ID: &str = "recipientId";
}

// ─── User Profiles ─────────────────────────────────────

/// A registered identity as stored under `users/{uid}`.
///
/// `username` is globally unique and immutable once claimed (explicit rename
/// aside); `display_name_lower` is derived and kept in sync on every write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    pub display_name_lower: String,
    pub username: String,
    pub email: String,
    pub photo_url: String,
    pub email_verified: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Decode with defaulting. `None` only when the document id is not a
    /// valid identity id.
    pub fn from_doc(doc: &Document) -> Option<Self> {
        let id = Uuid::parse_str(&doc.id).ok()?;
        let display_name = doc.str_field(wire::DISPLAY_NAME).unwrap_or("User").to_string();
        let display_name_lower = doc
            .str_field(wire::DISPLAY_NAME_LOWER)
            .map(str::to_string)
            .unwrap_or_else(|| display_name.to_lowercase());

        Some(Self {
            id,
            display_name,
            display_name_lower,
            username: doc.str_field(wire::USERNAME).unwrap_or_default().to_string(),
            email: doc.str_field(wire::EMAIL).unwrap_or_default().to_string(),
            photo_url: doc.str_field(wire::PHOTO_URL).unwrap_or_default().to_string(),
            email_verified: doc.bool_field(wire::EMAIL_VERIFIED).unwrap_or(false),
            created_at: doc.time_field(wire::CREATED_AT),
            last_active: doc.time_field(wire::LAST_ACTIVE),
        })
    }

    /// Full field set for profile creation. Timestamps are server-assigned.
    pub fn create_fields(
        display_name: &str,
        username: &str,
        email: &str,
        photo_url: &str,
        email_verified: bool,
    ) -> Fields {
        let mut fields = Fields::new();
        fields.insert(wire::SCHEMA_VERSION.into(), json!(USER_SCHEMA_VERSION));
        fields.insert(wire::DISPLAY_NAME.into(), json!(display_name));
        fields.insert(
            wire::DISPLAY_NAME_LOWER.into(),
            json!(display_name.to_lowercase()),
        );
        fields.insert(wire::USERNAME.into(), json!(username));
        fields.insert(wire::EMAIL.into(), json!(email));
        fields.insert(wire::PHOTO_URL.into(), json!(photo_url));
        fields.insert(wire::EMAIL_VERIFIED.into(), json!(email_verified));
        fields.insert(wire::CREATED_AT.into(), server_timestamp());
        fields.insert(wire::LAST_ACTIVE.into(), server_timestamp());
        fields
    }

    /// Mutable-field refresh for the update path. Deliberately excludes
    /// `username` unless `username` is `Some`; the caller enforces the
    /// never-overwrite rule.
    pub fn refresh_fields(
        display_name: &str,
        email: &str,
        email_verified: bool,
        username: Option<&str>,
    ) -> Fields {
        let mut fields = Fields::new();
        fields.insert(wire::SCHEMA_VERSION.into(), json!(USER_SCHEMA_VERSION));
        fields.insert(wire::DISPLAY_NAME.into(), json!(display_name));
        fields.insert(
            wire::DISPLAY_NAME_LOWER.into(),
            json!(display_name.to_lowercase()),
        );
        fields.insert(wire::EMAIL.into(), json!(email));
        fields.insert(wire::EMAIL_VERIFIED.into(), json!(email_verified));
        fields.insert(wire::LAST_ACTIVE.into(), server_timestamp());
        if let Some(name) = username {
            fields.insert(wire::USERNAME.into(), json!(name));
        }
        fields
    }

    pub fn rename_fields(new_username: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert(wire::USERNAME.into(), json!(new_username.trim()));
        fields.insert(wire::LAST_ACTIVE.into(), server_timestamp());
        fields
    }
}

// ─── Contact Edges ─────────────────────────────────────

/// A directed contact edge under `users/{owner}/contacts/{edge_id}`.
/// Created and deleted, never mutated. Duplicate edges to the same target
/// are possible; `add` does not deduplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactEdge {
    pub id: String,
    /// Document path of the target profile, e.g. `users/{uid}`.
    pub user_ref: String,
    pub added_at: Option<DateTime<Utc>>,
}

impl ContactEdge {
    pub fn from_doc(doc: &Document) -> Option<Self> {
        let user_ref = doc.str_field(wire::USER_REF)?.to_string();
        Some(Self {
            id: doc.id.clone(),
            user_ref,
            added_at: doc.time_field(wire::ADDED_AT),
        })
    }

    pub fn create_fields(target_ref: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert(wire::SCHEMA_VERSION.into(), json!(CONTACT_SCHEMA_VERSION));
        fields.insert(wire::USER_REF.into(), json!(target_ref));
        fields.insert(wire::ADDED_AT.into(), server_timestamp());
        fields
    }
}

/// A contact edge resolved to the target's current profile snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub edge_id: String,
    pub profile: UserProfile,
}

impl Contact {
    pub fn user_id(&self) -> Uuid {
        self.profile.id
    }
}

// ─── Messages ──────────────────────────────────────────

/// A chat message, public or private. Immutable once created; deletable only
/// through bulk channel clearing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub author_id: Uuid,
    pub author_name: String,
    /// Set only on private messages.
    pub recipient_id: Option<Uuid>,
    /// Server-assigned; `None` only in the brief window before the write
    /// round-trips.
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Decode with defaulting; `None` for documents without a usable author.
    pub fn from_doc(doc: &Document) -> Option<Self> {
        let author_id = Uuid::parse_str(doc.str_field(wire::SENDER_ID)?).ok()?;
        Some(Self {
            id: doc.id.clone(),
            text: doc.str_field(wire::TEXT).unwrap_or_default().to_string(),
            author_id,
            author_name: doc.str_field(wire::SENDER_NAME).unwrap_or("User").to_string(),
            recipient_id: doc
                .str_field(wire::RECIPIENT_ID)
                .and_then(|s| Uuid::parse_str(s).ok()),
            created_at: doc.time_field(wire::CREATED_AT),
        })
    }

    pub fn create_fields(
        text: &str,
        author_id: Uuid,
        author_name: &str,
        recipient_id: Option<Uuid>,
    ) -> Fields {
        let mut fields = Fields::new();
        fields.insert(wire::SCHEMA_VERSION.into(), json!(MESSAGE_SCHEMA_VERSION));
        fields.insert(wire::TEXT.into(), json!(text));
        fields.insert(wire::SENDER_ID.into(), json!(author_id.to_string()));
        fields.insert(wire::SENDER_NAME.into(), json!(author_name));
        if let Some(recipient) = recipient_id {
            fields.insert(wire::RECIPIENT_ID.into(), json!(recipient.to_string()));
        }
        fields.insert(wire::CREATED_AT.into(), server_timestamp());
        fields
    }
}

/// Wire name of the username field, for equality queries.
pub fn username_field() -> &'static str {
    wire::USERNAME
}

/// Wire name of the email field, for equality queries.
pub fn email_field() -> &'static str {
    wire::EMAIL
}

/// Wire name of the message ordering field.
pub fn created_at_field() -> &'static str {
    wire::CREATED_AT
}

pub(crate) fn username_value(candidate: &str) -> Value {
    json!(candidate.to_lowercase())
}

// ─── Auth Sessions ─────────────────────────────────────

/// Snapshot of the current authenticated identity, as reported by the auth
/// provider. Delivered through `on_session_change` and cached client-side;
/// route gating reads the latest snapshot without a network round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub email_verified: bool,
    /// Identity-provider ids, e.g. `password`, `google.com`.
    pub providers: Vec<String>,
}

impl AuthSession {
    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.iter().any(|p| p == provider)
    }
}

// ─── Availability Checks ───────────────────────────────

/// Where an availability answer came from. Advisory answers are best-effort
/// (reserved-word list plus the process-local cache) and are not verified
/// against concurrent clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilitySource {
    Authoritative,
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub source: AvailabilitySource,
    pub available: bool,
}

// ─── Signup Form ───────────────────────────────────────

/// Client-side form validation, applied before any I/O. Username format has
/// its own pure check in `registry`; this covers the account fields.
#[derive(Debug, Deserialize, Validate)]
pub struct SignupForm {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,

    #[validate(length(min = 6, max = 128, message = "Password must be 6-128 characters"))]
    pub password: String,

    #[validate(length(min = 1, max = 50, message = "Display name must be 1-50 characters"))]
    pub display_name: String,

    pub username: String,
}
