//! Remote state types: users, channels and the negotiation snapshot.
//!
//! These mirror the JSON records returned by `rtm.start` and carried in
//! `user_change` events. Every field defaults when absent or `null` so
//! partial records from the service still decode.

use serde::{Deserialize, Deserializer, Serialize};

/// Decode `null` as the type's default, like a missing field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Profile block attached to a [`User`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// Given name.
    #[serde(deserialize_with = "null_default")]
    pub first_name: String,
    /// Family name.
    #[serde(deserialize_with = "null_default")]
    pub last_name: String,
    /// Display-ready full name.
    #[serde(deserialize_with = "null_default")]
    pub real_name: String,
    /// Job title.
    #[serde(deserialize_with = "null_default")]
    pub title: String,
    /// `real_name` with diacritics removed.
    #[serde(deserialize_with = "null_default")]
    pub real_name_normalized: String,
    /// Contact email.
    #[serde(deserialize_with = "null_default")]
    pub email: String,
}

/// An account on the team: both the connected identity and directory entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// Account id (directory key).
    #[serde(deserialize_with = "null_default")]
    pub id: String,
    /// Handle.
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    /// Full name.
    #[serde(deserialize_with = "null_default")]
    pub real_name: String,
    /// Account has been deactivated.
    #[serde(deserialize_with = "null_default")]
    pub deleted: bool,
    /// Display color hex.
    #[serde(deserialize_with = "null_default")]
    pub color: String,
    /// Team admin.
    #[serde(deserialize_with = "null_default")]
    pub is_admin: bool,
    /// Team owner.
    #[serde(deserialize_with = "null_default")]
    pub is_owner: bool,
    /// Primary team owner.
    #[serde(deserialize_with = "null_default")]
    pub is_primary_owner: bool,
    /// Bot account.
    #[serde(deserialize_with = "null_default")]
    pub is_bot: bool,
    /// Profile details.
    #[serde(deserialize_with = "null_default")]
    pub profile: UserProfile,
}

/// A channel, group or direct-message conversation known at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    /// Channel id.
    #[serde(deserialize_with = "null_default")]
    pub id: String,
    /// Channel name (without `#`).
    #[serde(deserialize_with = "null_default")]
    pub name: String,
    /// Public channel rather than a private group.
    #[serde(deserialize_with = "null_default")]
    pub is_channel: bool,
    /// Direct-message conversation.
    #[serde(deserialize_with = "null_default")]
    pub is_im: bool,
    /// Creation time, seconds since the epoch.
    #[serde(deserialize_with = "null_default")]
    pub created: i64,
    /// Id of the creating user.
    #[serde(deserialize_with = "null_default")]
    pub creator: String,
    /// Archived channel.
    #[serde(deserialize_with = "null_default")]
    pub is_archived: bool,
    /// The team's general channel.
    #[serde(deserialize_with = "null_default")]
    pub is_general: bool,
    /// The connected account is a member.
    #[serde(deserialize_with = "null_default")]
    pub is_member: bool,
    /// Member account ids.
    #[serde(deserialize_with = "null_default")]
    pub members: Vec<String>,
}

/// Result of a successful negotiation: where to stream from, plus the
/// initial snapshot of remote state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Handshake {
    /// Whether the service accepted the request.
    #[serde(deserialize_with = "null_default")]
    pub ok: bool,
    /// Failure reason when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Streaming endpoint URL.
    #[serde(deserialize_with = "null_default")]
    pub url: String,
    /// The authenticated account.
    #[serde(rename = "self")]
    #[serde(deserialize_with = "null_default")]
    pub self_user: User,
    /// Team members.
    #[serde(deserialize_with = "null_default")]
    pub users: Vec<User>,
    /// Channels visible to the account.
    #[serde(deserialize_with = "null_default")]
    pub channels: Vec<Channel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_fields_decode_as_defaults() {
        let json = r#"{
            "ok": true,
            "url": "wss://ms1.example.com/abc",
            "self": {"id": "U1", "name": "bot", "profile": null},
            "users": [{
                "id": "U2",
                "name": null,
                "real_name": null,
                "deleted": null,
                "is_bot": null,
                "profile": {"email": null, "title": null}
            }],
            "channels": [{"id": "C1", "name": "general", "created": null, "members": null}]
        }"#;

        let handshake: Handshake = serde_json::from_str(json).unwrap();
        assert_eq!(handshake.self_user.profile, UserProfile::default());
        let user = &handshake.users[0];
        assert_eq!(user.id, "U2");
        assert_eq!(user.real_name, "");
        assert!(!user.deleted);
        assert_eq!(user.profile.email, "");
        assert_eq!(handshake.channels[0].created, 0);
        assert!(handshake.channels[0].members.is_empty());
    }

    #[test]
    fn test_null_collections_in_handshake() {
        let json = r#"{"ok": true, "url": "wss://x", "self": null, "users": null, "channels": null}"#;
        let handshake: Handshake = serde_json::from_str(json).unwrap();
        assert_eq!(handshake.self_user, User::default());
        assert!(handshake.users.is_empty());
        assert!(handshake.channels.is_empty());
    }

    #[test]
    fn test_handshake_decodes_self_field() {
        let json = r#"{
            "ok": true,
            "url": "wss://ms1.example.com/abc",
            "self": {"id": "U1", "name": "bot"},
            "users": [{"id": "U2", "name": "alice", "profile": {"email": "a@example.com"}}],
            "channels": [{"id": "C1", "name": "general", "is_general": true, "members": ["U1", "U2"]}]
        }"#;

        let handshake: Handshake = serde_json::from_str(json).unwrap();
        assert!(handshake.ok);
        assert_eq!(handshake.self_user.id, "U1");
        assert_eq!(handshake.users[0].profile.email, "a@example.com");
        assert!(handshake.channels[0].is_general);
        assert_eq!(handshake.channels[0].members, vec!["U1", "U2"]);
    }

    #[test]
    fn test_user_tolerates_missing_fields() {
        let user: User = serde_json::from_str(r#"{"id": "U9"}"#).unwrap();
        assert_eq!(user.id, "U9");
        assert!(user.name.is_empty());
        assert!(!user.is_bot);
    }

    #[test]
    fn test_rejected_handshake_keeps_error() {
        let handshake: Handshake =
            serde_json::from_str(r#"{"ok": false, "error": "invalid_auth"}"#).unwrap();
        assert!(!handshake.ok);
        assert_eq!(handshake.error.as_deref(), Some("invalid_auth"));
    }
}
