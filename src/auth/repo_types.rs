use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Social media handles shown on a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Social {
    pub instagram: String,
    pub facebook: String,
    pub twitter: String,
    pub youtube: String,
    pub telegram: String,
    pub whatsapp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<String>,
}

/// Editable profile attributes. Doubles as the sparse patch for profile edits:
/// `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub contact_number: Option<i64>,
    pub address: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip: Option<i64>,
    pub gender: Option<String>,
    pub occupation: Option<String>,
    pub avatar: Option<String>,
    pub designation: Option<String>,
    pub about: Option<String>,
    pub social: Option<Social>,
    pub badges: Option<Vec<serde_json::Value>>,
}

impl ProfileFields {
    /// Overwrites every field that is set in `patch`; unset fields are no-ops.
    pub fn apply(&mut self, patch: ProfileFields) {
        let ProfileFields {
            first_name,
            last_name,
            contact_number,
            address,
            state,
            country,
            zip,
            gender,
            occupation,
            avatar,
            designation,
            about,
            social,
            badges,
        } = patch;

        if first_name.is_some() {
            self.first_name = first_name;
        }
        if last_name.is_some() {
            self.last_name = last_name;
        }
        if contact_number.is_some() {
            self.contact_number = contact_number;
        }
        if address.is_some() {
            self.address = address;
        }
        if state.is_some() {
            self.state = state;
        }
        if country.is_some() {
            self.country = country;
        }
        if zip.is_some() {
            self.zip = zip;
        }
        if gender.is_some() {
            self.gender = gender;
        }
        if occupation.is_some() {
            self.occupation = occupation;
        }
        if avatar.is_some() {
            self.avatar = avatar;
        }
        if designation.is_some() {
            self.designation = designation;
        }
        if about.is_some() {
            self.about = about;
        }
        if social.is_some() {
            self.social = social;
        }
        if badges.is_some() {
            self.badges = badges;
        }
    }
}

fn default_roles() -> Vec<String> {
    vec!["User".to_string()]
}

/// Public view of a user. This is what responses and access tokens carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub key: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
    #[serde(default)]
    pub accounts: AccountDetails,
    #[serde(flatten)]
    pub profile: ProfileFields,
}

/// Stored user document, never sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithCredentials {
    #[serde(flatten)]
    pub user: User,
    pub hashed_password: String,
}

impl UserWithCredentials {
    pub fn public(&self) -> User {
        self.user.clone()
    }
}

/// One line in a user's activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserHistoryEntry {
    pub username: String,
    pub time: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl UserHistoryEntry {
    pub fn new(username: &str, kind: &str, description: &str, icon: &str) -> Self {
        Self {
            username: username.to_string(),
            time: now_iso(),
            description: Some(description.to_string()),
            icon: Some(icon.to_string()),
            kind: kind.to_string(),
        }
    }
}

/// Current UTC time as an RFC 3339 string.
pub fn now_iso() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> ProfileFields {
        ProfileFields {
            first_name: Some("A".into()),
            last_name: Some("B".into()),
            ..Default::default()
        }
    }

    #[test]
    fn apply_overwrites_only_present_fields() {
        let mut profile = stored();
        profile.apply(ProfileFields {
            first_name: Some("C".into()),
            last_name: None,
            ..Default::default()
        });
        assert_eq!(profile.first_name.as_deref(), Some("C"));
        assert_eq!(profile.last_name.as_deref(), Some("B"));
    }

    #[test]
    fn empty_patch_is_noop() {
        let mut profile = stored();
        profile.apply(ProfileFields::default());
        assert_eq!(profile, stored());
    }

    #[test]
    fn user_defaults_when_fields_missing() {
        let user: User = serde_json::from_value(serde_json::json!({
            "key": "k1",
            "username": "alice",
        }))
        .unwrap();
        assert!(!user.disabled);
        assert_eq!(user.roles, vec!["User"]);
        assert_eq!(user.accounts, AccountDetails::default());
    }

    #[test]
    fn hashed_password_not_in_public_view() {
        let stored = UserWithCredentials {
            user: serde_json::from_value(serde_json::json!({"key": "k", "username": "bob"}))
                .unwrap(),
            hashed_password: "$argon2id$secret".into(),
        };
        let json = serde_json::to_string(&stored.public()).unwrap();
        assert!(!json.contains("hashed_password"));
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn history_entry_serializes_type_tag() {
        let entry = UserHistoryEntry::new("alice", "security", "Password changed", "key");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "security");
        assert!(OffsetDateTime::parse(&entry.time, &Rfc3339).is_ok());
    }
}
