use serde::{Deserialize, Serialize};

use super::repo_types::ProfileFields;

/// Form body of `POST /token`.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".into(),
        }
    }
}

/// Registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub repeat_password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileFields,
}

/// Sparse profile edit, confirmed with the caller's username and password.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEdit {
    pub username: String,
    pub password: String,
    #[serde(flatten)]
    pub profile: ProfileFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub username: String,
    pub password: String,
    pub new_password: String,
    pub repeat_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordQuery {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: String,
    pub repeat_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
