use serde::{Deserialize, Serialize};

use super::repo_types::User;

/// Subject carried by every password-reset token.
pub const RESET_SUBJECT: &str = "reset";

/// Marks a token as a session token so a reset token can never pass as one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
}

/// Session JWT payload: a snapshot of the public user plus expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(flatten)]
    pub user: User,
    pub exp: usize,
    pub kind: TokenKind,
}

/// Password-reset JWT payload. `fp` pins the token to the password hash
/// current at issue time, so it stops working once any password change lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetClaims {
    pub sub: String,
    pub username: String,
    pub fp: String,
    pub nbf: usize,
    pub exp: usize,
}
