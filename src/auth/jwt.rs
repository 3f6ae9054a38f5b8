use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::{AccessClaims, ResetClaims, TokenKind, RESET_SUBJECT};
use super::repo_types::User;
use crate::{config::JwtConfig, state::AppState};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token subject mismatch")]
    WrongSubject,
    #[error("token carries no username")]
    MissingUsername,
}

/// Decoded reset token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetGrant {
    pub username: String,
    pub fingerprint: String,
}

/// Signs and verifies both token kinds with one HS256 secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub access_ttl: Duration,
    pub reset_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            access_ttl: Duration::minutes(cfg.access_ttl_minutes),
            reset_ttl: Duration::hours(cfg.reset_ttl_hours),
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation
    }

    pub fn sign_access(&self, user: &User) -> anyhow::Result<String> {
        self.sign_access_for(user, self.access_ttl)
    }

    pub fn sign_access_for(&self, user: &User, ttl: Duration) -> anyhow::Result<String> {
        self.sign_access_at(user, OffsetDateTime::now_utc(), ttl)
    }

    pub(crate) fn sign_access_at(
        &self,
        user: &User,
        issued_at: OffsetDateTime,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        let exp = issued_at + ttl;
        let claims = AccessClaims {
            user: user.clone(),
            exp: exp.unix_timestamp().max(0) as usize,
            kind: TokenKind::Access,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(username = %user.username, "access token signed");
        Ok(token)
    }

    /// Rebuilds the user purely from claims; storage is not consulted.
    pub fn verify_access(&self, token: &str) -> Result<User, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding, &Self::validation())?;
        if data.claims.user.username.is_empty() {
            return Err(TokenError::MissingUsername);
        }
        debug!(username = %data.claims.user.username, "access token verified");
        Ok(data.claims.user)
    }

    pub fn sign_reset(&self, username: &str, fingerprint: &str) -> anyhow::Result<String> {
        self.sign_reset_at(username, fingerprint, OffsetDateTime::now_utc(), self.reset_ttl)
    }

    pub(crate) fn sign_reset_at(
        &self,
        username: &str,
        fingerprint: &str,
        issued_at: OffsetDateTime,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        let claims = ResetClaims {
            sub: RESET_SUBJECT.to_string(),
            username: username.to_string(),
            fp: fingerprint.to_string(),
            nbf: issued_at.unix_timestamp().max(0) as usize,
            exp: (issued_at + ttl).unix_timestamp().max(0) as usize,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(%username, "reset token signed");
        Ok(token)
    }

    pub fn verify_reset(&self, token: &str) -> Result<ResetGrant, TokenError> {
        let mut validation = Self::validation();
        validation.validate_nbf = true;
        let data = decode::<ResetClaims>(token, &self.decoding, &validation)?;
        if data.claims.sub != RESET_SUBJECT {
            return Err(TokenError::WrongSubject);
        }
        if data.claims.username.is_empty() {
            return Err(TokenError::MissingUsername);
        }
        Ok(ResetGrant {
            username: data.claims.username,
            fingerprint: data.claims.fp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::{AccountDetails, ProfileFields};

    fn make_keys(secret: &str) -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: secret.into(),
            access_ttl_minutes: 60,
            reset_ttl_hours: 48,
        })
    }

    fn alice() -> User {
        User {
            key: "k-alice".into(),
            username: "alice".into(),
            email: Some("alice@example.com".into()),
            disabled: false,
            roles: vec!["User".into()],
            accounts: AccountDetails {
                created_at: Some("2024-01-01T00:00:00Z".into()),
                updated_at: Some("2024-01-01T00:00:00Z".into()),
            },
            profile: ProfileFields {
                first_name: Some("Alice".into()),
                zip: Some(12345),
                ..Default::default()
            },
        }
    }

    #[test]
    fn access_token_roundtrip_keeps_public_fields() {
        let keys = make_keys("dev-secret");
        let token = keys.sign_access(&alice()).expect("sign access");
        let user = keys.verify_access(&token).expect("verify access");
        assert_eq!(user, alice());
    }

    #[test]
    fn access_token_rejected_after_ttl() {
        let keys = make_keys("dev-secret");
        let issued = OffsetDateTime::now_utc() - Duration::hours(2);
        let token = keys
            .sign_access_at(&alice(), issued, Duration::hours(1))
            .expect("sign access");
        assert!(matches!(
            keys.verify_access(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn access_token_valid_before_ttl() {
        let keys = make_keys("dev-secret");
        let issued = OffsetDateTime::now_utc() - Duration::minutes(30);
        let token = keys
            .sign_access_at(&alice(), issued, Duration::hours(1))
            .unwrap();
        assert!(keys.verify_access(&token).is_ok());
    }

    #[test]
    fn access_token_rejected_with_other_secret() {
        let token = make_keys("secret-a").sign_access(&alice()).unwrap();
        assert!(make_keys("secret-b").verify_access(&token).is_err());
    }

    #[test]
    fn access_token_missing_username_rejected() {
        let keys = make_keys("dev-secret");
        let exp = (OffsetDateTime::now_utc() + Duration::hours(1)).unix_timestamp();
        let token = encode(
            &Header::default(),
            &serde_json::json!({ "key": "k", "exp": exp, "kind": "access" }),
            &keys.encoding,
        )
        .unwrap();
        assert!(keys.verify_access(&token).is_err());

        let token = encode(
            &Header::default(),
            &serde_json::json!({ "key": "k", "username": "", "exp": exp, "kind": "access" }),
            &keys.encoding,
        )
        .unwrap();
        assert!(matches!(
            keys.verify_access(&token),
            Err(TokenError::MissingUsername)
        ));
    }

    #[test]
    fn reset_token_roundtrip() {
        let keys = make_keys("dev-secret");
        let token = keys.sign_reset("alice", "0123456789abcdef").unwrap();
        assert_eq!(
            keys.verify_reset(&token).unwrap(),
            ResetGrant {
                username: "alice".into(),
                fingerprint: "0123456789abcdef".into(),
            }
        );
    }

    #[test]
    fn reset_token_with_forged_subject_rejected() {
        let keys = make_keys("dev-secret");
        let now = OffsetDateTime::now_utc();
        let forged = ResetClaims {
            sub: "access".into(),
            username: "alice".into(),
            fp: "fp".into(),
            nbf: now.unix_timestamp() as usize,
            exp: (now + Duration::hours(1)).unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &forged, &keys.encoding).unwrap();
        assert!(matches!(
            keys.verify_reset(&token),
            Err(TokenError::WrongSubject)
        ));
    }

    #[test]
    fn expired_reset_token_rejected() {
        let keys = make_keys("dev-secret");
        let issued = OffsetDateTime::now_utc() - Duration::hours(49);
        let token = keys
            .sign_reset_at("alice", "fp", issued, Duration::hours(48))
            .unwrap();
        assert!(keys.verify_reset(&token).is_err());
    }

    #[test]
    fn token_kinds_do_not_cross() {
        let keys = make_keys("dev-secret");
        let reset = keys.sign_reset("alice", "fp").unwrap();
        assert!(keys.verify_access(&reset).is_err());

        let access = keys.sign_access(&alice()).unwrap();
        assert!(keys.verify_reset(&access).is_err());
    }
}
