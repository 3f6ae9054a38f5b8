use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{ChangePasswordRequest, NewUserRequest, ProfileEdit},
    jwt::JwtKeys,
    password::{credential_fingerprint, hash_password, verify_password, verify_password_or_dummy},
    repo::{RepoError, UserRepository},
    repo_types::{now_iso, AccountDetails, User, UserHistoryEntry, UserWithCredentials},
};
use crate::{
    config::AppConfig,
    error::AppError,
    notify::{Notification, Notifier},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_http_url(url: &str) -> bool {
    lazy_static! {
        static ref URL_RE: Regex = Regex::new(r"^https?://[^\s/$.?#][^\s]*$").unwrap();
    }
    URL_RE.is_match(url)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    !username.is_empty() && username.chars().all(char::is_alphanumeric)
}

/// Avatar derived from the normalized email address.
pub fn gravatar_url(email: &str) -> String {
    let digest = md5::compute(email.trim().to_lowercase().as_bytes());
    format!("https://www.gravatar.com/avatar/{:x}?s=400&d=robohash", digest)
}

/// Account use cases on top of the repository, hasher and token keys.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    keys: JwtKeys,
    notifier: Notifier,
    config: Arc<AppConfig>,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.users.clone(),
            state.jwt.clone(),
            state.notifier.clone(),
            state.config.clone(),
        )
    }
}

impl UserService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        keys: JwtKeys,
        notifier: Notifier,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            repo,
            keys,
            notifier,
            config,
        }
    }

    #[instrument(skip(self, candidate), fields(username = %candidate.username))]
    pub async fn register(&self, mut candidate: NewUserRequest) -> Result<User, AppError> {
        if !self.config.open_registration {
            return Err(AppError::Forbidden(
                "Open user registration is forbidden on this server".into(),
            ));
        }
        validate_candidate(&mut candidate)?;

        if self.repo.get_by_username(&candidate.username).await?.is_some() {
            warn!("username already registered");
            return Err(AppError::Conflict(
                "The user with this username already exists in the system.".into(),
            ));
        }

        let mut profile = candidate.profile;
        if profile.avatar.is_none() {
            profile.avatar = candidate.email.as_deref().map(gravatar_url);
        }
        let now = now_iso();

        let hashed_password = hash_password(&candidate.password)?;
        let record = UserWithCredentials {
            user: User {
                key: Uuid::new_v4().to_string(),
                username: candidate.username,
                email: candidate.email,
                disabled: false,
                roles: vec!["User".into()],
                accounts: AccountDetails {
                    created_at: Some(now.clone()),
                    updated_at: Some(now),
                },
                profile,
            },
            hashed_password,
        };

        let stored = self.repo.insert(record).await?;
        info!(key = %stored.user.key, "user registered");
        self.record(UserHistoryEntry::new(
            &stored.user.username,
            "account",
            "Account created",
            "user-plus",
        ))
        .await;
        Ok(stored.public())
    }

    /// Unknown user and wrong password fail identically, and both pay for
    /// one argon2 verification.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<String, AppError> {
        let stored = self.repo.get_by_username(username).await?;
        let verified =
            verify_password_or_dummy(password, stored.as_ref().map(|s| s.hashed_password.as_str()));
        let Some(stored) = stored else {
            warn!("login unknown username");
            return Err(AppError::bad_credentials());
        };
        if !verified {
            warn!(key = %stored.user.key, "login invalid password");
            return Err(AppError::bad_credentials());
        }
        let token = self.keys.sign_access(&stored.user)?;
        info!(key = %stored.user.key, "user logged in");
        Ok(token)
    }

    #[instrument(skip(self, edits, current), fields(username = %current.username))]
    pub async fn edit_profile(&self, edits: ProfileEdit, current: &User) -> Result<User, AppError> {
        let mut stored = self
            .check_credentials(&edits.username, &edits.password, current)
            .await?;
        if let Some(avatar) = edits.profile.avatar.as_deref() {
            if !is_http_url(avatar) {
                return Err(AppError::Validation("avatar must be an http(s) URL".into()));
            }
        }

        stored.user.profile.apply(edits.profile);
        stored.user.accounts.updated_at = Some(now_iso());

        let saved = self.repo.update_profile(stored.user).await.map_err(|e| match e {
            RepoError::Conflict | RepoError::NotFound => AppError::from(e),
            e => {
                error!(error = %e, "profile write failed");
                AppError::WriteError
            }
        })?;
        info!("profile updated");
        self.record(UserHistoryEntry::new(
            &saved.user.username,
            "profile",
            "Profile updated",
            "user-edit",
        ))
        .await;
        Ok(saved.public())
    }

    #[instrument(skip(self, req, current), fields(username = %current.username))]
    pub async fn change_password(
        &self,
        req: ChangePasswordRequest,
        current: &User,
    ) -> Result<(), AppError> {
        let stored = self
            .check_credentials(&req.username, &req.password, current)
            .await?;
        if req.new_password != req.repeat_password {
            return Err(AppError::NotAcceptable("Entered password doesn't match".into()));
        }
        self.store_password(&stored.user, &req.new_password).await?;
        self.record(UserHistoryEntry::new(
            &stored.user.username,
            "security",
            "Password changed",
            "key",
        ))
        .await;
        Ok(())
    }

    /// Issues a reset token and queues its delivery. The response is the same
    /// whether or not the username is known.
    #[instrument(skip(self, email))]
    pub async fn request_password_reset(
        &self,
        email: &str,
        username: &str,
    ) -> Result<String, AppError> {
        let current_hash = self
            .repo
            .get_by_username(username)
            .await?
            .map(|stored| stored.hashed_password)
            .unwrap_or_default();
        let token = self
            .keys
            .sign_reset(username, &credential_fingerprint(&current_hash))?;
        let link = format!("{}/users/forgot/reset/{}", self.config.server_host, token);
        self.notifier.enqueue(Notification {
            recipient: email.to_string(),
            subject: format!("{} - Forgot password request", self.config.project_name),
            body: format!("Post new_password to this link to reset password : {link}"),
        });
        info!("password reset requested");
        Ok(token)
    }

    #[instrument(skip_all)]
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
        repeat_password: &str,
    ) -> Result<(), AppError> {
        let grant = self.keys.verify_reset(token).map_err(|e| {
            warn!(error = %e, "reset token rejected");
            AppError::BadRequest("Invalid token".into())
        })?;
        let username = grant.username;
        let stored = self.repo.get_by_username(&username).await?.ok_or_else(|| {
            AppError::NotFound("The user with this username does not exist in the system.".into())
        })?;
        if grant.fingerprint != credential_fingerprint(&stored.hashed_password) {
            warn!(%username, "reset token already used or superseded");
            return Err(AppError::BadRequest("Invalid token".into()));
        }
        if stored.user.disabled {
            return Err(AppError::BadRequest("Inactive user".into()));
        }
        if new_password != repeat_password {
            return Err(AppError::NotAcceptable("Entered password doesn't match".into()));
        }
        self.store_password(&stored.user, new_password).await?;
        info!(%username, "password reset completed");
        self.record(UserHistoryEntry::new(
            &username,
            "security",
            "Password reset by email",
            "key",
        ))
        .await;
        Ok(())
    }

    pub async fn history(&self, current: &User) -> Result<Vec<UserHistoryEntry>, AppError> {
        Ok(self.repo.list_history(&current.username).await?)
    }

    /// The confirming username must be the caller's own and the password must
    /// match what is stored now, not what the token remembers.
    async fn check_credentials(
        &self,
        username: &str,
        password: &str,
        current: &User,
    ) -> Result<UserWithCredentials, AppError> {
        if username != current.username {
            warn!("confirming username does not match session");
            return Err(AppError::credentials_mismatch());
        }
        let stored = self.repo.get_by_id(&current.key).await?.ok_or_else(|| {
            AppError::NotFound("The user with this username does not exist in the system.".into())
        })?;
        if !verify_password(password, &stored.hashed_password) {
            warn!("confirming password rejected");
            return Err(AppError::credentials_mismatch());
        }
        Ok(stored)
    }

    async fn store_password(&self, user: &User, plain: &str) -> Result<(), AppError> {
        let hash = hash_password(plain)?;
        self.repo
            .update_password_hash(&user.key, &hash)
            .await
            .map_err(|e| {
                error!(error = %e, key = %user.key, "password write failed");
                AppError::WriteError
            })
    }

    async fn record(&self, entry: UserHistoryEntry) {
        if let Err(e) = self.repo.append_history(entry).await {
            warn!(error = %e, "history append failed");
        }
    }
}

fn validate_candidate(candidate: &mut NewUserRequest) -> Result<(), AppError> {
    if !is_valid_username(&candidate.username) {
        return Err(AppError::Validation("username must be alphanumeric".into()));
    }
    if let Some(email) = candidate.email.as_mut() {
        *email = email.trim().to_string();
        if !is_valid_email(email) {
            return Err(AppError::Validation("Invalid email".into()));
        }
    }
    if let Some(avatar) = candidate.profile.avatar.as_deref() {
        if !is_http_url(avatar) {
            return Err(AppError::Validation("avatar must be an http(s) URL".into()));
        }
    }
    if let Some(repeat) = candidate.repeat_password.as_deref() {
        if repeat != candidate.password {
            return Err(AppError::NotAcceptable("Entered password doesn't match".into()));
        }
    }
    Ok(())
}
