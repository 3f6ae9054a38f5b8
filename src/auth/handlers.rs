use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Form, Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, ForgotPasswordQuery, LoginForm, MessageResponse, NewUserRequest,
            ProfileEdit, ResetPasswordRequest, TokenResponse,
        },
        extractors::ActiveUser,
        repo_types::{User, UserHistoryEntry},
        services::UserService,
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(login))
        .route("/users/new/", post(register))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me/", get(get_me))
        .route("/users/me/history/", get(get_history))
        .route("/users/me/edit/", put(edit_user))
        .route("/users/me/change-password", put(change_password))
}

pub fn reset_routes() -> Router<AppState> {
    Router::new()
        .route("/users/forgot/", post(forgot_password))
        .route("/users/forgot/reset/:token", post(reset_password))
}

#[instrument(skip(service, form), fields(username = %form.username))]
pub async fn login(
    State(service): State<UserService>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = service.login(&form.username, &form.password).await?;
    Ok(Json(TokenResponse::bearer(token)))
}

#[instrument(skip(service, payload))]
pub async fn register(
    State(service): State<UserService>,
    Json(payload): Json<NewUserRequest>,
) -> Result<Json<User>, AppError> {
    let user = service.register(payload).await?;
    Ok(Json(user))
}

pub async fn get_me(ActiveUser(user): ActiveUser) -> Json<User> {
    Json(user)
}

#[instrument(skip(service, user), fields(username = %user.username))]
pub async fn get_history(
    State(service): State<UserService>,
    ActiveUser(user): ActiveUser,
) -> Result<Json<Vec<UserHistoryEntry>>, AppError> {
    Ok(Json(service.history(&user).await?))
}

#[instrument(skip(service, user, payload), fields(username = %user.username))]
pub async fn edit_user(
    State(service): State<UserService>,
    ActiveUser(user): ActiveUser,
    Json(payload): Json<ProfileEdit>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let updated = service.edit_profile(payload, &user).await?;
    Ok((StatusCode::ACCEPTED, Json(updated)))
}

#[instrument(skip(service, user, payload), fields(username = %user.username))]
pub async fn change_password(
    State(service): State<UserService>,
    ActiveUser(user): ActiveUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    service.change_password(payload, &user).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Password Successfully changed!")),
    ))
}

#[instrument(skip(service, query), fields(username = %query.username))]
pub async fn forgot_password(
    State(service): State<UserService>,
    Query(query): Query<ForgotPasswordQuery>,
) -> Result<Json<MessageResponse>, AppError> {
    service
        .request_password_reset(&query.email, &query.username)
        .await?;
    Ok(Json(MessageResponse::new(
        "An email send to your email address with reset password link",
    )))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(service): State<UserService>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    service
        .confirm_password_reset(&token, &payload.new_password, &payload.repeat_password)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Password has been reset")),
    ))
}
