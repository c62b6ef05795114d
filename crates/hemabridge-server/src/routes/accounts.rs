//! Registration, login and the doctor directory.

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use hemabridge_core::auth::{self, AuthError};
use hemabridge_core::policy::{Action, Role};
use hemabridge_core::store::{NewUser, UserProfile};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::{AppState, blocking};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    role: Role,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let username = self.username.trim();
        if username.is_empty() || username.chars().any(char::is_whitespace) {
            return Err(ApiError::bad_request(
                "username must be non-empty and contain no spaces",
            ));
        }
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_email {
            return Err(ApiError::bad_request("email address is not valid"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::bad_request(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let RegisterRequest {
        username,
        email,
        password,
        role,
    } = request;
    let password_hash = blocking(move || auth::hash_password(&password)).await?;
    let new_user = NewUser {
        username: username.trim().to_string(),
        email: email.trim().to_string(),
        password_hash,
        role,
    };
    let user = state.db(move |store| store.create_user(&new_user)).await?;
    info!(user_id = user.id, role = %user.role, "user registered");

    Ok((StatusCode::CREATED, Json(UserProfile::from(&user))))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    role: Role,
    user_id: i64,
    expires_at: i64,
}

pub async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Form(LoginForm { username, password }) = form?;
    let username = username.trim().to_string();
    state.throttle.check(&username)?;

    let lookup = username.clone();
    let user = match state.db(move |store| store.user_by_username(&lookup)).await? {
        Some(user) => {
            blocking(move || {
                let matches = auth::verify_password(&password, &user.password_hash);
                Ok::<_, ApiError>(matches.then_some(user))
            })
            .await?
        },
        None => None,
    };
    let Some(user) = user else {
        state.throttle.record_failure(&username);
        info!(username = %username, "login failed");
        return Err(AuthError::InvalidCredentials.into());
    };
    if !user.is_active {
        info!(user_id = user.id, "inactive account refused login");
        return Err(AuthError::InactiveAccount.into());
    }

    state.throttle.clear(&username);
    let user_id = user.id;
    state.db(move |store| store.touch_last_login(user_id)).await?;
    let token = state.tokens.issue(user.id, &user.username, user.role)?;
    info!(user_id = user.id, role = %user.role, "login succeeded");

    Ok(Json(LoginResponse {
        access_token: token.token.expose_secret().to_string(),
        token_type: "bearer",
        role: user.role,
        user_id: user.id,
        expires_at: token.expires_at,
    }))
}

pub async fn doctors(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    user.require(Action::ListDoctors)?;
    let doctors = state
        .db(|store| store.users_by_role(Role::Doctor))
        .await?
        .iter()
        .filter(|doctor| doctor.is_active)
        .map(UserProfile::from)
        .collect();
    Ok(Json(doctors))
}
