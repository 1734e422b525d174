use axum::{
    extract::{ConnectInfo, Extension},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use super::{caller_address, deny, internal_error, Denial};
use crate::api::ApiState;
use crate::authz::{Decision, LoginAttempt};
use crate::directory::ClientInfo;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    username: String,
    password: String,
    /// One-time code, required for users with a second factor.
    #[serde(default)]
    code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub clients: Vec<ClientInfo>,
}

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Bad credentials", body = Denial),
        (status = 403, description = "Caller not admitted or second factor rejected", body = Denial),
    ),
    tag = "auth"
)]
#[instrument(skip_all, fields(username = %request.username))]
pub async fn login(
    Extension(state): Extension<Arc<ApiState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Response {
    let attempt = LoginAttempt {
        caller: caller_address(&headers, connect.as_ref()),
        username: request.username,
        password: request.password,
        code: request.code,
    };

    let user = match state.authorizer.login(&attempt).await {
        Ok(Decision::Allow(user)) => user,
        Ok(Decision::Deny(reason)) => {
            info!(reason = reason.as_str(), "login refused");
            return deny(reason);
        }
        Err(err) => return internal_error("Failed to check credentials", &err),
    };

    let session = match state.sessions.issue(&user.username) {
        Ok(session) => session,
        Err(err) => return internal_error("Failed to sign session", &err),
    };

    if let Err(err) = state
        .directory
        .update_stored_token(&user.username, &session.token)
        .await
    {
        return internal_error("Failed to store issued token", &err);
    }

    let mut response_headers = HeaderMap::new();
    match state.sessions.session_cookie(&session.token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }

    let body = LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        clients: user.clients,
    };
    (StatusCode::OK, response_headers, Json(body)).into_response()
}
