pub mod clients;
pub mod health;
pub mod info;
pub mod login;
pub mod qrcode;

// common functions for the handlers
use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::error;
use utoipa::ToSchema;

use super::ApiState;
use crate::authz::{resolve_caller_address, Decision, DenyReason};
use crate::directory::UserRecord;
use crate::error::Error;
use crate::session::Claims;

/// Body of every refusal.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Denial {
    pub reason: String,
}

pub(crate) fn reject(status: StatusCode, reason: &str) -> Response {
    (
        status,
        Json(Denial {
            reason: reason.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn deny(reason: DenyReason) -> Response {
    let status = match reason {
        DenyReason::Unauthorized => StatusCode::UNAUTHORIZED,
        DenyReason::NoTenantBinding
        | DenyReason::TenantMismatch
        | DenyReason::SecondFactorRejected => StatusCode::FORBIDDEN,
    };
    reject(status, reason.as_str())
}

pub(crate) fn internal_error(context: &str, err: &Error) -> Response {
    error!("{context}: {err}");
    reject(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

/// Caller address from `X-Forwarded-For`, falling back to the peer address.
pub(crate) fn caller_address(
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let direct = connect.map(|ConnectInfo(addr)| addr.ip().to_canonical().to_string());
    resolve_caller_address(forwarded, direct.as_deref())
}

/// Resolve the session, then run admission for it.
pub(crate) async fn admitted(
    state: &ApiState,
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
) -> Result<(Claims, Box<UserRecord>), Response> {
    let Some(claims) = state.sessions.resolve(headers) else {
        return Err(deny(DenyReason::Unauthorized));
    };
    let caller = caller_address(headers, connect);
    match state.authorizer.authorize(&claims.sub, caller.as_deref()).await {
        Ok(Decision::Allow(user)) => Ok((claims, user)),
        Ok(Decision::Deny(reason)) => Err(deny(reason)),
        Err(err) => Err(internal_error("Failed to authorize request", &err)),
    }
}
