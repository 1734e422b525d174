use axum::{
    extract::{ConnectInfo, Extension},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use utoipa::ToSchema;

use super::{admitted, Denial};
use crate::api::ApiState;

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct InfoResponse {
    pub user_id: String,
    pub is_admin: bool,
    /// Seconds until the presented session expires.
    pub expire_second: i64,
}

#[utoipa::path(
    get,
    path = "/info",
    responses(
        (status = 200, description = "Caller identity", body = InfoResponse),
        (status = 401, description = "No valid session", body = Denial),
        (status = 403, description = "Caller not admitted", body = Denial),
    ),
    tag = "auth"
)]
pub async fn info(
    Extension(state): Extension<Arc<ApiState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    match admitted(&state, &headers, connect.as_ref()).await {
        Ok((claims, user)) => Json(InfoResponse {
            expire_second: state.sessions.expire_seconds(&claims),
            user_id: user.username,
            is_admin: user.is_admin,
        })
        .into_response(),
        Err(response) => response,
    }
}
