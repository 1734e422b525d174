use axum::{
    extract::{ConnectInfo, Extension},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use std::{net::SocketAddr, sync::Arc};

use super::{admitted, internal_error, Denial};
use crate::api::ApiState;
use crate::directory::ClientInfo;

#[utoipa::path(
    get,
    path = "/clients",
    responses(
        (status = 200, description = "Every client for admins, owned clients otherwise", body = [ClientInfo]),
        (status = 401, description = "No valid session", body = Denial),
        (status = 403, description = "Caller not admitted", body = Denial),
    ),
    tag = "directory"
)]
pub async fn clients(
    Extension(state): Extension<Arc<ApiState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let user = match admitted(&state, &headers, connect.as_ref()).await {
        Ok((_, user)) => user,
        Err(response) => return response,
    };

    if !user.is_admin {
        return Json(user.clients).into_response();
    }
    match state.directory.all_clients().await {
        Ok(clients) => Json(clients).into_response(),
        Err(err) => internal_error("Failed to list clients", &err),
    }
}
