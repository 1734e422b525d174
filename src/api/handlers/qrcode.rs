use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use super::{deny, internal_error, reject, Denial};
use crate::api::ApiState;
use crate::authz::DenyReason;
use crate::error::Error;

#[derive(ToSchema, Deserialize, Debug)]
pub struct QrCodeRequest {
    username: String,
    password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct QrCodeResponse {
    /// `otpauth://` provisioning URL.
    pub url: String,
    /// PNG rendering of `url` as a data URL.
    pub image: String,
}

#[utoipa::path(
    post,
    path = "/qrcode",
    request_body = QrCodeRequest,
    responses(
        (status = 200, description = "Provisioning payload", body = QrCodeResponse),
        (status = 401, description = "Bad credentials", body = Denial),
        (status = 404, description = "QR display disabled for this user", body = Denial),
        (status = 422, description = "Account label or stored secret cannot be provisioned", body = Denial),
    ),
    tag = "auth"
)]
#[instrument(skip_all, fields(username = %request.username))]
pub async fn qrcode(
    Extension(state): Extension<Arc<ApiState>>,
    Json(request): Json<QrCodeRequest>,
) -> Response {
    let user = match state
        .directory
        .user_by_credentials(&request.username, &request.password)
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => return deny(DenyReason::Unauthorized),
        Err(err) => return internal_error("Failed to check credentials", &err),
    };

    if !user.show_qrcode || !user.second_factor_enabled() {
        return reject(StatusCode::NOT_FOUND, "qrcode disabled");
    }

    match state
        .totp
        .provisioning_payload(&user.totp_secret, &state.totp_issuer, &user.username)
    {
        Ok(provisioning) => Json(QrCodeResponse {
            image: provisioning.data_url(),
            url: provisioning.url,
        })
        .into_response(),
        Err(Error::Validation(message)) => {
            warn!("Refusing to provision {}: {message}", user.username);
            reject(StatusCode::UNPROCESSABLE_ENTITY, "qrcode unavailable")
        }
        Err(err) => internal_error("Failed to render provisioning payload", &err),
    }
}
