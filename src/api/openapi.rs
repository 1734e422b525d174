use axum::response::Json;
use utoipa::OpenApi;

use super::handlers::{self, clients, health, info, login, qrcode};
use crate::directory::ClientInfo;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        info::info,
        clients::clients,
        qrcode::qrcode,
    ),
    components(schemas(
        health::Health,
        login::LoginRequest,
        login::LoginResponse,
        info::InfoResponse,
        qrcode::QrCodeRequest,
        qrcode::QrCodeResponse,
        handlers::Denial,
        ClientInfo,
    )),
    tags(
        (name = "auth", description = "Login, identity and second-factor enrollment"),
        (name = "directory", description = "Tenant directory"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}
