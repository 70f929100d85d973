use axum::{Json, extract::State};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::services::monitoring::SecurityStatus;

/// `GET /api/v1/admin/security-status`, restricted to `OPERATOR_EMAILS`
pub async fn security_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SecurityStatus>> {
    if !state.config.server.is_operator(&user.email) {
        tracing::warn!(target: "security_audit", subject = %user.id, "security status denied to non-operator");
        return Err(ApiError::Forbidden);
    }

    tracing::debug!(subject = %user.id, "security status requested");
    Ok(Json(state.monitoring.snapshot()))
}
