use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::application::{LedgerService, ServiceMetricsSnapshot};
use crate::domain::{
    Account, AccountPatch, BalanceChangeRequest, CreateAccountRequest, DeleteAccountRequest,
    LedgerError, TransferRequest,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// A [`LedgerError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(LedgerError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn get_accounts(State(service): State<Arc<LedgerService>>) -> ApiResult<Vec<Account>> {
    Ok(Json(service.get_accounts().await?))
}

pub async fn create_account(
    State(service): State<Arc<LedgerService>>,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(request) = payload?;
    Ok(Json(service.create_account(request).await?))
}

pub async fn delete_account(
    State(service): State<Arc<LedgerService>>,
    payload: Result<Json<DeleteAccountRequest>, JsonRejection>,
) -> ApiResult<String> {
    let Json(request) = payload?;
    Ok(Json(service.delete_account(request).await?))
}

pub async fn get_account(
    State(service): State<Arc<LedgerService>>,
    Path(id): Path<String>,
) -> ApiResult<Account> {
    Ok(Json(service.get_account(&id).await?))
}

pub async fn update_account(
    State(service): State<Arc<LedgerService>>,
    Path(id): Path<String>,
    payload: Result<Json<AccountPatch>, JsonRejection>,
) -> ApiResult<String> {
    let Json(patch) = payload?;
    Ok(Json(service.update_account(&id, patch).await?))
}

pub async fn transfer(
    State(service): State<Arc<LedgerService>>,
    Path(id): Path<String>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> ApiResult<String> {
    let Json(request) = payload?;
    Ok(Json(service.transfer(&id, request).await?))
}

pub async fn debit(
    State(service): State<Arc<LedgerService>>,
    Path(id): Path<String>,
    payload: Result<Json<BalanceChangeRequest>, JsonRejection>,
) -> ApiResult<String> {
    let Json(request) = payload?;
    Ok(Json(service.debit(&id, request).await?))
}

pub async fn credit(
    State(service): State<Arc<LedgerService>>,
    Path(id): Path<String>,
    payload: Result<Json<BalanceChangeRequest>, JsonRejection>,
) -> ApiResult<String> {
    let Json(request) = payload?;
    Ok(Json(service.credit(&id, request).await?))
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn metrics(State(service): State<Arc<LedgerService>>) -> Json<ServiceMetricsSnapshot> {
    Json(service.metrics())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (LedgerError::NotFound(AccountId(7)), StatusCode::NOT_FOUND),
            (LedgerError::validation("bad"), StatusCode::BAD_REQUEST),
            (LedgerError::Conflict("deadlock".into()), StatusCode::CONFLICT),
            (
                LedgerError::Storage("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
