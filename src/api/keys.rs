//! API key management endpoints.
//!
//! Owner-facing CRUD over the vault. Every request is scoped to the user id
//! the gateway forwards in the identity header; responses never carry the
//! plaintext, the fingerprint or the sealed blob.

use crate::api::identity::{extract_user_id, IdentityError};
use crate::credentials::{ApiKeyChanges, ApiKeySummary, KeyTestResult, VaultService};
use crate::error::VaultError;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};
use zeroize::Zeroizing;


/// Shared application state for the keys API
#[derive(Clone)]
pub struct KeysAppState {
    pub vault: Arc<VaultService>,
    /// Header carrying the authenticated user id
    pub user_header: String,
}

/// Request body for POST /api/keys
#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub provider: String,
    pub name: String,
    pub key: String,
}

impl fmt::Debug for CreateKeyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateKeyRequest")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("key", &"[redacted]")
            .finish()
    }
}

/// Response for GET /api/keys
#[derive(Serialize)]
pub struct ListKeysResponse {
    pub keys: Vec<ApiKeySummary>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Create keys API router
pub fn create_keys_router(state: KeysAppState) -> Router {
    Router::new()
        .route("/api/keys", get(list_keys).post(create_key))
        .route(
            "/api/keys/:id",
            get(get_key).patch(update_key).delete(delete_key),
        )
        .route("/api/keys/:id/test", post(test_key))
        .with_state(Arc::new(state))
}

/// GET /api/keys - List the caller's keys, newest first
async fn list_keys(
    State(state): State<Arc<KeysAppState>>,
    headers: HeaderMap,
) -> Result<Json<ListKeysResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;

    debug!(user_id, "Listing API keys");

    let keys = run_blocking(&state, move |vault| vault.list(user_id)).await?;
    Ok(Json(ListKeysResponse { keys }))
}

/// POST /api/keys - Store a new key
///
/// Returns 201 with the safe projection. 409 if the caller already has a key
/// for the provider, 400 for an unparseable body.
async fn create_key(
    State(state): State<Arc<KeysAppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiKeySummary>), AppError> {
    let user_id = authenticate(&state, &headers)?;
    let Json(body) = body?;

    let CreateKeyRequest {
        provider,
        name,
        key,
    } = body;
    let key = Zeroizing::new(key);

    debug!(user_id, provider = %provider, "Creating API key");

    let created = run_blocking(&state, move |vault| {
        vault.create(user_id, &provider, &name, &key)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/keys/:id - One of the caller's keys
async fn get_key(
    State(state): State<Arc<KeysAppState>>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiKeySummary>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let Path(id) = id?;

    let key = run_blocking(&state, move |vault| vault.get(user_id, id)).await?;
    Ok(Json(key))
}

/// PATCH /api/keys/:id - Rename, rotate, deactivate or reactivate a key
async fn update_key(
    State(state): State<Arc<KeysAppState>>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
    changes: Result<Json<ApiKeyChanges>, JsonRejection>,
) -> Result<Json<ApiKeySummary>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let Path(id) = id?;
    let Json(changes) = changes?;

    debug!(user_id, key_id = id, changes = ?changes, "Updating API key");

    let updated = run_blocking(&state, move |vault| vault.update(user_id, id, changes)).await?;
    Ok(Json(updated))
}

/// DELETE /api/keys/:id - Remove a key
///
/// Returns 204, or 404 if the caller has no such key.
async fn delete_key(
    State(state): State<Arc<KeysAppState>>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let Path(id) = id?;

    run_blocking(&state, move |vault| vault.delete(user_id, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/keys/:id/test - Check the stored key still decrypts
///
/// Does not contact the provider. 422 if the key can no longer be opened.
async fn test_key(
    State(state): State<Arc<KeysAppState>>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<KeyTestResult>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let Path(id) = id?;

    let result = run_blocking(&state, move |vault| vault.test(user_id, id)).await?;
    Ok(Json(result))
}

fn authenticate(state: &KeysAppState, headers: &HeaderMap) -> Result<i64, AppError> {
    extract_user_id(headers, &state.user_header).map_err(AppError::from)
}

/// Runs a vault call on the blocking pool; SQLite and AES work must not stall
/// the async workers.
async fn run_blocking<T, F>(state: &KeysAppState, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&VaultService) -> Result<T, VaultError> + Send + 'static,
{
    let vault = state.vault.clone();
    tokio::task::spawn_blocking(move || f(&vault))
        .await
        .map_err(|e| AppError::Internal(format!("vault task failed: {}", e)))?
        .map_err(AppError::Vault)
}

/// Application error types
#[derive(Debug)]
enum AppError {
    Unauthorized(String),
    /// Body or path the extractors could not parse
    BadRequest(String),
    Vault(VaultError),
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Vault(e) => match e {
                VaultError::InvalidProvider(_)
                | VaultError::InvalidName(_)
                | VaultError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                VaultError::ProviderConflict(_) => StatusCode::CONFLICT,
                VaultError::NotFound => StatusCode::NOT_FOUND,
                VaultError::DecryptionFailed => StatusCode::UNPROCESSABLE_ENTITY,
                VaultError::EncryptionFailed | VaultError::StorageFailed(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (error, message) = match self {
            AppError::Unauthorized(msg) => ("unauthorized".to_string(), msg),
            AppError::BadRequest(msg) => ("invalid_request".to_string(), msg),
            AppError::Vault(e) if status.is_server_error() => {
                // Backend detail stays in the logs
                error!(error = %e, kind = e.kind(), "Vault operation failed");
                (e.kind().to_string(), "internal error".to_string())
            }
            AppError::Vault(e) => (e.kind().to_string(), e.to_string()),
            AppError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                ("internal".to_string(), "internal error".to_string())
            }
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

impl From<IdentityError> for AppError {
    fn from(e: IdentityError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

// Only the failure class is reported; serde messages can quote submitted values.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(_) => {
                "request body is missing a field or has a field of the wrong type"
            }
            JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON",
            JsonRejection::MissingJsonContentType(_) => {
                "expected `Content-Type: application/json`"
            }
            _ => "request body could not be read",
        };
        AppError::BadRequest(message.to_string())
    }
}

impl From<PathRejection> for AppError {
    fn from(_: PathRejection) -> Self {
        AppError::BadRequest("key id must be an integer".to_string())
    }
}
