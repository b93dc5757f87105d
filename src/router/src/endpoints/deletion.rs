use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use reconciler::{DeletionOptions, DeletionReport};
use serde::{Deserialize, Serialize};

use crate::RouterState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    /// Also remove the identity-provider account, defaults to true
    #[serde(default)]
    pub delete_account: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DeletionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn failure(status: StatusCode, error: impl ToString) -> (StatusCode, Json<DeleteResponse>) {
    (
        status,
        Json(DeleteResponse {
            ok: false,
            deleted: None,
            error: Some(error.to_string()),
        }),
    )
}

/// POST /delete
///
/// Remove every record, blob and account owned by `userId`
#[tracing::instrument(skip(state))]
pub async fn delete<S: RouterState>(
    State(state): State<S>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> (StatusCode, Json<DeleteResponse>) {
    let Json(request) = match body {
        Ok(request) => request,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let options = DeletionOptions {
        delete_account: request.delete_account.unwrap_or(true),
    };
    let user_id = request.user_id.as_deref().unwrap_or_default();

    match state.reconciler().deletion.delete(user_id, options).await {
        Ok(report) => (
            StatusCode::OK,
            Json(DeleteResponse {
                ok: true,
                deleted: Some(report),
                error: None,
            }),
        ),
        Err(e) if e.is_input_error() => failure(StatusCode::BAD_REQUEST, e),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Deletion failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}
