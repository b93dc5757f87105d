use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use reconciler::ReconcileError;
use serde::{Deserialize, Serialize};

use crate::RouterState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateRequest {
    #[serde(default)]
    pub old_user_id: Option<String>,
    #[serde(default)]
    pub new_user_id: Option<String>,
    /// Only re-run blob mirroring and the dependent fan-out
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MigrateResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrateResponse {
    fn failure(status: StatusCode, error: impl ToString) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                ok: false,
                message: None,
                error: Some(error.to_string()),
            }),
        )
    }
}

/// POST /migrate
///
/// Move a user's data from `oldUserId` (or the record already naming
/// `newUserId`) to `newUserId`.
#[tracing::instrument(skip(state))]
pub async fn migrate<S: RouterState>(
    State(state): State<S>,
    body: Result<Json<MigrateRequest>, JsonRejection>,
) -> (StatusCode, Json<MigrateResponse>) {
    let Json(request) = match body {
        Ok(request) => request,
        Err(rejection) => {
            return MigrateResponse::failure(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let new_user_id = request.new_user_id.as_deref().unwrap_or_default();
    let migration = &state.reconciler().migration;
    let result = if request.resume {
        migration
            .resume(request.old_user_id.as_deref().unwrap_or_default(), new_user_id)
            .await
    } else {
        migration
            .migrate(request.old_user_id.as_deref(), new_user_id)
            .await
    };

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(MigrateResponse {
                ok: true,
                message: Some(outcome.message()),
                error: None,
            }),
        ),
        Err(e) => error_response(e),
    }
}

fn error_response(e: ReconcileError) -> (StatusCode, Json<MigrateResponse>) {
    if e.is_input_error() {
        return MigrateResponse::failure(StatusCode::BAD_REQUEST, e);
    }
    tracing::error!(error = %e, "Migration failed");
    MigrateResponse::failure(StatusCode::INTERNAL_SERVER_ERROR, e)
}
