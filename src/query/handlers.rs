use super::manager::QueryManager;
use super::protocol::*;
use super::types::QueryError;

use axum::{
    Extension, Json,
    extract::Query,
    http::StatusCode,
};
use std::sync::Arc;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(error: QueryError) -> ApiError {
    let status = match &error {
        QueryError::Translation(_) | QueryError::Planning(_) => StatusCode::BAD_REQUEST,
        QueryError::NotFound(_) => StatusCode::NOT_FOUND,
        QueryError::NotFinished(..) => StatusCode::CONFLICT,
        QueryError::Internal(e) => {
            tracing::error!("Query front end failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            status: "error".to_string(),
            error: error.to_string(),
        }),
    )
}

pub async fn handle_make_job(
    Extension(manager): Extension<Arc<QueryManager>>,
    Json(req): Json<MakeJobRequest>,
) -> Result<(StatusCode, Json<MakeJobResponse>), ApiError> {
    let submission = manager.make_job(req).await.map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(MakeJobResponse {
            status: "success".to_string(),
            job_id: submission.job_id,
            storage_type: submission.storage,
            path: submission.path,
        }),
    ))
}

pub async fn handle_check_job(
    Extension(manager): Extension<Arc<QueryManager>>,
    Query(params): Query<JobIdParams>,
) -> Result<(StatusCode, Json<CheckJobResponse>), ApiError> {
    let state = manager
        .check_job(&params.job_id)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(CheckJobResponse {
            status: "success".to_string(),
            job_status: state.status,
            status_text: state.status_text,
        }),
    ))
}

pub async fn handle_get_result(
    Extension(manager): Extension<Arc<QueryManager>>,
    Query(params): Query<JobIdParams>,
) -> Result<(StatusCode, Json<GetResultResponse>), ApiError> {
    let result = manager
        .get_result(&params.job_id)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(GetResultResponse {
            status: "success".to_string(),
            data_url: result.data_url,
            schema_url: result.schema_url,
        }),
    ))
}

pub async fn handle_cancel_job(
    Extension(manager): Extension<Arc<QueryManager>>,
    Json(params): Json<JobIdParams>,
) -> Result<(StatusCode, Json<CheckJobResponse>), ApiError> {
    let state = manager
        .cancel(&params.job_id)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(CheckJobResponse {
            status: "success".to_string(),
            job_status: state.status,
            status_text: state.status_text,
        }),
    ))
}
