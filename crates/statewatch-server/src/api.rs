//! Job and deployment handlers.
//!
//! Every handler runs its store work on the blocking pool; SQLite calls
//! never run on the async executor.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use statewatch_state::{
    DeploymentStatusUpdateRequest, MsgType, ReadTxn, StateError, WriteTxn,
};
use statewatch_types::{
    Deployment, DeploymentStatus, DeploymentStatusUpdate, Evaluation, Job, DEFAULT_NAMESPACE,
    DEPLOYMENT_STATUS_DESCRIPTION_FAILED_BY_USER, DEPLOYMENT_STATUS_DESCRIPTION_PAUSED,
    DEPLOYMENT_STATUS_DESCRIPTION_RESUMED, EVAL_TRIGGER_DEPLOYMENT_WATCHER,
    EVAL_TRIGGER_JOB_REGISTER, JOB_TYPE_SERVICE,
};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StateError::InvalidTransition(_) => ApiError::BadRequest(e.to_string()),
            StateError::StaleIndex { .. } => ApiError::Conflict(e.to_string()),
            _ => {
                tracing::error!(error = %e, "state store operation failed");
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

/// Runs store work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StateError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
        .map_err(ApiError::from)
}

/// Namespace selector shared by job-scoped routes.
#[derive(Debug, Deserialize)]
pub struct NamespaceQuery {
    pub namespace: Option<String>,
}

impl NamespaceQuery {
    fn namespace(self) -> String {
        self.namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}

/// Request body for `PUT /v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct JobRegisterRequest {
    pub name: String,
    pub namespace: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub priority: Option<i32>,
    #[serde(default)]
    pub stop: bool,
}

/// Response body for `PUT /v1/jobs`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobRegisterResponse {
    pub index: u64,
    pub job_id: String,
    pub namespace: String,
    pub job_version: u64,
    /// Evaluation created by the registration; absent for stopped jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_id: Option<String>,
}

/// Response body for `DELETE /v1/job/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobDeregisterResponse {
    pub index: u64,
    pub job_id: String,
}

/// Response body for deployment writes.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeploymentWriteResponse {
    pub index: u64,
    pub deployment: Deployment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_id: Option<String>,
}

/// Request body for `POST /v1/deployment/pause/{id}`.
#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub pause: bool,
}

/// Handler for `PUT /v1/jobs`.
pub async fn register_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<JobRegisterRequest>,
) -> Result<Json<JobRegisterResponse>, ApiError> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("job name must not be empty".to_string()));
    }
    let priority = payload.priority.unwrap_or(50);
    if !(1..=100).contains(&priority) {
        return Err(ApiError::BadRequest(format!(
            "job priority must be between 1 and 100, got {}",
            priority
        )));
    }

    let namespace = payload
        .namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let mut job = Job::new(namespace, name);
    job.job_type = payload.job_type.unwrap_or_else(|| JOB_TYPE_SERVICE.to_string());
    job.priority = priority;
    job.stop = payload.stop;

    let eval = (!job.stop).then(|| Evaluation::new(&job, EVAL_TRIGGER_JOB_REGISTER));
    let eval_id = eval.as_ref().map(|e| e.id.clone());

    let (index, job) = blocking(move || state.store.upsert_job(job, eval)).await?;

    tracing::info!(index, job_id = %job.id, namespace = %job.namespace, "job registered");

    Ok(Json(JobRegisterResponse {
        index,
        job_id: job.id,
        namespace: job.namespace,
        job_version: job.version,
        eval_id,
    }))
}

/// Handler for `GET /v1/job/{id}`.
pub async fn get_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Job>, ApiError> {
    let namespace = query.namespace();
    let lookup_id = id.clone();
    blocking(move || state.store.job_by_id(&namespace, &lookup_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {}", id)))
}

/// Handler for `DELETE /v1/job/{id}`.
pub async fn deregister_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<JobDeregisterResponse>, ApiError> {
    let namespace = query.namespace();
    let (index, job) = blocking(move || state.store.delete_job(&namespace, &id)).await?;

    tracing::info!(index, job_id = %job.id, "job deregistered");

    Ok(Json(JobDeregisterResponse {
        index,
        job_id: job.id,
    }))
}

/// Handler for `POST /v1/job/{id}/deployment`.
///
/// Starts a running deployment for the job's current version.
pub async fn create_deployment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<DeploymentWriteResponse>, ApiError> {
    let namespace = query.namespace();
    let (index, deployment) = blocking(move || {
        state.store.commit(MsgType::DeploymentUpsert, |txn| {
            let job = txn
                .job_by_id(&namespace, &id)?
                .ok_or_else(|| StateError::NotFound {
                    entity: "job",
                    id: id.clone(),
                })?;
            if job.stop {
                return Err(StateError::InvalidTransition(format!(
                    "job {} is stopped",
                    job.id
                )));
            }
            txn.upsert_deployment(Deployment::new(&job))
        })
    })
    .await?;

    tracing::info!(
        index,
        deployment_id = %deployment.id,
        job_id = %deployment.job_id,
        "deployment created"
    );

    Ok(Json(DeploymentWriteResponse {
        index,
        deployment,
        eval_id: None,
    }))
}

/// Handler for `GET /v1/job/{id}/deployments`.
pub async fn list_job_deployments_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Vec<Deployment>>, ApiError> {
    let namespace = query.namespace();
    blocking(move || state.store.deployments_by_job(&namespace, &id))
        .await
        .map(Json)
}

/// Handler for `GET /v1/deployment/{id}`.
pub async fn get_deployment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    let lookup_id = id.clone();
    blocking(move || state.store.deployment_by_id(&lookup_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("deployment not found: {}", id)))
}

/// Handler for `POST /v1/deployment/pause/{id}`.
pub async fn pause_deployment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<PauseRequest>,
) -> Result<Json<DeploymentWriteResponse>, ApiError> {
    let (status, description) = if payload.pause {
        (DeploymentStatus::Paused, DEPLOYMENT_STATUS_DESCRIPTION_PAUSED)
    } else {
        (DeploymentStatus::Running, DEPLOYMENT_STATUS_DESCRIPTION_RESUMED)
    };
    set_deployment_status(state, id, status, description).await
}

/// Handler for `POST /v1/deployment/fail/{id}`.
pub async fn fail_deployment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentWriteResponse>, ApiError> {
    set_deployment_status(
        state,
        id,
        DeploymentStatus::Failed,
        DEPLOYMENT_STATUS_DESCRIPTION_FAILED_BY_USER,
    )
    .await
}

/// Moves an active deployment to `status` and creates a deployment-watcher
/// evaluation for its job, in one commit.
async fn set_deployment_status(
    state: Arc<AppState>,
    id: String,
    status: DeploymentStatus,
    description: &'static str,
) -> Result<Json<DeploymentWriteResponse>, ApiError> {
    let (index, (deployment, eval_id)) = blocking(move || {
        state.store.commit(MsgType::DeploymentStatusUpdate, |txn| {
            status_update(txn, &id, status, description)
        })
    })
    .await?;

    tracing::info!(
        index,
        deployment_id = %deployment.id,
        status = %deployment.status,
        "deployment status updated"
    );

    Ok(Json(DeploymentWriteResponse {
        index,
        deployment,
        eval_id,
    }))
}

fn status_update(
    txn: &mut WriteTxn<'_>,
    id: &str,
    status: DeploymentStatus,
    description: &str,
) -> Result<(Deployment, Option<String>), StateError> {
    let current = txn
        .deployment_by_id(id)?
        .ok_or_else(|| StateError::NotFound {
            entity: "deployment",
            id: id.to_string(),
        })?;
    if !current.status.is_active() {
        return Err(StateError::InvalidTransition(format!(
            "deployment {} is {} and can no longer change status",
            current.id, current.status
        )));
    }

    let eval = txn
        .job_by_id(&current.namespace, &current.job_id)?
        .map(|job| {
            let mut eval = Evaluation::new(&job, EVAL_TRIGGER_DEPLOYMENT_WATCHER);
            eval.deployment_id = Some(current.id.clone());
            eval
        });
    let eval_id = eval.as_ref().map(|e| e.id.clone());

    let deployment = txn.update_deployment_status(DeploymentStatusUpdateRequest {
        update: DeploymentStatusUpdate {
            deployment_id: current.id,
            status,
            status_description: description.to_string(),
        },
        job: None,
        eval,
    })?;
    Ok((deployment, eval_id))
}
