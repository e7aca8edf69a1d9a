use actix_web::{
    HttpRequest, HttpResponse, HttpResponseBuilder, ResponseError,
    http::{StatusCode, header::ContentType},
    post,
    web::{Data, Json, Path},
};
use serde::{Deserialize, Serialize};
use snapsync::concurrency::rate_limit::RateLimitDecision;
use snapsync::pipeline::{SyncRequest, generate_run_id};
use snapsync::service::TriggerOutcome;
use snapsync_config::SerializableSecretString;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use crate::routes::{ErrorMessage, caller_identity};
use crate::trigger::SyncTrigger;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerSyncRequest {
    /// Generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Deploy key of the document source.
    pub credential: SerializableSecretString,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub table_mapping: HashMap<String, String>,
    #[serde(default)]
    pub column_mapping: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerSyncResponse {
    pub run_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncConflictResponse {
    pub error: String,
    pub existing_run_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitedResponse {
    pub error: String,
    pub retry_after_seconds: u64,
}

#[derive(Debug, Error)]
pub enum SyncTriggerError {
    #[error("A sync for `{resource_key}` is already running")]
    AlreadyRunning {
        resource_key: String,
        existing_run_id: String,
        rate_limit: RateLimitDecision,
    },

    #[error("Too many requests, retry later")]
    RateLimited { rate_limit: RateLimitDecision },

    #[error("The source credential is missing or invalid")]
    InvalidCredential { rate_limit: RateLimitDecision },
}

impl SyncTriggerError {
    fn rate_limit(&self) -> &RateLimitDecision {
        match self {
            SyncTriggerError::AlreadyRunning { rate_limit, .. }
            | SyncTriggerError::RateLimited { rate_limit }
            | SyncTriggerError::InvalidCredential { rate_limit } => rate_limit,
        }
    }
}

impl ResponseError for SyncTriggerError {
    fn status_code(&self) -> StatusCode {
        match self {
            SyncTriggerError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            SyncTriggerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SyncTriggerError::InvalidCredential { .. } => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        insert_rate_limit_headers(&mut response, self.rate_limit());
        response.insert_header(ContentType::json());

        let error = self.to_string();
        let body = match self {
            SyncTriggerError::AlreadyRunning {
                existing_run_id, ..
            } => serde_json::to_string(&SyncConflictResponse {
                error,
                existing_run_id: existing_run_id.clone(),
            }),
            SyncTriggerError::RateLimited { rate_limit } => {
                serde_json::to_string(&RateLimitedResponse {
                    error,
                    retry_after_seconds: rate_limit.retry_after_secs.unwrap_or_default(),
                })
            }
            SyncTriggerError::InvalidCredential { .. } => {
                serde_json::to_string(&ErrorMessage { error })
            }
        };

        response.body(body.unwrap_or_default())
    }
}

fn insert_rate_limit_headers(response: &mut HttpResponseBuilder, decision: &RateLimitDecision) {
    response
        .insert_header((RATE_LIMIT_LIMIT_HEADER, decision.limit.to_string()))
        .insert_header((RATE_LIMIT_REMAINING_HEADER, decision.remaining.to_string()))
        .insert_header((RATE_LIMIT_RESET_HEADER, decision.reset_after_secs.to_string()));

    if let Some(retry_after) = decision.retry_after_secs {
        response.insert_header((RETRY_AFTER_HEADER, retry_after.to_string()));
    }
}

/// Starts a full sync of `resource_key` in the background.
#[post("/sync/{resource_key}")]
pub async fn trigger_sync(
    req: HttpRequest,
    service: Data<dyn SyncTrigger>,
    resource_key: Path<String>,
    request: Json<TriggerSyncRequest>,
) -> Result<HttpResponse, SyncTriggerError> {
    let resource_key = resource_key.into_inner();
    let request = request.into_inner();
    let identity = caller_identity(&req);

    let run_id = request
        .run_id
        .filter(|run_id| !run_id.trim().is_empty())
        .unwrap_or_else(generate_run_id);
    let sync_request = SyncRequest {
        run_id,
        credential: request.credential,
        tables: request.tables,
        table_mapping: request.table_mapping,
        column_mapping: request.column_mapping,
    };

    match service.trigger(&identity, &resource_key, sync_request) {
        TriggerOutcome::Accepted {
            run_id, rate_limit, ..
        } => {
            info!(identity, resource_key, run_id, "sync triggered");
            let mut response = HttpResponse::Accepted();
            insert_rate_limit_headers(&mut response, &rate_limit);

            Ok(response.json(TriggerSyncResponse { run_id }))
        }
        TriggerOutcome::Conflict {
            existing_run_id,
            rate_limit,
        } => Err(SyncTriggerError::AlreadyRunning {
            resource_key,
            existing_run_id,
            rate_limit,
        }),
        TriggerOutcome::RateLimited { rate_limit } => {
            Err(SyncTriggerError::RateLimited { rate_limit })
        }
        TriggerOutcome::Unauthorized { rate_limit } => {
            Err(SyncTriggerError::InvalidCredential { rate_limit })
        }
    }
}
