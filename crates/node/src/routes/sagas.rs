//! Saga start and instance lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::EntityId;
use domain::{EngagementEvent, User};
use saga::{CreateEventSaga, CreateUserSaga, SagaDefinition, SagaInstance};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaAcceptedResponse {
    pub saga_type: &'static str,
    pub correlation_id: EntityId,
}

/// POST /sagas/CreateUser
///
/// Answers once the first command is persisted and published; poll the
/// lookup endpoint for the outcome.
#[tracing::instrument(skip_all, fields(correlation_id = %user.id))]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(user): Json<User>,
) -> Result<(StatusCode, Json<SagaAcceptedResponse>), ApiError> {
    let correlation_id = user.id;
    state.users.start(user).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaAcceptedResponse {
            saga_type: CreateUserSaga::SAGA_TYPE,
            correlation_id,
        }),
    ))
}

/// POST /sagas/CreateEvent
#[tracing::instrument(skip_all, fields(correlation_id = %event.event_id))]
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<EngagementEvent>,
) -> Result<(StatusCode, Json<SagaAcceptedResponse>), ApiError> {
    let correlation_id = event.event_id;
    state.events.start(event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaAcceptedResponse {
            saga_type: CreateEventSaga::SAGA_TYPE,
            correlation_id,
        }),
    ))
}

/// GET /sagas/{saga_type}/{correlation_id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((saga_type, correlation_id)): Path<(String, EntityId)>,
) -> Result<Json<SagaInstance>, ApiError> {
    let instance = if saga_type == CreateUserSaga::SAGA_TYPE {
        state.users.get(correlation_id).await?
    } else if saga_type == CreateEventSaga::SAGA_TYPE {
        state.events.get(correlation_id).await?
    } else {
        return Err(ApiError::NotFound(format!("unknown saga type {saga_type}")));
    };

    instance
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{saga_type} saga {correlation_id} not found")))
}
