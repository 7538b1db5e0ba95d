use crate::{
    auth::AuthUser,
    entities::{stock_movement, MovementKind},
    errors::ServiceError,
    handlers::common::{
        created_response, no_content_response, success_response, PaginatedResponse,
        PaginationParams,
    },
    handlers::extract::{ApiJson, ApiPath, ApiQuery},
    services::stock_movements::{
        CreateMovement, MovementListQuery, MovementOutcome, UpdateMovement,
    },
    AppState,
};
use axum::{
    extract::State,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MovementResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub kind: MovementKind,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl From<stock_movement::Model> for MovementResponse {
    fn from(model: stock_movement::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            user_id: model.user_id,
            kind: model.kind,
            quantity: model.quantity,
            created_at: model.created_at,
        }
    }
}

/// A written movement plus the low-stock status of its product afterwards
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MovementWithAlert {
    pub movement: MovementResponse,
    pub stock_alert: bool,
    pub alert_message: Option<String>,
}

impl From<MovementOutcome> for MovementWithAlert {
    fn from(outcome: MovementOutcome) -> Self {
        let stock_alert = outcome.stock_alert();
        let alert_message = outcome.alert_message();
        if let Some(message) = &alert_message {
            warn!(product_id = %outcome.product.id, "{}", message);
        }
        Self {
            movement: outcome.movement.into(),
            stock_alert,
            alert_message,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovementFilters {
    pub product_id: Option<Uuid>,
    pub kind: Option<MovementKind>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// List movements, newest first
#[utoipa::path(
    get,
    path = "/api/v1/movements",
    params(MovementFilters),
    responses(
        (status = 200, description = "Movements page", body = crate::ApiResponse<PaginatedResponse<MovementResponse>>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "movements"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiQuery(filters): ApiQuery<MovementFilters>,
) -> Result<Response, ServiceError> {
    let (page, per_page) = PaginationParams {
        page: filters.page,
        per_page: filters.per_page,
    }
    .resolve(&state);

    let (movements, total) = state
        .movements
        .list_movements(MovementListQuery {
            product_id: filters.product_id,
            kind: filters.kind,
            page,
            per_page,
        })
        .await?;

    let data = movements.into_iter().map(MovementResponse::from).collect();
    Ok(success_response(PaginatedResponse::new(
        data, page, per_page, total,
    )))
}

/// Record a stock movement for the authenticated user
#[utoipa::path(
    post,
    path = "/api/v1/movements",
    request_body = CreateMovement,
    responses(
        (status = 201, description = "Movement recorded", body = crate::ApiResponse<MovementWithAlert>),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "movements"
)]
pub async fn create_movement(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(payload): ApiJson<CreateMovement>,
) -> Result<Response, ServiceError> {
    let outcome = state
        .movements
        .create_movement(user.user_id, payload)
        .await?;
    Ok(created_response(MovementWithAlert::from(outcome)))
}

/// Retrieve a movement
#[utoipa::path(
    get,
    path = "/api/v1/movements/{id}",
    params(("id" = Uuid, Path, description = "Movement id")),
    responses(
        (status = 200, description = "Movement", body = crate::ApiResponse<MovementResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "movements"
)]
pub async fn get_movement(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ServiceError> {
    let movement = state.movements.get_movement(id).await?;
    Ok(success_response(MovementResponse::from(movement)))
}

/// Change a movement's kind or quantity
#[utoipa::path(
    put,
    path = "/api/v1/movements/{id}",
    params(("id" = Uuid, Path, description = "Movement id")),
    request_body = UpdateMovement,
    responses(
        (status = 200, description = "Movement updated", body = crate::ApiResponse<MovementWithAlert>),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "movements"
)]
pub async fn update_movement(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateMovement>,
) -> Result<Response, ServiceError> {
    let outcome = state.movements.update_movement(id, payload).await?;
    Ok(success_response(MovementWithAlert::from(outcome)))
}

/// Delete a movement, reverting its stock effect
#[utoipa::path(
    delete,
    path = "/api/v1/movements/{id}",
    params(("id" = Uuid, Path, description = "Movement id")),
    responses(
        (status = 204, description = "Movement deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Reversal would make stock negative", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "movements"
)]
pub async fn delete_movement(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ServiceError> {
    state.movements.delete_movement(id).await?;
    Ok(no_content_response())
}
