use crate::{
    auth::AuthUser,
    entities::product,
    errors::ServiceError,
    handlers::common::{
        created_response, no_content_response, success_response, PaginatedResponse,
        PaginationParams,
    },
    handlers::extract::{ApiJson, ApiPath, ApiQuery},
    services::products::{
        display_price, CreateProduct, ProductListQuery, ProductOrdering, UpdateProduct,
    },
    AppState,
};
use axum::{
    extract::State,
    response::Response,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[schema(value_type = String, example = "129.90")]
    pub price: Decimal,
    pub stock_quantity: i32,
    pub min_stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<product::Model> for ProductResponse {
    fn from(model: product::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            price: display_price(model.price),
            stock_quantity: model.stock_quantity,
            min_stock: model.min_stock,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilters {
    /// Case-insensitive substring match on name or description
    pub search: Option<String>,
    /// `name` (default) or `-name`
    #[param(value_type = Option<String>)]
    pub ordering: Option<ProductOrdering>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// List products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilters),
    responses(
        (status = 200, description = "Products page", body = crate::ApiResponse<PaginatedResponse<ProductResponse>>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiQuery(filters): ApiQuery<ProductFilters>,
) -> Result<Response, ServiceError> {
    let (page, per_page) = PaginationParams {
        page: filters.page,
        per_page: filters.per_page,
    }
    .resolve(&state);

    let (products, total) = state
        .products
        .list_products(ProductListQuery {
            search: filters.search,
            ordering: filters.ordering.unwrap_or_default(),
            page,
            per_page,
        })
        .await?;

    let data = products.into_iter().map(ProductResponse::from).collect();
    Ok(success_response(PaginatedResponse::new(
        data, page, per_page, total,
    )))
}

/// Products whose stock is below their configured minimum
#[utoipa::path(
    get,
    path = "/api/v1/products/low-stock",
    responses(
        (status = 200, description = "Products below minimum", body = crate::ApiResponse<Vec<ProductResponse>>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn list_low_stock(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Response, ServiceError> {
    let products = state.products.list_low_stock().await?;
    debug!(count = products.len(), "low stock products listed");
    Ok(success_response(
        products
            .into_iter()
            .map(ProductResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Create a product
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProduct,
    responses(
        (status = 201, description = "Product created", body = crate::ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid input or duplicate name", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiJson(payload): ApiJson<CreateProduct>,
) -> Result<Response, ServiceError> {
    let created = state.products.create_product(payload).await?;
    Ok(created_response(ProductResponse::from(created)))
}

/// Retrieve a product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = crate::ApiResponse<ProductResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ServiceError> {
    let found = state.products.get_product(id).await?;
    Ok(success_response(ProductResponse::from(found)))
}

/// Update a product's descriptive fields
#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProduct,
    responses(
        (status = 200, description = "Product updated", body = crate::ApiResponse<ProductResponse>),
        (status = 400, description = "Invalid input or duplicate name", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn update_product(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateProduct>,
) -> Result<Response, ServiceError> {
    let updated = state.products.update_product(id, payload).await?;
    Ok(success_response(ProductResponse::from(updated)))
}

/// Delete a product without movements
#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 400, description = "Product has recorded stock movements", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, ServiceError> {
    state.products.delete_product(id).await?;
    Ok(no_content_response())
}
