use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stockroom API",
        version = "1.0.0",
        description = r#"
# Stockroom Inventory API

Tracks a product catalog and every stock movement that changes its on-hand quantity.

## Features

- **Products**: Catalog CRUD with search, ordering and pagination
- **Stock Movements**: Inbound and outbound movements that adjust stock atomically
- **Low-Stock Alerts**: Movement responses report when a product drops below its minimum

## Authentication

Obtain a token pair from `/auth/login` and send the access token on every `/api/v1` request:

```
Authorization: Bearer <access-token>
```

## Error Handling

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock: available stock 8 cannot cover a decrease of 10",
  "request_id": "3f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

- `page`: Page number (default: 1)
- `per_page`: Items per page (default: 20, capped by configuration)
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "auth", description = "Login, token refresh and logout"),
        (name = "products", description = "Product catalog endpoints"),
        (name = "movements", description = "Stock movement endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        // Auth
        crate::auth::login_handler,
        crate::auth::refresh_token_handler,
        crate::auth::logout_handler,

        // Products
        crate::handlers::products::list_products,
        crate::handlers::products::list_low_stock,
        crate::handlers::products::create_product,
        crate::handlers::products::get_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,

        // Movements
        crate::handlers::movements::list_movements,
        crate::handlers::movements::create_movement,
        crate::handlers::movements::get_movement,
        crate::handlers::movements::update_movement,
        crate::handlers::movements::delete_movement,

        // Health
        crate::health::simple_health_check,
        crate::health::readiness_check,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::handlers::common::PaginationMeta,

            crate::handlers::products::ProductResponse,
            crate::services::products::CreateProduct,
            crate::services::products::UpdateProduct,

            crate::handlers::movements::MovementResponse,
            crate::handlers::movements::MovementWithAlert,
            crate::services::stock_movements::CreateMovement,
            crate::services::stock_movements::UpdateMovement,
            crate::entities::MovementKind,

            crate::auth::LoginCredentials,
            crate::auth::RefreshTokenRequest,
            crate::auth::TokenPair,
            crate::auth::AccessToken,

            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

/// Registers the `bearer_auth` scheme referenced by the protected paths
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Stockroom API"));
        assert!(json.contains("/api/v1/products/low-stock"));
        assert!(json.contains("/api/v1/movements/{id}"));
        assert!(json.contains("bearer_auth"));
    }

    #[test]
    fn documented_error_example_matches_rendered_error() {
        use crate::errors::ServiceError;
        use crate::services::ledger::LedgerError;

        let err: ServiceError = LedgerError::Insufficient {
            available: 8,
            decrease: 10,
        }
        .into();
        let description = ApiDocV1::openapi().info.description.unwrap_or_default();

        let reason = err.status_code().canonical_reason().unwrap();
        assert!(description.contains(&format!("\"error\": \"{}\"", reason)));
        assert!(description.contains(&format!("\"message\": \"{}\"", err.response_message())));
    }
}
