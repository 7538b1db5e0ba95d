use crate::{
    db::DbPool,
    entities::{
        product::{self, Column as ProductColumn, Entity as Product},
        stock_movement::{self, Entity as StockMovement},
    },
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func, LikeExpr},
    ActiveModelTrait, ColumnTrait, Condition, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const MAX_NAME_LEN: usize = 200;
const MAX_PRICE_DIGITS: u32 = 10;
const PRICE_SCALE: u32 = 2;

/// Payload for a new product. Stock always starts at zero.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateProduct {
    #[validate(custom = "validate_name")]
    #[schema(example = "Cordless drill")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom = "validate_price")]
    #[schema(value_type = String, example = "129.90")]
    pub price: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, message = "min_stock cannot be negative"))]
    pub min_stock: i32,
}

/// Product changes; omitted fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct UpdateProduct {
    #[validate(custom = "validate_name")]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(custom = "validate_price")]
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    #[validate(range(min = 0, message = "min_stock cannot be negative"))]
    pub min_stock: Option<i32>,
}

/// Sort order for product listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
pub enum ProductOrdering {
    #[default]
    #[serde(rename = "name")]
    NameAsc,
    #[serde(rename = "-name")]
    NameDesc,
}

#[derive(Debug, Clone, Default)]
pub struct ProductListQuery {
    pub search: Option<String>,
    pub ordering: ProductOrdering,
    pub page: u64,
    pub per_page: u64,
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name");
        err.message = Some("Product name cannot be empty".into());
        return Err(err);
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        let mut err = ValidationError::new("name");
        err.message = Some(format!("Product name cannot exceed {} characters", MAX_NAME_LEN).into());
        return Err(err);
    }
    Ok(())
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price <= &Decimal::ZERO {
        let mut err = ValidationError::new("price");
        err.message = Some("Price must be greater than zero".into());
        return Err(err);
    }
    let normalized = price.normalize();
    if normalized.scale() > PRICE_SCALE {
        let mut err = ValidationError::new("price");
        err.message = Some("Price cannot have more than 2 decimal places".into());
        return Err(err);
    }
    // digits left of the point, with room for the two decimal places
    let integral_digits = normalized.trunc().to_string().trim_start_matches('-').len() as u32;
    if integral_digits > MAX_PRICE_DIGITS - PRICE_SCALE {
        let mut err = ValidationError::new("price");
        err.message = Some("Price cannot have more than 10 digits".into());
        return Err(err);
    }
    Ok(())
}

const LIKE_ESCAPE: char = '\\';

/// Lower-cased `%term%` with LIKE wildcards in `term` matched literally.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Stored prices are exposed with exactly two decimal places.
pub fn display_price(price: Decimal) -> Decimal {
    let mut rounded = price.round_dp(PRICE_SCALE);
    rounded.rescale(PRICE_SCALE);
    rounded
}

fn map_write_error(err: DbErr, name: &str) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::ValidationError(format!("Product with name '{}' already exists", name))
        }
        _ => {
            error!(error = %err, "product write failed");
            ServiceError::db_error(err)
        }
    }
}

/// Service for managing products
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    async fn ensure_name_available(
        &self,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut query = Product::find().filter(ProductColumn::Name.eq(name));
        if let Some(id) = except {
            query = query.filter(ProductColumn::Id.ne(id));
        }
        if query.one(&*self.db_pool).await?.is_some() {
            let msg = format!("Product with name '{}' already exists", name);
            warn!(%msg);
            return Err(ServiceError::ValidationError(msg));
        }
        Ok(())
    }

    /// Create a new product
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: CreateProduct) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let name = input.name.trim().to_string();
        self.ensure_name_available(&name, None).await?;

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.clone()),
            description: Set(input.description),
            price: Set(input.price),
            stock_quantity: Set(0),
            min_stock: Set(input.min_stock),
            ..Default::default()
        };

        let created = product
            .insert(&*self.db_pool)
            .await
            .map_err(|e| map_write_error(e, &name))?;

        info!(product_id = %created.id, name = %created.name, "Product created");
        Ok(created)
    }

    /// Get a product by ID
    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// List products with search, ordering and pagination
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        query: ProductListQuery,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let mut select = Product::find();

        if let Some(term) = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            let pattern = contains_pattern(term);
            select = select.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col((Product, ProductColumn::Name))))
                            .like(LikeExpr::new(pattern.clone()).escape(LIKE_ESCAPE)),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            Product,
                            ProductColumn::Description,
                        ))))
                        .like(LikeExpr::new(pattern).escape(LIKE_ESCAPE)),
                    ),
            );
        }

        select = match query.ordering {
            ProductOrdering::NameAsc => select.order_by_asc(ProductColumn::Name),
            ProductOrdering::NameDesc => select.order_by_desc(ProductColumn::Name),
        };

        let paginator = select.paginate(&*self.db_pool, query.per_page.max(1));
        let total = paginator.num_items().await?;
        let products = paginator
            .fetch_page(query.page.saturating_sub(1))
            .await?;

        Ok((products, total))
    }

    /// Products whose stock is strictly below their minimum, by name
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self) -> Result<Vec<product::Model>, ServiceError> {
        let products = Product::find()
            .filter(
                Expr::col((Product, ProductColumn::StockQuantity))
                    .lt(Expr::col((Product, ProductColumn::MinStock))),
            )
            .order_by_asc(ProductColumn::Name)
            .all(&*self.db_pool)
            .await?;
        Ok(products)
    }

    /// Update descriptive fields of a product; stock is never touched here
    #[instrument(skip(self, changes))]
    pub async fn update_product(
        &self,
        id: Uuid,
        changes: UpdateProduct,
    ) -> Result<product::Model, ServiceError> {
        changes.validate()?;
        let existing = self.get_product(id).await?;

        let name = changes.name.as_deref().map(|n| n.trim().to_string());
        if let Some(name) = &name {
            if name != &existing.name {
                self.ensure_name_available(name, Some(id)).await?;
            }
        }

        let label = name.clone().unwrap_or_else(|| existing.name.clone());
        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = name {
            active.name = Set(name);
        }
        if let Some(description) = changes.description {
            active.description = Set(description);
        }
        if let Some(price) = changes.price {
            active.price = Set(price);
        }
        if let Some(min_stock) = changes.min_stock {
            active.min_stock = Set(min_stock);
        }

        let updated = active
            .update(&*self.db_pool)
            .await
            .map_err(|e| map_write_error(e, &label))?;

        info!(product_id = %id, "Product updated");
        Ok(updated)
    }

    /// Delete a product that has no recorded movements
    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_product(id).await?;

        let movements = StockMovement::find()
            .filter(stock_movement::Column::ProductId.eq(id))
            .count(&*self.db_pool)
            .await?;
        if movements > 0 {
            warn!(product_id = %id, movements, "refusing to delete product with movements");
            return Err(referenced_product_error());
        }

        let active: product::ActiveModel = existing.into();
        active.delete(&*self.db_pool).await.map_err(|e| {
            match e.sql_err() {
                // a movement was recorded after the count above
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => referenced_product_error(),
                _ => ServiceError::db_error(e),
            }
        })?;

        info!(product_id = %id, "Product deleted");
        Ok(())
    }
}

fn referenced_product_error() -> ServiceError {
    ServiceError::InvalidOperation("Cannot delete product with recorded stock movements".into())
}
