use crate::{
    db::DatabaseAccess,
    entities::{
        product::{self, Entity as Product},
        stock_movement::{self, Column as MovementColumn, Entity as StockMovement},
        MovementKind,
    },
    errors::ServiceError,
    services::ledger,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Payload for recording a movement
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CreateMovement {
    pub product_id: Uuid,
    pub kind: MovementKind,
    #[validate(range(min = 1, message = "Quantity must be greater than zero"))]
    #[schema(example = 3)]
    pub quantity: i32,
}

/// Movement changes; the product cannot be changed
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovement {
    pub kind: Option<MovementKind>,
    #[validate(range(min = 1, message = "Quantity must be greater than zero"))]
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct MovementListQuery {
    pub product_id: Option<Uuid>,
    pub kind: Option<MovementKind>,
    pub page: u64,
    pub per_page: u64,
}

/// A persisted movement together with the product state it produced
#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub movement: stock_movement::Model,
    pub product: product::Model,
}

impl MovementOutcome {
    pub fn stock_alert(&self) -> bool {
        self.product.is_below_minimum()
    }

    pub fn alert_message(&self) -> Option<String> {
        self.stock_alert().then(|| {
            format!(
                "Stock for product '{}' is below the configured minimum ({})",
                self.product.name, self.product.min_stock
            )
        })
    }
}

/// Reads the product row under an exclusive lock.
///
/// Postgres takes a `FOR UPDATE` row lock. SQLite has no row locks, so a
/// no-op write on the row comes first: it claims the database write lock
/// before anything is read, and concurrent movements wait on the busy
/// timeout instead of failing when they try to upgrade a read transaction.
async fn lock_product(
    txn: &DatabaseTransaction,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    if txn.get_database_backend() == DbBackend::Sqlite {
        Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).into(),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(txn)
            .await?;
    }

    Product::find_by_id(product_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

async fn find_movement<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<stock_movement::Model, ServiceError> {
    StockMovement::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Stock movement {} not found", id)))
}

/// Persists a new stock quantity for a locked product
async fn write_stock(
    txn: &DatabaseTransaction,
    product: product::Model,
    quantity: i32,
) -> Result<product::Model, ServiceError> {
    let product_id = product.id;
    let previous = product.stock_quantity;

    let mut active: product::ActiveModel = product.into();
    active.stock_quantity = Set(quantity);
    let updated = active.update(txn).await?;

    info!(product_id = %product_id, from = previous, to = quantity, "stock updated");
    Ok(updated)
}

fn record_rejection(kind: &str, err: &ServiceError) {
    if matches!(err, ServiceError::InsufficientStock(_)) {
        counter!("stockroom_movements.rejected", 1, "operation" => kind.to_string());
    }
}

/// Service that keeps product stock in step with recorded movements
#[derive(Clone)]
pub struct StockMovementService {
    db: DatabaseAccess,
}

impl StockMovementService {
    pub fn new(db: DatabaseAccess) -> Self {
        Self { db }
    }

    /// Record a movement and apply it to the product's stock
    #[instrument(skip(self, input), fields(product_id = %input.product_id, kind = %input.kind, quantity = input.quantity))]
    pub async fn create_movement(
        &self,
        user_id: Uuid,
        input: CreateMovement,
    ) -> Result<MovementOutcome, ServiceError> {
        input.validate()?;

        let result = self
            .db
            .transaction::<_, MovementOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let product = lock_product(txn, input.product_id).await?;
                    let next = ledger::apply(product.stock_quantity, input.kind, input.quantity)?;
                    let product = write_stock(txn, product, next).await?;

                    let movement = stock_movement::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        product_id: Set(product.id),
                        user_id: Set(user_id),
                        kind: Set(input.kind),
                        quantity: Set(input.quantity),
                        created_at: Set(Utc::now()),
                    }
                    .insert(txn)
                    .await?;

                    Ok(MovementOutcome { movement, product })
                })
            })
            .await;

        match &result {
            Ok(outcome) => {
                counter!("stockroom_movements.created", 1, "kind" => outcome.movement.kind.to_string());
                info!(movement_id = %outcome.movement.id, "movement recorded");
            }
            Err(e) => record_rejection("create", e),
        }
        result
    }

    #[instrument(skip(self))]
    pub async fn get_movement(&self, id: Uuid) -> Result<stock_movement::Model, ServiceError> {
        find_movement(self.db.get_pool(), id).await
    }

    /// List movements, newest first
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        query: MovementListQuery,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let mut select = StockMovement::find();
        if let Some(product_id) = query.product_id {
            select = select.filter(MovementColumn::ProductId.eq(product_id));
        }
        if let Some(kind) = query.kind {
            select = select.filter(MovementColumn::Kind.eq(kind));
        }

        let paginator = select
            .order_by_desc(MovementColumn::CreatedAt)
            .order_by_desc(MovementColumn::Id)
            .paginate(self.db.get_pool(), query.per_page.max(1));

        let total = paginator.num_items().await?;
        let movements = paginator.fetch_page(query.page.saturating_sub(1)).await?;
        Ok((movements, total))
    }

    /// Change a movement's kind and/or quantity, re-basing the product's stock
    #[instrument(skip(self, changes))]
    pub async fn update_movement(
        &self,
        id: Uuid,
        changes: UpdateMovement,
    ) -> Result<MovementOutcome, ServiceError> {
        changes.validate()?;
        let product_id = self.get_movement(id).await?.product_id;

        let result = self
            .db
            .transaction::<_, MovementOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let product = lock_product(txn, product_id).await?;
                    // re-read under the product lock
                    let existing = find_movement(txn, id).await?;

                    let kind = changes.kind.unwrap_or(existing.kind);
                    let quantity = changes.quantity.unwrap_or(existing.quantity);
                    let next = ledger::rebalance(
                        product.stock_quantity,
                        existing.delta(),
                        kind.delta(quantity),
                    )?;
                    let product = write_stock(txn, product, next).await?;

                    let mut active: stock_movement::ActiveModel = existing.into();
                    active.kind = Set(kind);
                    active.quantity = Set(quantity);
                    let movement = active.update(txn).await?;

                    Ok(MovementOutcome { movement, product })
                })
            })
            .await;

        match &result {
            Ok(outcome) => info!(movement_id = %outcome.movement.id, "movement updated"),
            Err(e) => record_rejection("update", e),
        }
        result
    }

    /// Remove a movement and take back its stock effect
    #[instrument(skip(self))]
    pub async fn delete_movement(&self, id: Uuid) -> Result<(), ServiceError> {
        let product_id = self.get_movement(id).await?.product_id;

        let result = self
            .db
            .transaction::<_, (), ServiceError>(move |txn| {
                Box::pin(async move {
                    let product = lock_product(txn, product_id).await?;
                    let existing = find_movement(txn, id).await?;

                    let next = ledger::revert(product.stock_quantity, existing.kind, existing.quantity)?;
                    write_stock(txn, product, next).await?;

                    let active: stock_movement::ActiveModel = existing.into();
                    active.delete(txn).await?;
                    Ok(())
                })
            })
            .await;

        match &result {
            Ok(()) => info!(movement_id = %id, "movement deleted"),
            Err(e) => {
                warn!(movement_id = %id, error = %e, "movement delete rejected");
                record_rejection("delete", e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{user, AuthConfig, AuthService};
    use crate::services::products::{CreateProduct, ProductService};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        products: ProductService,
        movements: StockMovementService,
        user: user::Model,
    }

    async fn fixture() -> Fixture {
        let pool = Arc::new(crate::db::migrated_memory_pool().await);
        let auth = AuthService::new(
            AuthConfig::new(
                "k8Qz!vR2#pLm9Xw4&sT7yB1nHc6JdF3gUe5aWo0iZrVq-Nb_Mx+Ly=Kt*Pj%Gh^Sd".into(),
                "aud".into(),
                "iss".into(),
                Duration::from_secs(60),
                Duration::from_secs(600),
            ),
            pool.clone(),
        );
        let user = auth.create_user("clerk", "counting").await.unwrap();
        Fixture {
            products: ProductService::new(pool.clone()),
            movements: StockMovementService::new(DatabaseAccess::new(pool)),
            user,
        }
    }

    impl Fixture {
        async fn product(&self, name: &str, min_stock: i32) -> product::Model {
            self.products
                .create_product(CreateProduct {
                    name: name.into(),
                    description: String::new(),
                    price: dec!(2.50),
                    min_stock,
                })
                .await
                .unwrap()
        }

        async fn record(
            &self,
            product_id: Uuid,
            kind: MovementKind,
            quantity: i32,
        ) -> Result<MovementOutcome, ServiceError> {
            self.movements
                .create_movement(
                    self.user.id,
                    CreateMovement {
                        product_id,
                        kind,
                        quantity,
                    },
                )
                .await
        }

        async fn stock(&self, product_id: Uuid) -> i32 {
            self.products
                .get_product(product_id)
                .await
                .unwrap()
                .stock_quantity
        }
    }

    #[tokio::test]
    async fn outbound_beyond_stock_is_rejected_without_side_effects() {
        let fx = fixture().await;
        let p = fx.product("Hinge", 5).await;
        fx.record(p.id, MovementKind::Inbound, 10).await.unwrap();

        let out = fx.record(p.id, MovementKind::Outbound, 3).await.unwrap();
        assert_eq!(out.product.stock_quantity, 7);
        assert!(!out.stock_alert());

        assert_matches!(
            fx.record(p.id, MovementKind::Outbound, 10).await,
            Err(ServiceError::InsufficientStock(_))
        );
        assert_eq!(fx.stock(p.id).await, 7);

        let (all, total) = fx
            .movements
            .list_movements(MovementListQuery {
                product_id: Some(p.id),
                page: 1,
                per_page: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn alert_fires_strictly_below_minimum() {
        let fx = fixture().await;
        let p = fx.product("Latch", 5).await;
        fx.record(p.id, MovementKind::Inbound, 6).await.unwrap();

        let at_min = fx.record(p.id, MovementKind::Outbound, 1).await.unwrap();
        assert!(!at_min.stock_alert());
        assert_eq!(at_min.alert_message(), None);

        let below = fx.record(p.id, MovementKind::Outbound, 1).await.unwrap();
        assert!(below.stock_alert());
        assert!(below.alert_message().unwrap().contains("'Latch'"));
    }

    #[tokio::test]
    async fn update_reverses_old_effect_and_applies_new_one() {
        let fx = fixture().await;
        let p = fx.product("Bracket", 0).await;
        fx.record(p.id, MovementKind::Inbound, 10).await.unwrap();
        let out = fx.record(p.id, MovementKind::Outbound, 3).await.unwrap();

        let switched = fx
            .movements
            .update_movement(
                out.movement.id,
                UpdateMovement {
                    kind: Some(MovementKind::Inbound),
                    quantity: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(switched.product.stock_quantity, 13);
        assert_eq!(switched.movement.created_at, out.movement.created_at);

        assert_matches!(
            fx.movements
                .update_movement(
                    out.movement.id,
                    UpdateMovement {
                        kind: Some(MovementKind::Outbound),
                        quantity: Some(20),
                    },
                )
                .await,
            Err(ServiceError::InsufficientStock(_))
        );
        assert_eq!(fx.stock(p.id).await, 13);
    }

    #[tokio::test]
    async fn delete_reverts_and_guards_against_negative_stock() {
        let fx = fixture().await;
        let p = fx.product("Screw", 0).await;
        let inbound = fx.record(p.id, MovementKind::Inbound, 8).await.unwrap();
        let extra = fx.record(p.id, MovementKind::Inbound, 5).await.unwrap();
        assert_eq!(extra.product.stock_quantity, 13);

        fx.movements.delete_movement(extra.movement.id).await.unwrap();
        assert_eq!(fx.stock(p.id).await, 8);

        fx.record(p.id, MovementKind::Outbound, 6).await.unwrap();
        assert_matches!(
            fx.movements.delete_movement(inbound.movement.id).await,
            Err(ServiceError::InsufficientStock(_))
        );
        assert_eq!(fx.stock(p.id).await, 2);

        assert_matches!(
            fx.movements.get_movement(extra.movement.id).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn product_with_movements_cannot_be_deleted() {
        let fx = fixture().await;
        let p = fx.product("Nut", 0).await;
        let m = fx.record(p.id, MovementKind::Inbound, 1).await.unwrap();

        assert_matches!(
            fx.products.delete_product(p.id).await,
            Err(ServiceError::InvalidOperation(_))
        );

        fx.movements.delete_movement(m.movement.id).await.unwrap();
        fx.products.delete_product(p.id).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_product_and_bad_quantity_are_rejected() {
        let fx = fixture().await;
        assert_matches!(
            fx.record(Uuid::new_v4(), MovementKind::Inbound, 1).await,
            Err(ServiceError::NotFound(_))
        );

        let p = fx.product("Rivet", 0).await;
        assert_matches!(
            fx.record(p.id, MovementKind::Inbound, 0).await,
            Err(ServiceError::ValidationError(_))
        );
    }
}
