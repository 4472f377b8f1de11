use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{
    self, ActiveModel as OrderActiveModel, Entity as Order, Model as OrderModel, OrderStatus,
    PaymentStatus,
};
use crate::entities::order_item::{
    self, ActiveModel as OrderItemActiveModel, Entity as OrderItem, Model as OrderItemModel,
};
use crate::errors::ServiceError;

/// Order header as assembled by checkout, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub total_amount: Decimal,
    pub shipping_charge: Decimal,
    pub currency: String,
    pub gateway_order_id: String,
    pub idempotency_key: Option<String>,
}

/// One cart line to persist under a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub product_title: String,
    pub quantity: i32,
    /// Per-unit price with option adjustments applied
    pub price: Decimal,
    pub selected_options: serde_json::Value,
}

/// An order with its line items in cart order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Outcome of [`OrderStore::mark_paid`].
#[derive(Debug, Clone, PartialEq)]
pub enum PaidTransition {
    /// This call moved the order from Pending to Paid.
    Transitioned(OrderModel),
    /// The order was already Paid; nothing changed.
    AlreadyPaid(OrderModel),
    /// No order carries that gateway order id.
    NotFound,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order and all of its items in one transaction.
    ///
    /// Either everything is committed or nothing is. A clash on the
    /// idempotency key is reported as [`ServiceError::Conflict`].
    async fn create_order_with_items(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Uuid, ServiceError>;

    /// Flips a Pending order to Paid/Completed and records the payment id.
    async fn mark_paid(
        &self,
        gateway_order_id: &str,
        payment_id: &str,
    ) -> Result<PaidTransition, ServiceError>;

    async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<OrderModel>, ServiceError>;

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError>;
}

/// [`OrderStore`] over a sea-orm connection pool.
#[derive(Debug, Clone)]
pub struct SeaOrmOrderStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn is_idempotency_clash(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(SqlErr::UniqueConstraintViolation(ref msg)) if msg.contains("idempotency_key")
    )
}

fn persistence_error(stage: &str, err: DbErr) -> ServiceError {
    if is_idempotency_clash(&err) {
        return ServiceError::Conflict("An order with this idempotency key already exists".into());
    }
    ServiceError::PersistenceError(format!("{}: {}", stage, err))
}

async fn insert_order_rows(
    txn: &DatabaseTransaction,
    order_id: Uuid,
    order: NewOrder,
    items: Vec<NewOrderItem>,
) -> Result<(), ServiceError> {
    let now = Utc::now();

    OrderActiveModel {
        id: Set(order_id),
        full_name: Set(order.full_name),
        email: Set(order.email),
        phone: Set(order.phone),
        address: Set(order.address),
        city: Set(order.city),
        state: Set(order.state),
        pincode: Set(order.pincode),
        total_amount: Set(order.total_amount),
        shipping_charge: Set(order.shipping_charge),
        currency: Set(order.currency),
        payment_status: Set(PaymentStatus::Pending),
        order_status: Set(OrderStatus::Processing),
        gateway_order_id: Set(order.gateway_order_id),
        payment_id: Set(None),
        idempotency_key: Set(order.idempotency_key),
        created_at: Set(now),
        updated_at: Set(None),
    }
    .insert(txn)
    .await
    .map_err(|e| persistence_error("insert order", e))?;

    for (line_no, item) in items.into_iter().enumerate() {
        OrderItemActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            line_no: Set(line_no as i32),
            product_id: Set(item.product_id),
            product_title: Set(item.product_title),
            quantity: Set(item.quantity),
            price: Set(item.price),
            selected_options: Set(item.selected_options),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(|e| {
            warn!(line_no, error = %e, "Order item insert failed");
            persistence_error("insert order item", e)
        })?;
    }

    Ok(())
}

#[async_trait]
impl OrderStore for SeaOrmOrderStore {
    #[instrument(skip(self, order, items), fields(gateway_order_id = %order.gateway_order_id, item_count = items.len()))]
    async fn create_order_with_items(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<Uuid, ServiceError> {
        let order_id = Uuid::new_v4();

        let txn = self
            .get_db()
            .begin()
            .await
            .map_err(|e| persistence_error("begin transaction", e))?;

        if let Err(e) = insert_order_rows(&txn, order_id, order, items).await {
            counter!("storefront_orders.rolled_back", 1);
            if let Err(rollback_err) = txn.rollback().await {
                // Dropping the connection still discards the uncommitted rows.
                warn!(error = %rollback_err, "Explicit rollback failed");
            }
            return Err(e);
        }

        txn.commit()
            .await
            .map_err(|e| persistence_error("commit", e))?;

        counter!("storefront_orders.created", 1);
        debug!(order_id = %order_id, "Order committed");
        Ok(order_id)
    }

    #[instrument(skip(self))]
    async fn mark_paid(
        &self,
        gateway_order_id: &str,
        payment_id: &str,
    ) -> Result<PaidTransition, ServiceError> {
        let result = Order::update_many()
            .set(OrderActiveModel {
                payment_status: Set(PaymentStatus::Paid),
                order_status: Set(OrderStatus::Completed),
                payment_id: Set(Some(payment_id.to_string())),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(self.get_db())
            .await?;

        let current = self.find_by_gateway_order_id(gateway_order_id).await?;

        match (result.rows_affected, current) {
            (_, None) => Ok(PaidTransition::NotFound),
            (1, Some(order)) => Ok(PaidTransition::Transitioned(order)),
            (_, Some(order)) if order.is_paid() => Ok(PaidTransition::AlreadyPaid(order)),
            (affected, Some(order)) => {
                error!(
                    order_id = %order.id,
                    rows_affected = affected,
                    "Order still pending after paid transition"
                );
                Err(ServiceError::InternalError(
                    "order payment state did not change".into(),
                ))
            }
        }
    }

    async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = Order::find_by_id(order_id).one(self.get_db()).await? else {
            return Ok(None);
        };

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::LineNo)
            .all(self.get_db())
            .await?;

        Ok(Some(OrderWithItems { order, items }))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<OrderModel>, ServiceError> {
        Order::find()
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(self.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Order::find()
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .one(self.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}
