use async_trait::async_trait;
use chrono::DateTime;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::repository::{OrderRepository, RepositoryError};
use crate::config::DatabaseConfig;
use crate::domain::order::{Delivery, Item, Order, Payment};

// ============================================================================
// PostgreSQL Order Repository
// ============================================================================
//
// Schema (see migrations/0001_orders.sql):
//   deliveries (id SERIAL) ─┐
//   payments   (id SERIAL) ─┼─ orders (order_uid PK, track_number UNIQUE)
//                           └─ items  (track_number → orders.track_number)
//
// save() writes all four tables in one transaction. Any failing statement
// returns early, the transaction is dropped and rolled back, so either every
// row of an order is visible or none is.
//
// ============================================================================

const SCHEMA: &str = include_str!("../../migrations/0001_orders.sql");

macro_rules! select_orders {
    () => {
        "SELECT o.order_uid, o.track_number, o.entry, o.locale, o.internal_signature,
                o.customer_id, o.delivery_service, o.shardkey, o.sm_id, o.date_created, o.oof_shard,
                d.name, d.phone, d.zip, d.city, d.address, d.region, d.email,
                p.transaction, p.request_id, p.currency, p.provider, p.amount, p.payment_dt,
                p.bank, p.delivery_cost, p.goods_total, p.custom_fee
         FROM orders o
         JOIN deliveries d ON o.delivery_id = d.id
         JOIN payments p ON o.payment_id = p.id"
    };
}

const SELECT_ORDER_BY_ID: &str = concat!(select_orders!(), " WHERE o.order_uid = $1");
const SELECT_ALL_ORDERS: &str = concat!(select_orders!(), " ORDER BY o.created_at, o.order_uid");

const SELECT_ITEMS: &str = "SELECT chrt_id, track_number, price, rid, name, sale, size,
                                   total_price, nm_id, brand, status
                            FROM items
                            WHERE track_number = $1
                            ORDER BY id";

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the four order tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Order schema ensured");
        Ok(())
    }

    async fn fetch_items(&self, track_number: &str) -> Result<Vec<Item>, RepositoryError> {
        let rows = sqlx::query(SELECT_ITEMS)
            .bind(track_number)
            .fetch_all(&self.pool)
            .await?;

        let items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

fn failed(stage: &'static str, order: &Order, err: sqlx::Error) -> RepositoryError {
    let err = RepositoryError::from(err);
    tracing::error!(
        stage,
        order_uid = %order.order_uid,
        track_number = %order.track_number,
        error = %err,
        "Failed to persist order, rolling back"
    );
    err
}

fn order_from_row(row: &PgRow) -> Result<Order, sqlx::Error> {
    Ok(Order {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        delivery: Delivery {
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            zip: row.try_get("zip")?,
            city: row.try_get("city")?,
            address: row.try_get("address")?,
            region: row.try_get("region")?,
            email: row.try_get("email")?,
        },
        payment: Payment {
            transaction: row.try_get("transaction")?,
            request_id: row.try_get::<Option<String>, _>("request_id")?.unwrap_or_default(),
            currency: row.try_get("currency")?,
            provider: row.try_get("provider")?,
            amount: row.try_get("amount")?,
            payment_dt: row.try_get("payment_dt")?,
            bank: row.try_get("bank")?,
            delivery_cost: row.try_get::<Option<i32>, _>("delivery_cost")?.unwrap_or_default(),
            goods_total: row.try_get::<Option<i32>, _>("goods_total")?.unwrap_or_default(),
            custom_fee: row.try_get::<Option<i32>, _>("custom_fee")?.unwrap_or_default(),
        },
        items: Vec::new(),
        locale: row.try_get("locale")?,
        internal_signature: row
            .try_get::<Option<String>, _>("internal_signature")?
            .unwrap_or_default(),
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shardkey: row.try_get("shardkey")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get::<Option<i32>, _>("sale")?.unwrap_or_default(),
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        let created_at = DateTime::parse_from_rfc3339(&order.date_created).map_err(|e| {
            RepositoryError::Constraint(format!("date_created {:?}: {}", order.date_created, e))
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| failed("begin", order, e))?;

        let delivery = &order.delivery;
        let delivery_id: i32 = sqlx::query_scalar(
            "INSERT INTO deliveries (name, phone, zip, city, address, region, email)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(&delivery.name)
        .bind(&delivery.phone)
        .bind(&delivery.zip)
        .bind(&delivery.city)
        .bind(&delivery.address)
        .bind(&delivery.region)
        .bind(&delivery.email)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| failed("insert delivery", order, e))?;

        let payment = &order.payment;
        let payment_id: i32 = sqlx::query_scalar(
            "INSERT INTO payments (transaction, request_id, currency, provider, amount,
                                   payment_dt, bank, delivery_cost, goods_total, custom_fee)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING id",
        )
        .bind(&payment.transaction)
        .bind(&payment.request_id)
        .bind(&payment.currency)
        .bind(&payment.provider)
        .bind(payment.amount)
        .bind(payment.payment_dt)
        .bind(&payment.bank)
        .bind(payment.delivery_cost)
        .bind(payment.goods_total)
        .bind(payment.custom_fee)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| failed("insert payment", order, e))?;

        sqlx::query(
            "INSERT INTO orders (order_uid, track_number, entry, locale, internal_signature,
                                 customer_id, delivery_service, shardkey, sm_id, date_created,
                                 created_at, oof_shard, delivery_id, payment_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&order.order_uid)
        .bind(&order.track_number)
        .bind(&order.entry)
        .bind(&order.locale)
        .bind(&order.internal_signature)
        .bind(&order.customer_id)
        .bind(&order.delivery_service)
        .bind(&order.shardkey)
        .bind(order.sm_id)
        .bind(&order.date_created)
        .bind(created_at)
        .bind(&order.oof_shard)
        .bind(delivery_id)
        .bind(payment_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| failed("insert order", order, e))?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO items (chrt_id, track_number, price, rid, name, sale, size,
                                    total_price, nm_id, brand, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(item.chrt_id)
            .bind(&item.track_number)
            .bind(item.price)
            .bind(&item.rid)
            .bind(&item.name)
            .bind(item.sale)
            .bind(&item.size)
            .bind(item.total_price)
            .bind(item.nm_id)
            .bind(&item.brand)
            .bind(item.status)
            .execute(&mut *tx)
            .await
            .map_err(|e| failed("insert items", order, e))?;
        }

        tx.commit().await.map_err(|e| failed("commit", order, e))?;

        tracing::info!(
            order_uid = %order.order_uid,
            track_number = %order.track_number,
            delivery_id,
            payment_id,
            item_count = order.items.len(),
            "✅ Order persisted"
        );

        Ok(())
    }

    async fn get_by_id(&self, order_uid: &str) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(SELECT_ORDER_BY_ID)
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            tracing::debug!(order_uid, "Order not found in database");
            return Ok(None);
        };

        let mut order = order_from_row(&row)?;
        order.items = self.fetch_items(&order.track_number).await?;

        tracing::debug!(order_uid, item_count = order.items.len(), "Order loaded from database");
        Ok(Some(order))
    }

    async fn get_all(&self) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(SELECT_ALL_ORDERS).fetch_all(&self.pool).await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut order = order_from_row(row)?;
            order.items = self.fetch_items(&order.track_number).await?;
            orders.push(order);
        }

        tracing::debug!(count = orders.len(), "Loaded all orders from database");
        Ok(orders)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
