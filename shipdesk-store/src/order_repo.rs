use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;
use shipdesk_core::models::{Address, LabelStatus};
use shipdesk_core::repository::OrderRepository;
use shipdesk_core::{Fulfillment, FulfillmentItem, LineItem, Order, QuantityShortfall, ShippingLabel, StoreError};

use crate::database::backend;

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    display_number: String,
    shipping_address: Option<Json<Address>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LineItemRow {
    id: Uuid,
    order_id: Uuid,
    title: String,
    sku: Option<String>,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct FulfillmentRow {
    id: Uuid,
    order_id: Uuid,
    created_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct FulfillmentItemRow {
    id: Uuid,
    fulfillment_id: Uuid,
    line_item_id: Uuid,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct LabelRow {
    id: Uuid,
    fulfillment_id: Uuid,
    carrier: String,
    service: Option<String>,
    tracking_number: String,
    tracking_url: Option<String>,
    label_url: Option<String>,
    status: String,
    provider_reference: Option<String>,
    metadata: serde_json::Value,
}

#[derive(sqlx::FromRow)]
struct RemainingRow {
    id: Uuid,
    remaining: i64,
}

impl LabelRow {
    fn into_label(self) -> ShippingLabel {
        ShippingLabel {
            id: self.id,
            carrier: self.carrier,
            service: self.service,
            tracking_number: self.tracking_number,
            tracking_url: self.tracking_url,
            label_url: self.label_url,
            status: LabelStatus::parse(&self.status).unwrap_or(LabelStatus::Purchased),
            provider_reference: self.provider_reference,
            metadata: self.metadata,
        }
    }
}

/// Attach items and labels to fulfillment rows
fn assemble(
    rows: Vec<FulfillmentRow>,
    items: Vec<FulfillmentItemRow>,
    labels: Vec<LabelRow>,
) -> Vec<Fulfillment> {
    let mut items_by: HashMap<Uuid, Vec<FulfillmentItem>> = HashMap::new();
    for item in items {
        items_by.entry(item.fulfillment_id).or_default().push(FulfillmentItem {
            id: item.id,
            fulfillment_id: item.fulfillment_id,
            line_item_id: item.line_item_id,
            quantity: item.quantity,
        });
    }
    let mut labels_by: HashMap<Uuid, Vec<ShippingLabel>> = HashMap::new();
    for label in labels {
        labels_by.entry(label.fulfillment_id).or_default().push(label.into_label());
    }

    rows.into_iter()
        .map(|row| Fulfillment {
            id: row.id,
            order_id: row.order_id,
            items: items_by.remove(&row.id).unwrap_or_default(),
            labels: labels_by.remove(&row.id).unwrap_or_default(),
            created_at: row.created_at,
            canceled_at: row.canceled_at,
        })
        .collect()
}

impl PgOrderRepository {
    async fn load_fulfillments(&self, filter: &str, id: Uuid) -> Result<Vec<Fulfillment>, StoreError> {
        let rows: Vec<FulfillmentRow> = sqlx::query_as(&format!(
            "SELECT id, order_id, created_at, canceled_at FROM fulfillments WHERE {} = $1 ORDER BY created_at",
            filter
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let items: Vec<FulfillmentItemRow> = sqlx::query_as(
            "SELECT id, fulfillment_id, line_item_id, quantity FROM fulfillment_items WHERE fulfillment_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let labels: Vec<LabelRow> = sqlx::query_as(
            "SELECT id, fulfillment_id, carrier, service, tracking_number, tracking_url, label_url, status, provider_reference, metadata \
             FROM shipping_labels WHERE fulfillment_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(assemble(rows, items, labels))
    }

    /// Remaining quantities derived from stored items, read inside `tx`
    async fn remaining_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<HashMap<Uuid, i64>, StoreError> {
        let rows: Vec<RemainingRow> = sqlx::query_as(
            r#"
            SELECT li.id,
                   li.quantity - COALESCE(SUM(fi.quantity) FILTER (WHERE f.canceled_at IS NULL), 0) AS remaining
            FROM line_items li
            LEFT JOIN fulfillment_items fi ON fi.line_item_id = li.id
            LEFT JOIN fulfillments f ON f.id = fi.fulfillment_id
            WHERE li.order_id = $1
            GROUP BY li.id, li.quantity
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(|r| (r.id, r.remaining)).collect())
    }

    /// Seed an order with its line items
    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("INSERT INTO orders (id, display_number, shipping_address, created_at) VALUES ($1, $2, $3, $4)")
            .bind(order.id)
            .bind(&order.display_number)
            .bind(order.shipping_address.clone().map(Json))
            .bind(order.created_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for (position, item) in order.line_items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO line_items (id, order_id, title, sku, quantity, position) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(&item.title)
            .bind(&item.sku)
            .bind(item.quantity)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, display_number, shipping_address, created_at FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let line_items: Vec<LineItemRow> = sqlx::query_as(
            "SELECT id, order_id, title, sku, quantity FROM line_items WHERE order_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let fulfillments = self.load_fulfillments("order_id", id).await?;

        Ok(Some(Order {
            id: row.id,
            display_number: row.display_number,
            line_items: line_items
                .into_iter()
                .map(|li| LineItem {
                    id: li.id,
                    order_id: li.order_id,
                    title: li.title,
                    sku: li.sku,
                    quantity: li.quantity,
                })
                .collect(),
            fulfillments,
            shipping_address: row.shipping_address.map(|Json(a)| a),
            created_at: row.created_at,
        }))
    }

    async fn get_fulfillment(&self, id: Uuid) -> Result<Option<Fulfillment>, StoreError> {
        Ok(self.load_fulfillments("id", id).await?.into_iter().next())
    }

    async fn commit_fulfillment(&self, fulfillment: &Fulfillment) -> Result<Fulfillment, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Serialise writers on the same order
        let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(fulfillment.order_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        if locked.is_none() {
            return Err(StoreError::NotFound(format!("order {}", fulfillment.order_id)));
        }

        let remaining = Self::remaining_in_tx(&mut tx, fulfillment.order_id).await?;
        let mut requested: HashMap<Uuid, i64> = HashMap::new();
        for item in &fulfillment.items {
            *requested.entry(item.line_item_id).or_default() += i64::from(item.quantity);
        }
        let shortfalls: Vec<QuantityShortfall> = requested
            .into_iter()
            .filter_map(|(line_item_id, qty)| {
                let left = remaining.get(&line_item_id).copied().unwrap_or(0).max(0);
                (qty > left).then(|| QuantityShortfall {
                    line_item_id,
                    requested: i32::try_from(qty).unwrap_or(i32::MAX),
                    remaining: i32::try_from(left).unwrap_or(i32::MAX),
                })
            })
            .collect();
        if !shortfalls.is_empty() {
            // tx dropped without commit rolls back
            return Err(StoreError::QuantityExceeded(shortfalls));
        }

        sqlx::query("INSERT INTO fulfillments (id, order_id, created_at, canceled_at) VALUES ($1, $2, $3, NULL)")
            .bind(fulfillment.id)
            .bind(fulfillment.order_id)
            .bind(fulfillment.created_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for item in &fulfillment.items {
            sqlx::query("INSERT INTO fulfillment_items (id, fulfillment_id, line_item_id, quantity) VALUES ($1, $2, $3, $4)")
                .bind(item.id)
                .bind(fulfillment.id)
                .bind(item.line_item_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for label in &fulfillment.labels {
            sqlx::query(
                r#"
                INSERT INTO shipping_labels (id, fulfillment_id, carrier, service, tracking_number, tracking_url, label_url, status, provider_reference, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(label.id)
            .bind(fulfillment.id)
            .bind(&label.carrier)
            .bind(&label.service)
            .bind(&label.tracking_number)
            .bind(&label.tracking_url)
            .bind(&label.label_url)
            .bind(label.status.as_str())
            .bind(&label.provider_reference)
            .bind(&label.metadata)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(fulfillment.clone())
    }

    async fn cancel_fulfillment(&self, id: Uuid, at: DateTime<Utc>) -> Result<Fulfillment, StoreError> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE fulfillments SET canceled_at = $2 WHERE id = $1 AND canceled_at IS NULL RETURNING id",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        if updated.is_none() {
            let existing: Option<(Option<DateTime<Utc>>,)> =
                sqlx::query_as("SELECT canceled_at FROM fulfillments WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(backend)?;
            return match existing {
                Some((Some(canceled_at),)) => Err(StoreError::AlreadyCanceled(canceled_at)),
                _ => Err(StoreError::NotFound(format!("fulfillment {}", id))),
            };
        }

        self.get_fulfillment(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("fulfillment {}", id)))
    }
}
