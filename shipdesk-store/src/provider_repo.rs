use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;
use shipdesk_core::repository::ProviderRepository;
use shipdesk_core::shipping::ProviderEndpoints;
use shipdesk_core::{ShippingProvider, StoreError};

use crate::database::backend;

pub struct PgProviderRepository {
    pool: PgPool,
}

impl PgProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    id: Uuid,
    name: String,
    is_active: bool,
    endpoints: Json<ProviderEndpoints>,
    updated_at: DateTime<Utc>,
}

impl From<ProviderRow> for ShippingProvider {
    fn from(row: ProviderRow) -> Self {
        ShippingProvider {
            id: row.id,
            name: row.name,
            is_active: row.is_active,
            endpoints: row.endpoints.0,
            updated_at: row.updated_at,
        }
    }
}

const PROVIDER_COLUMNS: &str = "id, name, is_active, endpoints, updated_at";

#[async_trait]
impl ProviderRepository for PgProviderRepository {
    async fn list_providers(&self) -> Result<Vec<ShippingProvider>, StoreError> {
        let rows: Vec<ProviderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shipping_providers ORDER BY name",
            PROVIDER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_provider(&self, id: Uuid) -> Result<Option<ShippingProvider>, StoreError> {
        let row: Option<ProviderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM shipping_providers WHERE id = $1",
            PROVIDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(Into::into))
    }

    async fn upsert_provider(&self, provider: &ShippingProvider) -> Result<ShippingProvider, StoreError> {
        let row: ProviderRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO shipping_providers (id, name, is_active, endpoints, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, is_active = EXCLUDED.is_active, endpoints = EXCLUDED.endpoints, updated_at = NOW()
            RETURNING {}
            "#,
            PROVIDER_COLUMNS
        ))
        .bind(provider.id)
        .bind(&provider.name)
        .bind(provider.is_active)
        .bind(Json(&provider.endpoints))
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.into())
    }

    async fn toggle_active(&self, id: Uuid) -> Result<ShippingProvider, StoreError> {
        let row: Option<ProviderRow> = sqlx::query_as(&format!(
            "UPDATE shipping_providers SET is_active = NOT is_active, updated_at = NOW() WHERE id = $1 RETURNING {}",
            PROVIDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Into::into)
            .ok_or_else(|| StoreError::NotFound(format!("provider {}", id)))
    }
}
