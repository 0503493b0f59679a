use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use shipdesk_core::models::{Address, TrackingStatus, ValidatedAddress};
use shipdesk_core::shipping::ProviderEndpoints;
use shipdesk_core::{PackageDescriptor, Rate, ShippingProvider};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProviderBody {
    pub name: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub endpoints: ProviderEndpoints,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuoteBody {
    pub order_id: Uuid,
    pub package: PackageDescriptor,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/{provider_id}", get(get_provider).put(put_provider))
        .route("/v1/providers/{provider_id}/toggle", post(toggle_provider))
        .route("/v1/providers/{provider_id}/rates", post(quote_provider))
        .route("/v1/providers/{provider_id}/address/validate", post(validate_address))
        .route("/v1/providers/{provider_id}/track/{tracking_number}", get(track_shipment))
}

async fn list_providers(State(state): State<AppState>) -> Result<Json<Vec<ShippingProvider>>, AppError> {
    Ok(Json(state.service.list_providers().await?))
}

async fn get_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ShippingProvider>, AppError> {
    Ok(Json(state.service.get_provider(provider_id).await?))
}

async fn put_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
    Json(body): Json<ProviderBody>,
) -> Result<Json<ShippingProvider>, AppError> {
    let provider = ShippingProvider {
        id: provider_id,
        name: body.name,
        is_active: body.is_active,
        endpoints: body.endpoints,
        updated_at: Utc::now(),
    };
    Ok(Json(state.service.upsert_provider(provider).await?))
}

async fn toggle_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ShippingProvider>, AppError> {
    Ok(Json(state.service.toggle_provider_active(provider_id).await?))
}

async fn quote_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
    Json(body): Json<ProviderQuoteBody>,
) -> Result<Json<Vec<Rate>>, AppError> {
    Ok(Json(state.service.quote_rates(provider_id, body.order_id, &body.package).await?))
}

async fn validate_address(
    State(state): State<AppState>,
    Path(provider_id): Path<Uuid>,
    Json(address): Json<Address>,
) -> Result<Json<ValidatedAddress>, AppError> {
    Ok(Json(state.service.validate_address(provider_id, &address).await?))
}

async fn track_shipment(
    State(state): State<AppState>,
    Path((provider_id, tracking_number)): Path<(Uuid, String)>,
) -> Result<Json<TrackingStatus>, AppError> {
    Ok(Json(state.service.track_shipment(provider_id, &tracking_number).await?))
}
