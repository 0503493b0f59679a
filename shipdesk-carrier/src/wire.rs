//! JSON shapes exchanged with operator-configured carrier endpoints.
//!
//! Every operation is a `POST` of one request object to the configured URL.
//! Responses are validated here before anything reaches the fulfillment layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use shipdesk_core::models::{Address, LabelStatus, Order, ShippingLabel};
use shipdesk_core::shipping::{LineItemSelection, PackageDescriptor, Rate};
use shipdesk_core::ProviderError;

#[derive(Debug, Serialize, Deserialize)]
pub struct WireLineItem {
    pub id: Uuid,
    pub title: String,
    pub sku: Option<String>,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireOrder {
    pub id: Uuid,
    pub display_number: String,
    pub shipping_address: Option<Address>,
    pub line_items: Vec<WireLineItem>,
}

impl From<&Order> for WireOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            display_number: order.display_number.clone(),
            shipping_address: order.shipping_address.clone(),
            line_items: order
                .line_items
                .iter()
                .map(|item| WireLineItem {
                    id: item.id,
                    title: item.title.clone(),
                    sku: item.sku.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub order: WireOrder,
    pub package: PackageDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireRate {
    pub id: String,
    pub carrier: String,
    pub service: String,
    pub price_minor: i64,
    pub currency: String,
    pub estimated_days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub rates: Vec<WireRate>,
}

impl QuoteResponse {
    pub fn into_rates(self) -> Result<Vec<Rate>, ProviderError> {
        self.rates
            .into_iter()
            .map(|r| {
                if r.id.trim().is_empty() || r.carrier.trim().is_empty() {
                    return Err(ProviderError::Malformed("rate missing id or carrier".to_string()));
                }
                if r.price_minor < 0 {
                    return Err(ProviderError::Malformed(format!("negative price on rate {}", r.id)));
                }
                Ok(Rate {
                    id: r.id,
                    provider_id: Uuid::nil(),
                    carrier: r.carrier,
                    service: r.service,
                    price_minor: r.price_minor,
                    currency: r.currency,
                    estimated_days: r.estimated_days,
                })
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LabelRequest {
    pub order: WireOrder,
    pub rate_id: String,
    pub package: PackageDescriptor,
    pub selections: Vec<LineItemSelection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LabelResponse {
    pub carrier: String,
    pub service: Option<String>,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub label_url: Option<String>,
    pub reference: Option<String>,
}

impl LabelResponse {
    pub fn into_label(self) -> Result<ShippingLabel, ProviderError> {
        if self.tracking_number.trim().is_empty() {
            return Err(ProviderError::Malformed("label response without tracking number".to_string()));
        }
        let mut label = ShippingLabel::purchased(self.carrier, self.tracking_number);
        label.service = self.service;
        label.tracking_url = self.tracking_url;
        label.label_url = self.label_url;
        label.provider_reference = self.reference;
        label.status = LabelStatus::Purchased;
        Ok(label)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddressRequest {
    pub address: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackRequest {
    pub tracking_number: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelRequest {
    pub label_reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub message: Option<String>,
}
