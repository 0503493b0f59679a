use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use shipdesk_core::models::{Address, Order, ShippingLabel, TrackingStatus, ValidatedAddress};
use shipdesk_core::shipping::{LineItemSelection, PackageDescriptor, Rate};
use shipdesk_core::{CarrierAdapter, ProviderError};

/// Built-in carrier adapters, looked up by the key stored on a provider endpoint
#[derive(Clone, Default)]
pub struct BuiltInRegistry {
    adapters: HashMap<String, Arc<dyn CarrierAdapter>>,
}

impl BuiltInRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock flat-rate carrier under `flat_rate`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("flat_rate", Arc::new(FlatRateCarrier::standard()));
        registry
    }

    pub fn register(&mut self, key: &str, adapter: Arc<dyn CarrierAdapter>) {
        self.adapters.insert(key.to_string(), adapter);
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn CarrierAdapter>, ProviderError> {
        self.adapters
            .get(key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownBuiltIn(key.to_string()))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adapters.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[derive(Debug, Clone)]
pub struct FlatRateService {
    pub code: String,
    pub name: String,
    /// Percent applied to the ground price
    pub multiplier_pct: i64,
    pub estimated_days: u32,
}

/// Weight-banded table carrier that needs no network access
#[derive(Debug, Clone)]
pub struct FlatRateCarrier {
    pub carrier: String,
    pub currency: String,
    pub base_minor: i64,
    pub per_kg_minor: i64,
    pub services: Vec<FlatRateService>,
}

const TRACKING_PREFIX: &str = "FR";
/// cm3 per kg for volumetric weight
const VOLUMETRIC_DIVISOR: f64 = 5000.0;
const MAX_BILLABLE_KG: f64 = 1000.0;

impl FlatRateCarrier {
    pub fn standard() -> Self {
        let service = |code: &str, name: &str, multiplier_pct: i64, estimated_days: u32| FlatRateService {
            code: code.to_string(),
            name: name.to_string(),
            multiplier_pct,
            estimated_days,
        };
        Self {
            carrier: "Flat Rate Post".to_string(),
            currency: "USD".to_string(),
            base_minor: 499,
            per_kg_minor: 150,
            services: vec![
                service("express", "Express", 180, 2),
                service("ground", "Ground", 100, 5),
                service("overnight", "Overnight", 320, 1),
            ],
        }
    }

    /// Greater of actual and volumetric weight, rounded up to whole kg
    fn billable_kg(package: &PackageDescriptor) -> Result<i64, ProviderError> {
        let actual = package.weight_grams() / 1000.0;
        let volumetric = package.volume_cm3() / VOLUMETRIC_DIVISOR;
        let billable = actual.max(volumetric).ceil().max(1.0);
        if !billable.is_finite() || billable > MAX_BILLABLE_KG {
            return Err(ProviderError::Rejected(format!(
                "package exceeds the {} kg billable limit",
                MAX_BILLABLE_KG
            )));
        }
        Ok(billable as i64)
    }

    fn price_for(&self, service: &FlatRateService, package: &PackageDescriptor) -> Result<i64, ProviderError> {
        let overflow = || ProviderError::Rejected("price out of range".to_string());
        let ground = self
            .per_kg_minor
            .checked_mul(Self::billable_kg(package)?)
            .and_then(|weight| weight.checked_add(self.base_minor))
            .ok_or_else(overflow)?;
        ground
            .checked_mul(service.multiplier_pct)
            .map(|price| price / 100)
            .ok_or_else(overflow)
    }

    fn service_from_rate(&self, rate_id: &str) -> Option<&FlatRateService> {
        let code = rate_id.strip_prefix("flat:")?.split(':').next()?;
        self.services.iter().find(|s| s.code == code)
    }

    fn owns(&self, tracking_number: &str) -> bool {
        tracking_number.starts_with(TRACKING_PREFIX) && tracking_number.len() > TRACKING_PREFIX.len()
    }
}

#[async_trait]
impl CarrierAdapter for FlatRateCarrier {
    async fn quote_rates(
        &self,
        _order: &Order,
        package: &PackageDescriptor,
    ) -> Result<Vec<Rate>, ProviderError> {
        if !package.is_valid() {
            return Err(ProviderError::Rejected("package dimensions and weight must be positive".to_string()));
        }

        self.services
            .iter()
            .map(|service| {
                Ok(Rate {
                    id: format!("flat:{}:{}", service.code, Uuid::new_v4().simple()),
                    provider_id: Uuid::nil(),
                    carrier: self.carrier.clone(),
                    service: service.name.clone(),
                    price_minor: self.price_for(service, package)?,
                    currency: self.currency.clone(),
                    estimated_days: Some(service.estimated_days),
                })
            })
            .collect()
    }

    async fn create_label(
        &self,
        order: &Order,
        rate_id: &str,
        package: &PackageDescriptor,
        selections: &[LineItemSelection],
    ) -> Result<ShippingLabel, ProviderError> {
        let service = self
            .service_from_rate(rate_id)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown rate {}", rate_id)))?;
        if selections.iter().all(|s| s.quantity <= 0) {
            return Err(ProviderError::Rejected("label has no contents".to_string()));
        }

        let tracking_number = format!(
            "{}{}",
            TRACKING_PREFIX,
            Uuid::new_v4().simple().to_string()[..12].to_uppercase()
        );
        let price_minor = self.price_for(service, package)?;
        let mut label = ShippingLabel::purchased(self.carrier.clone(), tracking_number.clone());
        label.service = Some(service.name.clone());
        label.tracking_url = Some(format!("https://track.flatrate.example/{}", tracking_number));
        label.label_url = Some(format!("https://labels.flatrate.example/{}.pdf", tracking_number));
        label.metadata = serde_json::json!({
            "order": order.display_number,
            "package": package,
            "price_minor": price_minor,
        });
        Ok(label)
    }

    async fn validate_address(
        &self,
        address: &Address,
    ) -> Result<ValidatedAddress, ProviderError> {
        let mut messages = Vec::new();
        if address.line1.trim().is_empty() {
            messages.push("street line is required".to_string());
        }
        if address.city.trim().is_empty() {
            messages.push("city is required".to_string());
        }
        if address.postal_code.trim().is_empty() {
            messages.push("postal code is required".to_string());
        }
        if address.country.trim().len() != 2 {
            messages.push("country must be a two-letter code".to_string());
        }

        let mut normalized = address.clone();
        normalized.line1 = address.line1.trim().to_string();
        normalized.city = address.city.trim().to_string();
        normalized.postal_code = address.postal_code.trim().to_uppercase();
        normalized.country = address.country.trim().to_uppercase();

        Ok(ValidatedAddress {
            address: normalized,
            is_valid: messages.is_empty(),
            messages,
        })
    }

    async fn track_shipment(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingStatus, ProviderError> {
        if !self.owns(tracking_number) {
            return Err(ProviderError::Rejected(format!("unknown tracking number {}", tracking_number)));
        }
        Ok(TrackingStatus {
            tracking_number: tracking_number.to_string(),
            status: "PRE_TRANSIT".to_string(),
            events: Vec::new(),
        })
    }

    async fn cancel_label(
        &self,
        label_reference: &str,
    ) -> Result<(), ProviderError> {
        if !self.owns(label_reference) {
            return Err(ProviderError::Rejected(format!("unknown label {}", label_reference)));
        }
        Ok(())
    }
}
