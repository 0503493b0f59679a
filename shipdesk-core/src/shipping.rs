use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;

/// Where one provider operation is served from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterEndpoint {
    BuiltIn { key: String },
    CustomEndpoint { url: String },
}

impl AdapterEndpoint {
    pub fn built_in(key: impl Into<String>) -> Self {
        AdapterEndpoint::BuiltIn { key: key.into() }
    }

    pub fn custom(url: impl Into<String>) -> Self {
        AdapterEndpoint::CustomEndpoint { url: url.into() }
    }
}

impl fmt::Display for AdapterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterEndpoint::BuiltIn { key } => write!(f, "builtin:{}", key),
            AdapterEndpoint::CustomEndpoint { url } => write!(f, "{}", url),
        }
    }
}

/// The five operations every carrier integration exposes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOperation {
    QuoteRates,
    CreateLabel,
    ValidateAddress,
    TrackShipment,
    CancelLabel,
}

impl ProviderOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderOperation::QuoteRates => "quote_rates",
            ProviderOperation::CreateLabel => "create_label",
            ProviderOperation::ValidateAddress => "validate_address",
            ProviderOperation::TrackShipment => "track_shipment",
            ProviderOperation::CancelLabel => "cancel_label",
        }
    }
}

impl fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub rate_quote: AdapterEndpoint,
    pub label_create: AdapterEndpoint,
    pub address_validate: AdapterEndpoint,
    pub track: AdapterEndpoint,
    pub cancel_label: AdapterEndpoint,
}

impl ProviderEndpoints {
    /// Every operation served by the same built-in adapter
    pub fn all_built_in(key: &str) -> Self {
        Self::uniform(AdapterEndpoint::built_in(key))
    }

    /// Every operation posted to `{base}/{operation}`
    pub fn all_custom(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let at = |op: ProviderOperation| AdapterEndpoint::custom(format!("{}/{}", base, op.as_str()));
        Self {
            rate_quote: at(ProviderOperation::QuoteRates),
            label_create: at(ProviderOperation::CreateLabel),
            address_validate: at(ProviderOperation::ValidateAddress),
            track: at(ProviderOperation::TrackShipment),
            cancel_label: at(ProviderOperation::CancelLabel),
        }
    }

    fn uniform(endpoint: AdapterEndpoint) -> Self {
        Self {
            rate_quote: endpoint.clone(),
            label_create: endpoint.clone(),
            address_validate: endpoint.clone(),
            track: endpoint.clone(),
            cancel_label: endpoint,
        }
    }

    pub fn for_operation(&self, operation: ProviderOperation) -> &AdapterEndpoint {
        match operation {
            ProviderOperation::QuoteRates => &self.rate_quote,
            ProviderOperation::CreateLabel => &self.label_create,
            ProviderOperation::ValidateAddress => &self.address_validate,
            ProviderOperation::TrackShipment => &self.track,
            ProviderOperation::CancelLabel => &self.cancel_label,
        }
    }
}

/// Carrier integration configuration, shared by every order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingProvider {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub endpoints: ProviderEndpoints,
    pub updated_at: DateTime<Utc>,
}

impl ShippingProvider {
    pub fn new(name: impl Into<String>, endpoints: ProviderEndpoints) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_active: true,
            endpoints,
            updated_at: Utc::now(),
        }
    }

    pub fn toggle_active(&mut self) {
        self.is_active = !self.is_active;
        self.updated_at = Utc::now();
    }
}

/// A quoted price, valid only for the quoting round that produced it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rate {
    pub id: String,
    #[serde(default)]
    pub provider_id: Uuid,
    pub carrier: String,
    pub service: String,
    /// Price in minor currency units (cents)
    pub price_minor: i64,
    pub currency: String,
    pub estimated_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DimensionUnit {
    Cm,
    In,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    G,
    Kg,
    Oz,
    Lb,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PackageDescriptor {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub dimension_unit: DimensionUnit,
    pub weight: f64,
    pub weight_unit: WeightUnit,
}

impl PackageDescriptor {
    pub fn weight_grams(&self) -> f64 {
        match self.weight_unit {
            WeightUnit::G => self.weight,
            WeightUnit::Kg => self.weight * 1000.0,
            WeightUnit::Oz => self.weight * 28.349_523_125,
            WeightUnit::Lb => self.weight * 453.592_37,
        }
    }

    pub fn volume_cm3(&self) -> f64 {
        let factor = match self.dimension_unit {
            DimensionUnit::Cm => 1.0,
            DimensionUnit::In => 2.54,
        };
        (self.length * factor) * (self.width * factor) * (self.height * factor)
    }

    /// All dimensions and the weight must be finite and positive
    pub fn is_valid(&self) -> bool {
        [self.length, self.width, self.height, self.weight]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItemSelection {
    pub line_item_id: Uuid,
    pub quantity: i32,
}

impl LineItemSelection {
    pub fn new(line_item_id: Uuid, quantity: i32) -> Self {
        Self { line_item_id, quantity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_endpoints_are_per_operation() {
        let endpoints = ProviderEndpoints::all_custom("https://carrier.example/hooks/");
        assert_eq!(
            endpoints.for_operation(ProviderOperation::CancelLabel),
            &AdapterEndpoint::custom("https://carrier.example/hooks/cancel_label")
        );
    }

    #[test]
    fn test_package_conversions() {
        let package = PackageDescriptor {
            length: 1.0,
            width: 1.0,
            height: 1.0,
            dimension_unit: DimensionUnit::In,
            weight: 2.0,
            weight_unit: WeightUnit::Kg,
        };
        assert!((package.volume_cm3() - 16.387_064).abs() < 1e-6);
        assert_eq!(package.weight_grams(), 2000.0);
        assert!(package.is_valid());

        let empty = PackageDescriptor { weight: 0.0, ..package };
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_endpoint_serde_shape() {
        let json = serde_json::to_value(AdapterEndpoint::built_in("flat_rate")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "built_in", "key": "flat_rate"}));
    }
}
