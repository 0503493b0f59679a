use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{Address, Order, ShippingLabel, TrackingStatus, ValidatedAddress};
use crate::shipping::{LineItemSelection, PackageDescriptor, Rate};

/// Uniform interface over one carrier integration.
///
/// Implementations never retry and never panic on bad carrier payloads;
/// every failure comes back as a `ProviderError`. Timeouts are applied by
/// the caller.
#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    /// Quote rates for shipping `package` against `order`
    async fn quote_rates(
        &self,
        order: &Order,
        package: &PackageDescriptor,
    ) -> Result<Vec<Rate>, ProviderError>;

    /// Purchase a label for a previously quoted rate
    async fn create_label(
        &self,
        order: &Order,
        rate_id: &str,
        package: &PackageDescriptor,
        selections: &[LineItemSelection],
    ) -> Result<ShippingLabel, ProviderError>;

    async fn validate_address(
        &self,
        address: &Address,
    ) -> Result<ValidatedAddress, ProviderError>;

    async fn track_shipment(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingStatus, ProviderError>;

    /// Void a purchased label
    async fn cancel_label(
        &self,
        label_reference: &str,
    ) -> Result<(), ProviderError>;
}
