use std::sync::Arc;
use std::time::Duration;
use futures_util::future::join_all;
use serde::Serialize;
use uuid::Uuid;
use shipdesk_carrier::CarrierGateway;
use shipdesk_core::repository::{OrderRepository, ProviderRepository};
use shipdesk_core::{Order, PackageDescriptor, ProviderFailure, Rate, ShippingProvider};

use crate::error::{FulfillmentError, FulfillmentResult, ValidationError};

/// Rates of one provider for one quoting round, or that provider's error
#[derive(Debug, Clone, Serialize)]
pub struct ProviderQuote {
    pub provider_id: Uuid,
    pub provider_name: String,
    pub rates: Vec<Rate>,
    pub error: Option<String>,
}

impl ProviderQuote {
    fn from_outcome(provider: &ShippingProvider, outcome: Result<Vec<Rate>, ProviderFailure>) -> Self {
        match outcome {
            Ok(rates) => Self {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                rates,
                error: None,
            },
            Err(failure) => Self {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                rates: Vec::new(),
                error: Some(failure.error.to_string()),
            },
        }
    }
}

/// One quoting round across every active provider
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateBoard {
    pub quotes: Vec<ProviderQuote>,
}

impl RateBoard {
    pub fn quote_for(&self, provider_id: &Uuid) -> Option<&ProviderQuote> {
        self.quotes.iter().find(|q| q.provider_id == *provider_id)
    }

    /// Every successful rate across providers, cheapest first
    pub fn all_rates(&self) -> Vec<Rate> {
        let mut rates: Vec<Rate> = self.quotes.iter().flat_map(|q| q.rates.iter().cloned()).collect();
        sort_rates(&mut rates);
        rates
    }
}

/// Ascending by price. Stable, so equal prices keep the carrier's order.
pub fn sort_rates(rates: &mut [Rate]) {
    rates.sort_by_key(|rate| rate.price_minor);
}

/// Drives provider adapters for rate quotes and normalizes the results
pub struct RateAggregator {
    orders: Arc<dyn OrderRepository>,
    providers: Arc<dyn ProviderRepository>,
    gateway: Arc<CarrierGateway>,
    /// Extra attempts on transient failures; quotes are idempotent
    retries: u32,
}

impl RateAggregator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        providers: Arc<dyn ProviderRepository>,
        gateway: Arc<CarrierGateway>,
        retries: u32,
    ) -> Self {
        Self { orders, providers, gateway, retries }
    }

    async fn quotable_order(&self, order_id: Uuid, package: &PackageDescriptor) -> FulfillmentResult<Order> {
        if !package.is_valid() {
            return Err(ValidationError::InvalidPackage.into());
        }
        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", order_id)))?;

        // No carrier call for an order with nothing left to ship
        if !order.has_unfulfilled() {
            return Err(ValidationError::NothingToShip.into());
        }
        Ok(order)
    }

    async fn quote_with_retry(
        &self,
        provider: &ShippingProvider,
        order: &Order,
        package: &PackageDescriptor,
    ) -> Result<Vec<Rate>, ProviderFailure> {
        let adapter = self.gateway.adapter_for(provider);
        let timeout: Duration = self.gateway.settings().quote_timeout;
        let mut attempt = 0;
        loop {
            match adapter.quote_rates(order, package, timeout).await {
                Ok(mut rates) => {
                    sort_rates(&mut rates);
                    return Ok(rates);
                }
                Err(failure) if failure.error.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::info!("Retrying quote from {} (attempt {})", provider.name, attempt + 1);
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    /// Quote one provider for one order
    pub async fn quote(
        &self,
        provider_id: Uuid,
        order_id: Uuid,
        package: &PackageDescriptor,
    ) -> FulfillmentResult<Vec<Rate>> {
        let provider = self
            .providers
            .get_provider(provider_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("provider {}", provider_id)))?;
        if !provider.is_active {
            return Err(ValidationError::ProviderInactive(provider.name).into());
        }

        let order = self.quotable_order(order_id, package).await?;
        Ok(self.quote_with_retry(&provider, &order, package).await?)
    }

    /// Quote every currently active provider concurrently. One provider
    /// failing only fills its own slot with an error.
    pub async fn quote_active(
        &self,
        order_id: Uuid,
        package: &PackageDescriptor,
    ) -> FulfillmentResult<RateBoard> {
        let order = self.quotable_order(order_id, package).await?;
        let providers = self
            .providers
            .list_active_providers()
            .await
            .map_err(FulfillmentError::from_store)?;

        let quotes = join_all(providers.iter().map(|provider| {
            let order = &order;
            async move {
                let outcome = self.quote_with_retry(provider, order, package).await;
                ProviderQuote::from_outcome(provider, outcome)
            }
        }))
        .await;

        tracing::debug!("Quoted {} provider(s) for order {}", quotes.len(), order.display_number);
        Ok(RateBoard { quotes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, fixture_with, package, ScriptedCarrier};
    use shipdesk_core::ProviderError;

    #[test]
    fn test_sort_is_ascending_and_stable() {
        let rate = |id: &str, price: i64| Rate {
            id: id.to_string(),
            provider_id: Uuid::nil(),
            carrier: "Acme".to_string(),
            service: id.to_string(),
            price_minor: price,
            currency: "USD".to_string(),
            estimated_days: None,
        };
        let mut rates = vec![rate("a", 1250), rate("b", 800), rate("c", 1500), rate("d", 800)];
        sort_rates(&mut rates);
        let ids: Vec<&str> = rates.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[tokio::test]
    async fn test_quote_sorts_provider_rates() {
        let carrier = ScriptedCarrier::with_prices(&[1250, 800, 1500]);
        let fx = fixture(carrier.clone(), 10, 0).await;

        let rates = fx.aggregator.quote(fx.provider_id, fx.order_id, &package(1.0)).await.unwrap();
        let prices: Vec<i64> = rates.iter().map(|r| r.price_minor).collect();
        assert_eq!(prices, vec![800, 1250, 1500]);
        assert!(rates.iter().all(|r| r.provider_id == fx.provider_id));
    }

    #[tokio::test]
    async fn test_inactive_provider_is_never_called() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 10, 0).await;
        fx.store.toggle_active(fx.provider_id).await.unwrap();

        let err = fx.aggregator.quote(fx.provider_id, fx.order_id, &package(1.0)).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(ValidationError::ProviderInactive(_))));

        let board = fx.aggregator.quote_active(fx.order_id, &package(1.0)).await.unwrap();
        assert!(board.quotes.is_empty());
        assert_eq!(carrier.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_fully_fulfilled_order_skips_carrier() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 3, 3).await;

        let err = fx.aggregator.quote(fx.provider_id, fx.order_id, &package(1.0)).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(ValidationError::NothingToShip)));
        assert_eq!(carrier.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_provider_keeps_other_rates() {
        let broken = ScriptedCarrier::failing(ProviderError::Status { status: 500, body: "boom".to_string() });
        let fx = fixture_with(
            vec![("Acme Parcel", ScriptedCarrier::with_prices(&[999])), ("Broken Freight", broken)],
            10,
            0,
        )
        .await;
        let broken_id = fx.provider_ids[1];

        let board = fx.aggregator.quote_active(fx.order_id, &package(1.0)).await.unwrap();
        assert_eq!(board.quotes.len(), 2);
        assert_eq!(board.quote_for(&fx.provider_id).unwrap().rates.len(), 1);

        let failed = board.quote_for(&broken_id).unwrap();
        assert!(failed.rates.is_empty());
        assert!(failed.error.as_deref().unwrap().contains("HTTP 500"));
        assert_eq!(board.all_rates().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        carrier.fail_next(ProviderError::Unreachable("connection reset".to_string()));
        let fx = fixture(carrier.clone(), 10, 0).await;

        let rates = fx.aggregator.quote(fx.provider_id, fx.order_id, &package(1.0)).await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(carrier.quote_calls(), 2);
    }
}
