use uuid::Uuid;
use chrono::{DateTime, Utc};
use shipdesk_core::{ProviderFailure, QuantityShortfall, StoreError};

/// Local, recoverable problems that block submission. These never reach a carrier.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Quantity for line item {0} cannot be negative")]
    NegativeQuantity(Uuid),

    #[error("Line item {line_item_id} has only {remaining} unit(s) left to fulfill, {requested} requested")]
    ExceedsRemaining {
        line_item_id: Uuid,
        requested: i32,
        remaining: i32,
    },

    #[error("Line item {0} is not open for fulfillment on this order")]
    UnknownLineItem(Uuid),

    #[error("Nothing selected to ship")]
    NothingToShip,

    #[error("No shipping rate or manual tracking selected")]
    NoRateSelected,

    #[error("Choose either a carrier rate or manual tracking, not both")]
    ConflictingShippingMethod,

    #[error("Manual tracking requires a carrier and a tracking number")]
    EmptyManualTracking,

    #[error("Package dimensions and weight must be positive")]
    InvalidPackage,

    #[error("Quantities exceed what remains unfulfilled")]
    QuantityExceeded(Vec<QuantityShortfall>),

    #[error("A shipment for this order is already being created")]
    SubmissionInFlight,

    #[error("Shipping provider {0} is inactive")]
    ProviderInactive(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidProvider(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderFailure),

    #[error("Failed to create fulfillment: {0}")]
    Persistence(String),

    #[error("Fulfillment {id} was already canceled at {canceled_at}")]
    AlreadyCanceled { id: Uuid, canceled_at: DateTime<Utc> },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl FulfillmentError {
    /// Store failures outside of a commit; commit paths map their own errors
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => FulfillmentError::NotFound(what),
            StoreError::QuantityExceeded(shortfalls) => {
                FulfillmentError::Validation(ValidationError::QuantityExceeded(shortfalls))
            }
            StoreError::Backend(msg) => FulfillmentError::Persistence(msg),
            StoreError::AlreadyCanceled(at) => FulfillmentError::Persistence(format!("unexpected cancellation at {}", at)),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, FulfillmentError::Validation(_))
    }
}

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;
