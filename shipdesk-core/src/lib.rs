pub mod models;
pub mod shipping;
pub mod carrier;
pub mod repository;
pub mod error;

pub use models::{Order, LineItem, Fulfillment, FulfillmentItem, ShippingLabel, LabelStatus, Address};
pub use shipping::{ShippingProvider, AdapterEndpoint, ProviderOperation, Rate, PackageDescriptor, LineItemSelection};
pub use carrier::CarrierAdapter;
pub use error::{ProviderError, ProviderFailure, StoreError, QuantityShortfall};
