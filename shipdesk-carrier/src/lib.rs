pub mod builtin;
pub mod circuit;
pub mod http;
pub mod wire;
pub mod gateway;

pub use builtin::{BuiltInRegistry, FlatRateCarrier};
pub use circuit::CircuitBreaker;
pub use http::HttpEndpointClient;
pub use gateway::{CarrierGateway, CarrierSettings, ProviderAdapter};
