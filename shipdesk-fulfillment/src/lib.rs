pub mod error;
pub mod planner;
pub mod rates;
pub mod requote;
pub mod session;
pub mod orchestrator;
pub mod lifecycle;
pub mod service;

pub use error::{FulfillmentError, ValidationError};
pub use planner::FulfillmentPlanner;
pub use rates::{RateAggregator, RateBoard, ProviderQuote};
pub use requote::{RequoteSession, QuoteSequencer, RateState, RateView};
pub use session::ShipmentSession;
pub use orchestrator::{LabelOrchestrator, CreateFulfillmentRequest, ManualTracking};
pub use lifecycle::{FulfillmentLifecycle, CancelAllOutcome, FulfillmentHistory};
pub use service::FulfillmentService;

#[cfg(test)]
pub(crate) mod testing;
