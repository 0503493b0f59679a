pub mod app_config;
pub mod memory;
pub mod database;
pub mod order_repo;
pub mod provider_repo;
pub mod events;

pub use memory::InMemoryStore;
pub use database::DbClient;
pub use order_repo::PgOrderRepository;
pub use provider_repo::PgProviderRepository;
pub use events::{EventProducer, LogNotificationSink};
