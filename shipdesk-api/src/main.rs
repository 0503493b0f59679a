use std::net::SocketAddr;
use std::sync::Arc;
use shipdesk_api::{app, AppState};
use shipdesk_carrier::BuiltInRegistry;
use shipdesk_core::repository::{NotificationSink, OrderRepository, ProviderRepository};
use shipdesk_core::shipping::ProviderEndpoints;
use shipdesk_core::ShippingProvider;
use shipdesk_store::{DbClient, EventProducer, InMemoryStore, LogNotificationSink, PgOrderRepository, PgProviderRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipdesk_api=debug,shipdesk_fulfillment=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = shipdesk_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Shipdesk API on port {}", config.server.port);

    // Stores
    let orders: Arc<dyn OrderRepository>;
    let providers: Arc<dyn ProviderRepository>;
    match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .expect("Failed to connect to Postgres");
            db.migrate().await.expect("Failed to run migrations");
            orders = Arc::new(PgOrderRepository::new(db.pool.clone()));
            providers = Arc::new(PgProviderRepository::new(db.pool));
        }
        None => {
            tracing::warn!("No database configured, using the in-memory store");
            let store = Arc::new(InMemoryStore::new());
            orders = store.clone();
            providers = store;
        }
    }

    // Seed the built-in carrier so a fresh install can quote
    let existing = providers.list_providers().await.expect("Failed to list providers");
    if existing.is_empty() {
        let flat_rate = ShippingProvider::new("Flat Rate", ProviderEndpoints::all_built_in("flat_rate"));
        providers.upsert_provider(&flat_rate).await.expect("Failed to seed provider");
        tracing::info!("Registered built-in provider {}", flat_rate.name);
    }

    // Notifications
    let sink: Arc<dyn NotificationSink> = match &config.kafka.brokers {
        Some(brokers) => Arc::new(
            EventProducer::new(brokers, &config.kafka.topic_prefix).expect("Failed to create Kafka producer"),
        ),
        None => Arc::new(LogNotificationSink),
    };

    let app_state = AppState::new(
        orders,
        providers,
        sink,
        BuiltInRegistry::with_defaults(),
        &config.carrier,
        &config.rates,
    )
    .expect("Failed to build application state");

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
