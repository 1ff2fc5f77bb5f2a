use std::net::TcpListener;
use std::sync::Arc;

use authgate::configuration::{get_configuration, StoreBackend};
use authgate::startup::{ensure_bootstrap_admin, get_connection_pool, run};
use authgate::store::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};
use authgate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let store: Arc<dyn CredentialStore> = match configuration.application.store {
        StoreBackend::Postgres => {
            tracing::info!("Attempting to connect to database");
            let pool = get_connection_pool(&configuration.database)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to prepare database: {}", e);
                    std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "Database connection error",
                    )
                })?;
            tracing::info!("Database connection pool created successfully");
            Arc::new(PgCredentialStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory credential store; data is lost on shutdown");
            Arc::new(InMemoryCredentialStore::new())
        }
    };

    if let Some(admin) = &configuration.auth.bootstrap_admin {
        ensure_bootstrap_admin(
            store.as_ref(),
            admin,
            configuration.auth.password_hash_cost,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to bootstrap admin account: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Bootstrap error")
        })?;
    }

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, store, configuration.jwt, configuration.auth)?;
    server.await
}
