use actix_web::dev::Server;
use actix_web::error::JsonPayloadError;
use actix_web::{middleware::Logger, web, App, HttpRequest, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::hash_password;
use crate::configuration::{AuthSettings, BootstrapAdmin, DatabaseSettings, JwtSettings};
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    delete_user, get_profile, health_check, list_users, login, logout, refresh, register,
    update_profile,
};
use crate::store::CredentialStore;
use crate::user::{Role, User, UserChanges};
use crate::validators::{is_valid_email, is_valid_name, is_valid_password};

/// Malformed or missing JSON bodies are validation errors with the usual
/// error body
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::Validation(ValidationError::MalformedBody(err.to_string())).into()
}

pub fn run(
    listener: TcpListener,
    store: Arc<dyn CredentialStore>,
    jwt_config: JwtSettings,
    auth_config: AuthSettings,
) -> Result<Server, std::io::Error> {
    let store: web::Data<dyn CredentialStore> = web::Data::from(store);
    let jwt_config_data = web::Data::new(jwt_config.clone());
    let auth_config_data = web::Data::new(auth_config);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(store.clone())
            .app_data(jwt_config_data.clone())
            .app_data(auth_config_data.clone())

            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    // Public routes (no authentication required)
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .service(
                        web::resource("/logout")
                            .wrap(JwtMiddleware::new(jwt_config.clone()))
                            .route(web::post().to(logout)),
                    ),
            )
            // Protected routes (require a valid access token)
            .service(
                web::resource("/me")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route(web::get().to(get_profile))
                    .route(web::put().to(update_profile)),
            )
            .service(
                web::scope("/admin")
                    .wrap(JwtMiddleware::new(jwt_config.clone()))
                    .route("/users", web::get().to(list_users))
                    .route("/users/{id}", web::delete().to(delete_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Connect to Postgres and apply pending migrations
pub async fn get_connection_pool(config: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Make sure the configured bootstrap account exists and is an admin
///
/// An existing account with that email is promoted; its password is left
/// untouched.
pub async fn ensure_bootstrap_admin(
    store: &dyn CredentialStore,
    admin: &BootstrapAdmin,
    password_hash_cost: u32,
) -> Result<User, AppError> {
    let email = is_valid_email(&admin.email)?;

    if let Some(existing) = store.find_by_email(&email).await? {
        if existing.role == Role::Admin {
            return Ok(existing);
        }
        let promoted = store
            .update(
                existing.id,
                UserChanges {
                    role: Some(Role::Admin),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;
        tracing::info!(user_id = %promoted.id, "Promoted bootstrap account to admin");
        return Ok(promoted);
    }

    let name = is_valid_name(&admin.name)?;
    is_valid_password(&admin.password)?;
    let password_hash = hash_password(&admin.password, password_hash_cost)?;

    let mut user = User::new(Uuid::new_v4(), name, email, password_hash);
    user.role = Role::Admin;
    store.create(&user).await?;

    tracing::info!(user_id = %user.id, "Created bootstrap admin account");
    Ok(user)
}
