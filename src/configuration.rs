use config::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub store: StoreBackend,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Which credential store backs the service
#[derive(serde::Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Server-level URL, for creating or dropping databases
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT signing settings
///
/// Access and refresh tokens are signed with separate secrets so that a
/// leaked access key cannot mint refresh tokens.
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expiry: i64,   // seconds (e.g., 3600 for 1 hour)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

impl JwtSettings {
    /// Reject settings that would weaken token separation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(ConfigError::Message(
                "jwt secrets must not be empty".to_string(),
            ));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::Message(
                "jwt.access_secret and jwt.refresh_secret must differ".to_string(),
            ));
        }
        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::Message(
                "jwt token expiries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Password hashing and session bookkeeping settings
#[derive(serde::Deserialize, Clone)]
pub struct AuthSettings {
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,
    /// Oldest refresh tokens are evicted beyond this many per user.
    /// Unset keeps every unconsumed token.
    #[serde(default)]
    pub max_refresh_tokens_per_user: Option<usize>,
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

fn default_password_hash_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            password_hash_cost: default_password_hash_cost(),
            max_refresh_tokens_per_user: None,
            bootstrap_admin: None,
        }
    }
}

impl AuthSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_refresh_tokens_per_user == Some(0) {
            return Err(ConfigError::Message(
                "auth.max_refresh_tokens_per_user must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.jwt.validate()?;
    settings.auth.validate()?;
    Ok(settings)
}
