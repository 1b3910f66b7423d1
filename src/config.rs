// src/config.rs - Configuration management
use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; when absent the discrete PG* fields are used.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
    pub ssl: bool,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(skip)]
    pub jwt_secret_generated: bool,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: i32,
    pub lockout_duration_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MailConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub secure: bool,
}

// No built-in secret: it comes from JWT_SECRET/the config file or is generated at load time.
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_secret_generated: false,
            token_expiration_hours: 8,
            bcrypt_cost: 12,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            workers: None,
            keep_alive: 30,
            environment: "development".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            name: "sigo".to_string(),
            ssl: false,
            max_connections: 20,
            min_connections: 1,
            connect_timeout: 10,
            idle_timeout: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            rate_limit_requests: 300,
            rate_limit_window_seconds: 60,
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            user: None,
            password: None,
            secure: false,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let mut options = match &self.url {
            Some(url) => PgConnectOptions::from_str(url)
                .context("DATABASE_URL is not a valid PostgreSQL connection string")?,
            None => {
                let mut opts = PgConnectOptions::new()
                    .host(&self.host)
                    .port(self.port)
                    .username(&self.user)
                    .database(&self.name);
                if let Some(password) = &self.password {
                    opts = opts.password(password);
                }
                opts
            }
        };

        if self.ssl {
            options = options.ssl_mode(PgSslMode::Require);
        }

        Ok(options)
    }

    /// Connection target without credentials, for startup logs.
    pub fn describe(&self) -> String {
        match &self.url {
            Some(url) => match url.rsplit_once('@') {
                Some((_, target)) => target.to_string(),
                None => url.clone(),
            },
            None => format!("{}:{}/{}", self.host, self.port, self.name),
        }
    }
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        self.host.is_some() && self.user.is_some() && self.password.is_some()
    }
}

pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        load_config_file(Path::new(&config_file))?
    } else {
        Config::default()
    };

    apply_overrides(&mut config, |key| env::var(key).ok());
    ensure_jwt_secret(&mut config)?;

    config.validate().context("Configuration validation failed")?;

    Ok(config)
}

/// Fills in a random per-process secret outside production when none was configured.
/// Tokens signed with it stop validating on restart.
pub fn ensure_jwt_secret(config: &mut Config) -> Result<()> {
    if !config.auth.jwt_secret.is_empty() {
        return Ok(());
    }
    if config.is_production() {
        anyhow::bail!("JWT_SECRET must be set in production");
    }
    config.auth.jwt_secret = generate_jwt_secret();
    config.auth.jwt_secret_generated = true;
    Ok(())
}

fn load_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Applies environment-style overrides read through `lookup`.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = lookup("PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.server.port = port;
    }
    if let Some(workers) = lookup("SIGO_WORKERS").and_then(|v| v.parse::<usize>().ok()) {
        config.server.workers = Some(workers);
    }
    if let Some(environment) = lookup("SIGO_ENV").or_else(|| lookup("NODE_ENV")) {
        config.server.environment = environment;
    }

    if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(host) = lookup("PGHOST") {
        config.database.host = host;
    }
    if let Some(port) = lookup("PGPORT").and_then(|v| v.parse::<u16>().ok()) {
        config.database.port = port;
    }
    if let Some(user) = lookup("PGUSER") {
        config.database.user = user;
    }
    if let Some(password) = lookup("PGPASSWORD") {
        config.database.password = Some(password);
    }
    if let Some(name) = lookup("PGDATABASE") {
        config.database.name = name;
    }
    if let Some(ssl) = lookup("PG_SSL") {
        config.database.ssl = parse_bool(&ssl);
    }
    if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse::<u32>().ok()) {
        config.database.max_connections = max;
    }

    if let Some(secret) = lookup("JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Some(hours) = lookup("AUTH_TOKEN_EXPIRATION_HOURS").and_then(|v| v.parse::<i64>().ok()) {
        config.auth.token_expiration_hours = hours;
    }

    if let Some(origins) = lookup("ALLOWED_ORIGINS") {
        config.security.allowed_origins = split_list(&origins).collect();
    }
    for key in ["FRONTEND_URL", "FRONTEND_URLS"] {
        if let Some(urls) = lookup(key) {
            for url in split_list(&urls) {
                if !config.security.allowed_origins.contains(&url) {
                    config.security.allowed_origins.push(url);
                }
            }
        }
    }
    if let Some(n) = lookup("RATE_LIMIT_REQUESTS").and_then(|v| v.parse::<u32>().ok()) {
        config.security.rate_limit_requests = n;
    }
    if let Some(secs) = lookup("RATE_LIMIT_WINDOW_SECONDS").and_then(|v| v.parse::<u64>().ok()) {
        config.security.rate_limit_window_seconds = secs;
    }

    if let Some(level) = lookup("RUST_LOG") {
        config.logging.level = level;
    }

    if let Some(host) = lookup("MAIL_HOST") {
        config.mail.host = Some(host);
    }
    if let Some(port) = lookup("MAIL_PORT").and_then(|v| v.parse::<u16>().ok()) {
        config.mail.port = port;
    }
    if let Some(user) = lookup("MAIL_USER") {
        config.mail.user = Some(user);
    }
    if let Some(pass) = lookup("MAIL_PASS") {
        config.mail.password = Some(pass);
    }
    if let Some(secure) = lookup("MAIL_SECURE") {
        config.mail.secure = parse_bool(&secure);
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            );
        }

        if self.database.max_connections < self.database.min_connections {
            anyhow::bail!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            );
        }

        if self.security.rate_limit_window_seconds == 0 {
            anyhow::bail!("rate_limit_window_seconds must be greater than zero");
        }

        if self.is_production() && self.security.allowed_origins.iter().any(|o| o == "*") {
            anyhow::bail!("Wildcard CORS origins not allowed in production!");
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }

    pub fn print_startup_info(&self) {
        log::info!("SIGO starting up");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {} (pool max {})", self.database.describe(), self.database.max_connections);
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        if self.auth.jwt_secret_generated {
            log::warn!("JWT_SECRET not set: using a generated secret, sessions will not survive a restart");
        }
        log::info!("Logging: {} level", self.logging.level);
        if self.mail.is_configured() {
            log::info!(
                "Mail: {}:{} (secure: {})",
                self.mail.host.as_deref().unwrap_or_default(),
                self.mail.port,
                self.mail.secure
            );
        } else {
            log::info!("Mail: not configured");
        }

        if !self.is_production() {
            log::warn!("Running in {} mode", self.server.environment);
        } else if !self.security.require_https {
            log::warn!("HTTPS not required in production mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let mut config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.max_connections, 20);
        assert!(!config.is_production());
        // No usable secret until one is configured or generated.
        assert!(config.validate().is_err());

        ensure_jwt_secret(&mut config).unwrap();
        assert!(config.auth.jwt_secret_generated);
        assert_eq!(config.auth.jwt_secret.len(), 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let mut config = Config::default();
        apply_overrides(&mut config, lookup_from(&[("NODE_ENV", "production")]));

        assert!(ensure_jwt_secret(&mut config).is_err());
        assert!(config.auth.jwt_secret.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configured_jwt_secret_is_kept() {
        let secret = "s".repeat(40);
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            lookup_from(&[("SIGO_ENV", "production"), ("JWT_SECRET", secret.as_str())]),
        );

        ensure_jwt_secret(&mut config).unwrap();
        assert_eq!(config.auth.jwt_secret, secret);
        assert!(!config.auth.jwt_secret_generated);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "a".repeat(32);
        assert!(config.validate().is_ok());

        config.database.max_connections = 1;
        config.database.min_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_rejects_wildcard_origin() {
        let mut config = Config::default();
        config.server.environment = "production".to_string();
        config.auth.jwt_secret = "a".repeat(32);
        assert!(config.validate().is_ok());

        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("PORT", "4000"),
                ("PGHOST", "db.internal"),
                ("PGDATABASE", "sigo_prod"),
                ("PG_SSL", "true"),
                ("NODE_ENV", "production"),
                ("ALLOWED_ORIGINS", "https://a.cl, https://b.cl"),
                ("FRONTEND_URLS", "https://b.cl,https://c.cl"),
                ("MAIL_HOST", "smtp.gmail.com"),
                ("MAIL_SECURE", "1"),
            ]),
        );

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.name, "sigo_prod");
        assert!(config.database.ssl);
        assert!(config.is_production());
        assert_eq!(
            config.security.allowed_origins,
            vec!["https://a.cl", "https://b.cl", "https://c.cl"]
        );
        assert_eq!(config.mail.host.as_deref(), Some("smtp.gmail.com"));
        assert!(config.mail.secure);
    }

    #[test]
    fn test_sigo_env_wins_over_node_env() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            lookup_from(&[("SIGO_ENV", "staging"), ("NODE_ENV", "production")]),
        );
        assert_eq!(config.server.environment, "staging");
    }

    #[test]
    fn test_invalid_numbers_are_ignored() {
        let mut config = Config::default();
        apply_overrides(&mut config, lookup_from(&[("PORT", "not-a-port")]));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_describe_hides_credentials() {
        let mut db = DatabaseConfig::default();
        db.url = Some("postgres://sigo:secret@db:5432/sigo".to_string());
        assert_eq!(db.describe(), "db:5432/sigo");
        assert!(db.connect_options().is_ok());
    }

    #[test]
    fn test_invalid_database_url() {
        let mut db = DatabaseConfig::default();
        db.url = Some("::not-a-url::".to_string());
        assert!(db.connect_options().is_err());
    }

    #[test]
    fn test_toml_loading() -> Result<()> {
        let toml_content = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [database]
        max_connections = 5

        [auth]
        jwt_secret = "test_secret_123456789012345678901234567890"
        "#;

        let temp_file = NamedTempFile::new()?;
        fs::write(temp_file.path(), toml_content)?;

        let config = load_config_file(temp_file.path())?;
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.auth.jwt_secret, "test_secret_123456789012345678901234567890");
        assert_eq!(config.auth.token_expiration_hours, 8);

        Ok(())
    }

    #[test]
    fn test_generate_jwt_secret() {
        let secret = generate_jwt_secret();
        assert_eq!(secret.len(), 64);
        assert_ne!(secret, generate_jwt_secret());
    }
}
