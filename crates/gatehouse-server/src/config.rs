//! Server configuration

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub oauth: OAuthSettings,
    pub jwt: JwtSettings,
    pub database: DatabaseSettings,
    pub saml: SamlSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL relying apps and IdPs are pointed at
    #[serde(default = "default_external_url")]
    pub external_url: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthSettings {
    #[serde(default = "default_token_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_token_ttl")]
    pub code_ttl_secs: u64,
    #[serde(default = "default_token_ttl")]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_jwt_expiry")]
    pub expiry_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Base64-encoded 32-byte key; unset disables encryption at rest
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SamlSettings {
    #[serde(default = "default_audience")]
    pub audience: String,
    /// PEM body of the signing certificate served in federation metadata
    #[serde(default)]
    pub certificate: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5225
}

fn default_external_url() -> String {
    "http://localhost:5225".to_string()
}

fn default_token_ttl() -> u64 {
    300
}

fn default_issuer() -> String {
    "https://saml.gatehouse.dev".to_string()
}

fn default_jwt_expiry() -> i64 {
    300
}

fn default_audience() -> String {
    "https://saml.gatehouse.dev".to_string()
}

fn default_cleanup_interval() -> u64 {
    86400
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5225)?
            .set_default("server.external_url", "http://localhost:5225")?
            .set_default("oauth.access_token_ttl_secs", 300)?
            .set_default("oauth.code_ttl_secs", 300)?
            .set_default("oauth.session_ttl_secs", 300)?
            .set_default("jwt.secret", "change-this-secret-in-production")?
            .set_default("jwt.issuer", "https://saml.gatehouse.dev")?
            .set_default("jwt.expiry_secs", 300)?
            .set_default("database.cleanup_interval_secs", 86400)?
            .set_default("saml.audience", "https://saml.gatehouse.dev")?
            .set_default("saml.certificate", "")?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("GATEHOUSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
