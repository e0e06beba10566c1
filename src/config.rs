//! Configuration management

use std::{env, fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::DEFAULT_PUBLIC_PATHS;
use crate::udap::DiscoveryClaims;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Bearer-token authentication
    pub auth: AuthConfig,
    /// Credential bundle used to sign discovery metadata
    pub keystore: KeystoreConfig,
    /// UDAP discovery document
    pub discovery: DiscoveryConfig,
}

impl Config {
    /// Load configuration from file and environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // UDAP_GATEWAY_AUTH__ISSUER -> auth.issuer
        figment = figment.merge(Env::prefixed("UDAP_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in path-like values, and `~` in
    /// the keystore path.
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(format!("env pattern: {e}")))?;

        self.keystore.path = expand_home(&expand_string(&re, &self.keystore.path));
        self.auth.issuer = expand_string(&re, &self.auth.issuer);
        if let Some(jwks_url) = &mut self.auth.jwks_url {
            *jwks_url = expand_string(&re, jwks_url);
        }
        self.discovery.base_url = expand_string(&re, &self.discovery.base_url);
        self.discovery.authorization_server = expand_string(&re, &self.discovery.authorization_server);
        Ok(())
    }

    /// Check required fields and value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        check_url(&mut problems, "auth.issuer", &self.auth.issuer);
        if !self.auth.issuer.is_empty() || self.auth.jwks_url.is_some() {
            let jwks_url = self.auth.jwks_url();
            match Url::parse(&jwks_url) {
                Ok(url) if self.auth.require_https && url.scheme() != "https" => problems.push(
                    format!("auth.jwks_url must use https (got '{jwks_url}'); set auth.require_https: false for local testing"),
                ),
                Ok(_) => {}
                Err(e) => problems.push(format!("auth.jwks_url '{jwks_url}' is not a valid URL: {e}")),
            }
        }
        for path in &self.auth.public_paths {
            if !path.starts_with('/') {
                problems.push(format!("auth.public_paths entry '{path}' must start with '/'"));
            }
        }
        if self.auth.fetch_timeout.is_zero() {
            problems.push("auth.fetch_timeout must be greater than zero".to_string());
        }
        if self.auth.cache_ttl.is_zero() {
            problems.push("auth.cache_ttl must be greater than zero".to_string());
        }

        if self.keystore.path.is_empty() {
            problems.push("keystore.path is required".to_string());
        }
        if self.keystore.passphrase.is_empty() {
            problems.push("keystore.passphrase is required".to_string());
        }

        check_url(&mut problems, "discovery.base_url", &self.discovery.base_url);
        check_url(
            &mut problems,
            "discovery.authorization_server",
            &self.discovery.authorization_server,
        );
        if !self.discovery.path.starts_with('/') {
            problems.push(format!("discovery.path '{}' must start with '/'", self.discovery.path));
        }
        if self.discovery.signed_metadata_lifetime.is_zero() {
            problems.push("discovery.signed_metadata_lifetime must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

fn check_url(problems: &mut Vec<String>, field: &str, value: &str) {
    if value.is_empty() {
        problems.push(format!("{field} is required"));
    } else if let Err(e) = Url::parse(value) {
        problems.push(format!("{field} '{value}' is not a valid URL: {e}"));
    }
}

/// Expand environment variables in a string
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

fn expand_home(value: &str) -> String {
    if value.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return value.replacen('~', &home.display().to_string(), 1);
        }
    }
    value.to_string()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Bearer-token authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Trusted token issuer (exact match against `iss`)
    pub issuer: String,
    /// JWKS URL; derived from the issuer when unset
    pub jwks_url: Option<String>,
    /// Paths served without authentication (exact match)
    pub public_paths: Vec<String>,
    /// Upper bound on one key-set fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Age after which the cached key set is refreshed
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Tolerance for `exp`, `iat` and `nbf`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Refuse plain-HTTP key-set URLs
    pub require_https: bool,
}

impl AuthConfig {
    /// Effective JWKS URL.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        self.jwks_url.clone().unwrap_or_else(|| {
            format!(
                "{}/.well-known/openid-configuration/jwks",
                self.issuer.trim_end_matches('/')
            )
        })
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            jwks_url: None,
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| (*p).to_string()).collect(),
            fetch_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(3600),
            clock_skew: Duration::from_secs(60),
            require_https: true,
        }
    }
}

/// PKCS#12 keystore configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Keystore file path (`~` and `${VAR}` expanded)
    pub path: String,
    /// Keystore passphrase, literal or `env:VAR_NAME`
    pub passphrase: String,
    /// Load the bundle at startup instead of on first discovery request
    pub load_on_startup: bool,
}

impl KeystoreConfig {
    /// Resolve the passphrase, reading it from the environment for `env:VAR`.
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced variable is unset.
    pub fn resolve_passphrase(&self) -> Result<String> {
        match self.passphrase.strip_prefix("env:") {
            Some(var) => env::var(var)
                .map_err(|_| Error::Config(format!("keystore passphrase variable '{var}' is not set"))),
            None => Ok(self.passphrase.clone()),
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            passphrase: String::new(),
            load_on_startup: true,
        }
    }
}

impl fmt::Debug for KeystoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passphrase = if self.passphrase.starts_with("env:") {
            self.passphrase.as_str()
        } else {
            "[REDACTED]"
        };
        f.debug_struct("KeystoreConfig")
            .field("path", &self.path)
            .field("passphrase", &passphrase)
            .field("load_on_startup", &self.load_on_startup)
            .finish()
    }
}

/// UDAP discovery document configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// FHIR base URL, used as `iss` and `sub` of the signed metadata
    pub base_url: String,
    /// Route serving the discovery document
    pub path: String,
    /// Authorization server base URL
    pub authorization_server: String,
    /// Authorization endpoint path on the authorization server
    pub authorization_path: String,
    /// Token endpoint path
    pub token_path: String,
    /// Userinfo endpoint path
    pub userinfo_path: String,
    /// Revocation endpoint path
    pub revocation_path: String,
    /// Registration endpoint path
    pub registration_path: String,
    /// Validity of each signed metadata JWT
    #[serde(with = "humantime_serde")]
    pub signed_metadata_lifetime: Duration,
    /// `udap_versions_supported`
    pub udap_versions_supported: Vec<String>,
    /// `udap_profiles_supported`
    pub udap_profiles_supported: Vec<String>,
    /// `udap_authorization_extensions_supported`
    pub udap_authorization_extensions_supported: Vec<String>,
    /// `udap_authorization_extensions_required`
    pub udap_authorization_extensions_required: Vec<String>,
    /// `udap_certifications_supported`
    pub udap_certifications_supported: Vec<String>,
    /// `udap_certifications_required`
    pub udap_certifications_required: Vec<String>,
    /// `grant_types_supported`
    pub grant_types_supported: Vec<String>,
    /// `scopes_supported`
    pub scopes_supported: Vec<String>,
    /// `token_endpoint_auth_methods_supported`
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// `token_endpoint_auth_signing_alg_values_supported`
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    /// `registration_endpoint_jwt_signing_alg_values_supported`
    pub registration_endpoint_jwt_signing_alg_values_supported: Vec<String>,
}

impl DiscoveryConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.authorization_server.trim_end_matches('/'))
    }

    /// Absolute authorization endpoint URL.
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        self.endpoint(&self.authorization_path)
    }

    /// Absolute token endpoint URL.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        self.endpoint(&self.token_path)
    }

    /// Absolute userinfo endpoint URL.
    #[must_use]
    pub fn userinfo_endpoint(&self) -> String {
        self.endpoint(&self.userinfo_path)
    }

    /// Absolute revocation endpoint URL.
    #[must_use]
    pub fn revocation_endpoint(&self) -> String {
        self.endpoint(&self.revocation_path)
    }

    /// Absolute registration endpoint URL.
    #[must_use]
    pub fn registration_endpoint(&self) -> String {
        self.endpoint(&self.registration_path)
    }

    /// Claims asserted by the signed metadata.
    #[must_use]
    pub fn discovery_claims(&self) -> DiscoveryClaims {
        DiscoveryClaims {
            issuer: self.base_url.clone(),
            authorization_endpoint: self.authorization_endpoint(),
            token_endpoint: self.token_endpoint(),
            registration_endpoint: self.registration_endpoint(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path: "/fhir/.well-known/udap".to_string(),
            authorization_server: String::new(),
            authorization_path: "/connect/authorize".to_string(),
            token_path: "/connect/token".to_string(),
            userinfo_path: "/connect/userinfo".to_string(),
            revocation_path: "/connect/revocation".to_string(),
            registration_path: "/connect/register".to_string(),
            signed_metadata_lifetime: Duration::from_secs(24 * 3600),
            udap_versions_supported: strings(&["1"]),
            udap_profiles_supported: strings(&["udap_dcr", "udap_authn", "udap_authz"]),
            udap_authorization_extensions_supported: strings(&["hl7-b2b"]),
            udap_authorization_extensions_required: strings(&["hl7-b2b"]),
            udap_certifications_supported: strings(&[
                "https://www.example.com/udap/profiles/example-certification",
            ]),
            udap_certifications_required: strings(&[
                "https://www.example.com/udap/profiles/example-certification",
            ]),
            grant_types_supported: strings(&["authorization_code", "refresh_token", "client_credentials"]),
            scopes_supported: strings(&[
                "openid",
                "patient/*.read",
                "patient/*.rs",
                "user/*.read",
                "user/*.rs",
                "system/*.read",
                "system/*.rs",
            ]),
            token_endpoint_auth_methods_supported: strings(&["private_key_jwt"]),
            token_endpoint_auth_signing_alg_values_supported: strings(&["ES256", "ES384", "RS256", "RS384"]),
            registration_endpoint_jwt_signing_alg_values_supported: strings(&[
                "ES256", "ES384", "RS256", "RS384",
            ]),
        }
    }
}
