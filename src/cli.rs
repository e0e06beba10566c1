//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// UDAP resource-server gateway - bearer token validation and signed discovery metadata
#[derive(Parser, Debug)]
#[command(name = "udap-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "UDAP_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "UDAP_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "UDAP_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "UDAP_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "UDAP_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// PKCS#12 keystore tooling
    #[command(subcommand)]
    Keystore(KeystoreCommand),

    /// Discovery document tooling
    #[command(subcommand)]
    Discovery(DiscoveryCommand),
}

/// Keystore subcommands
#[derive(Subcommand, Debug)]
pub enum KeystoreCommand {
    /// Generate a self-signed RSA-2048 keystore for metadata signing
    Generate {
        /// Output PKCS#12 file
        #[arg(long, short)]
        out: PathBuf,

        /// Keystore passphrase
        #[arg(long, env = "UDAP_GATEWAY_KEYSTORE_PASSPHRASE")]
        passphrase: String,

        /// Certificate Common Name
        #[arg(long)]
        common_name: String,

        /// Organization name
        #[arg(long)]
        organization: Option<String>,

        /// URI Subject Alternative Name (repeatable), usually the FHIR base URL
        #[arg(long = "san-uri")]
        san_uris: Vec<String>,

        /// Validity period in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// Alias of the private key entry
        #[arg(long, default_value = crate::udap::keystore::DEFAULT_ALIAS)]
        alias: String,
    },

    /// Load a keystore and print its identity and public JWK
    Inspect {
        /// PKCS#12 file
        #[arg(long)]
        path: PathBuf,

        /// Keystore passphrase
        #[arg(long, env = "UDAP_GATEWAY_KEYSTORE_PASSPHRASE")]
        passphrase: String,

        /// Key id for the printed JWK
        #[arg(long, default_value = "udap-gateway")]
        kid: String,
    },
}

/// Discovery subcommands
#[derive(Subcommand, Debug)]
pub enum DiscoveryCommand {
    /// Print the signed discovery document for the loaded configuration
    Print,

    /// Verify a discovery document's signed metadata against its x5c certificate
    Verify {
        /// Discovery document JSON file
        #[arg(long)]
        file: PathBuf,
    },
}
