//! UDAP Gateway - bearer token validation and signed UDAP discovery for FHIR

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use udap_gateway::{
    cli::{Cli, Command, DiscoveryCommand, KeystoreCommand},
    config::Config,
    gateway::Gateway,
    setup_tracing,
    udap::{CertificateStore, DiscoveryDocument, DiscoveryService, KeystoreGenerator, KeystoreParams},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Keystore(cmd)) => run_keystore_command(cmd),
        Some(Command::Discovery(cmd)) => run_discovery_command(cmd, cli.config.as_deref()).await,
        Some(Command::Serve) | None => run_server(cli.config, cli.host, cli.port).await,
    }
}

/// Run keystore commands
fn run_keystore_command(cmd: KeystoreCommand) -> ExitCode {
    match cmd {
        KeystoreCommand::Generate {
            out,
            passphrase,
            common_name,
            organization,
            san_uris,
            days,
            alias,
        } => {
            let params = KeystoreParams {
                cn: &common_name,
                organization: organization.as_deref(),
                san_uris,
                validity_days: days,
                alias: &alias,
            };
            let generated = match KeystoreGenerator::generate(&params, &passphrase) {
                Ok(g) => g,
                Err(e) => {
                    eprintln!("❌ Keystore generation failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = KeystoreGenerator::write(&generated, &out) {
                eprintln!("❌ {e}");
                return ExitCode::FAILURE;
            }

            println!("✅ Keystore written to {}", out.display());
            println!("   Alias: {alias}");
            println!("   Valid for {days} days");
            println!();
            print!("{}", generated.cert_pem);
            ExitCode::SUCCESS
        }

        KeystoreCommand::Inspect {
            path,
            passphrase,
            kid,
        } => match CertificateStore::load(&path, &passphrase) {
            Ok(bundle) => {
                println!("Alias:       {}", bundle.alias());
                println!("Subject:     {}", bundle.subject());
                println!("Chain:       {} certificate(s)", bundle.chain().len());
                println!("Key size:    {} bits", bundle.public_key().bits());
                println!("SHA-256:     {}", bundle.fingerprint_sha256());
                println!();
                match serde_json::to_string_pretty(&bundle.public_jwk(&kid)) {
                    Ok(jwk) => println!("{jwk}"),
                    Err(e) => {
                        eprintln!("❌ Failed to serialize JWK: {e}");
                        return ExitCode::FAILURE;
                    }
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ {e}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Run discovery commands
async fn run_discovery_command(cmd: DiscoveryCommand, config_path: Option<&Path>) -> ExitCode {
    match cmd {
        DiscoveryCommand::Print => {
            let config = match Config::load(config_path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("❌ Failed to load configuration: {e}");
                    return ExitCode::FAILURE;
                }
            };

            let service = DiscoveryService::new(config.discovery, config.keystore);
            let document = match service.document().await {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("❌ Failed to build discovery document: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match serde_json::to_string_pretty(&document) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("❌ Failed to serialize discovery document: {e}");
                    ExitCode::FAILURE
                }
            }
        }

        DiscoveryCommand::Verify { file } => verify_document(&file),
    }
}

fn verify_document(file: &Path) -> ExitCode {
    let document: DiscoveryDocument = match std::fs::read(file)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_slice(&data).map_err(|e| e.to_string()))
    {
        Ok(d) => d,
        Err(e) => {
            eprintln!("❌ Failed to read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    match document.verify() {
        Ok(claims) => {
            println!("✅ signed_metadata verified");
            println!("   Issuer:  {}", claims.iss);
            println!("   JTI:     {}", claims.jti);
            println!("   Expires: {}", claims.exp);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> ExitCode {
    let config = match Config::load(config_path.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        issuer = %config.auth.issuer,
        "Starting UDAP Gateway"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
