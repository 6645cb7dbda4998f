//! Package Signer CLI
//!
//! Builds and validates signing certificate chains for package signing
//! requests, and manages the signer configuration file.

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use openssl::pkey::PKey;
use package_signer::{
    adapters::trust_store::load_certificates,
    config::{ConfigManager, ExportFormat, SigningConfiguration},
    telemetry::LogTelemetrySink,
    ChainBuilder, CollectingFindingSink, RequestBuilder, Severity, SigningCertificate,
    SigningRequest,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "package-signer")]
#[command(about = "Package signing requests and certificate chain validation")]
#[command(long_about = "
Package Signer - validate signing certificates for package signatures

EXAMPLES:
    # Build the chain for an author signature using the platform roots
    package-signer chain --cert author.pem --system-roots

    # Repository countersignature with a private root and extra intermediates
    package-signer chain --cert repo.pem --extra ca.pem --roots roots/ \\
        --type repository --service-index https://api.example.org/v3/index.json \\
        --placement countersignature

    # Validate as of a past signing time
    package-signer chain --cert author.pem --roots root.pem --at 1700000000

    # Tighten the policy
    package-signer config set chain_policy.strict_revocation true

ENVIRONMENT VARIABLES:
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and validate the certificate chain for a signing request
    Chain(ChainArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(clap::Args)]
struct ChainArgs {
    /// Signing certificate (PEM or DER)
    #[arg(long, value_name = "CERT")]
    cert: PathBuf,

    /// Private key for the signing certificate (PEM)
    #[arg(long, value_name = "KEY")]
    key: Option<PathBuf>,

    /// Additional certificates offered as issuers
    #[arg(long, value_name = "CERTS")]
    extra: Vec<PathBuf>,

    /// Trust anchors (file or directory, overrides config)
    #[arg(long, value_name = "PATH")]
    roots: Option<PathBuf>,

    /// Trust the platform root store
    #[arg(long)]
    system_roots: bool,

    /// Signature type
    #[arg(long = "type", value_enum, default_value = "author")]
    signature_type: SignatureTypeArg,

    /// Repository service index URL (repository signatures)
    #[arg(long, value_name = "URL")]
    service_index: Option<String>,

    /// Package owners (repository signatures)
    #[arg(long = "owner", value_name = "OWNER")]
    owners: Vec<String>,

    /// Signature placement (primary or countersignature)
    #[arg(long)]
    placement: Option<String>,

    /// Signature hash algorithm (overrides config)
    #[arg(long)]
    signature_hash: Option<String>,

    /// Timestamp hash algorithm (overrides config)
    #[arg(long)]
    timestamp_hash: Option<String>,

    /// Verification time as unix seconds (defaults to now)
    #[arg(long, value_name = "UNIX_SECONDS")]
    at: Option<i64>,
}

#[derive(ValueEnum, Clone, Copy)]
enum SignatureTypeArg {
    Author,
    Repository,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g. chain_policy.revocation_mode)
        key: String,
        /// Configuration value
        value: String,
    },

    /// Export configuration
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import configuration
    Import {
        /// Configuration file to import
        file: PathBuf,
        /// Import format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum ExportFormatArg {
    Toml,
    Json,
    Yaml,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Yaml => ExportFormat::Yaml,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new().into_diagnostic()?,
    };

    match cli.command {
        Commands::Chain(args) => handle_chain_command(&config_manager, args),
        Commands::Config(config_cmd) => handle_config_command(&config_manager, config_cmd),
    }
}

fn handle_chain_command(config_manager: &ConfigManager, args: ChainArgs) -> Result<()> {
    let mut config = config_manager.load_or_default().into_diagnostic()?;
    if let Some(roots) = &args.roots {
        config.trusted_roots = Some(roots.clone());
        config.use_system_roots = args.system_roots;
    } else if args.system_roots {
        config.use_system_roots = true;
    }

    let request = build_request(&config, &args)?;
    let mut builder = ChainBuilder::from_configuration(&config)
        .into_diagnostic()
        .wrap_err("Failed to prepare chain builder")?
        .with_telemetry(Arc::new(LogTelemetrySink));
    if let Some(at) = args.at {
        builder = builder.at_time(at);
    }

    let findings = CollectingFindingSink::new();
    let result = builder.build_chain_once(&request, &findings);

    for finding in findings.findings() {
        eprintln!("{finding}");
    }
    let chain = result.into_diagnostic().wrap_err("Certificate chain validation failed")?;

    let has_key = request.private_key().into_diagnostic()?.is_some();
    println!(
        "Chain valid for {} signature ({}), signature hash {}, timestamp hash {}, private key: {}",
        request.signature_type(),
        request.signature_placement(),
        request.signature_hash_algorithm(),
        request.timestamp_hash_algorithm(),
        if has_key { "yes" } else { "no" }
    );
    for (depth, identity) in chain.identities().iter().enumerate() {
        println!("  [{depth}] {}", identity.subject);
        println!("      issuer:      {}", identity.issuer);
        println!("      serial:      {}", identity.serial_number);
        println!("      fingerprint: {}", identity.fingerprint);
    }

    let warnings = findings.count_at_least(Severity::Warning);
    if warnings > 0 {
        println!("{warnings} warning(s) reported while building the chain");
    }
    Ok(())
}

fn build_request(config: &SigningConfiguration, args: &ChainArgs) -> Result<SigningRequest> {
    let data = std::fs::read(&args.cert)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read {}", args.cert.display()))?;
    let mut certificate = if data.starts_with(b"-----BEGIN") {
        SigningCertificate::from_pem(&data)
    } else {
        SigningCertificate::from_der(&data)
    }
    .into_diagnostic()?;

    if let Some(key_path) = &args.key {
        let pem = std::fs::read(key_path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", key_path.display()))?;
        let key = PKey::private_key_from_pem(&pem)
            .into_diagnostic()
            .wrap_err("Failed to parse private key")?;
        certificate = certificate.with_private_key(key);
    }

    let mut builder = RequestBuilder::default()
        .certificate(certificate)
        .signature_hash_algorithm_name(
            args.signature_hash
                .as_deref()
                .unwrap_or(config.signature_hash_algorithm.as_str()),
        )
        .timestamp_hash_algorithm_name(
            args.timestamp_hash
                .as_deref()
                .unwrap_or(config.timestamp_hash_algorithm.as_str()),
        );
    builder = match &args.placement {
        Some(name) => builder.signature_placement_name(name),
        None => builder.signature_placement(config.default_placement),
    };
    if let SignatureTypeArg::Repository = args.signature_type {
        let url = args.service_index.as_deref().ok_or_else(|| {
            miette::miette!("--service-index is required for repository signatures")
        })?;
        builder = builder.repository_url(url, args.owners.clone());
    }

    let mut request = builder.build().into_diagnostic()?;
    for path in &args.extra {
        let certificates = load_certificates(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to load {}", path.display()))?;
        request.extend_additional_certificates(certificates);
    }
    Ok(request)
}

fn handle_config_command(config_manager: &ConfigManager, config_cmd: ConfigCommands) -> Result<()> {
    match config_cmd {
        ConfigCommands::Show => {
            let config = config_manager.load_or_default().into_diagnostic()?;
            println!("Configuration file: {}", config_manager.config_path().display());
            println!(
                "{}",
                toml::to_string_pretty(&config).into_diagnostic()?
            );
        }

        ConfigCommands::Init => {
            config_manager.load_or_create_default().into_diagnostic()?;
            println!(
                "Configuration initialized at: {}",
                config_manager.config_path().display()
            );
        }

        ConfigCommands::Set { key, value } => {
            config_manager
                .update_value(&key, &value)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to set {key}"))?;
            println!("Set {key} = {value}");
        }

        ConfigCommands::Export { format, output } => {
            let content = config_manager
                .export_config(format.into())
                .into_diagnostic()?;

            if let Some(output_path) = output {
                std::fs::write(&output_path, content).into_diagnostic()?;
                println!("Configuration exported to: {}", output_path.display());
            } else {
                println!("{content}");
            }
        }

        ConfigCommands::Import { file, format } => {
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            config_manager
                .import_config(&content, format.into())
                .into_diagnostic()?;
            println!("Configuration imported from: {}", file.display());
        }
    }

    Ok(())
}
