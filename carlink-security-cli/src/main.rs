//! Developer CLI for the carlink security module.
//!
//! Runs the module in-process to answer head unit challenges, export the
//! default certificate of an application and decode key bundle tokens.

use std::fs;
use std::path::{Path, PathBuf};

use carlink_security_core::{decode_bundle_passphrase, Certificate, ModuleConfig, SecurityModule};
use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr as _};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "carlink-security", version, about = "Carlink security module CLI")]
struct Cli {
    /// Vehicle brand (bmw, mini or test).
    #[arg(long, global = true, env = "CARLINK_BRAND", default_value = "bmw")]
    brand: String,

    /// JSON module configuration, e.g. `{"max_contexts": 16}`.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Application {
    /// Package name of the application.
    #[arg(long = "package")]
    package_name: String,

    /// Application name announced to the car.
    #[arg(long = "app")]
    application_name: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign a challenge and print the response as uppercase hex.
    Sign {
        #[command(flatten)]
        application: Application,

        /// Certificate to load instead of the brand default (DER or PEM).
        #[arg(long, value_name = "FILE")]
        cert: Option<PathBuf>,

        /// Challenge bytes in hex. May be empty.
        #[arg(long, default_value = "")]
        challenge: String,
    },
    /// Print the default certificate of an application.
    Certificate {
        #[command(flatten)]
        application: Application,

        /// Print PEM instead of hex.
        #[arg(long)]
        pem: bool,
    },
    /// Decode a key bundle token into its passphrase.
    Passphrase {
        /// Base64 token shipped with the bundle.
        #[arg(long)]
        token: String,

        /// Package name the bundle was issued for.
        #[arg(long = "package")]
        package_name: String,
    },
}

fn init_tracing(verbose: u8) -> Result<()> {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("failed to install tracing subscriber")?;
    tracing_log::LogTracer::init().wrap_err("failed to forward module logs")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ModuleConfig> {
    let Some(path) = path else {
        return Ok(ModuleConfig::default());
    };
    let json = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    Ok(ModuleConfig::from_json(&json)?)
}

/// Creates a context for `application`, runs `f` with it and tears the
/// module down again.
fn with_context<T>(
    cli: &Cli,
    application: &Application,
    f: impl FnOnce(&SecurityModule, u32) -> Result<T>,
) -> Result<T> {
    let module = SecurityModule::with_config(load_config(cli.config.as_deref())?)?;
    module.init(&cli.brand)?;
    let handle =
        module.create_context(&application.package_name, &application.application_name)?;
    tracing::debug!(handle, brand = %cli.brand, "context ready");

    let result = f(&module, handle);
    module.release_context(handle)?;
    module.deinit();
    result
}

fn run(cli: &Cli) -> Result<String> {
    match &cli.command {
        Command::Sign {
            application,
            cert,
            challenge,
        } => {
            let challenge = hex::decode(challenge.trim()).wrap_err("challenge is not hex")?;
            let certificate = cert
                .as_deref()
                .map(|path| {
                    fs::read(path)
                        .wrap_err_with(|| format!("failed to read certificate {}", path.display()))
                })
                .transpose()?;
            with_context(cli, application, |module, handle| {
                if let Some(certificate) = &certificate {
                    module.load_certificate(handle, certificate)?;
                }
                let response = module.sign(handle, &challenge)?;
                Ok(hex::encode_upper(response))
            })
        }
        Command::Certificate { application, pem } => {
            let bytes = with_context(cli, application, |module, handle| {
                Ok(module.retrieve_certificate(handle)?)
            })?;
            if *pem {
                Ok(Certificate::parse(bytes)?.to_pem().trim_end().to_string())
            } else {
                Ok(hex::encode(bytes))
            }
        }
        Command::Passphrase {
            token,
            package_name,
        } => Ok(decode_bundle_passphrase(token.clone(), package_name.clone())?),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let output = run(&cli)?;
    println!("{output}");
    Ok(())
}
