//! Depot operator CLI.
//!
//! # Commands
//!
//! - `depot resolve <tenant>...` - Print the namespace derived for each tenant
//! - `depot validate <name>` - Check a namespace name against the identifier rules
//! - `depot provision <tenant>...` - Create and migrate tenant namespaces
//! - `depot status <tenant>` - Show applied and pending migrations

use clap::{Parser, Subcommand};
use colored::Colorize;
use depot::config::DepotConfig;
use depot::tenancy::{TenantId, ValidationError};
use depot::{DepotError, Result, Settings, telemetry};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

/// Depot - tenant namespace operations
#[derive(Parser)]
#[command(name = "depot")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Resolve, validate and provision tenant namespaces")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON or .env)
    #[arg(short, long, global = true, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the namespace derived for each tenant
    #[command(alias = "r")]
    Resolve {
        #[arg(required = true)]
        tenants: Vec<String>,
    },

    /// Check a namespace name against the identifier rules
    Validate { name: String },

    /// Create and migrate the namespace of each tenant
    #[command(alias = "p")]
    Provision {
        #[arg(required = true)]
        tenants: Vec<String>,
    },

    /// Show applied and pending migrations for a tenant
    Status { tenant: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = match DepotConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return fail(&e.into()),
    };
    telemetry::init(&config.log);

    match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn fail(err: &DepotError) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), err);
    ExitCode::FAILURE
}

async fn run(cli: &Cli, config: &DepotConfig) -> Result<()> {
    let settings = Settings::from_config(config)?;

    match &cli.command {
        Commands::Resolve { tenants } => {
            for raw in tenants {
                let tenant = TenantId::parse(raw)?;
                let resolved = settings.rules.resolve(&tenant);
                if cli.json {
                    print_json(&json!({"tenant": tenant, "namespace": resolved.name().as_str()}))?;
                } else {
                    println!("{} {} {}", tenant, "->".dimmed(), resolved.name().to_string().green());
                }
            }
            Ok(())
        }
        Commands::Validate { name } => {
            let verdict = settings.rules.validate(name);
            if cli.json {
                print_json(&json!({
                    "valid": verdict.is_ok(),
                    "system": verdict.as_ref().is_ok_and(|n| n.is_system()),
                    "reason": verdict.as_ref().err().map(ValidationError::to_string),
                }))?;
            }
            match verdict {
                Ok(namespace) => {
                    if !cli.json {
                        let note = if namespace.is_system() { " (system namespace)" } else { "" };
                        println!("{} {}{}", "valid".green().bold(), namespace, note);
                    }
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
        Commands::Provision { tenants } => provision(cli, &settings, tenants).await,
        Commands::Status { tenant } => status(cli, &settings, tenant).await,
    }
}

#[cfg(feature = "postgres")]
async fn provision(cli: &Cli, settings: &Settings, tenants: &[String]) -> Result<()> {
    use depot::tenancy::TenantContext;

    let provisioner = provisioner(settings)?;
    for raw in tenants {
        let mut context = TenantContext::new();
        let scope = context.enter(TenantId::parse(raw)?)?;
        let resolved = settings.rules.resolve(scope.tenant());
        let report = provisioner.ensure_tenant_ready(&scope, &resolved).await?;

        if cli.json {
            print_json(&report)?;
        } else if report.applied.is_empty() {
            println!("{} {} already up to date", "ok".green().bold(), report.namespace);
        } else {
            println!(
                "{} {} applied {:?}{}",
                "ok".green().bold(),
                report.namespace,
                report.applied,
                if report.namespace_created { " (created)" } else { "" }
            );
        }
    }
    Ok(())
}

#[cfg(feature = "postgres")]
async fn status(cli: &Cli, settings: &Settings, tenant: &str) -> Result<()> {
    let provisioner = provisioner(settings)?;
    let resolved = settings.rules.resolve(&TenantId::parse(tenant)?);
    let status = provisioner.status(resolved.name()).await?;

    if cli.json {
        return print_json(&status);
    }
    let state = if status.is_ready() {
        "ready".green().bold()
    } else if status.exists {
        "pending".yellow().bold()
    } else {
        "absent".red().bold()
    };
    println!("{} {}", state, status.namespace);
    println!("  applied: {:?}", status.applied);
    println!("  pending: {:?}", status.pending);
    Ok(())
}

#[cfg(feature = "postgres")]
fn provisioner(
    settings: &Settings,
) -> Result<depot::tenancy::NamespaceProvisioner<depot::tenancy::PgNamespacePool>> {
    use depot::tenancy::{MigrationSet, NamespaceProvisioner};
    use std::sync::Arc;

    let pool = Arc::new(settings.pool()?);
    Ok(NamespaceProvisioner::new(pool, MigrationSet::embedded()?).without_cache())
}

#[cfg(not(feature = "postgres"))]
async fn provision(_cli: &Cli, _settings: &Settings, _tenants: &[String]) -> Result<()> {
    Err(DepotError::Unavailable(
        "built without the `postgres` feature".to_string(),
    ))
}

#[cfg(not(feature = "postgres"))]
async fn status(_cli: &Cli, _settings: &Settings, _tenant: &str) -> Result<()> {
    Err(DepotError::Unavailable(
        "built without the `postgres` feature".to_string(),
    ))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
