use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use compute::ComputeClient;
use db::InstanceRepository;
use github::GitHubClient;
use orchestrator::{ProvisioningContext, SshTransport};
use server::config::ServiceConfig;
use server::identity::StaticIdentities;
use server::{create_router, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "provisiond")]
#[command(about = "Provision cloud instances and run scripts on them", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Overrides `server.listen`
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Write a config file with default values
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(ServiceConfig::default_path);

    match cli.command {
        Some(Commands::InitConfig { force }) => init_config(&config_path, force),
        Some(Commands::Serve { listen }) => serve(&config_path, listen).await,
        None => serve(&config_path, None).await,
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Pass --force to overwrite it.");
        return Ok(());
    }

    ServiceConfig::default()
        .write(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// Public half of the service key, handed to instances at creation.
fn read_login_public_key(private_key: &Path) -> Option<String> {
    let mut public_key = private_key.as_os_str().to_owned();
    public_key.push(".pub");
    let public_key = PathBuf::from(public_key);
    match std::fs::read_to_string(&public_key) {
        Ok(content) => Some(content.trim().to_string()).filter(|k| !k.is_empty()),
        Err(e) => {
            tracing::warn!(
                path = %public_key.display(),
                error = %e,
                "No public key next to the SSH private key, instances get no login key"
            );
            None
        }
    }
}

async fn serve(config_path: &Path, listen: Option<String>) -> Result<()> {
    init_tracing();

    let config = ServiceConfig::load(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::info!("Config: {}", config_path.display());

    let pool = db::connect(&config.database.url)
        .await
        .context("Failed to open instance database")?;
    tracing::info!("Database: {}", config.database.url);

    let compute = ComputeClient::from_env(&config.compute.token_env, config.compute.base_url.clone())
        .context("Failed to configure compute client")?;
    let source_control = GitHubClient::from_env(
        &config.github.token_env,
        config.github.api_url.as_deref(),
    )
    .context("Failed to configure GitHub client")?;

    let mut transport = SshTransport::new()
        .with_known_hosts(config.ssh.known_hosts.clone())
        .with_extra_args(config.ssh.extra_args.clone());
    let mut orchestrator_config = config.orchestrator_config();
    transport = transport.with_connect_timeout(orchestrator_config.probes.connect_timeout);
    if let Some(ref key) = config.ssh.private_key {
        transport = transport.with_private_key(key.clone());
        if let Some(public_key) = read_login_public_key(key) {
            orchestrator_config = orchestrator_config.with_login_public_key(public_key);
        }
    }

    let ctx = ProvisioningContext::new(
        Arc::new(compute),
        Arc::new(InstanceRepository::new(pool)),
        Arc::new(source_control),
        Arc::new(StaticIdentities::new(config.identities.clone())),
        Arc::new(transport),
        orchestrator_config,
    );

    let state = AppState::new(ctx);
    state.spawn_tracker_sweeper(config.tracker_retention());
    let app = create_router(state);

    let addr = listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    println!();
    println!("provisiond");
    println!("════════════════════════════════════════");
    println!();
    println!("  API Server:  http://{}", addr);
    println!("  Swagger UI:  http://{}/swagger-ui", addr);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "provisiond=info,server=info,orchestrator=info,events=info,tower_http=info".into()
            }),
        )
        .init();
}
