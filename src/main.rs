use std::sync::Arc;

use clap::{Parser, Subcommand};
use tenant_alertmanager::{
    cmd::{ValidateArgs, validate},
    config::AppConfig,
    persistence::SqliteStateRepository,
    supervisor::Supervisor,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding `app.yaml`.
    #[arg(long, env = "TENANT_AM_CONFIG_DIR", global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the Alertmanager of every configured org.
    Run,
    /// Loads and checks a configuration document without applying it.
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber =
        FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env()).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_supervisor(cli.config_dir.as_deref()).await?,
        Commands::Validate(args) => validate::execute(args).await?,
    }

    Ok(())
}

async fn run_supervisor(config_dir: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!("Loading application configuration...");
    let config = AppConfig::new(config_dir)?;
    tracing::debug!(
        database_url = %config.database_url,
        data_path = %config.data_path.display(),
        org_ids = ?config.org_ids,
        "Configuration loaded."
    );

    tracing::debug!("Initializing state repository...");
    let repo = Arc::new(SqliteStateRepository::new(&config.database_url).await?);
    repo.run_migrations().await?;
    tracing::info!("Database migrations completed.");

    let supervisor = Supervisor::builder()
        .config(config)
        .alerting_store(repo.clone())
        .key_value_store(repo.clone())
        .image_store(repo.clone())
        .build()?;

    tracing::info!("Supervisor initialized, starting Alertmanagers...");
    supervisor.run().await?;

    repo.close().await;
    Ok(())
}
