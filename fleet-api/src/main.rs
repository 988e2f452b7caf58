use anyhow::{anyhow, bail};
use fleet_api::{config::ApiConfig, startup::Application};
use fleet_config::{load_config, shared::PgConnectionConfig};
use fleet_telemetry::tracing::init_tracing;
use tracing::{error, info};

/// What the binary was asked to do.
enum Command {
    /// Serve the API. This is the default.
    Serve,
    /// Apply pending migrations to the configured database, then exit.
    Migrate,
}

impl Command {
    fn from_args(args: &[String]) -> anyhow::Result<Self> {
        match args {
            [_] => Ok(Command::Serve),
            [_, command] if command == "migrate" => Ok(Command::Migrate),
            [_, command] => bail!("invalid command: {command}"),
            _ => bail!("invalid number of command line arguments"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    let args: Vec<String> = std::env::args().collect();
    let command = Command::from_args(&args).inspect_err(|err| error!("{err}"))?;

    actix_web::rt::System::new().block_on(async move {
        let config = load_config::<ApiConfig>()?;
        match command {
            Command::Serve => serve(config).await,
            Command::Migrate => migrate(config).await,
        }
    })
}

async fn serve(config: ApiConfig) -> anyhow::Result<()> {
    if let Some(database) = &config.database {
        log_pg_connection_config(database);
    }

    let application = Application::build(config).await?;
    info!(port = application.port(), "fleet api listening");
    application.run_until_stopped().await?;

    Ok(())
}

async fn migrate(config: ApiConfig) -> anyhow::Result<()> {
    let database = config
        .database
        .ok_or_else(|| anyhow!("migrate requires a database configuration"))?;
    log_pg_connection_config(&database);

    Application::migrate_database(database).await?;
    info!("database migrated successfully");

    Ok(())
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    info!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "pg database options",
    );
}
