use clap::{Parser, Subcommand};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use shipment_tracking::{config, db, migrator::Migrator};

#[derive(Parser)]
#[command(name = "migration", about = "Manage the shipment tracking schema")]
struct Cli {
    /// Database URL; defaults to the configured `database_url`
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Up,
    /// Roll back the last `steps` migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// Print applied and pending migrations
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }

    info!("Connecting to database");
    let pool = db::establish_connection_from_app_config(&cfg).await?;

    match cli.command.unwrap_or(Command::Up) {
        Command::Up => {
            Migrator::up(&pool, None).await?;
            info!("Migration completed successfully");
        }
        Command::Down { steps } => {
            Migrator::down(&pool, Some(steps)).await?;
            info!(steps, "Rollback completed successfully");
        }
        Command::Status => Migrator::status(&pool).await?,
    }

    Ok(())
}
