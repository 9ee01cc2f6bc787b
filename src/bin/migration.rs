use invoice_gateway::{config, db, migrator::Migrator};
use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    invoice_gateway::telemetry::init_tracing(cfg.log_level(), cfg.log_json);

    let rollback = std::env::args().nth(1).as_deref() == Some("down");

    info!("Connecting to database for migrations");
    let pool = db::establish_connection_from_app_config(&cfg).await?;

    let result = if rollback {
        info!("Rolling back latest migration");
        Migrator::down(&pool, Some(1)).await
    } else {
        info!("Applying pending migrations");
        Migrator::up(&pool, None).await
    };

    match result {
        Ok(()) => {
            info!("Migration completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
