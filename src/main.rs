use clap::{Parser, Subcommand};
use configuration::{PoolStrategy, Settings};
use database::{ConnectionDescriptor, MigrationStatus, Pool, PoolOptions, SessionManager};

/// The main entry point for the Resume Agent backend.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (settings, env_file) = configuration::load_settings()?;
    web_server::init_tracing(settings.app.debug);
    env_file.log();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => web_server::run_server(settings).await,
        Commands::MigrationStatus => handle_migration_status(&settings).await,
        Commands::DbUrl(args) => {
            handle_db_url(&settings, args);
            Ok(())
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Backend service for the Resume Agent API.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Defaults to `serve`.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server until Ctrl-C or SIGTERM.
    Serve,
    /// Print the newest applied schema migration.
    MigrationStatus,
    /// Print the connection URL the service resolves from its settings.
    DbUrl(DbUrlArgs),
}

#[derive(Parser)]
struct DbUrlArgs {
    /// Print the password instead of masking it (e.g. to feed `sqlx migrate`).
    #[arg(long)]
    reveal: bool,
}

// ==============================================================================
// Command Logic
// ==============================================================================

/// One-shot commands do not keep connections around, so they use the
/// null strategy regardless of `DATABASE_POOL`.
async fn handle_migration_status(settings: &Settings) -> anyhow::Result<()> {
    let options = PoolOptions {
        strategy: PoolStrategy::Null,
        ..PoolOptions::from_settings(&settings.database)
    };
    let pool = Pool::for_descriptor(
        ConnectionDescriptor::from_settings(&settings.database),
        settings.database.echo,
        options,
    )?;

    let status = database::migration_status(&SessionManager::new(pool.clone())).await;
    pool.dispose().await;

    println!("{status}");
    if let MigrationStatus::Unavailable(reason) = status {
        anyhow::bail!("could not read migration status: {reason}");
    }
    Ok(())
}

fn handle_db_url(settings: &Settings, args: DbUrlArgs) {
    let descriptor = ConnectionDescriptor::from_settings(&settings.database);
    if args.reveal {
        println!("{}", descriptor.url());
    } else {
        println!("{}", descriptor.redacted_url());
    }
}
