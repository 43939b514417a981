use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use portalsync::app::AppContext;
use portalsync::cli::{commands, Cli, Commands};
use portalsync::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = Arc::new(AppContext::open(config)?);

    let result = match cli.command {
        Commands::Login => commands::login(&ctx).await,
        Commands::Categories { live } => commands::list_categories(&ctx, live).await,
        Commands::Browse { category, limit } => commands::browse(&ctx, &category, limit).await,
        Commands::Index { force } => commands::index(&ctx, force).await,
        Commands::Search { query } => commands::search(&ctx, &query).await,
        Commands::Info { movie_id, episodes } => commands::info(&ctx, &movie_id, episodes).await,
        Commands::Link { cmd, live } => commands::link(&ctx, &cmd, live).await,
        Commands::Status => commands::status(&ctx),
        Commands::ClearCache => commands::clear_cache(&ctx),
        Commands::Watch {
            interval,
            no_initial_sync,
        } => commands::watch(ctx.clone(), &interval, no_initial_sync).await,
    };

    ctx.shutdown().await;
    result?;
    Ok(())
}
