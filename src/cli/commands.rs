use std::sync::Arc;

use chrono::Local;

use crate::app::context::{format_duration, format_size};
use crate::app::{AppContext, PortalError, Result};
use crate::domain::{ContentItem, ContentKind};
use crate::indexer::RunOutcome;
use crate::watch::{WatchConfig, Watcher};

pub async fn login(ctx: &AppContext) -> Result<()> {
    ctx.session.login().await?;

    let path = ctx.session.base_path().unwrap_or_default();
    println!("Connected to {} (path: /{})", ctx.session.base_url(), path);
    if let Some(expires) = ctx.session.subscription_expires() {
        println!("Subscription expires: {}", expires);
    }
    Ok(())
}

pub async fn list_categories(ctx: &AppContext, live: bool) -> Result<()> {
    let kind = if live { ContentKind::Live } else { ContentKind::Vod };
    let categories = ctx.catalog.categories(kind).await?;

    if categories.is_empty() {
        println!("No categories");
        return Ok(());
    }

    for category in categories {
        println!("{:>6}  {}", category.id, category.title);
    }
    Ok(())
}

pub async fn browse(ctx: &AppContext, category: &str, limit: usize) -> Result<()> {
    let items = ctx.hybrid.items(category).await?;

    if items.is_empty() {
        println!("No items in category {}", category);
        return Ok(());
    }

    for item in items.iter().take(limit) {
        print_row(item);
    }
    if items.len() > limit {
        println!("... {} more", items.len() - limit);
    }
    Ok(())
}

pub async fn index(ctx: &AppContext, force: bool) -> Result<()> {
    let targets = ctx.indexer.target_categories();
    println!("Indexing {} categories...", targets.len());

    match ctx.indexer.run(force).await? {
        RunOutcome::Fresh => println!("Index is fresh, nothing to do (use --force to reindex)"),
        RunOutcome::AlreadyRunning => println!("An index run is already in progress"),
        RunOutcome::Completed(report) => {
            println!(
                "Indexed {} items from {} pages in {}",
                report.items,
                report.pages,
                format_duration(report.duration)
            );
            if !report.persisted {
                eprintln!("Warning: snapshot could not be written; the next run will start over");
            }
        }
    }
    Ok(())
}

pub async fn search(ctx: &AppContext, query: &str) -> Result<()> {
    let results = ctx.hybrid.search(query).await;

    if results.is_empty() {
        println!("No results for \"{}\"", query);
        return Ok(());
    }

    for item in &results {
        print_row(item);
    }
    println!("{} results", results.len());
    Ok(())
}

pub async fn info(ctx: &AppContext, movie_id: &str, list_episodes: bool) -> Result<()> {
    let item = ctx
        .catalog
        .vod_info(movie_id)
        .await?
        .or_else(|| ctx.cache.get(movie_id))
        .ok_or_else(|| PortalError::Other(format!("No such item: {}", movie_id)))?;

    println!("{}", item.display_name());
    let fields = [
        ("Year", &item.year),
        ("Rating", &item.rating),
        ("Genres", &item.genres),
        ("Director", &item.director),
        ("Actors", &item.actors),
        ("Added", &item.added_date),
        ("Command", &item.stream_command),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("  {:<9} {}", format!("{}:", label), value);
        }
    }
    if let Some(minutes) = item.duration {
        println!("  {:<9} {} min", "Duration:", minutes);
    }
    match ctx.poster(&item).await {
        Ok(Some(poster)) => println!("  {:<9} {}x{}", "Poster:", poster.width, poster.height),
        Ok(None) => {}
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => eprintln!("Warning: poster unavailable: {}", e),
    }
    let description = item.sanitized_description();
    if !description.is_empty() {
        println!("\n{}", description);
    }

    if item.is_series {
        let seasons = ctx.catalog.seasons(&item.id).await?;
        println!("\n{} seasons", seasons.len());
        for season in seasons {
            let episodes = ctx.catalog.episodes(&item.id, &season.id).await?;
            println!("  {} ({} episodes)", season.name, episodes.len());
            if !list_episodes {
                continue;
            }
            for episode in episodes {
                let files = ctx
                    .catalog
                    .episode_files(&item.id, &season.id, &episode.id)
                    .await?;
                println!("    {}", episode.display_name());
                for file in files {
                    let command = file.stream_command.as_deref().unwrap_or("-");
                    println!("      {:>8}  {}  {}", file.id, file.display_name(), command);
                }
            }
        }
    }
    Ok(())
}

pub async fn link(ctx: &AppContext, cmd: &str, live: bool) -> Result<()> {
    let kind = if live { ContentKind::Live } else { ContentKind::Vod };
    let url = ctx.catalog.create_link(kind, cmd).await?;
    println!("{}", url);
    Ok(())
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let status = ctx.status();

    println!("Items cached:   {}", status.items);
    println!(
        "Snapshot:       {}",
        status
            .snapshot_bytes
            .map(format_size)
            .unwrap_or_else(|| "none".to_string())
    );
    match status.last_index {
        Some(at) => println!(
            "Last index:     {}{}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            status
                .last_duration
                .map(|d| format!(" (took {})", format_duration(d)))
                .unwrap_or_default()
        ),
        None => println!("Last index:     never"),
    }
    println!(
        "Last run:       {}",
        if status.completed_successfully { "complete" } else { "incomplete" }
    );
    println!("Indexer:        {}", status.indexer);
    println!("Connection:     {}", status.connection);

    if !status.categories.is_empty() {
        println!("\nPer category:");
        for (category, count) in &status.categories {
            println!("  {:>6}  {}", category, count);
        }
    }
    Ok(())
}

pub fn clear_cache(ctx: &AppContext) -> Result<()> {
    ctx.clear_cache()?;
    println!("Cache cleared");
    Ok(())
}

pub async fn watch(ctx: Arc<AppContext>, interval: &str, no_initial_sync: bool) -> Result<()> {
    let interval_secs = WatchConfig::parse_interval(interval).map_err(PortalError::Config)?;
    let watcher = Watcher::new(
        ctx,
        WatchConfig {
            interval_secs,
            sync_on_start: !no_initial_sync,
        },
    );
    watcher.run().await
}

fn print_row(item: &ContentItem) {
    let year = item
        .year
        .as_deref()
        .map(|y| format!(" ({})", y))
        .unwrap_or_default();
    let marker = if item.is_series { " [series]" } else { "" };
    println!("{:>10}  {}{}{}", item.id, item.name, year, marker);
}
