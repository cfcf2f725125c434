use anyhow::anyhow;

mod archive;
mod config;
mod db;
mod error;
mod models;
mod sync;

use archive::ArchiveFetcher;
use config::Config;
use db::EntryStore;
use error::Result;
use sync::{cleanup, CleanupOptions, SyncService};

#[tokio::main]
async fn main() {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;
    let store = EntryStore::open(&config.db_path).await?;
    let fetcher = ArchiveFetcher::from_config(&config)?;
    let service = SyncService::new(store, fetcher, config.epoch()?);

    match args.get(1).map(String::as_str) {
        Some("--refresh") => {
            let outcome = service.refresh().await?;
            if args.iter().any(|a| a == "--json") {
                println!("{}", serde_json::to_string_pretty(&outcome.created)?);
            } else {
                println!("Fetched {} new entries", outcome.created.len());
            }
        }

        Some("--load-older") => {
            let outcome = service.load_older().await?;
            if service.can_load_more() {
                println!("Loaded {} older entries", outcome.created.len());
            } else {
                println!("Reached the start of the archive");
            }
        }

        Some("--search") => {
            let query = args
                .get(2)
                .ok_or_else(|| anyhow!("--search requires a query"))?;
            let hits = service.search(query).await?;
            for entry in &hits {
                println!("{}  {}", entry.day, entry.teaser);
            }
            println!("{} matching entries", hits.len());
        }

        Some("--preview") => {
            let id = args
                .get(2)
                .and_then(|s| i64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                .ok_or_else(|| anyhow!("--preview requires a hex entry id"))?;
            match service.preview(id).await? {
                Some(entry) => {
                    let base = url::Url::parse(&config.archive_url)
                        .map_err(error::FetchError::UrlConstruction)?;
                    println!("{}  {}", entry.day, entry.teaser);
                    println!("{}", entry.permalink(&base));
                }
                None => println!("No entry found for {:x}", id),
            }
        }

        Some("--read") => {
            let entry = lookup(&service, args.get(2)).await?;
            service.toggle_read(&entry).await?;
            println!(
                "{:x} marked {}",
                entry.entry_id,
                if entry.is_read() { "unread" } else { "read" }
            );
        }

        Some("--bookmark") => {
            let entry = lookup(&service, args.get(2)).await?;
            service.toggle_bookmark(&entry).await?;
            println!(
                "{:x} {}",
                entry.entry_id,
                if entry.is_bookmarked() {
                    "unbookmarked"
                } else {
                    "bookmarked"
                }
            );
        }

        Some("--cleanup") => {
            let opts = CleanupOptions {
                delete_old: args.iter().any(|a| a == "--drop-old"),
                keep_bookmarks: true,
                keep_months: config.keep_months,
            };
            let removed = cleanup(service.store(), &opts).await?;
            println!("Removed {} entries", removed);
        }

        Some(other) => {
            eprintln!("Unknown option: {}", other);
            print_usage();
        }

        None => {
            for entry in service.store().recent(20).await? {
                let marker = if entry.is_read() { ' ' } else { '*' };
                println!("{} {}  [{:x}]  {}", marker, entry.day, entry.entry_id, entry.teaser);
            }
        }
    }

    Ok(())
}

async fn lookup(
    service: &SyncService<ArchiveFetcher>,
    arg: Option<&String>,
) -> Result<models::Entry> {
    let id = arg
        .and_then(|s| i64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .ok_or_else(|| anyhow!("expected a hex entry id"))?;
    service
        .store()
        .get_by_id(id, false)
        .await?
        .ok_or_else(|| anyhow!("no stored entry with id {:x}", id).into())
}

fn print_usage() {
    eprintln!(
        "Usage: backscroll [--refresh [--json] | --load-older | --search <query> | \
         --preview <hex-id> | --read <hex-id> | --bookmark <hex-id> | --cleanup [--drop-old]]"
    );
}
