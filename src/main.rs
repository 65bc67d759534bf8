use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sitecache::cache::{Cache, CacheStorage, SqliteStorage};
use sitecache::config::Config;
use sitecache::fetch::{HttpFetcher, Request};
use sitecache::worker::{CacheController, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "sitecache")]
#[command(about = "Offline cache manager for static multi-page sites")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./sitecache.yaml or $XDG_CONFIG_HOME/sitecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Site origin, e.g. https://example.org/
  #[arg(short, long, global = true)]
  origin: Option<String>,

  /// Cache database path
  #[arg(short, long, global = true)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset list, then activate the current generation
  Install,
  /// Serve paths cache-first, revalidating hits in the background
  Fetch {
    #[arg(required = true)]
    paths: Vec<String>,
    /// Write response bodies to stdout
    #[arg(long)]
    body: bool,
  },
  /// List cache generations
  Generations,
  /// List entries of the current generation
  Entries,
  /// Remove paths from the current generation
  Evict {
    #[arg(required = true)]
    paths: Vec<String>,
  },
}

type Worker = ServiceWorker<CacheController<SqliteStorage, HttpFetcher>>;

/// Initialize the tracing subscriber. RUST_LOG controls the level.
fn init_tracing() -> WorkerGuard {
  let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer))
    .with(filter)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing();

  let args = Args::parse();

  // Load configuration, then apply command-line overrides
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = Some(origin);
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);

  match args.command {
    Command::Install => install(&config, storage).await,
    Command::Fetch { paths, body } => fetch(&config, storage, &paths, body).await,
    Command::Generations => list_generations(&storage),
    Command::Entries => list_entries(&config, &storage),
    Command::Evict { paths } => evict(&config, &storage, &paths),
  }
}

fn build_worker(config: &Config, storage: Arc<SqliteStorage>) -> Result<Worker> {
  let origin = config.origin_url()?;
  let fetcher = Arc::new(HttpFetcher::new(origin.clone(), config.request_timeout())?);
  let controller = CacheController::new(storage, fetcher, &origin, &config.manifest)?;
  Ok(ServiceWorker::new(controller))
}

async fn install(config: &Config, storage: Arc<SqliteStorage>) -> Result<()> {
  let worker = build_worker(config, storage)?;

  worker.install().await?;
  worker.activate().await?;
  worker.idle().await;

  let controller = worker.handler();
  info!(generation = controller.generation(), "Install finished");
  println!(
    "Installed {} ({} assets)",
    controller.generation(),
    controller.assets().len()
  );
  Ok(())
}

async fn fetch(
  config: &Config,
  storage: Arc<SqliteStorage>,
  paths: &[String],
  body: bool,
) -> Result<()> {
  let worker = build_worker(config, storage)?;
  let origin = config.origin_url()?;
  let mut failures = 0;

  for path in paths {
    let request = Request::for_path(&origin, path)?;
    match worker.fetch(request.clone()).await {
      Ok(result) => {
        let response = result.data;
        if body {
          std::io::stdout().write_all(&response.body)?;
        } else {
          println!(
            "{} {:<7} {} {}",
            response.status,
            result.source,
            request.url,
            response.header("content-type").unwrap_or("-")
          );
        }
      }
      Err(e) => {
        failures += 1;
        eprintln!("{}: {:#}", request.url, e);
      }
    }
  }

  // Let background revalidation finish before exiting
  worker.idle().await;

  if failures > 0 {
    return Err(eyre!("{} of {} requests failed", failures, paths.len()));
  }
  Ok(())
}

fn list_generations(storage: &SqliteStorage) -> Result<()> {
  for name in storage.keys()? {
    println!("{}", name);
  }
  Ok(())
}

fn list_entries(config: &Config, storage: &SqliteStorage) -> Result<()> {
  let generation = &config.manifest.generation;
  if !storage.has(generation)? {
    println!("Generation {} does not exist", generation);
    return Ok(());
  }

  let cache = storage.open(generation)?;
  for entry in cache.entries()? {
    println!(
      "{} {} {:>8} {} {}",
      entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
      entry.status,
      entry.size,
      entry.request.method,
      entry.request.url
    );
  }
  Ok(())
}

fn evict(config: &Config, storage: &SqliteStorage, paths: &[String]) -> Result<()> {
  let origin = config.origin_url()?;
  let cache = storage.open(&config.manifest.generation)?;

  for path in paths {
    let request = Request::for_path(&origin, path)?;
    if cache.delete(&request)? {
      println!("Evicted {}", request.url);
    } else {
      println!("Not cached: {}", request.url);
    }
  }
  Ok(())
}
