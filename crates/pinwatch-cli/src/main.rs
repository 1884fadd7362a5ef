use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use pinwatch_core::AdStage;
use pinwatch_match::load_opdb_catalog;
use pinwatch_pipeline::{
    crawler_from_config, matcher_from_config, maybe_build_scheduler, store_from_config,
    PipelineConfig,
};
use pinwatch_storage::{AdRepository, ProductCatalog};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pinwatch")]
#[command(about = "Pinball marketplace watcher")]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Discover new ad links from the configured search queries
    Crawl,
    /// Fetch content for discovered ads
    Scrape {
        /// Maximum ads to process this run
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Extract structured fields and resolve catalog products
    Identify {
        /// Maximum ads to process this run
        #[arg(short, long)]
        limit: Option<i64>,
    },
    /// Run crawl, scrape and identify back to back
    Run {
        /// Keep running on the configured cron schedule
        #[arg(long)]
        schedule: bool,
    },
    /// Apply database migrations
    Migrate,
    /// Inspect recorded ads
    Ads {
        #[command(subcommand)]
        command: AdsCommands,
    },
    /// Manage the product catalog and its vector index
    Products {
        #[command(subcommand)]
        command: ProductsCommands,
    },
}

#[derive(Debug, Subcommand)]
enum AdsCommands {
    /// List recorded ads, newest first
    List {
        /// Filter by stage (new, scraped, identified, ignored)
        #[arg(long)]
        stage: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum ProductsCommands {
    /// Load the machine export into the catalog
    Populate {
        #[arg(long, default_value = "data/opdb.json")]
        file: PathBuf,
        /// Reload even if the catalog is already populated
        #[arg(short, long)]
        force: bool,
    },
    /// Embed catalog products into the vector index
    Index {
        /// Only index the first N products
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List catalog products
    List {
        #[arg(short, long)]
        query: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        // The run finished but some ads failed; cron monitors key off this.
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<bool> {
    let config = PipelineConfig::from_env()?;

    match command {
        Commands::Crawl => {
            let crawler = crawler_from_config(&config).await?;
            let summary = crawler.crawl().await?;
            println!(
                "crawl complete: discovered={} skipped={} failed_queries={}/{} credits={}",
                summary.discovered, summary.skipped, summary.failed_queries, summary.queries,
                summary.credits_used
            );
            Ok(summary.is_clean())
        }
        Commands::Scrape { limit } => {
            let crawler = crawler_from_config(&config).await?;
            let summary = crawler.scrape(limit).await?;
            println!(
                "scrape complete: scraped={} failed={} abandoned={} credits={}",
                summary.scraped, summary.failed, summary.abandoned, summary.credits_used
            );
            Ok(summary.is_clean())
        }
        Commands::Identify { limit } => {
            let crawler = crawler_from_config(&config).await?;
            let summary = crawler.identify(limit).await?;
            println!(
                "identify complete: identified={} ignored={} failed={}",
                summary.identified, summary.ignored, summary.failed
            );
            Ok(summary.is_clean())
        }
        Commands::Run { schedule } => {
            let crawler = Arc::new(crawler_from_config(&config).await?);
            let summary = crawler.run_once().await?;
            println!(
                "run complete: run_id={} discovered={} scraped={} identified={} ignored={}",
                summary.run_id,
                summary.crawl.discovered,
                summary.scrape.scraped,
                summary.identify.identified,
                summary.identify.ignored
            );

            if schedule {
                let Some(mut scheduler) = maybe_build_scheduler(&config, crawler).await? else {
                    bail!("scheduler requested but PINWATCH_SCHEDULER_ENABLED is off");
                };
                scheduler.start().await.context("starting scheduler")?;
                println!("scheduler running (cron: {}), ctrl-c to stop", config.cron);
                tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                scheduler.shutdown().await.context("stopping scheduler")?;
            }
            Ok(summary.is_clean())
        }
        Commands::Migrate => {
            let pool = pinwatch_storage::connect(&config.database_url).await?;
            pinwatch_storage::migrate(&pool).await?;
            println!("migrations applied");
            Ok(true)
        }
        Commands::Ads { command } => match command {
            AdsCommands::List { stage, limit } => {
                let stage = match stage.as_deref() {
                    Some(text) => Some(
                        AdStage::parse(text)
                            .with_context(|| format!("unknown stage '{text}'"))?,
                    ),
                    None => None,
                };
                let (repo, _catalog) = store_from_config(&config).await?;
                let ads = repo.list(stage, limit).await?;
                if ads.is_empty() {
                    println!("no ads found");
                    return Ok(true);
                }
                for ad in ads {
                    let mut line = format!("{} [{}]", ad.url, ad.stage.as_str());
                    if let Some(product) = &ad.product {
                        line.push_str(&format!(" {product}"));
                        if let Some(manufacturer) = &ad.manufacturer {
                            line.push_str(&format!("/{manufacturer}"));
                        }
                        if let Some(year) = ad.year {
                            line.push_str(&format!("/{year}"));
                        }
                    }
                    if let Some(amount) = ad.amount {
                        line.push_str(&format!(
                            " {amount}{}",
                            ad.currency.as_deref().unwrap_or("")
                        ));
                    }
                    if let Some(city) = &ad.city {
                        line.push_str(&format!(" {city}"));
                    }
                    println!("{line}");
                }
                Ok(true)
            }
        },
        Commands::Products { command } => match command {
            ProductsCommands::Populate { file, force } => {
                let (_repo, catalog) = store_from_config(&config).await?;
                let existing = catalog.count().await?;
                if existing > 0 && !force {
                    bail!("catalog already contains {existing} products, use --force to reload");
                }
                let products = load_opdb_catalog(&file)?;
                let written = catalog.upsert_all(&products).await?;
                println!("catalog populated: {written} products from {}", file.display());
                Ok(true)
            }
            ProductsCommands::Index { limit } => {
                let (_repo, catalog) = store_from_config(&config).await?;
                let matcher = matcher_from_config(&config)?;
                let mut products = catalog.list_all().await?;
                if let Some(limit) = limit {
                    products.truncate(limit);
                }
                let summary = matcher.index_catalog(&products).await?;
                println!(
                    "index complete: indexed={} skipped={}",
                    summary.indexed, summary.skipped
                );
                Ok(true)
            }
            ProductsCommands::List {
                query,
                offset,
                limit,
            } => {
                let (_repo, catalog) = store_from_config(&config).await?;
                let products = catalog.search(query.as_deref(), offset, limit).await?;
                let total = catalog.count().await?;
                for product in &products {
                    let manufacturer = product.manufacturer.as_deref().unwrap_or("unknown");
                    let year = product
                        .year
                        .map(|y| y.to_string())
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "{} {} ({manufacturer}, {year})",
                        product.opdb_id, product.name
                    );
                }
                println!("{} of {total} products", products.len());
                Ok(true)
            }
        },
    }
}
