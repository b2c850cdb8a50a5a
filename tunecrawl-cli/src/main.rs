//! TuneCrawl CLI - process roles and management commands.
//!
//! Every long-running role of the pipeline is a subcommand of this
//! binary: `dispatcher`, `fetcher`, `parser`, `indexer`, and `purger`.
//! Management commands (`init`, `seed`, `status`, `workers`) operate on
//! the shared configuration and store.

mod error;
mod runner;

use clap::{Parser, Subcommand};
use error::CliError;
use runner::CliRunner;
use tunecrawl::abc::AbcExtractor;
use tunecrawl::config::ConfigFile;
use tunecrawl::dispatcher::{Dispatcher, DispatcherConfig};
use tunecrawl::purger::{Purger, PurgerConfig};
use tunecrawl::supervisor::Supervisor;
use tunecrawl::workers::{
    FetchExecutor, HttpFetcher, IndexExecutor, ParseExecutor, WorkerConfig, WorkerRunner,
};

#[derive(Parser)]
#[command(name = "tunecrawl")]
#[command(version = tunecrawl::VERSION)]
#[command(about = "Crawl the open web for ABC music notation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the configuration file at ~/.tunecrawl/config.ini
    Init,

    /// Run the crawl pipeline dispatcher
    Dispatcher,

    /// Run a fetcher worker
    Fetcher {
        /// Worker identifier reported to the dispatcher
        #[arg(long, default_value = "1")]
        id: String,
    },

    /// Run a parser worker
    Parser {
        #[arg(long, default_value = "1")]
        id: String,
    },

    /// Run an indexer worker
    Indexer {
        #[arg(long, default_value = "1")]
        id: String,
    },

    /// Run the store maintenance purger
    Purger,

    /// Add a seed URL to the crawl queue
    Seed {
        /// Absolute http(s) URL to start crawling from
        url: String,
    },

    /// Show queue, host, and tunebook counters
    Status,

    /// Manage the refused-extension list gating queue insertion
    Extensions {
        #[command(subcommand)]
        action: ExtensionsAction,
    },

    /// Manage worker processes
    Workers {
        #[command(subcommand)]
        action: WorkersAction,
    },
}

#[derive(Subcommand)]
enum ExtensionsAction {
    /// Refuse an extension; matching URLs never enter the queue and the
    /// purger deletes ones already stored
    Refuse { extension: String },
    /// Allow a previously refused extension again
    Allow { extension: String },
    /// List refused extensions
    List,
}

#[derive(Subcommand)]
enum WorkersAction {
    /// Start a worker process
    Start {
        /// Role: fetcher, parser, indexer, or purger
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Stop a worker process
    Stop {
        #[arg(long)]
        role: String,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Stop every known worker process
    StopAll,
    /// List registered worker processes
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Init => {
            let path = ConfigFile::ensure_exists()?;
            println!("Configuration at {}", path.display());
            Ok(())
        }

        Commands::Dispatcher => {
            let runner = CliRunner::new("dispatcher")?;
            let store = runner.open_store()?;
            let config = DispatcherConfig::from(runner.config());
            let dispatcher = Dispatcher::bind(store, config).await?;
            dispatcher.run(runner.shutdown_token()).await;
            Ok(())
        }

        Commands::Fetcher { id } => {
            let runner = CliRunner::new("fetcher")?;
            let fetcher = HttpFetcher::new(
                runner.config().fetcher.timeout_seconds,
                &runner.config().fetcher.user_agent,
            )?;
            let worker = WorkerRunner::new(
                WorkerConfig {
                    dispatcher_addr: runner.dispatcher_addr(),
                    worker_id: id,
                },
                FetchExecutor::new(fetcher),
            );
            worker.run(runner.shutdown_token()).await;
            Ok(())
        }

        Commands::Parser { id } => {
            let runner = CliRunner::new("parser")?;
            let worker = WorkerRunner::new(
                WorkerConfig {
                    dispatcher_addr: runner.dispatcher_addr(),
                    worker_id: id,
                },
                ParseExecutor::new(AbcExtractor::new()),
            );
            worker.run(runner.shutdown_token()).await;
            Ok(())
        }

        Commands::Indexer { id } => {
            let runner = CliRunner::new("indexer")?;
            let worker = WorkerRunner::new(
                WorkerConfig {
                    dispatcher_addr: runner.dispatcher_addr(),
                    worker_id: id,
                },
                IndexExecutor::new(),
            );
            worker.run(runner.shutdown_token()).await;
            Ok(())
        }

        Commands::Purger => {
            let runner = CliRunner::new("purger")?;
            let store = runner.open_store()?;
            let purger = Purger::new(store, PurgerConfig::from(runner.config()));
            purger.run(runner.shutdown_token()).await;
            Ok(())
        }

        Commands::Seed { url } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(CliError::Usage(format!(
                    "Seed URLs must be absolute http(s) URLs, got '{url}'"
                )));
            }
            let config = ConfigFile::load()?;
            let store = tunecrawl::store::Store::open(&config.store.path)?;
            if store.insert_url(&url, 0, chrono::Utc::now())? {
                println!("Seeded {url}");
            } else {
                println!("Already known: {url}");
            }
            Ok(())
        }

        Commands::Status => {
            let config = ConfigFile::load()?;
            let store = tunecrawl::store::Store::open(&config.store.path)?;

            println!("URLs by status:");
            for (status, count) in store.url_status_counts()? {
                println!("  {status:<12} {count}");
            }

            let (hosts, disabled, downloads) = store.host_stats()?;
            println!("Hosts: {hosts} known, {disabled} disabled, {downloads} downloads");

            let (books, indexed, tunes) = store.tunebook_stats()?;
            println!("Tunebooks: {books} total, {indexed} indexed; {tunes} tunes");
            Ok(())
        }

        Commands::Extensions { action } => {
            let config = ConfigFile::load()?;
            let store = tunecrawl::store::Store::open(&config.store.path)?;

            match action {
                ExtensionsAction::Refuse { extension } => {
                    if store.refuse_extension(&extension)? {
                        println!("Refused .{}", extension.trim_start_matches('.'));
                    } else {
                        println!("Already refused or empty: {extension}");
                    }
                }
                ExtensionsAction::Allow { extension } => {
                    if store.allow_extension(&extension)? {
                        println!("Allowed .{}", extension.trim_start_matches('.'));
                    } else {
                        println!("Not on the refusal list: {extension}");
                    }
                }
                ExtensionsAction::List => {
                    let listed = store.refused_extensions()?;
                    if listed.is_empty() {
                        println!("No refused extensions");
                    }
                    for extension in listed {
                        println!(".{extension}");
                    }
                }
            }
            Ok(())
        }

        Commands::Workers { action } => {
            let config = ConfigFile::load()?;
            let store = tunecrawl::store::Store::open(&config.store.path)?;
            let mut supervisor = Supervisor::new(store)?;

            match action {
                WorkersAction::Start { role, id } => {
                    let pid = supervisor.start(&role, &id)?;
                    println!("Started {role} {id} (pid {pid})");
                }
                WorkersAction::Stop { role, id } => {
                    if supervisor.stop(&role, &id)? {
                        println!("Stopped {role} {id}");
                    } else {
                        println!("No such worker: {role} {id}");
                    }
                }
                WorkersAction::StopAll => {
                    let stopped = supervisor.stop_all()?;
                    println!("Stopped {stopped} workers");
                }
                WorkersAction::List => {
                    let listed = supervisor.list()?;
                    if listed.is_empty() {
                        println!("No workers registered");
                    }
                    for process in listed {
                        println!(
                            "{:<8} {:<4} pid {:<8} {} since {}",
                            process.role,
                            process.worker_id,
                            process.pid,
                            process.status,
                            process.started_at
                        );
                    }
                }
            }
            Ok(())
        }
    }
}
