//! # Grant Discovery CLI (`grants`)
//!
//! Runs discovery, works the review queue, and starts the admin server.
//!
//! ## Usage
//!
//! ```bash
//! grants --config ./config/grants.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grants init` | Create the SQLite database and run schema migrations |
//! | `grants sources` | List configured sources and their health |
//! | `grants discover [SOURCES..]` | Run discovery and print the run summary |
//! | `grants runs` | List discovery runs |
//! | `grants grants` | List discovered grants |
//! | `grants approve <id>` | Approve a grant into the catalog |
//! | `grants reject <id> <reason>` | Reject a grant |
//! | `grants mark-duplicate <id> <key>` | Link a grant to an existing program |
//! | `grants catalog import <file>` | Seed catalog programs from JSON |
//! | `grants catalog list` | List catalog programs |
//! | `grants stats` | Discovery statistics |
//! | `grants token <admin_id>` | Mint an admin API token |
//! | `grants serve` | Start the admin HTTP server |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use grant_discovery::config::{self, Config};
use grant_discovery::discovery::Pipeline;
use grant_discovery::models::{DiscoveredGrant, DiscoveryRun};
use grant_discovery::query::{GrantQuery, RunQuery};
use grant_discovery::review::ApproveOverrides;
use grant_discovery::{auth, catalog, db, migrate, query, review, server, sources, stats};

/// Grant discovery: find, score, and deduplicate housing grants for admin
/// review.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/grants.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "grants",
    about = "Discover housing grants, deduplicate them against the catalog, and review them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grants.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured sources and whether they look healthy.
    Sources,

    /// Run discovery synchronously and print the run summary.
    ///
    /// Source format: `all`, a kind (`rss`, `api`, `filesystem`), or
    /// `<kind>:<name>`. Defaults to `[discovery].default_sources`.
    Discover {
        sources: Vec<String>,

        /// Skip the run notification.
        #[arg(long)]
        no_notify: bool,
    },

    /// List discovery runs, newest first.
    Runs {
        /// Filter by status: running, completed, failed.
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// List discovered grants, highest confidence first.
    Grants {
        /// Filter by review status: pending, approved, rejected, duplicate.
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        min_confidence: Option<f64>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Approve a pending grant and create its catalog program.
    Approve {
        id: String,

        /// Catalog key for the new program; generated from the name if absent.
        #[arg(long)]
        program_key: Option<String>,

        #[arg(long, default_value = "cli")]
        reviewer: String,
    },

    /// Reject a pending grant.
    Reject {
        id: String,
        reason: String,

        #[arg(long, default_value = "cli")]
        reviewer: String,
    },

    /// Mark a pending grant as a duplicate of an existing program.
    MarkDuplicate {
        id: String,
        program_key: String,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long, default_value = "cli")]
        reviewer: String,
    },

    /// Manage catalog programs.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Show discovery statistics.
    Stats,

    /// Mint an admin bearer token for the HTTP API.
    Token { admin_id: String },

    /// Start the admin HTTP server, plus the scheduler when enabled.
    Serve,
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Upsert programs from a JSON array file.
    Import { file: PathBuf },

    /// List catalog programs.
    List {
        /// Include inactive programs.
        #[arg(long)]
        all: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,grant_discovery=debug,sqlx=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg);
        }
        Commands::Token { admin_id } => {
            let secret = admin_secret(&cfg)?;
            println!("{}", auth::issue_token(&secret, &admin_id)?);
        }
        Commands::Discover { sources, no_notify } => {
            let pipeline = open_pipeline(cfg).await?;
            let specs = if sources.is_empty() {
                pipeline.config.discovery.default_sources.clone()
            } else {
                sources
            };
            let run = pipeline.run_discovery(&specs, !no_notify).await?;
            print_run(&run);
        }
        Commands::Runs { status, limit } => {
            let pool = db::connect(&cfg).await?;
            let page = query::list_runs(
                &pool,
                &RunQuery {
                    status,
                    offset: None,
                    limit,
                },
                cfg.discovery.page_limit,
            )
            .await?;
            if page.items.is_empty() {
                println!("No discovery runs.");
            }
            for run in &page.items {
                println!(
                    "{}  {:<9}  {}  sources={} discovered={} duplicates={} errors={}",
                    run.id,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.sources_checked,
                    run.grants_discovered,
                    run.duplicates_found,
                    run.errors
                );
            }
        }
        Commands::Grants {
            status,
            min_confidence,
            limit,
        } => {
            let pool = db::connect(&cfg).await?;
            let filter = GrantQuery {
                status,
                min_confidence,
                limit,
                ..Default::default()
            }
            .parse(cfg.discovery.page_limit)?;
            let page = query::list_grants(&pool, &filter).await?;
            if page.items.is_empty() {
                println!("No discovered grants.");
            }
            for grant in &page.items {
                print_grant(grant);
            }
            if page.total > page.items.len() as i64 {
                println!("({} of {} shown)", page.items.len(), page.total);
            }
        }
        Commands::Approve {
            id,
            program_key,
            reviewer,
        } => {
            let pool = db::connect(&cfg).await?;
            let overrides = ApproveOverrides {
                program_key,
                ..Default::default()
            };
            let program = review::approve(&pool, &id, &reviewer, overrides).await?;
            println!(
                "Approved {} as program '{}' ({})",
                id, program.program_key, program.name
            );
        }
        Commands::Reject {
            id,
            reason,
            reviewer,
        } => {
            let pool = db::connect(&cfg).await?;
            review::reject(&pool, &id, &reviewer, &reason).await?;
            println!("Rejected {}", id);
        }
        Commands::MarkDuplicate {
            id,
            program_key,
            notes,
            reviewer,
        } => {
            let pool = db::connect(&cfg).await?;
            review::mark_duplicate(&pool, &id, &reviewer, &program_key, notes.as_deref()).await?;
            println!("Marked {} as duplicate of '{}'", id, program_key);
        }
        Commands::Catalog { action } => {
            let pool = db::connect(&cfg).await?;
            match action {
                CatalogAction::Import { file } => {
                    let count = catalog::import_programs(&pool, &file)
                        .await
                        .with_context(|| format!("importing {}", file.display()))?;
                    println!("Imported {} program(s).", count);
                }
                CatalogAction::List { all } => {
                    let programs = catalog::list_programs(&pool, all).await?;
                    if programs.is_empty() {
                        println!("No catalog programs.");
                    }
                    for p in &programs {
                        println!(
                            "{:<32} {:<12} {}{}",
                            p.program_key,
                            p.menu_category,
                            p.name,
                            if p.is_active { "" } else { " (inactive)" }
                        );
                    }
                }
            }
        }
        Commands::Stats => {
            let pool = db::connect(&cfg).await?;
            let s = stats::discovery_stats(&pool).await?;
            stats::print_stats(&s);
        }
        Commands::Serve => {
            let pipeline = open_pipeline(cfg).await?;
            server::run_server(pipeline).await?;
        }
    }

    Ok(())
}

async fn open_pipeline(cfg: Config) -> anyhow::Result<Pipeline> {
    let pool = db::connect(&cfg).await?;
    Ok(Pipeline::from_config(Arc::new(cfg), pool)?)
}

fn admin_secret(cfg: &Config) -> anyhow::Result<String> {
    match cfg.server.admin_secret.as_deref() {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => bail!("server.admin_secret must be set to mint tokens"),
    }
}

fn print_run(run: &DiscoveryRun) {
    println!("Run {}", run.id);
    println!("  status:      {}", run.status);
    println!("  sources:     {}", run.sources_checked);
    println!("  discovered:  {}", run.grants_discovered);
    println!("  duplicates:  {}", run.duplicates_found);
    println!("  errors:      {}", run.errors);
    for e in &run.error_log {
        println!("    {} [{}]: {}", e.source, e.stage, e.error);
    }
}

fn print_grant(grant: &DiscoveredGrant) {
    println!(
        "{}  {:.2}  {:<18}  {:<8}  {}",
        grant.id, grant.confidence_score, grant.match_class, grant.review_status, grant.name
    );
    if let Some(key) = &grant.matched_program_key {
        let similarity = grant
            .similarity_score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!("      matches '{}' (similarity {})", key, similarity);
    }
}
