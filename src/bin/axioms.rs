#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use preference_axioms::report::{build_report, render_report_markdown, ReportOptions};
use preference_axioms::{
    analyze, axiom_from_spec, load_axiom_from_path, rerank_blocking, Axiom, AxiomRegistry,
    AxiomRequest, DocumentAxiom, JsonlTraceSink, KwikSort, PivotStrategy, RankedDocument,
    RerankOptions, SqlitePreferenceStore, TraceSink,
};

#[derive(Parser)]
#[command(name = "axioms", version, about = "Axiomatic reranking CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rerank a document list with an axiom
    Rerank {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Use this axiom config instead of the request's axiom
        #[arg(long)]
        axiom_config: Option<PathBuf>,
        /// Write partition decisions as JSONL
        #[arg(long)]
        trace: Option<PathBuf>,
        #[arg(long)]
        rng_seed: Option<u64>,
        #[arg(long, default_value = "random")]
        pivot: PivotStrategy,
        /// SQLite store for `cached` axiom nodes
        #[arg(long)]
        cache: Option<PathBuf>,
        #[arg(long)]
        lock_cache: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Measure how far a ranking violates an axiom
    Analyze {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "json")]
        format: String,
        #[arg(long, default_value_t = 10)]
        top_n: usize,
        #[arg(long)]
        cache: Option<PathBuf>,
    },
    /// Inspect registered axioms
    Axioms {
        #[command(subcommand)]
        command: AxiomCommands,
    },
    /// Export SQLite preference cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune SQLite preference cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

#[derive(Subcommand)]
enum AxiomCommands {
    /// List built-in axioms
    List,
}

#[derive(Debug, Serialize)]
struct RerankResponse {
    query_id: String,
    axiom: String,
    pivot: PivotStrategy,
    rng_seed: Option<u64>,
    documents: Vec<RankedDocument>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Rerank {
            request,
            out,
            axiom_config,
            trace,
            rng_seed,
            pivot,
            cache,
            lock_cache,
            timeout_secs,
        } => {
            let req: AxiomRequest = read_json(&request)?;
            let (registry, store) = registry_with_cache(cache)?;
            let _lock = match (&store, lock_cache) {
                (Some(store), true) => Some(store.lock_exclusive()?),
                _ => None,
            };

            let axiom: DocumentAxiom = match axiom_config {
                Some(path) => load_axiom_from_path(path, &registry)?,
                None => axiom_from_spec(&req.axiom, &registry)?,
            };
            let axiom_name = axiom.name();

            let options = RerankOptions {
                pivot,
                rng_seed,
                ..RerankOptions::default()
            };
            let sorter = Arc::new(KwikSort::from_options(axiom.into_ref(), options));

            let (trace_sink, trace_worker) = if let Some(path) = trace {
                let (sink, worker) = JsonlTraceSink::new(path)?;
                (Some(Arc::new(sink) as Arc<dyn TraceSink>), Some(worker))
            } else {
                (None, None)
            };

            let documents = rerank_blocking(
                sorter,
                req.query.clone(),
                req.documents,
                trace_sink,
                timeout_secs.map(Duration::from_secs),
            )
            .await?;

            if let Some(worker) = trace_worker {
                worker.join()?;
            }

            let resp = RerankResponse {
                query_id: req.query.id,
                axiom: axiom_name,
                pivot,
                rng_seed,
                documents,
            };
            write_json(&out, &resp)?;
        }
        Commands::Analyze {
            request,
            out,
            format,
            top_n,
            cache,
        } => {
            let req: AxiomRequest = read_json(&request)?;
            let (registry, _store) = registry_with_cache(cache)?;
            let axiom = axiom_from_spec(&req.axiom, &registry)?;
            let analysis = analyze(&axiom, &req.query, &req.documents)?;
            match format.as_str() {
                "json" => write_json(&out, &analysis)?,
                "md" | "markdown" => {
                    let opts = ReportOptions {
                        top_n,
                        ..ReportOptions::default()
                    };
                    let report = build_report(&req, &analysis, &opts)?;
                    std::fs::write(&out, render_report_markdown(&report))?;
                }
                other => {
                    return Err(format!("unknown format '{other}' (expected json or md)").into())
                }
            }
        }
        Commands::Axioms { command } => match command {
            AxiomCommands::List => {
                let registry = AxiomRegistry::default();
                for name in registry.list() {
                    if let Some(axiom) = registry.get(&name) {
                        println!("{name}\t{:?}", axiom.symmetry());
                    }
                }
            }
        },
        Commands::CacheExport { db, out } => {
            let path = db.unwrap_or_else(SqlitePreferenceStore::default_path);
            let store = SqlitePreferenceStore::new(path)?;
            let written = store.export_jsonl(out)?;
            println!("exported {written} rows");
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqlitePreferenceStore::default_path);
            let store = SqlitePreferenceStore::new(path)?;
            let _lock = store.lock_exclusive()?;
            let stats = store.prune(max_age_days, max_rows)?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}

/// Default registry, backed by a SQLite store when `cache` is given.
fn registry_with_cache(
    cache: Option<PathBuf>,
) -> Result<(AxiomRegistry, Option<Arc<SqlitePreferenceStore>>), Box<dyn std::error::Error>> {
    let registry = AxiomRegistry::default();
    match cache {
        Some(path) => {
            let store = Arc::new(SqlitePreferenceStore::new(path)?);
            Ok((registry.with_store(store.clone()), Some(store)))
        }
        None => Ok((registry, None)),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
