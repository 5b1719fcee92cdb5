use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use hybrid_rag::config;
use hybrid_rag::embeddings::{EmbeddingProvider, HttpEmbeddingProvider};
use hybrid_rag::engine::{HybridEngine, IndexRequest, QueryRequest};
use hybrid_rag::progress_logger::ProgressLogger;
use hybrid_rag::store::QdrantStore;

fn get_log_dir() -> String {
    std::env::var("LOG_DIR").unwrap_or_else(|_| {
        if std::path::Path::new("/var/log").exists() && is_writable("/var/log") {
            "/var/log/hybrid-rag".to_string()
        } else {
            "./logs".to_string()
        }
    })
}

fn get_log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

fn is_writable(path: &str) -> bool {
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(format!("{}/test_write", path))
        .map(|_| {
            let _ = std::fs::remove_file(format!("{}/test_write", path));
            true
        })
        .unwrap_or(false)
}

fn setup_logging() -> Result<()> {
    let log_dir = get_log_dir();
    let log_level = get_log_level();

    std::fs::create_dir_all(&log_dir)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let is_development = std::env::var("DEVELOPMENT").is_ok() || std::env::var("DEV").is_ok();
    let force_console = std::env::var("CONSOLE_LOGS").is_ok();

    if is_development || force_console {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
        tracing::info!("Development mode: logging to console");
    } else {
        // Keep stdout clean for the JSON command output; logs go to a file.
        let log_file = format!("{}/hybrid-rag.log", log_dir);
        let file_appender = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(file_appender)
            .json()
            .init();
    }

    tracing::info!("Logging initialized");
    tracing::info!("Log directory: {}", log_dir);
    tracing::info!("Log level: {}", log_level);

    Ok(())
}

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  hybrid-rag index [docs_root] [docset] [--recreate] [--keep-existing] [--no-preview]");
    eprintln!("  hybrid-rag query <text> [top_k]");
    eprintln!("  hybrid-rag health");
    std::process::exit(2);
}

fn build_engine() -> Result<(HybridEngine, Arc<dyn EmbeddingProvider>)> {
    let store = Arc::new(QdrantStore::from_env()?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::from_env()?);
    let engine = HybridEngine::new(store, embedder.clone());
    Ok((engine, embedder))
}

async fn run_index(args: &[String]) -> Result<()> {
    let mut docs_root: Option<String> = None;
    let mut docset: Option<String> = None;
    let mut recreate = false;
    let mut replace_docset = true;
    let mut preview = true;

    for arg in args {
        match arg.as_str() {
            "--recreate" => recreate = true,
            "--keep-existing" => replace_docset = false,
            "--no-preview" => preview = false,
            other if other.starts_with("--") => usage(),
            other => {
                if docs_root.is_none() {
                    docs_root = Some(other.to_string());
                } else if docset.is_none() {
                    docset = Some(other.to_string());
                } else {
                    usage();
                }
            }
        }
    }

    let docs_root = docs_root.unwrap_or_else(config::get_docs_root);
    let docset = docset.unwrap_or_else(config::get_default_docset);

    let (engine, embedder) = build_engine()?;
    // Fail before walking the corpus when the provider is unreachable.
    embedder.probe().await?;

    let mut request = IndexRequest::new(docs_root, docset);
    request.recreate = recreate;
    request.replace_docset = replace_docset;
    request.preview = preview;

    let progress = ProgressLogger::new(&get_log_dir())?;
    let report = engine.index_docset(&request, Some(&progress)).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_query(args: &[String]) -> Result<()> {
    let Some(text) = args.first() else { usage() };
    let mut request = QueryRequest::new(text);
    if let Some(raw) = args.get(1) {
        request.top_k = raw.parse().unwrap_or_else(|_| usage());
    }
    if args.len() > 2 {
        usage();
    }

    let (engine, _embedder) = build_engine()?;
    let response = engine.query(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_health() -> Result<()> {
    let (engine, _embedder) = build_engine()?;
    let health = engine.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    if !health.store_ok {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }
    setup_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else { usage() };

    match command.as_str() {
        "index" => run_index(&args[1..]).await,
        "query" => run_query(&args[1..]).await,
        "health" => run_health().await,
        _ => usage(),
    }
}
