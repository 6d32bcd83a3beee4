//! Binary entry point: stream an edge list through a graph and report its
//! connected components.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use skein::{Edge, Graph, GraphConfig, Result, SkeinError};

#[derive(Parser, Debug)]
#[command(
    name = "skein",
    version,
    about = "Streaming connected components over sketched graph streams"
)]
struct Cli {
    /// Edge stream file: a vertex-count header line, then one update per
    /// line ("u v", or "i u v" / "d u v" for explicit insert/delete).
    stream: PathBuf,

    /// Number of ingestion worker threads.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Sample-slot multiplier for each sketch.
    #[arg(long, default_value_t = 1.0)]
    sketches_factor: f64,

    /// Fixed hash seed for reproducible runs.
    #[arg(long, env = "SKEIN_SEED")]
    seed: Option<u64>,

    /// Use the parallel query variant.
    #[arg(long)]
    parallel: bool,

    /// Output format for the component report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = GraphConfig::default()
        .num_workers(cli.workers)
        .sketches_factor(cli.sketches_factor);
    if let Some(seed) = cli.seed {
        config = config.seed(seed);
    }

    let reader = BufReader::new(File::open(&cli.stream)?);
    let mut lines = reader.lines();
    let num_nodes = match lines.next() {
        Some(line) => parse_header(&line?)?,
        None => {
            return Err(SkeinError::InvalidArgument(
                "stream file is empty".into(),
            ))
        }
    };

    let graph = Graph::new(num_nodes, config)?;
    info!(num_nodes, seed = graph.seed(), "graph ready");
    let ingest_start = Instant::now();
    let mut updates = 0u64;
    for line in lines {
        let line = line?;
        if let Some(edge) = parse_update(&line)? {
            graph.update(edge)?;
            updates += 1;
        }
    }
    info!(updates, elapsed = ?ingest_start.elapsed(), "stream ingested");

    let query_start = Instant::now();
    let report = if cli.parallel {
        graph.connected_components_parallel()?
    } else {
        graph.connected_components()?
    };
    info!(
        components = report.num_components(),
        applied_updates = graph.num_updates(),
        elapsed = ?query_start.elapsed(),
        "query complete"
    );

    match cli.format {
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|err| SkeinError::InvalidArgument(err.to_string()))?;
            println!("{rendered}");
        }
        OutputFormat::Text => {
            println!("{} components over {num_nodes} vertices", report.num_components());
            for members in report.components() {
                let preview: Vec<String> =
                    members.iter().take(16).map(ToString::to_string).collect();
                let suffix = if members.len() > 16 { ", ..." } else { "" };
                println!("  [{}{}] ({} vertices)", preview.join(", "), suffix, members.len());
            }
        }
    }
    Ok(())
}

fn parse_header(line: &str) -> Result<u32> {
    line.trim()
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok())
        .ok_or_else(|| SkeinError::InvalidArgument(format!("bad header line: {line:?}")))
}

/// Parses one update line. Blank lines and `#` comments are skipped.
fn parse_update(line: &str) -> Result<Option<Edge>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut tokens = line.split_whitespace().peekable();
    if matches!(tokens.peek(), Some(&"i") | Some(&"d")) {
        tokens.next();
    }
    let parse = |tok: Option<&str>| -> Result<u32> {
        tok.and_then(|t| t.parse().ok())
            .ok_or_else(|| SkeinError::InvalidArgument(format!("bad update line: {line:?}")))
    };
    let src = parse(tokens.next())?;
    let dst = parse(tokens.next())?;
    Ok(Some(Edge { src, dst }))
}
