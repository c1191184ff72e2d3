//! ducklens CLI - load files or URLs into an in-memory DuckDB and query them

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, CellAlignment, Color,
    ContentArrangement, Table,
};
use ducklens::{DuckDbClient, FileBuffer, OpenOptions, QueryResult, Row, Source, SourceMap, Value};

#[derive(Parser, Debug)]
#[command(name = "ducklens")]
#[command(about = "Query local files and URLs with an embedded DuckDB", long_about = None)]
struct Args {
    /// Source to load, as NAME=PATH or NAME=URL (repeatable)
    #[arg(short, long = "source", value_name = "NAME=LOCATION")]
    sources: Vec<String>,

    /// SQL query to execute; lists tables when omitted
    #[arg(short, long)]
    query: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .compact()
        .init();

    let options = OpenOptions::load().context("failed to load configuration")?;
    let sources = parse_sources(&args.sources)?;
    let client = DuckDbClient::create(sources, options)
        .await
        .context("failed to open database")?;

    let outcome = run(&client, args.query.as_deref()).await;
    client.close().await.context("failed to close database")?;
    outcome
}

async fn run(client: &DuckDbClient, query: Option<&str>) -> Result<()> {
    let Some(query) = query else {
        let tables = client.list_tables().await?;
        if tables.is_empty() {
            println!("(No tables)");
        }
        for table in tables {
            println!("{}.{} ({})", table.schema, table.name, table.table_type);
        }
        return Ok(());
    };

    let start = Instant::now();
    let result = client.query(query, &[]).await?;
    let elapsed = start.elapsed();

    if result.is_empty() {
        println!("(No rows returned)");
    } else {
        display_results(&result);
    }
    println!(
        "{} row{} in {:.3}s",
        result.len(),
        if result.len() == 1 { "" } else { "s" },
        elapsed.as_secs_f64()
    );
    Ok(())
}

fn parse_sources(specs: &[String]) -> Result<SourceMap> {
    let mut sources = SourceMap::new();
    for spec in specs {
        let Some((name, location)) = spec.split_once('=') else {
            bail!("invalid source {spec:?}, expected NAME=LOCATION");
        };
        let source = if location.contains("://") {
            Source::url_named(location, name)
        } else {
            let file = FileBuffer::from_path(Path::new(location))
                .with_context(|| format!("failed to read {location}"))?;
            Source::table(file, name)
        };
        sources.insert(name.to_string(), source);
    }
    Ok(sources)
}

fn display_results(result: &QueryResult<Row>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells = result
        .schema
        .iter()
        .map(|field| {
            Cell::new(format!("{}\n{}", field.name, field.field_type))
                .fg(Color::Cyan)
                .set_alignment(CellAlignment::Center)
        })
        .collect::<Vec<_>>();
    table.set_header(header_cells);

    for row in result {
        table.add_row(row.values().map(format_cell_value).collect::<Vec<_>>());
    }
    println!("{table}");
}

fn format_cell_value(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::new("NULL").fg(Color::DarkGrey),
        other => Cell::new(other.to_string()),
    }
}
