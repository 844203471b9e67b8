use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use table_intake::upload::FileKind;
use table_intake::{IntakeConfig, IntakeService};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Load CSV and spreadsheet uploads into the shared table store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a CSV or spreadsheet file as a new table
    Upload {
        path: PathBuf,

        /// csv, xlsx, xls, excel or spreadsheet (default: from the extension)
        #[arg(short, long)]
        kind: Option<String>,

        /// Filename reported to the naming step (default: the file's name)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List cataloged tables
    List,
    /// Show one table's catalog entry
    Show { table: String },
    /// Show one table's physical schema
    Schema { table: String },
    /// Print the first rows of a table
    Preview {
        table: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Drop a table and its metadata
    Delete { table: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = IntakeConfig::from_env()?;
    info!("Table store: {}", config.database_url);
    let service = IntakeService::from_config(&config);

    match args.command {
        Command::Upload { path, kind, name } => {
            let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            let kind = match kind {
                Some(kind) => kind,
                None => match FileKind::from_extension(&path) {
                    Some(FileKind::Spreadsheet) => "spreadsheet".to_string(),
                    _ => "csv".to_string(),
                },
            };
            let filename = name.or_else(|| path.file_name().map(|f| f.to_string_lossy().into_owned()));
            let response = service.import_upload(&bytes, &kind, filename.as_deref()).await;
            print_json(&response)?;
        }
        Command::List => print_json(&service.list_tables())?,
        Command::Show { table } => print_json(&service.table_info(&table))?,
        Command::Schema { table } => print_json(&service.table_schema(&table))?,
        Command::Preview { table, limit } => {
            let df = service.read_table(&table)?;
            println!("{}", df.head(Some(limit)));
        }
        Command::Delete { table } => print_json(&service.delete_table(&table))?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
