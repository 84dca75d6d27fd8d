//! Olist ETL - CSV batch loader

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use olist_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use olist_etl::config::{DatabaseSettings, LoadSettings};
use olist_etl::db::{self, Database};
use olist_etl::source::TextEncoding;
use olist_etl::{tables, EtlError, LoadOptions, LoadPipeline, LoadResult, TableSpec};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "olist-etl")]
#[command(author, version, about = "Load the Olist e-commerce CSV dataset into PostgreSQL or MySQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database settings file (defaults to ./olist-etl.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one CSV file into one table
    Load {
        /// Destination table (see `olist-etl tables`)
        table: String,

        /// CSV file with a header row
        source: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Load every table from its conventional file in a dataset directory
    All {
        /// Directory holding the Olist CSV files
        data_dir: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List the known tables
    Tables,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Rows per committed batch (overrides ETL_BATCH_SIZE)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Preview instead of writing (also enabled by ETL_DRY_RUN)
    #[arg(long)]
    dry_run: bool,

    /// Reject non UTF-8 input instead of reading it as Latin-1
    #[arg(long)]
    strict_utf8: bool,

    /// Print run reports as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn settings(&self) -> Result<LoadSettings> {
        let mut settings = LoadSettings::from_env()?;
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        settings.dry_run |= self.dry_run;
        Ok(settings)
    }

    fn options(&self, source: PathBuf, settings: LoadSettings) -> LoadOptions {
        let encoding = if self.strict_utf8 {
            TextEncoding::Utf8
        } else {
            TextEncoding::Utf8OrLatin1
        };
        LoadOptions::new(source)
            .with_settings(settings)
            .encoding(encoding)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .level(log_level)
        .output(LogOutput::Console)
        .log_file_prefix("olist-etl")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Load { table, source, run } => {
            let spec = tables::find(&table).ok_or_else(|| EtlError::UnknownTable(table.clone()))?;
            let settings = run.settings()?;
            let mut db = connect_unless_dry(cli.config.as_deref(), settings).await?;

            let result = load(spec, run.options(source, settings), db.as_deref_mut()).await;
            report(result, run.json)?;
        },
        Command::All { data_dir, run } => {
            let settings = run.settings()?;
            let mut db = connect_unless_dry(cli.config.as_deref(), settings).await?;

            for spec in tables::CATALOGUE {
                let source = data_dir.join(spec.file_name);
                if !source.is_file() {
                    warn!(
                        table = spec.name,
                        source = %source.display(),
                        "Source file not found, skipping"
                    );
                    continue;
                }

                let result = load(spec, run.options(source, settings), db.as_deref_mut()).await;
                report(result, run.json)?;
            }
            info!("All tables processed");
        },
        Command::Tables => list_tables(),
    }

    Ok(())
}

async fn connect_unless_dry(
    config: Option<&Path>,
    settings: LoadSettings,
) -> Result<Option<Box<dyn Database>>> {
    if settings.dry_run {
        info!("Dry run: no database connection will be opened");
        return Ok(None);
    }

    let db_settings =
        DatabaseSettings::load(config).context("Failed to load database settings")?;
    let db = db::connect(&db_settings)
        .await
        .context("Failed to connect to database")?;
    Ok(Some(db))
}

async fn load(
    spec: &'static TableSpec,
    options: LoadOptions,
    db: Option<&mut (dyn Database + 'static)>,
) -> olist_etl::EtlResult<LoadResult> {
    let progress = if options.dry_run {
        ProgressBar::hidden()
    } else {
        create_spinner(spec.name)
    };

    let mut pipeline = LoadPipeline::new(spec, options).with_progress(progress.clone());
    let mut stdout = std::io::stdout();
    let db = db.map(|db| db as &mut dyn Database);
    let result = pipeline.execute(db, &mut stdout).await;

    progress.finish_and_clear();
    result
}

fn report(result: olist_etl::EtlResult<LoadResult>, json: bool) -> Result<()> {
    match result {
        Ok(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result);
            }
            Ok(())
        },
        Err(e) => {
            if let Some((batches, rows)) = e.committed() {
                error!(
                    committed_batches = batches,
                    committed_rows = rows,
                    "Load aborted; committed batches remain in the database"
                );
                eprintln!(
                    "{} batches ({} rows) were committed before the failure; \
                     re-running the load skips rows that already exist",
                    batches, rows
                );
            }
            Err(e.into())
        },
    }
}

fn list_tables() {
    for spec in tables::CATALOGUE {
        let columns: Vec<String> = spec
            .columns()
            .iter()
            .map(|c| format!("{} {}", c.name, c.kind))
            .collect();
        println!("{} ({})", spec.name, spec.file_name);
        println!("  columns: {}", columns.join(", "));
        println!("  key:     {}", spec.conflict_key.join(", "));
        if let Some(lookup) = spec.lookup {
            println!(
                "  lookup:  {} -> {}.{}",
                lookup.source_column, lookup.lookup_table, lookup.value_column
            );
        }
        if let Some(backfill) = spec.backfill {
            println!(
                "  backfill: {} from {}.{}",
                backfill.column, backfill.parent_table, backfill.parent_column
            );
        }
    }
}

fn create_spinner(table: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} {pos} rows [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(format!("Loading {}", table));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
