//! nlgis CLI - natural-language questions over city geodata

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use nlgis::config::{self, NlgisConfig};
use nlgis::query::{AllowAll, OpenAiGenerator, QueryExecutor, ReadOnlyGate, Row};
use nlgis::ui::{self, IngestProgress, Spinner};
use nlgis::{QueryEngine, QueryGenerator, SchemaContextGenerator, ShapefileIngestor, SqliteStore};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "nlgis")]
#[command(version)]
#[command(about = "Natural-language spatial queries grounded in the data you loaded")]
#[command(long_about = r#"
nlgis loads shapefile layers into one spatial table and turns questions into
spatial SQL that only uses the layers and attributes actually present.

Example usage:
  nlgis init
  nlgis seed --dir ./data
  nlgis context
  nlgis ask "all public swimming pools"
  nlgis execute "SELECT layer_name, COUNT(*) AS n FROM city_objects GROUP BY layer_name"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default nlgis.toml
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Load every shapefile layer of a directory
    Seed {
        /// Directory of .shp/.dbf/.prj triads (defaults to data_dir from the config)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Rows per insert transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Delete existing rows of each layer before loading it
        #[arg(long)]
        replace: bool,
    },

    /// Print the schema grounding context
    Context {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Generate SQL for a question without running it
    Generate {
        /// The question
        prompt: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Run SQL as given
    Execute {
        /// The SQL statement
        sql: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Refuse statements that modify the database
        #[arg(long)]
        read_only: bool,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate SQL for a question and run it
    Ask {
        /// The question
        prompt: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Allow generated statements that modify the database
        #[arg(long)]
        allow_writes: bool,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show row counts per layer
    Stats {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List layer names
    Layers {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Delete every row of a layer
    Clear {
        /// Layer name
        layer: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

const CELL_WIDTH: usize = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let cfg = NlgisConfig::resolve(Some(&config_path))?;

    match cli.command {
        Commands::Init { force } => {
            config::write_config(&config_path, &NlgisConfig::default(), force)?;
            ui::success(&format!("Wrote {}", config_path.display()));
        }

        Commands::Seed {
            dir,
            database,
            batch_size,
            replace,
        } => {
            let dir = dir
                .or_else(|| cfg.data_dir.as_ref().map(PathBuf::from))
                .ok_or_else(|| anyhow::anyhow!("no data directory (pass --dir or set data_dir)"))?;
            let mut store = open_store(database.as_deref(), &cfg)?;

            ui::header(&format!("Seeding {}", dir.display()));
            if replace {
                for source in ShapefileIngestor::discover_layers(&dir).await? {
                    let removed = store.clear_layer(&source.name)?;
                    tracing::info!("Cleared {} existing rows of {}", removed, source.name);
                }
            }

            let start = Instant::now();
            let (progress, tx) = IngestProgress::new();
            let ingestor = ShapefileIngestor::new(batch_size.unwrap_or(cfg.ingest.batch_size))
                .with_progress(tx);
            let summary = ingestor.ingest_dir(&mut store, &dir).await;
            drop(ingestor);

            let summary = summary?;
            let failed = summary.failed().count();
            progress.finish_with_summary(start.elapsed(), summary.layers.len(), summary.inserted(), failed);

            for report in summary.failed() {
                ui::warn(&format!(
                    "{}: {}",
                    report.layer,
                    report.error.as_deref().unwrap_or_default()
                ));
            }
            if summary.invalid() > 0 {
                ui::summary_row("invalid features skipped:", &summary.invalid().to_string());
            }
        }

        Commands::Context { database } => {
            let store = open_store(database.as_deref(), &cfg)?;
            let context = SchemaContextGenerator::from_config(&cfg.grounding)?.generate(&store)?;
            if context.is_empty() {
                ui::warn("No layers loaded yet (run `nlgis seed`)");
            } else {
                println!("{}", context);
            }
        }

        Commands::Generate { prompt, database } => {
            let store = open_store(database.as_deref(), &cfg)?;
            let engine = build_engine(&cfg, QueryExecutor::default())?;

            let spinner = Spinner::new("Generating SQL");
            let query = engine.generate(&store, &prompt).await;
            spinner.finish_and_clear();
            println!("{}", query?.sql);
        }

        Commands::Execute {
            sql,
            database,
            read_only,
            json,
        } => {
            let store = open_store(database.as_deref(), &cfg)?;
            let executor = if read_only {
                QueryExecutor::new(ReadOnlyGate)
            } else {
                QueryExecutor::new(AllowAll)
            };
            let rows = executor.execute(&store, &sql)?;
            print_rows(&rows, json)?;
        }

        Commands::Ask {
            prompt,
            database,
            allow_writes,
            json,
        } => {
            let store = open_store(database.as_deref(), &cfg)?;
            let executor = if allow_writes {
                QueryExecutor::new(AllowAll)
            } else {
                QueryExecutor::new(ReadOnlyGate)
            };
            let engine = build_engine(&cfg, executor)?;

            let spinner = Spinner::new("Generating SQL");
            let answer = engine.ask(&store, &prompt).await;
            spinner.finish_and_clear();
            let answer = answer?;

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                ui::info("SQL", &answer.query.sql);
                print_rows(&answer.rows, false)?;
            }
        }

        Commands::Stats { database, json } => {
            let store = open_store(database.as_deref(), &cfg)?;
            let stats = store.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else if ui::is_quiet() {
                print!("{}", stats);
            } else {
                ui::section(" Layers ");
                println!("{}", ui::layer_table(&stats));
                ui::summary_row("Total rows:", &stats.total.to_string());
            }
        }

        Commands::Layers { database } => {
            let store = open_store(database.as_deref(), &cfg)?;
            for layer in store.layer_names()? {
                println!("{}", layer);
            }
        }

        Commands::Clear { layer, database } => {
            let store = open_store(database.as_deref(), &cfg)?;
            let removed = store.clear_layer(&layer)?;
            ui::success(&format!("Removed {} rows of {}", removed, layer));
        }
    }

    Ok(())
}

fn open_store(database: Option<&Path>, cfg: &NlgisConfig) -> anyhow::Result<SqliteStore> {
    let path = database
        .map(Path::to_path_buf)
        .or_else(|| cfg.database.as_ref().map(PathBuf::from))
        .unwrap_or_else(config::default_database_path);
    config::ensure_db_dir(&path)?;
    tracing::debug!("Opening database {}", path.display());
    Ok(SqliteStore::open(&path)?)
}

fn build_engine(cfg: &NlgisConfig, executor: QueryExecutor) -> anyhow::Result<QueryEngine> {
    let backend = OpenAiGenerator::new(cfg.llm.clone())?;
    Ok(QueryEngine::new(
        SchemaContextGenerator::from_config(&cfg.grounding)?,
        QueryGenerator::new(Arc::new(backend)),
        executor,
    ))
}

fn print_rows(rows: &[Row], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
    } else if rows.is_empty() {
        ui::info("Rows", "0");
    } else {
        println!("{}", ui::results_table(rows, CELL_WIDTH));
        ui::summary_row("Rows:", &rows.len().to_string());
    }
    Ok(())
}
