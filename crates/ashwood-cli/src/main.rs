//! Ashwood command line.
//!
//! Provides the `ashwood` binary with two subcommands:
//!
//! - `order` prints the insert and delete table orders of a schema.
//! - `flush` applies a JSON change set to a SQLite database in one
//!   transaction, using the same [`Flush`] a library caller would.
//!
//! Log output goes to stderr and is controlled by `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ashwood_commit::{
    create_tables, open_database, AutoPkTableGenerator, ChangeSet, Flush, FlushConfig,
    PkGenerator, SequencePkGenerator, SqliteExecutor,
};
use ashwood_core::Schema;
use ashwood_sort::EntitySorter;

/// Dependency-ordered commits for relational schemas.
#[derive(Parser)]
#[command(name = "ashwood", about = "Dependency-ordered commits for relational schemas")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print insert and delete orders for a schema.
    Order {
        /// Schema JSON file (`{"tables": [...]}`).
        #[arg(short, long)]
        schema: PathBuf,

        /// Print as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Apply a change set to a SQLite database.
    Flush {
        /// Schema JSON file.
        #[arg(short, long)]
        schema: PathBuf,

        /// Change set JSON file.
        #[arg(short, long)]
        changes: PathBuf,

        /// SQLite database file; created if missing.
        #[arg(short, long)]
        db: PathBuf,

        /// Create missing schema tables before flushing.
        #[arg(long)]
        create_tables: bool,

        /// Print the execution plan without touching the database.
        #[arg(long)]
        dry_run: bool,

        /// Generate keys from in-process counters instead of the
        /// AUTO_PK_SUPPORT table.
        #[arg(long)]
        sequence_keys: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Order { schema, json } => run_order(&schema, json),
        Commands::Flush {
            schema,
            changes,
            db,
            create_tables,
            dry_run,
            sequence_keys,
        } => run_flush(&schema, &changes, &db, create_tables, dry_run, sequence_keys),
    };
    process::exit(exit_code);
}

/// Execute the order subcommand.
///
/// Returns exit code: 0 = success, 1 = mapping error, 3 = I/O or parse error.
fn run_order(schema_path: &Path, json: bool) -> i32 {
    let schema = match load_schema(schema_path) {
        Ok(schema) => schema,
        Err(code) => return code,
    };
    let sorter = match EntitySorter::new(&schema) {
        Ok(sorter) => sorter,
        Err(e) => {
            eprintln!("Mapping error: {}", e);
            return 1;
        }
    };

    let reflexive: Vec<&str> = sorter
        .insert_order()
        .iter()
        .map(String::as_str)
        .filter(|table| sorter.is_reflexive(table))
        .collect();

    if json {
        let out = serde_json::json!({
            "insert": sorter.insert_order(),
            "delete": sorter.delete_order(),
            "reflexive": reflexive,
            "broken_cycles": sorter.broken_cycles(),
        });
        println!("{:#}", out);
    } else {
        println!("insert:    {}", sorter.insert_order().join(", "));
        println!("delete:    {}", sorter.delete_order().join(", "));
        println!("reflexive: {}", reflexive.join(", "));
        for (dependent, dependency) in sorter.broken_cycles() {
            println!("ignored:   {} -> {} (nullable, in cycle)", dependent, dependency);
        }
    }
    0
}

/// Execute the flush subcommand.
///
/// Returns exit code: 0 = success, 1 = mapping error, 2 = commit failure,
/// 3 = I/O or parse error.
fn run_flush(
    schema_path: &Path,
    changes_path: &Path,
    db_path: &Path,
    create: bool,
    dry_run: bool,
    sequence_keys: bool,
) -> i32 {
    let schema = match load_schema(schema_path) {
        Ok(schema) => schema,
        Err(code) => return code,
    };
    let changes = match read(changes_path).map(|text| ChangeSet::from_json(&text)) {
        Ok(Ok(changes)) => changes,
        Ok(Err(e)) => {
            eprintln!("Error: invalid change set '{}': {}", changes_path.display(), e);
            return 3;
        }
        Err(code) => return code,
    };
    let config = match FlushConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 3;
        }
    };
    let sorter = match EntitySorter::new(&schema) {
        Ok(sorter) => sorter,
        Err(e) => {
            eprintln!("Mapping error: {}", e);
            return 1;
        }
    };
    tracing::debug!(tables = schema.len(), objects = changes.len(), "loaded change set");

    let mut flush = Flush::new(&schema, &sorter, &config);

    if dry_run {
        return match flush.plan(changes) {
            Ok(plan) => {
                let [inserts, updates, deletes] = plan.table_order();
                let out = serde_json::json!({
                    "insert": inserts,
                    "update": updates,
                    "delete": deletes,
                });
                println!("{:#}", out);
                0
            }
            Err(e) => {
                eprintln!("Mapping error: {}", e);
                1
            }
        };
    }

    let conn = match open_database(db_path) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path.display(), e);
            return 3;
        }
    };
    if create {
        if let Err(e) = create_tables(&conn, &schema) {
            eprintln!("Error: failed to create tables: {}", e);
            return 3;
        }
    }

    let mut generator: Box<dyn PkGenerator + '_> = if sequence_keys {
        Box::new(SequencePkGenerator::new())
    } else {
        match AutoPkTableGenerator::new(&conn, config.pk_cache_size) {
            Ok(generator) => Box::new(generator),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 3;
            }
        }
    };

    let mut executor = SqliteExecutor::new(&conn);
    match flush.run(changes, &mut executor, generator.as_mut()) {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).unwrap_or_else(|e| {
                format!("{{\"error\": \"failed to serialize report: {}\"}}", e)
            });
            println!("{}", json);
            0
        }
        Err(e) if e.is_mapping_error() => {
            eprintln!("Mapping error: {}", e);
            1
        }
        Err(e) => {
            eprintln!("Commit failed: {}", e);
            2
        }
    }
}

fn load_schema(path: &Path) -> Result<Schema, i32> {
    let text = read(path)?;
    Schema::from_json(&text).map_err(|e| {
        eprintln!("Error: invalid schema '{}': {}", path.display(), e);
        3
    })
}

fn read(path: &Path) -> Result<String, i32> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })
}
