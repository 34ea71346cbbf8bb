use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqled::import::{self, CsvOptions};
use sqled::router::Request;
use sqled::{Config, Router, Worker};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sqled")]
#[command(about = "Staged-edit engine for SQLite files: edits are previewed, checked, then committed")]
struct Cli {
    /// Rows per page for view-data
    #[arg(long, global = true, default_value_t = sqled::config::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Maximum rows returned by execute-sql
    #[arg(long, global = true, default_value_t = sqled::config::DEFAULT_MAX_ROWS)]
    max_rows: usize,

    /// Recent connections file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    recent_file: Option<PathBuf>,

    /// Number of recent connections to remember
    #[arg(long, global = true, default_value_t = sqled::session::DEFAULT_RECENT_LIMIT)]
    recent_limit: usize,

    /// Directory for preview copies (defaults to the system temp dir)
    #[arg(long, global = true, value_name = "DIR")]
    preview_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer JSON requests, one per line, on stdin/stdout
    Serve {
        /// Database to open before reading requests
        #[arg(value_name = "DATABASE")]
        database: Option<PathBuf>,
    },
    /// Run one SQL statement through the preview and commit it
    Exec {
        /// Database file path
        #[arg(long, short)]
        db: PathBuf,

        /// SQL statement to execute
        sql: String,
    },
    /// Create a table from a CSV file and commit it
    ImportCsv {
        /// Database file path
        #[arg(long, short)]
        db: PathBuf,

        /// CSV file to import
        #[arg(long, short)]
        file: PathBuf,

        /// Name of the new table
        #[arg(long, short)]
        table: String,

        /// Field separator
        #[arg(long, default_value = ",")]
        delimiter: String,

        /// Treat the first line as data
        #[arg(long)]
        no_header: bool,
    },
    /// Show or clear the recent connections list
    Recent {
        #[arg(long)]
        clear: bool,
    },
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            page_size: self.page_size,
            max_rows: self.max_rows,
            recent_file: self
                .recent_file
                .clone()
                .or_else(sqled::config::default_recent_file),
            recent_limit: self.recent_limit,
            preview_dir: self.preview_dir.clone(),
        }
    }
}

fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let router = Router::new(cli.config());

    match cli.command {
        None => run_serve(router, None),
        Some(Commands::Serve { database }) => run_serve(router, database),
        Some(Commands::Exec { db, sql }) => run_exec(router, &db, &sql),
        Some(Commands::ImportCsv {
            db,
            file,
            table,
            delimiter,
            no_header,
        }) => run_import(router, &db, &file, &table, &delimiter, !no_header),
        Some(Commands::Recent { clear }) => run_recent(router, clear),
    }
}

fn write_line(out: &mut impl Write, response: &sqled::Response) -> Result<()> {
    serde_json::to_writer(&mut *out, response).context("Failed to encode response")?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn run_serve(router: Router, database: Option<PathBuf>) -> Result<()> {
    let worker = Worker::new(router);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(path) = database {
        let response = worker.request(Request::OpenDatabase { path })?;
        write_line(&mut out, &response)?;
    }

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = worker.request_json(&line)?;
        write_line(&mut out, &response)?;
    }

    worker.shutdown()?;
    Ok(())
}

fn run_exec(mut router: Router, db: &Path, sql: &str) -> Result<()> {
    let max_rows = router.config().max_rows;
    let manager = router.manager_mut();
    manager
        .open_database(db)
        .with_context(|| format!("Failed to open database: {}", db.display()))?;

    let session = manager.session_mut()?;
    let outcome = session.execute_sql(sql, max_rows)?;
    session
        .commit("")
        .context("Statement ran on the preview but could not be committed")?;
    manager.close_database()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("Failed to encode result")?
    );
    Ok(())
}

fn run_import(
    mut router: Router,
    db: &Path,
    file: &Path,
    table: &str,
    delimiter: &str,
    has_header: bool,
) -> Result<()> {
    let options = CsvOptions {
        delimiter: import::parse_delimiter(delimiter)?,
        has_header,
        column_names: None,
    };
    let data = import::read_csv(file, &options)
        .with_context(|| format!("Failed to read CSV file: {}", file.display()))?;

    let manager = router.manager_mut();
    manager
        .open_database(db)
        .with_context(|| format!("Failed to open database: {}", db.display()))?;
    let rows = manager.session_mut()?.stage_csv_table(table, &data)?;
    manager.close_database()?;

    println!("Imported {} row(s) into {}", rows, table);
    Ok(())
}

fn run_recent(mut router: Router, clear: bool) -> Result<()> {
    let manager = router.manager_mut();
    if clear {
        manager.clear_connections();
        println!("Cleared recent connections");
        return Ok(());
    }
    for path in manager.recent_connections() {
        println!("{}", path);
    }
    Ok(())
}
