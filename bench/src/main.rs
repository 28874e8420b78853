//! Command-line runner for the MongoDB vs CockroachDB benchmarks.
//!
//! Every workload runs its backends one after another (MongoDB, CockroachDB,
//! then the embedded SQLite reference when enabled), writes one JSON artifact
//! into the results directory, and exits non-zero on the first error.
//!
//! Usage:
//!   mongo-crdb-bench setup
//!   mongo-crdb-bench insert            # per-row CockroachDB inserts
//!   mongo-crdb-bench insert-batched    # batched CockroachDB inserts
//!   mongo-crdb-bench crud
//!   mongo-crdb-bench query
//!   mongo-crdb-bench concurrency
//!   mongo-crdb-bench report
//!   mongo-crdb-bench all               # everything above, in order
//!   SEED=7 mongo-crdb-bench --sqlite /tmp/bench.db all

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use mongo_crdb_bench::backend::cockroach::CockroachBackend;
use mongo_crdb_bench::backend::mongo::MongoBackend;
use mongo_crdb_bench::backend::sqlite::{SqliteBackend, SqliteConfig};
use mongo_crdb_bench::backend::{BenchBackend, InsertMode};
use mongo_crdb_bench::concurrency::{
    shared_keyspace, COCKROACH_STREAM_OFFSET, MONGO_STREAM_OFFSET, SQLITE_STREAM_OFFSET,
};
use mongo_crdb_bench::config::BenchConfig;
use mongo_crdb_bench::logging::initialize_logger;
use mongo_crdb_bench::report;
use mongo_crdb_bench::results::{
    ResultSet, Workload, COCKROACH, COCKROACH_BATCHED, MONGO, SQLITE,
};
use mongo_crdb_bench::workloads::{self, ConcurrencyPlan, CrudPlan, InsertPlan, QueryPlan};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Parser)]
#[command(name = "mongo-crdb-bench", version, about = "MongoDB vs CockroachDB benchmarks")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Seed for every generated value (overrides SEED).
    #[arg(long, global = true)]
    seed: Option<i64>,

    /// Directory for JSON artifacts and reports (overrides RESULTS_DIR).
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Also benchmark an embedded SQLite database at this path.
    #[arg(long, global = true)]
    sqlite: Option<PathBuf>,

    /// Console log level: error, warn, info, debug or trace.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Recreate the main users/posts schema on every backend.
    Setup,
    /// Insert workload with per-row SQL inserts.
    Insert,
    /// Insert workload with batched SQL inserts.
    InsertBatched,
    /// Seed, update and delete on a private fixture.
    Crud,
    /// Latest-N and time-range reads on a private fixture.
    Query,
    /// Concurrent point lookups against the main users table.
    Concurrency,
    /// Overall summary from the stored artifacts.
    Report,
    /// Every workload followed by the report.
    All,
}

/// Open one connection for the duration of `f`.
fn with_backend<B: BenchBackend, T>(
    config: &B::Config,
    f: impl FnOnce(&mut B) -> Result<T>,
) -> Result<T> {
    let mut backend = B::connect(config)?;
    f(&mut backend)
}

struct Runner {
    config: BenchConfig,
}

impl Runner {
    fn seed(&self) -> i64 {
        self.config.seed
    }

    fn sqlite(&self) -> Option<&SqliteConfig> {
        self.config.sqlite.as_ref()
    }

    fn persist(&self, results: &ResultSet, workload: Workload) -> Result<()> {
        let path = results.persist(&self.config.results_dir, workload)?;
        println!("Saved results to {}", path.display());
        Ok(())
    }

    fn setup(&self) -> Result<()> {
        info!("setting up schemas");
        CockroachBackend::ensure_database(&self.config.cockroach)?;
        with_backend::<MongoBackend, _>(&self.config.mongo, workloads::setup)?;
        with_backend::<CockroachBackend, _>(&self.config.cockroach, workloads::setup)?;
        if let Some(sqlite) = self.sqlite() {
            with_backend::<SqliteBackend, _>(sqlite, workloads::setup)?;
        }
        println!("Schemas ready");
        Ok(())
    }

    fn insert(&self, batched: bool) -> Result<()> {
        let (plan, sql_mode, crdb_key, workload) = if batched {
            (
                InsertPlan::batched(),
                InsertMode::batched(),
                COCKROACH_BATCHED,
                Workload::InsertBatched,
            )
        } else {
            (
                InsertPlan::naive(),
                InsertMode::PerRow,
                COCKROACH,
                Workload::Insert,
            )
        };
        info!("insert workload ({})", workload.file_name());
        let data = plan.dataset(self.seed(), workloads::anchor_now());
        let mut results = ResultSet::new(self.seed());

        // MongoDB always bulk-inserts.
        let m = with_backend::<MongoBackend, _>(&self.config.mongo, |b| {
            workloads::run_insert(b, &plan, &data, InsertMode::batched())
        })?;
        results.insert_backend(MONGO, m);

        let c = with_backend::<CockroachBackend, _>(&self.config.cockroach, |b| {
            workloads::run_insert(b, &plan, &data, sql_mode)
        })?;
        results.insert_backend(crdb_key, c);

        if let Some(sqlite) = self.sqlite() {
            let s = with_backend::<SqliteBackend, _>(sqlite, |b| {
                workloads::run_insert(b, &plan, &data, sql_mode)
            })?;
            results.insert_backend(SQLITE, s);
        }
        self.persist(&results, workload)
    }

    fn crud(&self) -> Result<()> {
        info!("CRUD workload");
        let plan = CrudPlan::default();
        let data = plan.dataset(self.seed());
        let mut results = ResultSet::new(self.seed());

        let m = with_backend::<MongoBackend, _>(&self.config.mongo, |b| {
            workloads::run_crud(b, &plan, &data)
        })?;
        results.insert_backend(MONGO, m);
        let c = with_backend::<CockroachBackend, _>(&self.config.cockroach, |b| {
            workloads::run_crud(b, &plan, &data)
        })?;
        results.insert_backend(COCKROACH, c);
        if let Some(sqlite) = self.sqlite() {
            let s = with_backend::<SqliteBackend, _>(sqlite, |b| {
                workloads::run_crud(b, &plan, &data)
            })?;
            results.insert_backend(SQLITE, s);
        }
        self.persist(&results, Workload::Crud)
    }

    fn query(&self) -> Result<()> {
        info!("query workload");
        let plan = QueryPlan::default();
        let data = plan.dataset(self.seed(), workloads::anchor_now());
        let mut results = ResultSet::new(self.seed());

        let m = with_backend::<MongoBackend, _>(&self.config.mongo, |b| {
            workloads::run_query(b, &plan, &data)
        })?;
        results.insert_backend(MONGO, m);
        let c = with_backend::<CockroachBackend, _>(&self.config.cockroach, |b| {
            workloads::run_query(b, &plan, &data)
        })?;
        results.insert_backend(COCKROACH, c);
        if let Some(sqlite) = self.sqlite() {
            let s = with_backend::<SqliteBackend, _>(sqlite, |b| {
                workloads::run_query(b, &plan, &data)
            })?;
            results.insert_backend(SQLITE, s);
        }
        self.persist(&results, Workload::Query)
    }

    fn concurrency(&self) -> Result<()> {
        info!("concurrency workload");
        let plan = ConcurrencyPlan::default();
        let seed = self.seed();

        let mut sets = vec![
            with_backend::<MongoBackend, _>(&self.config.mongo, workloads::main_usernames)?,
            with_backend::<CockroachBackend, _>(
                &self.config.cockroach,
                workloads::main_usernames,
            )?,
        ];
        if let Some(sqlite) = self.sqlite() {
            sets.push(with_backend::<SqliteBackend, _>(
                sqlite,
                workloads::main_usernames,
            )?);
        }
        let keys = shared_keyspace(&sets, plan.keyspace_cap);
        if keys.is_empty() {
            bail!("No common usernames between MongoDB and CockroachDB. Run setup/tests first.");
        }
        info!("keyspace: {} usernames", keys.len());

        let mut results = ResultSet::new(seed);
        results.insert_backend(
            MONGO,
            workloads::run_concurrency::<MongoBackend>(
                &self.config.mongo,
                &plan,
                &keys,
                seed,
                MONGO_STREAM_OFFSET,
            )
            .context("MongoDB concurrency")?,
        );
        results.insert_backend(
            COCKROACH,
            workloads::run_concurrency::<CockroachBackend>(
                &self.config.cockroach,
                &plan,
                &keys,
                seed,
                COCKROACH_STREAM_OFFSET,
            )
            .context("CockroachDB concurrency")?,
        );
        if let Some(sqlite) = self.sqlite() {
            results.insert_backend(
                SQLITE,
                workloads::run_concurrency::<SqliteBackend>(
                    sqlite,
                    &plan,
                    &keys,
                    seed,
                    SQLITE_STREAM_OFFSET,
                )
                .context("SQLite concurrency")?,
            );
        }
        self.persist(&results, Workload::Concurrency)
    }

    fn report(&self) -> Result<()> {
        let files = report::generate(&self.config.results_dir)?;
        println!(
            "Wrote {} and {}",
            files.csv.display(),
            files.markdown.display()
        );
        Ok(())
    }

    fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Setup => self.setup(),
            Command::Insert => self.insert(false),
            Command::InsertBatched => self.insert(true),
            Command::Crud => self.crud(),
            Command::Query => self.query(),
            Command::Concurrency => self.concurrency(),
            Command::Report => self.report(),
            Command::All => {
                // Both insert runs write the same seed's users into the main
                // tables, so each starts from a fresh schema.
                self.setup()?;
                self.insert(false)?;
                self.setup()?;
                self.insert(true)?;
                self.crud()?;
                self.query()?;
                self.concurrency()?;
                self.report()
            }
        }
    }
}

fn configure(cli: &Cli) -> Result<BenchConfig> {
    let mut config = BenchConfig::from_env()?;
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(dir) = &cli.results_dir {
        config.results_dir = dir.clone();
    }
    if let Some(path) = &cli.sqlite {
        config.sqlite = Some(SqliteConfig { path: path.clone() });
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    let level = match LevelFilter::from_str(&cli.log_level)
        .map_err(|_| anyhow!("invalid log level {:?}", cli.log_level))
    {
        Ok(level) => level,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    let config = match configure(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    if let Err(err) = initialize_logger(level, config.log_file.as_deref()) {
        eprintln!("failed to initialise logging: {err:#}");
        std::process::exit(2);
    }

    println!("SEED={}", config.seed);
    let runner = Runner { config };
    if let Err(err) = runner.run(cli.command) {
        error!("{err:#}");
        std::process::exit(1);
    }
}
