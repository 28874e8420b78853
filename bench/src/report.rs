//! Report module: derives the overall comparison from persisted results.
//!
//! Reads only the JSON artifacts, never a database. MongoDB inserts are taken
//! from the per-row run (it always bulk-inserts) and CockroachDB inserts from
//! the batched run, so both sides are shown at their best write path.

use crate::results::{ResultSet, Workload, COCKROACH, COCKROACH_BATCHED, MONGO};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const SUMMARY_CSV: &str = "overall_summary.csv";
pub const SUMMARY_MD: &str = "overall_summary.md";

const MONGO_LABEL: &str = "MongoDB";
const COCKROACH_LABEL: &str = "CockroachDB (batched)";

/// One comparison line, lower is better for every row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub metric: &'static str,
    pub mongodb: f64,
    pub cockroachdb: f64,
}

/// Where the summary files were written.
#[derive(Debug, Clone)]
pub struct ReportFiles {
    pub csv: PathBuf,
    pub markdown: PathBuf,
}

/// Build the six summary rows from the insert, batched-insert, CRUD and
/// query artifacts in `dir`.
pub fn summary_rows(dir: &Path) -> Result<Vec<SummaryRow>> {
    let naive = ResultSet::load(dir, Workload::Insert)?;
    let batched = ResultSet::load(dir, Workload::InsertBatched)?;
    let crud = ResultSet::load(dir, Workload::Crud)?;
    let query = ResultSet::load(dir, Workload::Query)?;

    let update_avg = |backend: &str| -> Result<f64> {
        Ok((crud.metric(backend, "update_1000_users_avg_ms")?
            + crud.metric(backend, "update_1000_posts_avg_ms")?)
            / 2.0)
    };

    Ok(vec![
        SummaryRow {
            metric: "Insert 1000 users (s)",
            mongodb: naive.metric(MONGO, "insert_1000_users")?,
            cockroachdb: batched.metric(COCKROACH_BATCHED, "insert_1000_users")?,
        },
        SummaryRow {
            metric: "Insert 5000 posts (s)",
            mongodb: naive.metric(MONGO, "insert_5000_posts")?,
            cockroachdb: batched.metric(COCKROACH_BATCHED, "insert_5000_posts")?,
        },
        SummaryRow {
            metric: "Update avg (ms/op)",
            mongodb: update_avg(MONGO)?,
            cockroachdb: update_avg(COCKROACH)?,
        },
        SummaryRow {
            metric: "Delete 500 users (s)",
            mongodb: crud.metric(MONGO, "delete_500_users_total_s")?,
            cockroachdb: crud.metric(COCKROACH, "delete_500_users_total_s")?,
        },
        SummaryRow {
            metric: "Latest-20 (ms)",
            mongodb: query.metric(MONGO, "latest20_avg_ms")?,
            cockroachdb: query.metric(COCKROACH, "latest20_avg_ms")?,
        },
        SummaryRow {
            metric: "Range 7 days (ms)",
            mongodb: query.metric(MONGO, "range7d_avg_ms")?,
            cockroachdb: query.metric(COCKROACH, "range7d_avg_ms")?,
        },
    ])
}

pub fn write_csv(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("create {}", path.display()))?;
    w.write_record(["Metric", MONGO_LABEL, COCKROACH_LABEL])?;
    for r in rows {
        w.write_record([
            r.metric.to_string(),
            format!("{:.6}", r.mongodb),
            format!("{:.6}", r.cockroachdb),
        ])?;
    }
    w.flush()?;
    Ok(())
}

pub fn render_markdown(rows: &[SummaryRow]) -> String {
    let mut lines = vec![
        format!("| Metric | {MONGO_LABEL} | {COCKROACH_LABEL} |"),
        "|---|---:|---:|".to_string(),
    ];
    for r in rows {
        lines.push(format!(
            "| {} | {:.3} | {:.3} |",
            r.metric, r.mongodb, r.cockroachdb
        ));
    }
    lines.join("\n")
}

/// Write `overall_summary.csv` and `overall_summary.md` into `dir`.
pub fn write_summary(dir: &Path, rows: &[SummaryRow]) -> Result<ReportFiles> {
    let csv = dir.join(SUMMARY_CSV);
    write_csv(&csv, rows)?;
    let markdown = dir.join(SUMMARY_MD);
    fs::write(&markdown, render_markdown(rows))
        .with_context(|| format!("write {}", markdown.display()))?;
    Ok(ReportFiles { csv, markdown })
}

/// Load the concurrency artifact if one exists.
pub fn load_concurrency(dir: &Path) -> Result<Option<ResultSet>> {
    if !Workload::Concurrency.path(dir).exists() {
        return Ok(None);
    }
    ResultSet::load(dir, Workload::Concurrency).map(Some)
}

/// Print the summary table, and the concurrency figures when available.
pub fn print_report(rows: &[SummaryRow], concurrency: Option<&ResultSet>) {
    println!("\n{}", "=".repeat(72));
    println!("  MongoDB vs CockroachDB (lower is better)");
    println!("{}", "=".repeat(72));
    println!(
        "  {:24} {:>16} {:>24}",
        "Metric", MONGO_LABEL, COCKROACH_LABEL
    );
    println!("  {}", "-".repeat(66));
    for r in rows {
        println!(
            "  {:24} {:>16.3} {:>24.3}",
            r.metric, r.mongodb, r.cockroachdb
        );
    }

    if let Some(cr) = concurrency {
        println!("\n  Concurrent point lookups (seed {}):", cr.seed);
        println!(
            "  {:14} {:>8} {:>10} {:>10} {:>14}",
            "Backend", "Threads", "Avg (ms)", "p95 (ms)", "Throughput/s"
        );
        println!("  {}", "-".repeat(60));
        for (backend, metrics) in &cr.backends {
            for group in metrics.keys() {
                let get = |k: &str| cr.group_metric(backend, group, k).unwrap_or(f64::NAN);
                println!(
                    "  {:14} {:>8} {:>10.3} {:>10.3} {:>14.1}",
                    backend,
                    get("n_threads"),
                    get("avg_ms"),
                    get("p95_ms"),
                    get("throughput_qps"),
                );
            }
        }
    }
    println!();
}

/// Build, write and print the report from the artifacts in `dir`.
pub fn generate(dir: &Path) -> Result<ReportFiles> {
    let rows = summary_rows(dir).context("build overall summary")?;
    let files = write_summary(dir, &rows)?;
    let concurrency = load_concurrency(dir)?;
    print_report(&rows, concurrency.as_ref());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::MetricsBuilder;

    fn write_fixture(dir: &Path) {
        let mut naive = ResultSet::new(42);
        naive.insert_backend(
            MONGO,
            MetricsBuilder::new()
                .number("insert_1000_users", 0.1)
                .number("single_query", 0.3)
                .number("insert_5000_posts", 0.5)
                .build(),
        );
        naive.persist(dir, Workload::Insert).unwrap();

        let mut batched = ResultSet::new(42);
        batched.insert_backend(
            COCKROACH_BATCHED,
            MetricsBuilder::new()
                .number("insert_1000_users", 0.2)
                .number("single_query", 0.4)
                .number("insert_5000_posts", 0.9)
                .build(),
        );
        batched.persist(dir, Workload::InsertBatched).unwrap();

        let mut crud = ResultSet::new(42);
        for (backend, base) in [(MONGO, 1.0), (COCKROACH, 2.0)] {
            crud.insert_backend(
                backend,
                MetricsBuilder::new()
                    .number("update_1000_users_avg_ms", base)
                    .number("update_1000_posts_avg_ms", base + 1.0)
                    .number("delete_500_users_total_s", base * 10.0)
                    .build(),
            );
        }
        crud.persist(dir, Workload::Crud).unwrap();

        let mut query = ResultSet::new(42);
        for (backend, base) in [(MONGO, 3.0), (COCKROACH, 4.0)] {
            query.insert_backend(
                backend,
                MetricsBuilder::new()
                    .number("latest20_avg_ms", base)
                    .number("range7d_avg_ms", base * 2.0)
                    .build(),
            );
        }
        query.persist(dir, Workload::Query).unwrap();
    }

    #[test]
    fn rows_pick_fair_sources() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let rows = summary_rows(dir.path()).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].mongodb, 0.1);
        assert_eq!(rows[0].cockroachdb, 0.2);
        assert_eq!(rows[1].cockroachdb, 0.9);
        assert_eq!(rows[2].mongodb, 1.5);
        assert_eq!(rows[2].cockroachdb, 2.5);
        assert_eq!(rows[3].metric, "Delete 500 users (s)");
        assert_eq!(rows[5].cockroachdb, 8.0);
    }

    #[test]
    fn summary_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let files = generate(dir.path()).unwrap();

        let csv = fs::read_to_string(&files.csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Metric,MongoDB,CockroachDB (batched)"));
        assert_eq!(lines.next(), Some("Insert 1000 users (s),0.100000,0.200000"));

        let md = fs::read_to_string(&files.markdown).unwrap();
        assert!(md.starts_with("| Metric | MongoDB | CockroachDB (batched) |"));
        assert!(md.contains("| Latest-20 (ms) | 3.000 | 4.000 |"));
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(summary_rows(dir.path()).is_err());
        assert!(load_concurrency(dir.path()).unwrap().is_none());
    }
}
