//! Catalog statistics.
//!
//! A quick summary of what has been harvested and indexed: row counts per
//! table, index size, and per-source record counts with their cursors.
//! Used by `myco stats` to check that harvests are landing.

use anyhow::Result;
use sqlx::Row;

use mycorrhiza_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::SqliteIndex;
use crate::sqlite_store::SqliteStore;

struct SourceStats {
    name: String,
    library: String,
    records: i64,
    last_harvested_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let index = SqliteIndex::new(pool.clone());

    let counts = store.counts().await?;
    let indexed = index.count().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Mycorrhiza: Catalog Stats");
    println!("=========================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Libraries:    {}", counts.libraries);
    println!("  Sources:      {}", counts.sources);
    println!("  Agents:       {}", counts.agents);
    println!("  Languages:    {}", counts.languages);
    println!(
        "  Entries:      {} ({} aggregations)",
        counts.entries, counts.aggregation_entries
    );
    println!(
        "  Records:      {} ({} aggregations)",
        counts.records, counts.aggregation_records
    );
    println!("  Memberships:  {}", counts.memberships);
    println!("  Links:        {}", counts.links);
    println!(
        "  Indexed:      {} / {} entries",
        indexed, counts.entries
    );

    let rows = sqlx::query(
        r#"
        SELECT s.name, l.name AS library, s.last_harvested,
               COUNT(r.id) AS records
        FROM sources s
        JOIN libraries l ON l.id = s.library_id
        LEFT JOIN source_records r ON r.source_id = s.id
        GROUP BY s.id
        ORDER BY records DESC, s.name
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let source_stats: Vec<SourceStats> = rows
        .iter()
        .map(|row| SourceStats {
            name: row.get("name"),
            library: row.get("library"),
            records: row.get("records"),
            last_harvested_ts: row.get("last_harvested"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<20} {:<20} {:>8}   {}",
            "SOURCE", "LIBRARY", "RECORDS", "LAST HARVEST"
        );
        println!("  {}", "-".repeat(72));

        for s in &source_stats {
            let harvested = match s.last_harvested_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<20} {:<20} {:>8}   {}",
                s.name, s.library, s.records, harvested
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    match delta {
        0..=59 => "just now".to_string(),
        60..=3599 => plural(delta / 60, "min"),
        3600..=86399 => plural(delta / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_relative(now + 3600), format_ts_iso(now + 3600));
    }
}
