//! Statistics generation from the crawl database
//!
//! This module provides functionality for extracting and displaying
//! catalog totals and run history from the store.

use crate::store::{CrawlRunRecord, CrawlStore, ItemCounts, RunStatus};
use crate::Result;
use serde::Serialize;

/// Catalog and ledger summary for one registry
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatistics {
    pub registry_id: String,

    /// Active, deleted and pending item totals
    pub items: ItemCounts,

    /// Most recent runs, newest first
    pub recent_runs: Vec<CrawlRunRecord>,
}

impl RegistryStatistics {
    /// Share of the recent runs that completed
    pub fn success_rate(&self) -> f64 {
        if self.recent_runs.is_empty() {
            return 0.0;
        }
        let completed = self
            .recent_runs
            .iter()
            .filter(|run| run.status == RunStatus::Completed)
            .count();
        completed as f64 / self.recent_runs.len() as f64 * 100.0
    }
}

/// Loads statistics from the store
///
/// # Arguments
///
/// * `store` - The store to query
/// * `registry_ids` - Registries to report on
/// * `run_limit` - How many recent runs to include per registry
pub fn load_statistics(
    store: &mut dyn CrawlStore,
    registry_ids: &[String],
    run_limit: usize,
) -> Result<Vec<RegistryStatistics>> {
    let mut stats = Vec::with_capacity(registry_ids.len());

    for registry_id in registry_ids {
        stats.push(RegistryStatistics {
            registry_id: registry_id.clone(),
            items: store.count_items(registry_id)?,
            recent_runs: store.recent_runs(Some(registry_id.as_str()), run_limit)?,
        });
    }

    Ok(stats)
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &[RegistryStatistics]) {
    println!("=== Crawl Statistics ===\n");

    for registry in stats {
        println!("Registry: {}", registry.registry_id);
        println!(
            "  Items: {} active, {} deleted, {} pending download",
            registry.items.active, registry.items.deleted, registry.items.pending
        );

        if registry.recent_runs.is_empty() {
            println!("  No runs recorded");
            println!();
            continue;
        }

        println!("  Recent runs:");
        for run in &registry.recent_runs {
            let duration = run
                .duration_s
                .map(|d| format!("{:.1}s", d))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "    {} {:<6} {:<11} {:<9} {:>7}  discovered={} downloaded={} skipped={} failed={}",
                run.started_at,
                run.kind,
                run.mode,
                run.status.to_db_string(),
                duration,
                run.stats.discovered,
                run.stats.downloaded,
                run.stats.skipped,
                run.stats.failed
            );
            if let Some(error) = &run.error {
                println!("      error: {}", error);
            }
        }

        println!(
            "  Success Rate: {:.1}% of the last {} runs",
            registry.success_rate(),
            registry.recent_runs.len()
        );
        println!();
    }
}
