use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

use crate::types::{EntryRecord, ExitRecord, TradingStats};

/// Reads a whole journal. A missing or unparseable file reads as empty; the
/// next append rewrites it cleanly.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            warn!(
                "Journal {} is unreadable ({}), treating as empty",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// Appends one record by re-serializing the whole array. The write goes to a
/// temp file first and is renamed into place so a crash cannot truncate an
/// existing journal.
pub fn append_record<T: Serialize + DeserializeOwned>(path: &Path, record: T) -> Result<()> {
    let mut records: Vec<T> = read_records(path);
    records.push(record);

    let serialized = serde_json::to_string_pretty(&records)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serialized)
        .with_context(|| format!("writing journal {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replacing journal {}", path.display()))?;
    Ok(())
}

/// Aggregates the two journals into the stats the strategies read. Active
/// positions are entries whose order id no exit references.
pub fn calculate_trading_stats(entries: &[EntryRecord], exits: &[ExitRecord]) -> TradingStats {
    let mut stats = TradingStats {
        total_entries: entries.len(),
        total_exits: exits.len(),
        ..TradingStats::default()
    };

    let mut profit_percentages = Vec::new();
    for exit in exits {
        if let Some(profit) = exit.profit_percentage {
            profit_percentages.push(profit);
            stats.total_profit += exit.profit_amount.unwrap_or(Decimal::ZERO);

            if profit > Decimal::ZERO {
                stats.win_count += 1;
                stats.max_profit_percentage = stats.max_profit_percentage.max(profit);
            } else {
                stats.loss_count += 1;
                stats.max_loss_percentage = stats.max_loss_percentage.min(profit);
            }

            stats.total_volume += exit.revenue;
        }
    }

    if !profit_percentages.is_empty() {
        let sum: Decimal = profit_percentages.iter().sum();
        stats.avg_profit_percentage = sum / Decimal::from(profit_percentages.len() as u64);
    }

    let closed = stats.win_count + stats.loss_count;
    if closed > 0 {
        stats.win_rate =
            Decimal::from(stats.win_count as u64) / Decimal::from(closed as u64) * Decimal::from(100);
    }

    let exited_ids: std::collections::HashSet<&str> = exits
        .iter()
        .filter_map(|e| e.entry_order_id.as_deref())
        .collect();
    stats.active_positions = entries
        .iter()
        .filter(|e| !exited_ids.contains(e.order_id.as_str()))
        .cloned()
        .collect();

    stats
}
