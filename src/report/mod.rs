//! Reporting utilities: region rankings and formatted terminal output.

pub mod format;

pub use format::*;

use serde::Serialize;

use crate::aggregate::{AggregationReport, RegionKey};
use crate::domain::{LabelCounts, VulnerabilityLabel};

/// A region's share of households in the two upper tiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRanking {
    pub region: RegionKey,
    pub region_name: String,
    pub households: u64,
    pub high_share_a: f64,
    pub high_share_b: f64,
}

impl RegionRanking {
    /// Both classifiers weigh equally.
    pub fn mean_share(&self) -> f64 {
        0.5 * (self.high_share_a + self.high_share_b)
    }
}

/// Percent of `counts` labelled High or VeryHigh.
pub fn high_tier_share(counts: &LabelCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        return 0.0;
    }
    let high = counts.get(VulnerabilityLabel::High) + counts.get(VulnerabilityLabel::VeryHigh);
    100.0 * high as f64 / total as f64
}

/// Regions with at least `min_households`, most vulnerable first.
/// The `unknown` bucket is never ranked.
pub fn rank_regions(report: &AggregationReport, top_n: usize, min_households: u64) -> Vec<RegionRanking> {
    let mut rows: Vec<RegionRanking> = report
        .aggregates
        .iter()
        .filter(|a| a.region != RegionKey::Unknown && a.households >= min_households)
        .map(|a| RegionRanking {
            region: a.region.clone(),
            region_name: a.region_name.clone(),
            households: a.households,
            high_share_a: high_tier_share(&a.counts_a),
            high_share_b: high_tier_share(&a.counts_b),
        })
        .collect();
    // Aggregates arrive sorted by region, so a stable sort keeps ties in region order.
    rows.sort_by(|a, b| b.mean_share().total_cmp(&a.mean_share()));
    rows.truncate(top_n);
    rows
}
