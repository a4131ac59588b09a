//! Streaming per-region rollups of combined results.
//!
//! Memory is one partial aggregate per region seen, independent of stream
//! length. Every pushed result lands in exactly one bucket (its region, or
//! `unknown`), so the label counts of all buckets always add up to the
//! number of processed rows, including on a partial snapshot.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::data::regions::region_name;
use crate::domain::{CombinedResult, LabelCounts, RegionCode, RowError, VulnerabilityLabel};
use crate::error::VulnError;
use crate::features::income_per_capita;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionKey {
    Code(RegionCode),
    Unknown,
}

impl RegionKey {
    pub fn from_code(code: Option<&RegionCode>) -> Self {
        code.cloned().map_or(RegionKey::Unknown, RegionKey::Code)
    }

    pub fn display_name(&self) -> String {
        match self {
            RegionKey::Code(code) => region_name(code),
            RegionKey::Unknown => "Unknown region".to_string(),
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKey::Code(code) => write!(f, "{code}"),
            RegionKey::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for RegionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Default)]
struct Partial {
    households: u64,
    counts_a: LabelCounts,
    counts_b: LabelCounts,
    divergent: u64,
    sum_income_per_capita: f64,
    sum_household_size: f64,
    sum_age: f64,
    benefit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MunicipalityAggregate {
    pub region: RegionKey,
    pub region_name: String,
    pub households: u64,
    pub counts_a: LabelCounts,
    pub counts_b: LabelCounts,
    /// Percent per label, in label order.
    pub percentages_a: [f64; VulnerabilityLabel::COUNT],
    pub percentages_b: [f64; VulnerabilityLabel::COUNT],
    pub divergent: u64,
    pub mean_income_per_capita: f64,
    pub mean_household_size: f64,
    pub mean_age: f64,
    pub benefit_pct: f64,
}

impl MunicipalityAggregate {
    fn from_partial(region: &RegionKey, p: &Partial) -> Self {
        let n = p.households.max(1) as f64;
        Self {
            region: region.clone(),
            region_name: region.display_name(),
            households: p.households,
            counts_a: p.counts_a,
            counts_b: p.counts_b,
            percentages_a: p.counts_a.percentages(),
            percentages_b: p.counts_b.percentages(),
            divergent: p.divergent,
            mean_income_per_capita: p.sum_income_per_capita / n,
            mean_household_size: p.sum_household_size / n,
            mean_age: p.sum_age / n,
            benefit_pct: 100.0 * p.benefit as f64 / n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationReport {
    /// Sorted by region code, `unknown` last.
    pub aggregates: Vec<MunicipalityAggregate>,
    pub rows_read: u64,
    pub processed: u64,
    pub skipped: u64,
    /// First few row errors; `skipped` counts all of them.
    pub row_errors: Vec<RowError>,
    pub divergent: u64,
    /// Stopped at the row limit before the input ended.
    pub truncated: bool,
    pub cancelled: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MunicipalityAggregator {
    partials: HashMap<RegionKey, Partial>,
    processed: u64,
    skipped: u64,
    divergent: u64,
    row_errors: Vec<RowError>,
    max_errors_kept: usize,
}

impl Default for MunicipalityAggregator {
    fn default() -> Self {
        Self::new(20)
    }
}

impl MunicipalityAggregator {
    pub fn new(max_errors_kept: usize) -> Self {
        Self {
            partials: HashMap::new(),
            processed: 0,
            skipped: 0,
            divergent: 0,
            row_errors: Vec::new(),
            max_errors_kept,
        }
    }

    pub fn push(&mut self, result: &CombinedResult, region: Option<&RegionCode>) -> Result<(), VulnError> {
        let ipc = income_per_capita(&result.record)?;
        let size = result.record.household_size.unwrap_or(0);

        let p = self.partials.entry(RegionKey::from_code(region)).or_default();
        p.households += 1;
        p.counts_a.add(result.prediction_a.label);
        p.counts_b.add(result.prediction_b.label);
        p.sum_income_per_capita += ipc;
        p.sum_household_size += f64::from(size);
        p.sum_age += f64::from(result.record.age);
        if result.record.benefit {
            p.benefit += 1;
        }
        if result.divergent {
            p.divergent += 1;
            self.divergent += 1;
        }
        self.processed += 1;
        Ok(())
    }

    pub fn record_skip(&mut self, error: RowError) {
        self.skipped += 1;
        debug!(line = error.line, message = %error.message, "row skipped");
        if self.row_errors.len() < self.max_errors_kept {
            self.row_errors.push(error);
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Current aggregates; valid at any point of the stream.
    pub fn snapshot(&self) -> Vec<MunicipalityAggregate> {
        let mut keys: Vec<&RegionKey> = self.partials.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| MunicipalityAggregate::from_partial(k, &self.partials[k]))
            .collect()
    }

    pub fn finish(self, truncated: bool, cancelled: bool) -> AggregationReport {
        let aggregates = self.snapshot();
        info!(
            regions = aggregates.len(),
            processed = self.processed,
            skipped = self.skipped,
            divergent = self.divergent,
            truncated,
            cancelled,
            "aggregation finished"
        );
        AggregationReport {
            aggregates,
            rows_read: self.processed + self.skipped,
            processed: self.processed,
            skipped: self.skipped,
            row_errors: self.row_errors,
            divergent: self.divergent,
            truncated,
            cancelled,
            generated_at: Utc::now(),
        }
    }
}

/// Fold a stream of results into a report, stopping after `max_rows` items
/// (valid or not) or as soon as `cancel` is set. An item that fails validation
/// is skipped and counted, with its 1-based position in the stream as its
/// line. The report is complete for what was consumed.
pub fn aggregate<I>(results: I, max_rows: Option<u64>, cancel: &AtomicBool) -> Result<AggregationReport, VulnError>
where
    I: IntoIterator<Item = (CombinedResult, Option<RegionCode>)>,
{
    let mut agg = MunicipalityAggregator::default();
    let mut iter = results.into_iter().peekable();
    let mut rows_read: u64 = 0;
    let mut truncated = false;
    let mut cancelled = false;

    while iter.peek().is_some() {
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }
        if max_rows.is_some_and(|m| rows_read >= m) {
            truncated = true;
            break;
        }
        let Some((result, region)) = iter.next() else {
            break;
        };
        rows_read += 1;
        match agg.push(&result, region.as_ref()) {
            Ok(()) => {}
            Err(e @ VulnError::Validation { .. }) => agg.record_skip(RowError {
                line: rows_read,
                message: e.to_string(),
            }),
            Err(e) => return Err(e),
        }
    }
    Ok(agg.finish(truncated, cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::MetaCombiner;
    use crate::domain::{ClassifierPrediction, ModelKind};
    use crate::features::engine::tests::reference_record;

    fn result(a: VulnerabilityLabel, b: VulnerabilityLabel, region: Option<&str>, income: f64) -> CombinedResult {
        let pred = |model, label: VulnerabilityLabel| {
            let mut probabilities = [0.0; 4];
            probabilities[label.index()] = 1.0;
            ClassifierPrediction {
                model,
                label,
                probabilities,
            }
        };
        let mut record = reference_record();
        record.region = region.and_then(RegionCode::parse);
        record.family_income = income;
        MetaCombiner::default().combine(pred(ModelKind::Bagging, a), pred(ModelKind::Boosting, b), &record)
    }

    fn stream() -> Vec<(CombinedResult, Option<RegionCode>)> {
        use VulnerabilityLabel::*;
        [
            result(High, High, Some("3205309"), 100.0),
            result(VeryHigh, High, Some("3205309"), 200.0),
            result(Low, Low, Some("3550308"), 1000.0),
            result(Medium, Medium, None, 50.0),
            result(High, VeryHigh, Some("0"), 50.0),
        ]
        .into_iter()
        .map(|r| {
            let region = r.record.region.clone();
            (r, region)
        })
        .collect()
    }

    #[test]
    fn counts_sum_to_processed_and_unknown_bucket_appears() {
        let report = aggregate(stream(), None, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(report.divergent, 2);
        let total_a: u64 = report.aggregates.iter().map(|a| a.counts_a.total()).sum();
        let total_b: u64 = report.aggregates.iter().map(|a| a.counts_b.total()).sum();
        assert_eq!(total_a, 5);
        assert_eq!(total_b, 5);

        let keys: Vec<String> = report.aggregates.iter().map(|a| a.region.to_string()).collect();
        assert_eq!(keys, vec!["3205309", "3550308", "unknown"]);

        let vitoria = &report.aggregates[0];
        assert_eq!(vitoria.region_name, "Vitória/ES");
        assert_eq!(vitoria.households, 2);
        assert_eq!(vitoria.counts_a.get(VulnerabilityLabel::VeryHigh), 1);
        assert_eq!(vitoria.counts_b.get(VulnerabilityLabel::High), 2);
        assert!((vitoria.percentages_a[2] - 50.0).abs() < 1e-12);
        assert!((vitoria.mean_income_per_capita - 30.0).abs() < 1e-12);
        assert_eq!(vitoria.mean_household_size, 5.0);
        assert_eq!(vitoria.mean_age, 28.0);
        assert_eq!(vitoria.benefit_pct, 100.0);
        assert_eq!(vitoria.divergent, 1);

        let unknown = &report.aggregates[2];
        assert_eq!(unknown.region, RegionKey::Unknown);
        assert_eq!(unknown.households, 2);
    }

    #[test]
    fn no_unknown_bucket_when_every_row_has_a_region() {
        let rows: Vec<_> = stream().into_iter().take(3).collect();
        let report = aggregate(rows, None, &AtomicBool::new(false)).unwrap();
        assert!(report.aggregates.iter().all(|a| a.region != RegionKey::Unknown));
    }

    #[test]
    fn row_limit_and_cancel_leave_valid_partial_reports() {
        let report = aggregate(stream(), Some(2), &AtomicBool::new(false)).unwrap();
        assert!(report.truncated);
        assert_eq!(report.processed, 2);
        assert_eq!(report.aggregates.iter().map(|a| a.households).sum::<u64>(), 2);

        let report = aggregate(stream(), Some(5), &AtomicBool::new(false)).unwrap();
        assert!(!report.truncated, "limit equal to the input length is not a truncation");

        let report = aggregate(stream(), None, &AtomicBool::new(true)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert!(report.aggregates.is_empty());
    }

    #[test]
    fn skipped_rows_are_counted_and_capped() {
        let mut agg = MunicipalityAggregator::new(2);
        for line in 2..7 {
            agg.record_skip(RowError {
                line,
                message: "bad".to_string(),
            });
        }
        let (r, region) = stream().remove(0);
        agg.push(&r, region.as_ref()).unwrap();
        let report = agg.finish(false, false);
        assert_eq!(report.skipped, 5);
        assert_eq!(report.row_errors.len(), 2);
        assert_eq!(report.rows_read, 6);
        assert_eq!(report.processed, 1);
    }

    #[test]
    fn invalid_rows_are_skipped_and_aggregation_continues() {
        use VulnerabilityLabel::*;
        let mut rows = stream();
        rows.truncate(3);
        rows[1].0.record.household_size = None;

        let report = aggregate(rows.clone(), None, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.rows_read, 3);
        assert_eq!(report.row_errors.len(), 1);
        assert_eq!(report.row_errors[0].line, 2);
        assert!(report.row_errors[0].message.contains("household_size"));
        let total_a: u64 = report.aggregates.iter().map(|a| a.counts_a.total()).sum();
        assert_eq!(total_a, 2);
        assert_eq!(report.aggregates[0].counts_a.get(High), 1);

        // The row limit counts the skipped row too.
        let report = aggregate(rows, Some(2), &AtomicBool::new(false)).unwrap();
        assert!(report.truncated);
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn literal_unknown_region_shares_the_single_unknown_bucket() {
        use VulnerabilityLabel::*;
        let rows: Vec<_> = [
            result(Low, Low, Some("unknown"), 100.0),
            result(Low, Medium, Some(""), 100.0),
            result(High, High, Some("UNKNOWN"), 100.0),
        ]
        .into_iter()
        .map(|r| {
            let region = r.record.region.clone();
            (r, region)
        })
        .collect();

        let report = aggregate(rows, None, &AtomicBool::new(false)).unwrap();
        let keys: Vec<String> = report.aggregates.iter().map(|a| a.region.to_string()).collect();
        assert_eq!(keys, vec!["unknown"]);
        assert_eq!(report.aggregates[0].region, RegionKey::Unknown);
        assert_eq!(report.aggregates[0].households, 3);
    }
}
