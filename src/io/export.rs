//! Export batch reports and other run artefacts.
//!
//! The CSV is meant to be easy to consume in spreadsheets: one line per
//! region, label counts for both classifiers side by side.

use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::aggregate::{AggregationReport, MunicipalityAggregate};
use crate::domain::VulnerabilityLabel;
use crate::error::VulnError;

fn create(path: &Path) -> Result<File, VulnError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    File::create(path).map_err(|e| {
        VulnError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create '{}': {e}", path.display()),
        ))
    })
}

fn header() -> Vec<String> {
    let mut cols: Vec<String> = ["region", "region_name", "households"].map(String::from).to_vec();
    for prefix in ["a", "b"] {
        for label in VulnerabilityLabel::ALL {
            cols.push(format!("{prefix}_{}", snake(label)));
        }
        for label in VulnerabilityLabel::ALL {
            cols.push(format!("{prefix}_{}_pct", snake(label)));
        }
    }
    cols.extend(
        [
            "divergent",
            "mean_income_per_capita",
            "mean_household_size",
            "mean_age",
            "benefit_pct",
        ]
        .map(String::from),
    );
    cols
}

fn snake(label: VulnerabilityLabel) -> &'static str {
    match label {
        VulnerabilityLabel::Low => "low",
        VulnerabilityLabel::Medium => "medium",
        VulnerabilityLabel::High => "high",
        VulnerabilityLabel::VeryHigh => "very_high",
    }
}

fn row(a: &MunicipalityAggregate) -> Vec<String> {
    let mut out = vec![a.region.to_string(), a.region_name.clone(), a.households.to_string()];
    for (counts, pct) in [(&a.counts_a, &a.percentages_a), (&a.counts_b, &a.percentages_b)] {
        out.extend(counts.0.iter().map(|c| c.to_string()));
        out.extend(pct.iter().map(|p| format!("{p:.2}")));
    }
    out.push(a.divergent.to_string());
    out.push(format!("{:.2}", a.mean_income_per_capita));
    out.push(format!("{:.2}", a.mean_household_size));
    out.push(format!("{:.1}", a.mean_age));
    out.push(format!("{:.2}", a.benefit_pct));
    out
}

/// Per-region aggregates as CSV.
pub fn write_aggregates_csv<W: Write>(writer: W, report: &AggregationReport) -> Result<(), VulnError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(header())?;
    for a in &report.aggregates {
        w.write_record(row(a))?;
    }
    w.flush()?;
    Ok(())
}

pub fn export_aggregates_csv(path: &Path, report: &AggregationReport) -> Result<(), VulnError> {
    write_aggregates_csv(create(path)?, report)
}

/// Any serializable artefact (batch report, calibrated weights, ...) as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), VulnError> {
    serde_json::to_writer_pretty(create(path)?, value)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, VulnError> {
    let file = File::open(path).map_err(|e| {
        VulnError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open '{}': {e}", path.display()),
        ))
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::aggregate::aggregate;
    use crate::combine::MetaCombiner;
    use crate::domain::{ClassifierPrediction, ModelKind, RegionCode};
    use crate::features::ScoreWeights;
    use crate::features::engine::tests::reference_record;

    fn report() -> AggregationReport {
        let pred = |model, label: VulnerabilityLabel| {
            let mut probabilities = [0.0; 4];
            probabilities[label.index()] = 1.0;
            ClassifierPrediction {
                model,
                label,
                probabilities,
            }
        };
        let rows = ["3205309", "3205309", ""].map(|code| {
            let mut record = reference_record();
            record.region = RegionCode::parse(code);
            let r = MetaCombiner::default().combine(
                pred(ModelKind::Bagging, VulnerabilityLabel::High),
                pred(ModelKind::Boosting, VulnerabilityLabel::VeryHigh),
                &record,
            );
            (r, record.region)
        });
        aggregate(rows, None, &AtomicBool::new(false)).unwrap()
    }

    #[test]
    fn csv_has_one_line_per_region() {
        let mut buf = Vec::new();
        write_aggregates_csv(&mut buf, &report()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("region,region_name,households,a_low,"));
        assert!(lines[0].contains("b_very_high_pct"));
        assert!(lines[1].starts_with("3205309,Vitória/ES,2,0,0,2,0,"), "{}", lines[1]);
        assert!(lines[2].starts_with("unknown,Unknown region,1,"));
        let width = header().len();
        assert!(lines.iter().all(|l| l.split(',').count() == width));
    }

    #[test]
    fn json_round_trip_through_files() {
        let dir = std::env::temp_dir().join(format!("vtiers-export-{}", std::process::id()));
        let path = dir.join("weights.json");
        let weights = ScoreWeights {
            offset: 0.1,
            ..ScoreWeights::default()
        };
        write_json(&path, &weights).unwrap();
        let back: ScoreWeights = read_json(&path).unwrap();
        assert_eq!(back, weights);

        let report_path = dir.join("report.json");
        write_json(&report_path, &report()).unwrap();
        let value: serde_json::Value = read_json(&report_path).unwrap();
        assert_eq!(value["processed"], 3);
        assert_eq!(value["aggregates"][1]["region"], "unknown");
        let _ = fs::remove_dir_all(&dir);
    }
}
