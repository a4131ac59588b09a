//! Formatted terminal output.
//!
//! Formatting lives in one place so the modelling code stays clean and output
//! changes are localized.

use crate::aggregate::AggregationReport;
use crate::domain::{ClassifierPrediction, CombinedResult, NarrativeStatus, VulnerabilityLabel};
use crate::features::Calibration;
use crate::models::bundle::TrainedModelBundle;
use crate::models::compare::ModelComparison;
use crate::models::tune::TuningResult;
use crate::report::rank_regions;

/// Training summary for one bundle: headline metrics, confusion matrix, per-class table.
pub fn format_training_summary(bundle: &TrainedModelBundle) -> String {
    let m = &bundle.metrics;
    let mut out = String::new();

    out.push_str(&format!("=== {} ===\n", bundle.model_kind.display_name()));
    out.push_str(&format!(
        "Rows: train={} holdout={} | labels: {}\n",
        m.n_train,
        m.n_holdout,
        fmt_counts(&m.label_counts.0)
    ));
    out.push_str(&format!(
        "Accuracy: train={:.4} holdout={:.4} | macro F1={:.4}\n",
        m.train_accuracy, m.holdout.accuracy, m.holdout.macro_f1
    ));
    if let Some(cv) = &m.cv {
        out.push_str(&format!(
            "CV ({} folds): {:.4} ± {:.4}\n",
            cv.folds.len(),
            cv.mean,
            cv.std
        ));
    }
    if let (Some(trained), Some(kept)) = (m.rounds_trained, m.rounds_kept) {
        out.push_str(&format!("Boosting rounds: trained={trained} kept={kept}\n"));
    }

    out.push_str("\nConfusion matrix (rows = truth, cols = predicted):\n");
    out.push_str(&format!("{:<10}", ""));
    for label in VulnerabilityLabel::ALL {
        out.push_str(&format!(" {:>9}", label.display_name()));
    }
    out.push('\n');
    for label in VulnerabilityLabel::ALL {
        out.push_str(&format!("{:<10}", label.display_name()));
        for count in m.holdout.confusion[label.index()] {
            out.push_str(&format!(" {count:>9}"));
        }
        out.push('\n');
    }

    out.push('\n');
    out.push_str(format!("{:<10} {:>9} {:>9} {:>9} {:>9}", "class", "precision", "recall", "f1", "support").trim_end());
    out.push('\n');
    for c in &m.holdout.per_class {
        out.push_str(&format!(
            "{:<10} {:>9.4} {:>9.4} {:>9.4} {:>9}\n",
            c.label.display_name(),
            c.precision,
            c.recall,
            c.f1,
            c.support
        ));
    }
    out
}

pub fn format_comparison(cmp: &ModelComparison) -> String {
    let mut out = String::new();
    out.push_str("Model comparison:\n");
    for s in &cmp.models {
        let chosen = if s.model == cmp.best { "*" } else { " " };
        let cv = match (s.cv_mean, s.cv_std) {
            (Some(mean), Some(std)) => format!("{mean:.4} ± {std:.4}"),
            _ => "n/a".to_string(),
        };
        out.push_str(&format!(
            "{chosen} {:<10} holdout={:.4} macroF1={:.4} cv={cv}\n",
            s.model.display_name(),
            s.holdout_accuracy,
            s.macro_f1
        ));
        let top: Vec<String> = s
            .top_features
            .iter()
            .map(|(name, w)| format!("{name}={w:.3}"))
            .collect();
        out.push_str(&format!("    top features: {}\n", top.join(", ")));
    }
    out
}

fn format_prediction(p: &ClassifierPrediction) -> String {
    let probs: Vec<String> = VulnerabilityLabel::ALL
        .iter()
        .map(|&l| format!("{}={:.3}", l.display_name(), p.probability(l)))
        .collect();
    format!(
        "{:<10} {:<9} (confidence {:.1}%) [{}]\n",
        p.model.display_name(),
        p.label.display_name(),
        100.0 * p.confidence(),
        probs.join(" ")
    )
}

/// One household: both predictions, the divergence flag, and the narrative if any.
pub fn format_combined(result: &CombinedResult) -> String {
    let mut out = String::new();
    out.push_str(&format_prediction(&result.prediction_a));
    out.push_str(&format_prediction(&result.prediction_b));
    if result.divergent {
        out.push_str("Models DISAGREE: qualitative review required.\n");
    } else {
        out.push_str(&format!("Models agree: {}\n", result.prediction_a.label.display_name()));
    }
    match (&result.narrative_status, &result.narrative) {
        (NarrativeStatus::Generated, Some(text)) => {
            out.push_str("\nNarrative:\n");
            out.push_str(text.trim_end());
            out.push('\n');
        }
        (NarrativeStatus::Unavailable(reason), _) => {
            out.push_str(&format!("Narrative unavailable: {reason}\n"));
        }
        _ => {}
    }
    out
}

pub fn format_aggregation_report(report: &AggregationReport, top_n: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Rows: read={} processed={} skipped={} | divergent={} ({:.1}%)\n",
        report.rows_read,
        report.processed,
        report.skipped,
        report.divergent,
        pct(report.divergent, report.processed)
    ));
    if report.truncated {
        out.push_str("Stopped at the row limit; results cover the rows read.\n");
    }
    if report.cancelled {
        out.push_str("Cancelled; results are partial.\n");
    }
    for e in &report.row_errors {
        out.push_str(&format!("  line {}: {}\n", e.line, e.message));
    }
    if report.skipped > report.row_errors.len() as u64 {
        out.push_str(&format!(
            "  ... {} more row error(s)\n",
            report.skipped - report.row_errors.len() as u64
        ));
    }

    out.push('\n');
    out.push_str(
        format!(
            "{:<28} {:>8} {:>23} {:>23} {:>6} {:>9}",
            "region", "n", "A L/M/H/VH %", "B L/M/H/VH %", "div", "inc/cap"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<28} {:-<8} {:-<23} {:-<23} {:-<6} {:-<9}", "", "", "", "", "", "").trim_end());
    out.push('\n');
    for a in &report.aggregates {
        out.push_str(&format!(
            "{:<28} {:>8} {:>23} {:>23} {:>6} {:>9.2}\n",
            truncate(&format!("{} {}", a.region, a.region_name), 28),
            a.households,
            fmt_pcts(&a.percentages_a),
            fmt_pcts(&a.percentages_b),
            a.divergent,
            a.mean_income_per_capita
        ));
    }

    let ranked = rank_regions(report, top_n, 1);
    if !ranked.is_empty() {
        out.push_str("\nMost vulnerable regions (High + VeryHigh share):\n");
        for (i, r) in ranked.iter().enumerate() {
            out.push_str(&format!(
                "{:>2}. {:<24} A={:.1}% B={:.1}% (n={})\n",
                i + 1,
                truncate(&r.region_name, 24),
                r.high_share_a,
                r.high_share_b,
                r.households
            ));
        }
    }
    out
}

pub fn format_calibration(cal: &Calibration, target: &[f64; VulnerabilityLabel::COUNT]) -> String {
    let w = &cal.weights;
    let mut out = String::new();
    out.push_str(&format!("Calibrated on n={} households\n", cal.n));
    out.push_str(&format!(
        "Income reference: mean={:.2} std={:.2}\n",
        w.income_reference_mean, w.income_reference_std
    ));
    out.push_str(&format!("Income weight: {:.3} | offset: {:.3}\n", w.income_per_capita, w.offset));
    out.push_str(&format!("{:<10} {:>8} {:>8} {:>10}\n", "tier", "target", "fitted", "baseline"));
    for label in VulnerabilityLabel::ALL {
        let k = label.index();
        out.push_str(&format!(
            "{:<10} {:>7.1}% {:>7.1}% {:>9.1}%\n",
            label.display_name(),
            100.0 * target[k],
            100.0 * cal.distribution[k],
            100.0 * cal.baseline_distribution[k]
        ));
    }
    out.push_str(&format!(
        "L1 error: fitted={:.4} baseline={:.4}\n",
        cal.l1_error, cal.baseline_error
    ));
    out
}

/// Grid-search table, best point marked with `*`.
pub fn format_tuning(tuning: &TuningResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Bagging grid search ({} points)\n", tuning.candidates.len()));
    out.push_str(&format!(
        "  {:>6} {:>6} {:>5} {:>9} {:>7}\n",
        "trees", "depth", "leaf", "cv mean", "cv std"
    ));
    for (idx, c) in tuning.candidates.iter().enumerate() {
        let mark = if idx == tuning.best_index { '*' } else { ' ' };
        out.push_str(&format!(
            "{mark} {:>6} {:>6} {:>5} {:>9.4} {:>7.4}\n",
            c.params.n_trees, c.params.max_depth, c.params.min_samples_leaf, c.cv.mean, c.cv.std
        ));
    }
    out
}

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { 100.0 * part as f64 / total as f64 }
}

fn fmt_counts(counts: &[u64; VulnerabilityLabel::COUNT]) -> String {
    VulnerabilityLabel::ALL
        .iter()
        .map(|l| format!("{}={}", l.display_name(), counts[l.index()]))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fmt_pcts(p: &[f64; VulnerabilityLabel::COUNT]) -> String {
    p.iter().map(|v| format!("{v:.0}")).collect::<Vec<_>>().join("/")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
