//! Merge of the two classifier outputs for one household.
//!
//! The combiner never picks a winner: both predictions are kept, disagreement
//! is flagged, and disagreeing results are marked for analyst review. The
//! narrative collaborator is an injected [`NarrativeGenerator`]; any failure of
//! it degrades to `narrative = None` plus a warning and never fails the merge.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    ClassifierPrediction, CombinedResult, HouseholdRecord, NarrativePolicy, NarrativeStatus,
};
use crate::error::NarrativeFailure;
use crate::features::income_per_capita;

/// Default upper bound on one narrative call.
pub const DEFAULT_NARRATIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of narrative requests in flight during a batch.
pub const DEFAULT_NARRATIVE_WORKERS: usize = 8;

/// Everything the narrative collaborator gets to see: the raw attributes and
/// both predictions. Nothing else about the pipeline leaks to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativePayload {
    pub record: HouseholdRecord,
    /// `None` when the record has no usable household size.
    pub income_per_capita: Option<f64>,
    pub prediction_a: ClassifierPrediction,
    pub prediction_b: ClassifierPrediction,
    pub divergent: bool,
}

impl NarrativePayload {
    pub fn for_result(result: &CombinedResult) -> Self {
        Self {
            record: result.record.clone(),
            income_per_capita: income_per_capita(&result.record).ok(),
            prediction_a: result.prediction_a.clone(),
            prediction_b: result.prediction_b.clone(),
            divergent: result.divergent,
        }
    }
}

/// External text-generation capability.
pub trait NarrativeGenerator: Send + Sync {
    fn generate(&self, payload: &NarrativePayload) -> Result<String, NarrativeFailure>;
}

#[derive(Clone)]
pub struct MetaCombiner {
    generator: Option<Arc<dyn NarrativeGenerator>>,
    policy: NarrativePolicy,
    timeout: Duration,
    workers: usize,
}

impl std::fmt::Debug for MetaCombiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaCombiner")
            .field("generator", &self.generator.is_some())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("workers", &self.workers)
            .finish()
    }
}

impl Default for MetaCombiner {
    fn default() -> Self {
        Self::new(NarrativePolicy::Never)
    }
}

impl MetaCombiner {
    /// Combiner without a narrative collaborator.
    pub fn new(policy: NarrativePolicy) -> Self {
        Self {
            generator: None,
            policy,
            timeout: DEFAULT_NARRATIVE_TIMEOUT,
            workers: DEFAULT_NARRATIVE_WORKERS,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn NarrativeGenerator>, timeout: Duration) -> Self {
        self.generator = Some(generator);
        self.timeout = timeout;
        self
    }

    /// Cap on narrative requests in flight at once in [`MetaCombiner::narrate_all`].
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn policy(&self) -> NarrativePolicy {
        self.policy
    }

    pub fn wants_narrative(&self, divergent: bool) -> bool {
        match self.policy {
            NarrativePolicy::Never => false,
            NarrativePolicy::Divergent => divergent,
            NarrativePolicy::Always => true,
        }
    }

    /// Merge both predictions without contacting the narrative collaborator.
    pub fn merge(
        &self,
        prediction_a: ClassifierPrediction,
        prediction_b: ClassifierPrediction,
        record: &HouseholdRecord,
    ) -> CombinedResult {
        let divergent = prediction_a.label != prediction_b.label;
        CombinedResult {
            prediction_a,
            prediction_b,
            divergent,
            review_required: divergent,
            narrative: None,
            narrative_status: NarrativeStatus::NotRequested,
            record: record.clone(),
        }
    }

    /// Merge and, when the policy asks for it, wait up to `timeout` for a narrative.
    pub fn combine(
        &self,
        prediction_a: ClassifierPrediction,
        prediction_b: ClassifierPrediction,
        record: &HouseholdRecord,
    ) -> CombinedResult {
        let mut result = self.merge(prediction_a, prediction_b, record);
        if self.wants_narrative(result.divergent) {
            let outcome = self.request_narrative(NarrativePayload::for_result(&result));
            settle(&mut result, outcome);
        }
        result
    }

    /// Attach narratives to already merged results.
    ///
    /// At most `workers` requests run at once and all of them share a single
    /// deadline of `timeout` from the call, so the whole set costs at most one
    /// timeout however many results need a narrative. Requests that have not
    /// finished (or not started) by then are reported as timed out.
    pub fn narrate_all<'a, I>(&self, results: I)
    where
        I: IntoIterator<Item = &'a mut CombinedResult>,
    {
        let pending: Vec<&mut CombinedResult> = results
            .into_iter()
            .filter(|r| self.wants_narrative(r.divergent))
            .collect();
        if pending.is_empty() {
            return;
        }
        let Some(generator) = self.generator.clone() else {
            for result in pending {
                settle(result, Err(NarrativeFailure::NotConfigured));
            }
            return;
        };

        let payloads: Arc<Vec<NarrativePayload>> =
            Arc::new(pending.iter().map(|r| NarrativePayload::for_result(r)).collect());
        let deadline = Instant::now() + self.timeout;
        let next = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let mut spawned = 0usize;
        for _ in 0..self.workers.min(payloads.len()) {
            let generator = Arc::clone(&generator);
            let payloads = Arc::clone(&payloads);
            let next = Arc::clone(&next);
            let tx = tx.clone();
            let worker = thread::Builder::new()
                .name("narrative".to_string())
                .spawn(move || {
                    while Instant::now() < deadline {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(payload) = payloads.get(i) else {
                            break;
                        };
                        if tx.send((i, generator.generate(payload))).is_err() {
                            break;
                        }
                    }
                });
            match worker {
                Ok(_) => spawned += 1,
                Err(e) => warn!(error = %e, "could not spawn narrative worker"),
            }
        }
        drop(tx);

        let mut outcomes: Vec<Option<Result<String, NarrativeFailure>>> =
            (0..payloads.len()).map(|_| None).collect();
        let mut received = 0usize;
        while received < outcomes.len() {
            let wait = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok((i, outcome)) => {
                    if let Some(slot) = outcomes.get_mut(i) {
                        *slot = Some(outcome);
                        received += 1;
                    }
                }
                Err(_) => break,
            }
        }
        debug!(
            requested = outcomes.len(),
            finished = received,
            workers = spawned,
            "narrative requests settled"
        );

        for (result, outcome) in pending.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                if spawned == 0 {
                    Err(NarrativeFailure::Unavailable("no narrative worker could start".to_string()))
                } else {
                    Err(NarrativeFailure::Timeout)
                }
            });
            settle(result, outcome);
        }
    }

    /// Run the generator on its own thread so a hung call costs at most `timeout`.
    /// A timed-out worker is left to finish on its own; its result is dropped.
    fn request_narrative(&self, payload: NarrativePayload) -> Result<String, NarrativeFailure> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(NarrativeFailure::NotConfigured)?
            .clone();

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("narrative".to_string())
            .spawn(move || {
                let _ = tx.send(generator.generate(&payload));
            })
            .map_err(|e| NarrativeFailure::Unavailable(format!("could not spawn worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => {
                debug!(ok = result.is_ok(), "narrative call finished");
                result
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Err(NarrativeFailure::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(NarrativeFailure::Unavailable(
                "narrative worker exited without a result".to_string(),
            )),
        }
    }
}

fn settle(result: &mut CombinedResult, outcome: Result<String, NarrativeFailure>) {
    match outcome {
        Ok(text) => {
            result.narrative = Some(text);
            result.narrative_status = NarrativeStatus::Generated;
        }
        Err(failure) => {
            warn!(%failure, divergent = result.divergent, "narrative unavailable; continuing without it");
            result.narrative = None;
            result.narrative_status = NarrativeStatus::Unavailable(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelKind, VulnerabilityLabel};
    use crate::features::engine::tests::reference_record;

    fn prediction(model: ModelKind, label: VulnerabilityLabel) -> ClassifierPrediction {
        let mut probabilities = [0.1; 4];
        probabilities[label.index()] = 0.7;
        ClassifierPrediction {
            model,
            label,
            probabilities,
        }
    }

    struct Echo(AtomicUsize);

    impl NarrativeGenerator for Echo {
        fn generate(&self, payload: &NarrativePayload) -> Result<String, NarrativeFailure> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "A={} B={}",
                payload.prediction_a.label, payload.prediction_b.label
            ))
        }
    }

    struct Slow;

    impl NarrativeGenerator for Slow {
        fn generate(&self, _: &NarrativePayload) -> Result<String, NarrativeFailure> {
            thread::sleep(Duration::from_millis(500));
            Ok("too late".to_string())
        }
    }

    struct OutOfQuota;

    impl NarrativeGenerator for OutOfQuota {
        fn generate(&self, _: &NarrativePayload) -> Result<String, NarrativeFailure> {
            Err(NarrativeFailure::Quota)
        }
    }

    #[test]
    fn divergent_iff_labels_differ() {
        let combiner = MetaCombiner::default();
        let record = reference_record();
        for a in VulnerabilityLabel::ALL {
            for b in VulnerabilityLabel::ALL {
                let result = combiner.combine(
                    prediction(ModelKind::Bagging, a),
                    prediction(ModelKind::Boosting, b),
                    &record,
                );
                assert_eq!(result.divergent, a != b, "{a} vs {b}");
                assert_eq!(result.review_required, result.divergent);
                assert_eq!(result.prediction_a.label, a);
                assert_eq!(result.prediction_b.label, b);
                assert_eq!(result.narrative_status, NarrativeStatus::NotRequested);
                assert!(result.narrative.is_none());
            }
        }
    }

    #[test]
    fn divergent_policy_only_calls_generator_on_disagreement() {
        let echo = Arc::new(Echo(AtomicUsize::new(0)));
        let combiner = MetaCombiner::new(NarrativePolicy::Divergent)
            .with_generator(echo.clone(), Duration::from_secs(5));
        let record = reference_record();

        let agree = combiner.combine(
            prediction(ModelKind::Bagging, VulnerabilityLabel::High),
            prediction(ModelKind::Boosting, VulnerabilityLabel::High),
            &record,
        );
        assert!(agree.narrative.is_none());
        assert_eq!(echo.0.load(Ordering::SeqCst), 0);

        let disagree = combiner.combine(
            prediction(ModelKind::Bagging, VulnerabilityLabel::High),
            prediction(ModelKind::Boosting, VulnerabilityLabel::VeryHigh),
            &record,
        );
        assert_eq!(disagree.narrative.as_deref(), Some("A=High B=VeryHigh"));
        assert_eq!(disagree.narrative_status, NarrativeStatus::Generated);
        assert_eq!(echo.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_generator_times_out_without_failing_the_merge() {
        let combiner = MetaCombiner::new(NarrativePolicy::Always)
            .with_generator(Arc::new(Slow), Duration::from_millis(20));
        let result = combiner.combine(
            prediction(ModelKind::Bagging, VulnerabilityLabel::High),
            prediction(ModelKind::Boosting, VulnerabilityLabel::High),
            &reference_record(),
        );
        assert!(result.narrative.is_none());
        assert_eq!(
            result.narrative_status,
            NarrativeStatus::Unavailable(NarrativeFailure::Timeout)
        );
        assert_eq!(result.prediction_a.label, VulnerabilityLabel::High);
    }

    #[test]
    fn failures_and_missing_generator_degrade_to_none() {
        let record = reference_record();
        let a = prediction(ModelKind::Bagging, VulnerabilityLabel::Low);
        let b = prediction(ModelKind::Boosting, VulnerabilityLabel::Medium);

        let quota = MetaCombiner::new(NarrativePolicy::Always)
            .with_generator(Arc::new(OutOfQuota), Duration::from_secs(1))
            .combine(a.clone(), b.clone(), &record);
        assert!(quota.narrative.is_none());
        assert_eq!(
            quota.narrative_status,
            NarrativeStatus::Unavailable(NarrativeFailure::Quota)
        );

        let unconfigured = MetaCombiner::new(NarrativePolicy::Always).combine(a, b, &record);
        assert!(unconfigured.divergent);
        assert_eq!(
            unconfigured.narrative_status,
            NarrativeStatus::Unavailable(NarrativeFailure::NotConfigured)
        );
    }

    fn merged(combiner: &MetaCombiner, a: VulnerabilityLabel, b: VulnerabilityLabel) -> CombinedResult {
        combiner.merge(
            prediction(ModelKind::Bagging, a),
            prediction(ModelKind::Boosting, b),
            &reference_record(),
        )
    }

    #[test]
    fn narrate_all_shares_one_deadline_across_slow_requests() {
        let combiner = MetaCombiner::new(NarrativePolicy::Always)
            .with_generator(Arc::new(Slow), Duration::from_millis(50))
            .with_workers(4);
        let mut results: Vec<CombinedResult> = (0..20)
            .map(|_| merged(&combiner, VulnerabilityLabel::High, VulnerabilityLabel::Low))
            .collect();

        let started = Instant::now();
        combiner.narrate_all(results.iter_mut());
        let elapsed = started.elapsed();

        // 20 sequential waits would take a full second; one shared deadline does not.
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
        for result in &results {
            assert!(result.narrative.is_none());
            assert_eq!(
                result.narrative_status,
                NarrativeStatus::Unavailable(NarrativeFailure::Timeout)
            );
            assert!(result.divergent);
        }
    }

    #[test]
    fn narrate_all_follows_the_policy_per_result() {
        let echo = Arc::new(Echo(AtomicUsize::new(0)));
        let combiner = MetaCombiner::new(NarrativePolicy::Divergent)
            .with_generator(echo.clone(), Duration::from_secs(5))
            .with_workers(2);
        let mut results = vec![
            merged(&combiner, VulnerabilityLabel::Low, VulnerabilityLabel::Low),
            merged(&combiner, VulnerabilityLabel::Low, VulnerabilityLabel::Medium),
            merged(&combiner, VulnerabilityLabel::High, VulnerabilityLabel::High),
            merged(&combiner, VulnerabilityLabel::VeryHigh, VulnerabilityLabel::High),
        ];
        combiner.narrate_all(results.iter_mut());

        assert_eq!(echo.0.load(Ordering::SeqCst), 2);
        assert_eq!(results[0].narrative_status, NarrativeStatus::NotRequested);
        assert_eq!(results[1].narrative.as_deref(), Some("A=Low B=Medium"));
        assert_eq!(results[2].narrative_status, NarrativeStatus::NotRequested);
        assert_eq!(results[3].narrative.as_deref(), Some("A=VeryHigh B=High"));
        assert_eq!(results[3].narrative_status, NarrativeStatus::Generated);
    }

    #[test]
    fn narrate_all_without_generator_reports_not_configured() {
        let combiner = MetaCombiner::new(NarrativePolicy::Always);
        let mut results = vec![merged(&combiner, VulnerabilityLabel::Low, VulnerabilityLabel::Low)];
        combiner.narrate_all(results.iter_mut());
        assert_eq!(
            results[0].narrative_status,
            NarrativeStatus::Unavailable(NarrativeFailure::NotConfigured)
        );
    }
}
