//! Batch summary statistics.

use std::collections::BTreeMap;

use traceval_types::{BatchStatus, BatchSummary, EvaluationItem, PipelineState, ScorerStats};

/// Scorers whose scores are spread over [0, 1] and get a histogram.
pub const DISTRIBUTED_SCORERS: &[&str] = &["llm_judge", "fuzzy_match"];

const BIN_EDGES: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];
const BIN_LABELS: [&str; 5] = ["0.0-0.2", "0.2-0.4", "0.4-0.6", "0.6-0.8", "0.8-1.0"];

/// Five equal-width bins over [0, 1], the last one closed on the right.
pub fn score_histogram(scores: &[f64]) -> BTreeMap<String, usize> {
    let mut bins: BTreeMap<String, usize> = BIN_LABELS.iter().map(|l| (l.to_string(), 0)).collect();
    for &score in scores {
        if !(0.0..=1.0).contains(&score) {
            continue;
        }
        let index = BIN_EDGES[..5].iter().rposition(|edge| score >= *edge).unwrap_or(0);
        if let Some(count) = bins.get_mut(BIN_LABELS[index]) {
            *count += 1;
        }
    }
    bins
}

#[derive(Default)]
struct Tally {
    passed: usize,
    failed: usize,
    errors: usize,
    scores: Vec<f64>,
}

/// Per-scorer counts and score statistics. Error results count toward `total` and
/// `errors` but never contribute a score.
pub fn scorer_stats(items: &[EvaluationItem]) -> BTreeMap<String, ScorerStats> {
    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
    for result in items.iter().flat_map(EvaluationItem::scores) {
        let tally = tallies.entry(result.scorer_name.as_str()).or_default();
        if result.is_error() {
            tally.errors += 1;
            continue;
        }
        if result.passed {
            tally.passed += 1;
        } else {
            tally.failed += 1;
        }
        if let Some(score) = result.numeric_score.filter(|s| s.is_finite()) {
            tally.scores.push(score);
        }
    }

    tallies
        .into_iter()
        .map(|(name, tally)| {
            let total = tally.passed + tally.failed + tally.errors;
            let (average_score, min_score, max_score) = if tally.scores.is_empty() {
                (0.0, 0.0, 0.0)
            } else {
                let sum: f64 = tally.scores.iter().sum();
                (
                    sum / tally.scores.len() as f64,
                    tally.scores.iter().copied().fold(f64::INFINITY, f64::min),
                    tally.scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                )
            };
            let score_distribution = (DISTRIBUTED_SCORERS.contains(&name) && !tally.scores.is_empty())
                .then(|| score_histogram(&tally.scores));

            let stats = ScorerStats {
                total,
                passed: tally.passed,
                failed: tally.failed,
                errors: tally.errors,
                accuracy: if total == 0 { 0.0 } else { tally.passed as f64 / total as f64 },
                average_score,
                min_score,
                max_score,
                score_distribution,
            };
            (name.to_string(), stats)
        })
        .collect()
}

/// PASS when every item passed all its results, FAIL when none did, PARTIAL otherwise.
pub fn batch_status(items: &[EvaluationItem]) -> BatchStatus {
    if items.is_empty() {
        return BatchStatus::NoItems;
    }
    let passed = items.iter().filter(|i| i.all_passed()).count();
    if passed == items.len() {
        BatchStatus::Pass
    } else if passed == 0 {
        BatchStatus::Fail
    } else {
        BatchStatus::Partial
    }
}

/// Mean of all non-error numeric scores, rounded to three decimals.
pub fn average_score(items: &[EvaluationItem]) -> f64 {
    let scores: Vec<f64> = items
        .iter()
        .flat_map(EvaluationItem::scores)
        .filter(|r| !r.is_error())
        .filter_map(|r| r.numeric_score)
        .filter(|s| s.is_finite())
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    (mean * 1000.0).round() / 1000.0
}

pub fn summarize(
    items: &[EvaluationItem],
    pipeline_state: PipelineState,
    stopped_at: Option<String>,
) -> BatchSummary {
    let passed = items.iter().filter(|i| i.all_passed()).count();
    BatchSummary {
        total_items: items.len(),
        passed,
        failed: items.len() - passed,
        average_score: average_score(items),
        status: batch_status(items),
        pipeline_state,
        stopped_at,
        scorers: scorer_stats(items),
    }
}
