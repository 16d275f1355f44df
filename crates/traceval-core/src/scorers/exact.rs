use anyhow::Result;
use async_trait::async_trait;
use traceval_types::{EvaluationItem, ScorerResult};

use crate::scorer::Scorer;

/// `output == expected_output` after trimming. Items missing either side get an error result.
pub struct ExactMatchScorer;

#[async_trait]
impl Scorer for ExactMatchScorer {
	fn name(&self) -> &'static str {
		"exact_match"
	}

	async fn score(&self, item: &EvaluationItem) -> Result<ScorerResult> {
		let (Some(output), Some(expected)) = (item.output(), item.expected_output()) else {
			return Ok(ScorerResult::failure(
				self.name(),
				"item has no output or no expected output",
			));
		};

		let passed = output.trim() == expected.trim();
		Ok(ScorerResult::scored(self.name(), if passed { 1.0 } else { 0.0 }, passed))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn item(output: &str, expected: &str) -> EvaluationItem {
		EvaluationItem::new("span_0", "q")
			.unwrap()
			.with_output(output)
			.with_expected_output(expected)
			.unwrap()
	}

	#[tokio::test]
	async fn test_exact_match_trims() {
		let result = ExactMatchScorer.score(&item(" Paris\n", "Paris")).await.unwrap();
		assert!(result.passed);
		assert_eq!(result.numeric_score, Some(1.0));
	}

	#[tokio::test]
	async fn test_exact_mismatch() {
		let result = ExactMatchScorer.score(&item("paris", "Paris")).await.unwrap();
		assert!(!result.passed);
		assert_eq!(result.numeric_score, Some(0.0));
		assert!(!result.is_error());
	}

	#[tokio::test]
	async fn test_missing_output_is_error() {
		let item = EvaluationItem::new("span_0", "q").unwrap();
		let result = ExactMatchScorer.score(&item).await.unwrap();
		assert!(result.is_error());
		assert!(!result.counts_as_pass());
	}
}
