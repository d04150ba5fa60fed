use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ScoreInput, ScoringWeights};

/// Service for ranking pending merge requests by urgency
///
/// Score formula:
/// `base + priority_weight * (max_tier - tier) + age_weight * age_h
///  + retry_weight * min(retries, cap) + convoy_weight * convoy_age_h`
///
/// Higher scores are processed first. Negative ages count as zero.
#[derive(Debug, Clone)]
pub struct PriorityScorer {
    weights: ScoringWeights,
}

impl Default for PriorityScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityScorer {
    /// Create a scorer with default weights
    pub fn new() -> Self {
        Self {
            weights: ScoringWeights::default(),
        }
    }

    /// Create a scorer with custom weights
    pub fn with_weights(weights: ScoringWeights) -> DomainResult<Self> {
        Self::validate(&weights)?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Reject weights that would make the score decrease as an input grows.
    pub fn validate(weights: &ScoringWeights) -> DomainResult<()> {
        let named = [
            ("base", weights.base),
            ("priority_weight", weights.priority_weight),
            ("age_weight_per_hour", weights.age_weight_per_hour),
            ("retry_weight", weights.retry_weight),
            ("convoy_age_weight_per_hour", weights.convoy_age_weight_per_hour),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(DomainError::ValidationFailed(format!(
                    "scoring weight {name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Score one pending request
    pub fn score(&self, input: &ScoreInput) -> f64 {
        let w = &self.weights;

        let tier = input.priority.min(w.max_tier);
        let priority_boost = w.priority_weight * f64::from(w.max_tier - tier);

        let age_hours = hours_between(input.created_at, input.now);
        let age_boost = w.age_weight_per_hour * age_hours;

        let retries = input.retry_count.min(w.max_retry_boost_count);
        let retry_boost = w.retry_weight * f64::from(retries);

        let convoy_boost = input
            .convoy_created_at
            .map(|convoy| w.convoy_age_weight_per_hour * hours_between(convoy, input.now))
            .unwrap_or(0.0);

        w.base + priority_boost + age_boost + retry_boost + convoy_boost
    }
}

fn hours_between(since: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let secs = (now - since).num_seconds().max(0);
    secs as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_fresh_request_scores_base_plus_tier() {
        let scorer = PriorityScorer::new();
        let now = Utc::now();

        let score = scorer.score(&ScoreInput::new(4, now, now));
        assert_eq!(score, 1000.0);

        let score = scorer.score(&ScoreInput::new(0, now, now));
        assert_eq!(score, 1400.0);
    }

    #[test]
    fn test_tier_above_max_is_clamped() {
        let scorer = PriorityScorer::new();
        let now = Utc::now();
        assert_eq!(
            scorer.score(&ScoreInput::new(9, now, now)),
            scorer.score(&ScoreInput::new(4, now, now))
        );
    }

    #[test]
    fn test_age_adds_per_hour() {
        let scorer = PriorityScorer::new();
        let now = Utc::now();
        let score = scorer.score(&ScoreInput::new(4, now - Duration::hours(3), now));
        assert!((score - 1003.0).abs() < 1e-9);
    }

    #[test]
    fn test_future_creation_counts_as_zero_age() {
        let scorer = PriorityScorer::new();
        let now = Utc::now();
        let score = scorer.score(&ScoreInput::new(4, now + Duration::hours(3), now));
        assert_eq!(score, 1000.0);
    }

    #[test]
    fn test_retry_boost_is_capped() {
        let scorer = PriorityScorer::new();
        let now = Utc::now();
        let capped = scorer.score(&ScoreInput::new(4, now, now).with_retries(30));
        let beyond = scorer.score(&ScoreInput::new(4, now, now).with_retries(500));
        assert_eq!(capped, beyond);
        assert_eq!(capped, 1300.0);
    }

    #[test]
    fn test_convoy_age_boost() {
        let scorer = PriorityScorer::new();
        let now = Utc::now();
        let plain = scorer.score(&ScoreInput::new(2, now, now));
        let convoy =
            scorer.score(&ScoreInput::new(2, now, now).with_convoy(now - Duration::hours(2)));
        assert!((convoy - plain - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_with_weights_rejects_negative() {
        let weights = ScoringWeights {
            retry_weight: -1.0,
            ..ScoringWeights::default()
        };
        let err = PriorityScorer::with_weights(weights).unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(msg) if msg.contains("retry_weight")));
    }

    #[test]
    fn test_with_weights_custom() {
        let weights = ScoringWeights {
            priority_weight: 0.0,
            age_weight_per_hour: 0.0,
            ..ScoringWeights::default()
        };
        let scorer = PriorityScorer::with_weights(weights).unwrap();
        let now = Utc::now();
        assert_eq!(
            scorer.score(&ScoreInput::new(0, now - Duration::hours(5), now)),
            1000.0
        );
    }
}
