//! Loss-risk assessment for tracked items.
//!
//! The scorer is a narrow seam: the rest of the crate treats it as opaque,
//! and applications substitute a model-backed implementation. The bundled
//! [`ThresholdScorer`] is a deterministic heuristic over the same feature
//! vector, so pipelines compile and test without an inference runtime.

use serde::{Deserialize, Serialize};

/// Usage-pattern features describing one item at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFeatures {
    /// Hour of day, 0-23.
    pub hour_of_day: u8,
    /// Day of week, 0 (Sunday) through 6 (Saturday).
    pub day_of_week: u8,
    /// Normalized movement frequency, 0.0-1.0.
    pub movement_frequency: f64,
    /// Battery percentage, 0-100.
    pub battery_percent: u8,
    /// Normalized distance from the user, 0.0-1.0.
    pub distance_from_user: f64,
}

impl RiskFeatures {
    /// Feature vector normalized to [0, 1], clamping out-of-range inputs.
    pub fn normalized(&self) -> [f64; 5] {
        [
            f64::from(self.hour_of_day.min(23)) / 24.0,
            f64::from(self.day_of_week.min(6)) / 6.0,
            self.movement_frequency.clamp(0.0, 1.0),
            f64::from(self.battery_percent.min(100)) / 100.0,
            self.distance_from_user.clamp(0.0, 1.0),
        ]
    }
}

/// Coarse risk bucket derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of scoring one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Risk of loss in [0, 1]; higher is worse.
    pub risk_score: f64,
    /// Bucketed risk level.
    pub risk_level: RiskLevel,
    /// Human-readable follow-up, present for medium and high risk.
    pub suggested_action: Option<String>,
}

impl RiskAssessment {
    /// Bucket a raw score: above 0.7 is high, above 0.3 medium, else low.
    pub fn from_score(risk_score: f64) -> Self {
        let (risk_level, suggested_action) = if risk_score > 0.7 {
            (
                RiskLevel::High,
                Some("Set an alert and check the item location immediately".to_string()),
            )
        } else if risk_score > 0.3 {
            (RiskLevel::Medium, Some("Keep an eye on this item".to_string()))
        } else {
            (RiskLevel::Low, None)
        };

        Self {
            risk_score,
            risk_level,
            suggested_action,
        }
    }
}

/// Scores an item's risk of loss from its usage features.
pub trait RiskScorer: Send + Sync {
    /// Assess one feature vector.
    fn score(&self, features: &RiskFeatures) -> RiskAssessment;
}

/// Weighted-heuristic scorer.
///
/// Distance dominates, a draining battery and low movement add to it. The
/// weights sum to one so the score stays in [0, 1].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdScorer;

impl ThresholdScorer {
    const DISTANCE_WEIGHT: f64 = 0.5;
    const BATTERY_WEIGHT: f64 = 0.3;
    const MOVEMENT_WEIGHT: f64 = 0.2;

    /// Create a new scorer.
    pub fn new() -> Self {
        Self
    }
}

impl RiskScorer for ThresholdScorer {
    fn score(&self, features: &RiskFeatures) -> RiskAssessment {
        let [_, _, movement, battery, distance] = features.normalized();

        let risk_score = Self::DISTANCE_WEIGHT * distance
            + Self::BATTERY_WEIGHT * (1.0 - battery)
            + Self::MOVEMENT_WEIGHT * (1.0 - movement);

        RiskAssessment::from_score(risk_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(movement: f64, battery: u8, distance: f64) -> RiskFeatures {
        RiskFeatures {
            hour_of_day: 12,
            day_of_week: 3,
            movement_frequency: movement,
            battery_percent: battery,
            distance_from_user: distance,
        }
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(RiskAssessment::from_score(0.0).risk_level, RiskLevel::Low);
        assert_eq!(RiskAssessment::from_score(0.3).risk_level, RiskLevel::Low);
        assert_eq!(
            RiskAssessment::from_score(0.31).risk_level,
            RiskLevel::Medium
        );
        assert_eq!(
            RiskAssessment::from_score(0.7).risk_level,
            RiskLevel::Medium
        );
        assert_eq!(RiskAssessment::from_score(0.71).risk_level, RiskLevel::High);
    }

    #[test]
    fn test_actions_accompany_elevated_risk() {
        assert!(RiskAssessment::from_score(0.2).suggested_action.is_none());
        assert!(RiskAssessment::from_score(0.5).suggested_action.is_some());
        assert!(
            RiskAssessment::from_score(0.9)
                .suggested_action
                .as_deref()
                .unwrap()
                .contains("immediately")
        );
    }

    #[test]
    fn test_idle_item_far_away_scores_high() {
        let assessment = ThresholdScorer::new().score(&features(0.0, 5, 1.0));
        assert_eq!(assessment.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_active_item_nearby_scores_low() {
        let assessment = ThresholdScorer::new().score(&features(0.9, 95, 0.05));
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        for (movement, battery, distance) in
            [(0.0, 0, 1.0), (1.0, 100, 0.0), (-5.0, 200, 7.0)]
        {
            let score = ThresholdScorer::new()
                .score(&features(movement, battery, distance))
                .risk_score;
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_normalization_clamps() {
        let out_of_range = RiskFeatures {
            hour_of_day: 99,
            day_of_week: 9,
            movement_frequency: 2.0,
            battery_percent: 250,
            distance_from_user: -1.0,
        };
        for value in out_of_range.normalized() {
            assert!((0.0..=1.0).contains(&value));
        }
    }
}
