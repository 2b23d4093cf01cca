pub mod aggregate;
pub mod gate;
pub mod pipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TierThresholds;

/// What a single provider was able to report for a token. Every field is
/// optional; the aggregator fills gaps from lower-priority providers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialSnapshot {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u8>,
    pub token_created_at: Option<DateTime<Utc>>,
    pub liquidity_usd: Option<f64>,
    pub top10_holder_pct: Option<f64>,
    pub mint_authority_active: Option<bool>,
    pub freeze_authority_active: Option<bool>,
    pub lp_burned_pct: Option<f64>,
}

impl PartialSnapshot {
    /// True when the provider contributed nothing at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The merged point-in-time view of a token's market/on-chain attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub address: String,
    pub chain: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u8>,
    pub token_created_at: Option<DateTime<Utc>>,
    /// Whole days since creation, truncated (13.99 days old → 13).
    pub age_days: Option<i64>,
    pub liquidity_usd: Option<f64>,
    pub top10_holder_pct: Option<f64>,
    pub mint_authority_active: Option<bool>,
    pub freeze_authority_active: Option<bool>,
    pub lp_burned_pct: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

/// Where a listing sits in the vetting lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VettingState {
    NotEligible,
    PendingVetting,
    Vetted,
    VettingFailed,
}

impl VettingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VettingState::NotEligible => "not_eligible",
            VettingState::PendingVetting => "pending_vetting",
            VettingState::Vetted => "vetted",
            VettingState::VettingFailed => "vetting_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_eligible" => Some(VettingState::NotEligible),
            "pending_vetting" => Some(VettingState::PendingVetting),
            "vetted" => Some(VettingState::Vetted),
            "vetting_failed" => Some(VettingState::VettingFailed),
            _ => None,
        }
    }
}

/// Risk tier derived from the external workflow's numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Map a score onto a tier via the configured boundaries. Total over
    /// all finite scores: at-or-above a boundary lands in that tier,
    /// everything below `medium` is Low.
    pub fn from_score(score: f64, thresholds: &TierThresholds) -> Self {
        if score >= thresholds.critical {
            RiskTier::Critical
        } else if score >= thresholds.high {
            RiskTier::High
        } else if score >= thresholds.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskTier::Low),
            "medium" => Some(RiskTier::Medium),
            "high" => Some(RiskTier::High),
            "critical" => Some(RiskTier::Critical),
            _ => None,
        }
    }
}

/// State of an outbound vetting submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
    InFlight,
    Completed,
    Expired,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::InFlight => "in_flight",
            SubmissionState::Completed => "completed",
            SubmissionState::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_flight" => Some(SubmissionState::InFlight),
            "completed" => Some(SubmissionState::Completed),
            "expired" => Some(SubmissionState::Expired),
            _ => None,
        }
    }
}

/// The persisted catalog record, one per (address, chain).
///
/// Invariant maintained by the store: `risk_score` is non-null exactly when
/// `vetting_state == Vetted`. Readers can rely on that without re-checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub address: String,
    pub chain: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub decimals: Option<u8>,
    pub token_created_at: Option<DateTime<Utc>>,
    pub liquidity_usd: Option<f64>,
    pub top10_holder_pct: Option<f64>,
    pub mint_authority_active: Option<bool>,
    pub freeze_authority_active: Option<bool>,
    pub lp_burned_pct: Option<f64>,
    pub risk_score: Option<f64>,
    pub risk_tier: Option<RiskTier>,
    pub vetting_state: VettingState,
    pub last_evaluated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Correlates an outbound dispatch with its asynchronous result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VettingSubmission {
    pub id: String,
    pub address: String,
    pub chain: String,
    pub state: SubmissionState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The two periodic cycle types the scheduler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Discovery,
    Sweep,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleKind::Discovery => "discovery",
            CycleKind::Sweep => "sweep",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> TierThresholds {
        TierThresholds {
            critical: 80.0,
            high: 60.0,
            medium: 40.0,
        }
    }

    #[test]
    fn tier_mapping_boundaries() {
        let t = thresholds();
        assert_eq!(RiskTier::from_score(80.0, &t), RiskTier::Critical);
        assert_eq!(RiskTier::from_score(79.99, &t), RiskTier::High);
        assert_eq!(RiskTier::from_score(60.0, &t), RiskTier::High);
        assert_eq!(RiskTier::from_score(59.99, &t), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(40.0, &t), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(39.99, &t), RiskTier::Low);
    }

    #[test]
    fn tier_mapping_is_total_over_range() {
        let t = thresholds();
        // Every score in 0..=100 maps to exactly one tier, no gaps.
        for i in 0..=1000 {
            let score = i as f64 / 10.0;
            let tier = RiskTier::from_score(score, &t);
            let expected = if score >= 80.0 {
                RiskTier::Critical
            } else if score >= 60.0 {
                RiskTier::High
            } else if score >= 40.0 {
                RiskTier::Medium
            } else {
                RiskTier::Low
            };
            assert_eq!(tier, expected, "score {score}");
        }
    }

    #[test]
    fn tier_mapping_extremes() {
        let t = thresholds();
        assert_eq!(RiskTier::from_score(0.0, &t), RiskTier::Low);
        assert_eq!(RiskTier::from_score(100.0, &t), RiskTier::Critical);
        assert_eq!(RiskTier::from_score(-5.0, &t), RiskTier::Low);
        assert_eq!(RiskTier::from_score(250.0, &t), RiskTier::Critical);
    }

    #[test]
    fn vetting_state_roundtrip() {
        for state in [
            VettingState::NotEligible,
            VettingState::PendingVetting,
            VettingState::Vetted,
            VettingState::VettingFailed,
        ] {
            assert_eq!(VettingState::parse(state.as_str()), Some(state));
        }
        assert_eq!(VettingState::parse("bogus"), None);
    }

    #[test]
    fn submission_state_roundtrip() {
        for state in [
            SubmissionState::InFlight,
            SubmissionState::Completed,
            SubmissionState::Expired,
        ] {
            assert_eq!(SubmissionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SubmissionState::parse(""), None);
    }

    #[test]
    fn risk_tier_roundtrip() {
        for tier in [
            RiskTier::Low,
            RiskTier::Medium,
            RiskTier::High,
            RiskTier::Critical,
        ] {
            assert_eq!(RiskTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(RiskTier::parse("severe"), None);
    }
}
