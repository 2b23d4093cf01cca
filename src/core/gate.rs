/// Outcome of the eligibility check for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Eligible,
    SkipTooYoung,
    SkipInFlight,
}

/// Decide whether a token may be dispatched for vetting.
///
/// An in-flight submission always wins over the age check, so a token that
/// is both young and already submitted reports `SkipInFlight`. A token
/// whose age could not be established counts as too young; it will be
/// retried once some provider reports a creation timestamp.
pub fn decide(age_days: Option<i64>, has_in_flight: bool, min_age_days: i64) -> GateDecision {
    if has_in_flight {
        return GateDecision::SkipInFlight;
    }
    match age_days {
        Some(age) if age >= min_age_days => GateDecision::Eligible,
        _ => GateDecision::SkipTooYoung,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn young_token_is_skipped() {
        assert_eq!(decide(Some(3), false, 14), GateDecision::SkipTooYoung);
        assert_eq!(decide(Some(13), false, 14), GateDecision::SkipTooYoung);
    }

    #[test]
    fn aged_token_is_eligible() {
        assert_eq!(decide(Some(14), false, 14), GateDecision::Eligible);
        assert_eq!(decide(Some(365), false, 14), GateDecision::Eligible);
    }

    #[test]
    fn unknown_age_is_skipped() {
        assert_eq!(decide(None, false, 14), GateDecision::SkipTooYoung);
    }

    #[test]
    fn negative_age_is_skipped() {
        // Provider clock ahead of ours: creation timestamp in the future.
        assert_eq!(decide(Some(-1), false, 14), GateDecision::SkipTooYoung);
    }

    #[test]
    fn in_flight_takes_precedence() {
        assert_eq!(decide(Some(365), true, 14), GateDecision::SkipInFlight);
        assert_eq!(decide(Some(3), true, 14), GateDecision::SkipInFlight);
        assert_eq!(decide(None, true, 14), GateDecision::SkipInFlight);
    }

    #[test]
    fn zero_minimum_admits_fresh_tokens() {
        assert_eq!(decide(Some(0), false, 0), GateDecision::Eligible);
    }
}
