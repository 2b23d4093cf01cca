use chrono::{DateTime, Utc};

use crate::core::{PartialSnapshot, TokenSnapshot};

/// Result of merging provider responses for one token.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    Snapshot(TokenSnapshot),
    /// No provider contributed a single field this cycle.
    Inconclusive,
}

/// Merge per-provider partials into one snapshot.
///
/// `partials` is ordered by provider priority; for every field the first
/// present value wins, a present value never yields to an absent one.
///
/// `previous_created_at` is the creation timestamp already persisted for
/// this token, if any. Once persisted it is never replaced, so a token's
/// age never moves backwards between cycles.
pub fn merge(
    address: &str,
    chain: &str,
    partials: &[PartialSnapshot],
    previous_created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> AggregateOutcome {
    if partials.iter().all(|p| p.is_empty()) {
        return AggregateOutcome::Inconclusive;
    }

    let token_created_at =
        previous_created_at.or_else(|| pick(partials, |p| p.token_created_at));
    // Truncating division: a token 13.9 days old reports 13.
    let age_days = token_created_at.map(|created| (now - created).num_days());

    AggregateOutcome::Snapshot(TokenSnapshot {
        address: address.to_string(),
        chain: chain.to_string(),
        symbol: pick(partials, |p| p.symbol.clone()),
        name: pick(partials, |p| p.name.clone()),
        decimals: pick(partials, |p| p.decimals),
        token_created_at,
        age_days,
        liquidity_usd: pick(partials, |p| p.liquidity_usd),
        top10_holder_pct: pick(partials, |p| p.top10_holder_pct),
        mint_authority_active: pick(partials, |p| p.mint_authority_active),
        freeze_authority_active: pick(partials, |p| p.freeze_authority_active),
        lp_burned_pct: pick(partials, |p| p.lp_burned_pct),
        fetched_at: now,
    })
}

fn pick<T>(partials: &[PartialSnapshot], f: impl Fn(&PartialSnapshot) -> Option<T>) -> Option<T> {
    partials.iter().find_map(f)
}
