use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::core::aggregate::{self, AggregateOutcome};
use crate::core::gate::{self, GateDecision};
use crate::core::VettingState;
use crate::db::SharedCatalog;
use crate::providers::Provider;
use crate::vetting::{DispatchError, Dispatcher, PollStats, SubmitOutcome};

/// One evaluation pass over one token: enrich, persist, gate, dispatch.
/// Failures never abort a cycle; they land in the per-token outcome and
/// the token is retried when its next cycle comes around.
pub struct Pipeline {
    providers: Vec<Arc<dyn Provider>>,
    dispatcher: Dispatcher,
    store: SharedCatalog,
    min_age_days: i64,
}

/// How one token's evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    Dispatched,
    SkippedYoung,
    SkippedInFlight,
    /// The listing already carries a verdict; only its metadata was
    /// refreshed. A verdict is never discarded by re-discovery.
    AlreadyVetted,
    Inconclusive,
    DispatchFailed,
    StoreFailed,
}

#[derive(Debug)]
pub struct EvalReport {
    pub address: String,
    pub outcome: EvalOutcome,
    pub provider_failures: usize,
}

impl Pipeline {
    /// `providers` in priority order: the first one's values win merges.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        dispatcher: Dispatcher,
        store: SharedCatalog,
        min_age_days: i64,
    ) -> Self {
        Self {
            providers,
            dispatcher,
            store,
            min_age_days,
        }
    }

    pub async fn evaluate_address(&self, chain: &str, address: &str) -> EvalReport {
        let now = Utc::now();
        let mut provider_failures = 0;

        let mut partials = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.fetch(chain, address).await {
                Ok(Some(partial)) => partials.push(partial),
                Ok(None) => {}
                Err(err) => {
                    warn!("provider {} failed for {address}: {err}", provider.name());
                    provider_failures += 1;
                }
            }
        }

        let previous = match self.store.get_listing(address, chain) {
            Ok(listing) => listing,
            Err(err) => {
                error!("catalog read failed for {address}: {err}");
                return self.report(address, EvalOutcome::StoreFailed, provider_failures);
            }
        };
        let previous_created_at = previous.as_ref().and_then(|l| l.token_created_at);

        let snap = match aggregate::merge(address, chain, &partials, previous_created_at, now) {
            AggregateOutcome::Snapshot(snap) => snap,
            AggregateOutcome::Inconclusive => {
                debug!("no provider data for {address}, recording bare listing");
                if let Err(err) = self.store.touch_listing(address, chain, now) {
                    error!("catalog write failed for {address}: {err}");
                    return self.report(address, EvalOutcome::StoreFailed, provider_failures);
                }
                return self.report(address, EvalOutcome::Inconclusive, provider_failures);
            }
        };

        if let Err(err) = self.store.upsert_listing(&snap) {
            error!("catalog write failed for {address}: {err}");
            return self.report(address, EvalOutcome::StoreFailed, provider_failures);
        }

        // A token re-surfacing in discovery (a new pair over an old mint)
        // keeps its verdict; it is refreshed, never sent back for vetting.
        if previous
            .as_ref()
            .is_some_and(|l| l.vetting_state == VettingState::Vetted)
        {
            debug!("{address} already vetted, metadata refreshed only");
            return self.report(address, EvalOutcome::AlreadyVetted, provider_failures);
        }

        let has_in_flight = match self.store.has_in_flight(address, chain) {
            Ok(v) => v,
            Err(err) => {
                error!("catalog read failed for {address}: {err}");
                return self.report(address, EvalOutcome::StoreFailed, provider_failures);
            }
        };

        let outcome = match gate::decide(snap.age_days, has_in_flight, self.min_age_days) {
            GateDecision::SkipTooYoung => {
                debug!(
                    "{address} too young for vetting (age {:?} < {} days)",
                    snap.age_days, self.min_age_days
                );
                EvalOutcome::SkippedYoung
            }
            GateDecision::SkipInFlight => EvalOutcome::SkippedInFlight,
            GateDecision::Eligible => match self.dispatcher.submit(&self.store, &snap, now).await {
                Ok(SubmitOutcome::Dispatched(_)) => EvalOutcome::Dispatched,
                // Lost the claim to a concurrent evaluation.
                Ok(SubmitOutcome::SlotTaken) => EvalOutcome::SkippedInFlight,
                Err(err) => {
                    warn!("dispatch failed for {address}: {err}");
                    EvalOutcome::DispatchFailed
                }
            },
        };

        self.report(address, outcome, provider_failures)
    }

    pub async fn poll_vetting_outcomes(&self) -> Result<PollStats, DispatchError> {
        self.dispatcher.poll_outcomes(&self.store, Utc::now()).await
    }

    fn report(&self, address: &str, outcome: EvalOutcome, provider_failures: usize) -> EvalReport {
        EvalReport {
            address: address.to_string(),
            outcome,
            provider_failures,
        }
    }
}

/// Tallies for one cycle, folded from the per-token reports.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub processed: usize,
    pub dispatched: usize,
    pub skipped_young: usize,
    pub skipped_in_flight: usize,
    pub already_vetted: usize,
    pub inconclusive: usize,
    pub dispatch_failed: usize,
    pub store_failed: usize,
    pub provider_failures: usize,
}

impl CycleStats {
    pub fn absorb(&mut self, report: &EvalReport) {
        self.processed += 1;
        self.provider_failures += report.provider_failures;
        match report.outcome {
            EvalOutcome::Dispatched => self.dispatched += 1,
            EvalOutcome::SkippedYoung => self.skipped_young += 1,
            EvalOutcome::SkippedInFlight => self.skipped_in_flight += 1,
            EvalOutcome::AlreadyVetted => self.already_vetted += 1,
            EvalOutcome::Inconclusive => self.inconclusive += 1,
            EvalOutcome::DispatchFailed => self.dispatch_failed += 1,
            EvalOutcome::StoreFailed => self.store_failed += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.dispatch_failed + self.store_failed
    }

    pub fn summary(&self) -> String {
        format!(
            "processed={} dispatched={} skipped_young={} skipped_in_flight={} already_vetted={} inconclusive={} dispatch_failed={} store_failed={} provider_failures={}",
            self.processed,
            self.dispatched,
            self.skipped_young,
            self.skipped_in_flight,
            self.already_vetted,
            self.inconclusive,
            self.dispatch_failed,
            self.store_failed,
            self.provider_failures,
        )
    }
}
