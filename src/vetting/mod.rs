use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{TierThresholds, VettingConfig};
use crate::core::{RiskTier, TokenSnapshot};
use crate::db::SharedCatalog;

/// Fire-and-forget client for the external vetting workflow. Submitting
/// claims the token's single in-flight slot first; the verdict comes back
/// later through `poll_outcomes` and is applied by `ingest_outcome`.
pub struct Dispatcher {
    client: Client,
    webhook_url: String,
    status_url: Option<String>,
    auth: Option<String>, // base64 encoded user:pass
    timeout: Duration,
    tiers: TierThresholds,
}

#[derive(Debug)]
#[allow(dead_code)]
pub enum SubmitOutcome {
    /// The webhook accepted the submission with this id.
    Dispatched(String),
    /// Another in-flight submission already holds the token's slot.
    SlotTaken,
}

#[derive(Debug, PartialEq)]
pub enum IngestResult {
    Applied(RiskTier),
    /// Unknown submission, already-settled submission, or unusable score.
    Discarded,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("webhook request timed out")]
    Timeout,
    #[error("webhook rejected submission with status {0}")]
    Status(u16),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// What one polling pass saw across the in-flight submissions.
#[derive(Debug, Default, PartialEq)]
pub struct PollStats {
    pub checked: usize,
    pub applied: usize,
    pub failed: usize,
    pub errors: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    status: String,
    score: Option<f64>,
}

impl Dispatcher {
    pub fn new(cfg: &VettingConfig, tiers: TierThresholds) -> Self {
        let auth = match (&cfg.auth_user, &cfg.auth_password) {
            (Some(user), Some(pass)) => {
                use base64::{engine::general_purpose::STANDARD, Engine};
                Some(STANDARD.encode(format!("{user}:{pass}")))
            }
            _ => None,
        };
        Self {
            client: Client::new(),
            webhook_url: cfg.webhook_url.trim_end_matches('/').to_string(),
            status_url: cfg
                .status_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            auth,
            timeout: Duration::from_secs(cfg.timeout_secs),
            tiers,
        }
    }

    /// Claim the token's vetting slot, then post the submission. The claim
    /// comes first so a concurrent cycle can never double-submit; when the
    /// post itself fails the slot is released again and the error bubbles
    /// up for the cycle report.
    pub async fn submit(
        &self,
        store: &SharedCatalog,
        snap: &TokenSnapshot,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, DispatchError> {
        let id = Uuid::new_v4().to_string();
        if !store.insert_submission_if_absent(&id, &snap.address, &snap.chain, now)? {
            return Ok(SubmitOutcome::SlotTaken);
        }

        if let Err(err) = self.post_submission(&id, snap).await {
            if let Err(db_err) = store.release_submission(&id, now) {
                warn!("failed to release submission {id} after dispatch error: {db_err}");
            }
            return Err(err);
        }

        store.mark_pending_vetting(&snap.address, &snap.chain, now)?;
        debug!(
            "dispatched {} on {} for vetting as {id}",
            snap.address, snap.chain
        );
        Ok(SubmitOutcome::Dispatched(id))
    }

    async fn post_submission(&self, id: &str, snap: &TokenSnapshot) -> Result<(), DispatchError> {
        let body = json!({
            "submissionId": id,
            "address": snap.address,
            "chain": snap.chain,
            "symbol": snap.symbol,
            "name": snap.name,
            "ageDays": snap.age_days,
            "liquidityUsd": snap.liquidity_usd,
            "top10HolderPct": snap.top10_holder_pct,
            "mintAuthorityActive": snap.mint_authority_active,
            "freezeAuthorityActive": snap.freeze_authority_active,
            "lpBurnedPct": snap.lp_burned_pct,
        });

        let mut req = self.client.post(&self.webhook_url).json(&body);
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", format!("Basic {auth}"));
        }

        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| DispatchError::Timeout)??;

        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        Ok(())
    }

    /// Apply a verdict for one submission. Discards stale or duplicate
    /// results and scores that are not a finite number, leaving the
    /// catalog untouched in those cases.
    pub fn ingest_outcome(
        &self,
        store: &SharedCatalog,
        submission_id: &str,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<IngestResult, DispatchError> {
        if !score.is_finite() {
            warn!("discarding non-finite score {score} for submission {submission_id}");
            return Ok(IngestResult::Discarded);
        }
        let tier = RiskTier::from_score(score, &self.tiers);
        if store.apply_vetting_outcome(submission_id, score, tier, now)? {
            Ok(IngestResult::Applied(tier))
        } else {
            debug!("no in-flight submission {submission_id}, result discarded");
            Ok(IngestResult::Discarded)
        }
    }

    /// Ask the workflow's status endpoint about every in-flight submission
    /// and fold finished ones into the catalog. Per-submission errors are
    /// counted, not fatal; the next pass will see those submissions again.
    pub async fn poll_outcomes(
        &self,
        store: &SharedCatalog,
        now: DateTime<Utc>,
    ) -> Result<PollStats, DispatchError> {
        let Some(status_url) = &self.status_url else {
            return Ok(PollStats::default());
        };

        let mut stats = PollStats::default();
        for sub in store.in_flight_submissions()? {
            stats.checked += 1;
            let url = format!("{status_url}/{}", sub.id);
            let payload = match self.fetch_status(&url).await {
                Ok(p) => p,
                Err(err) => {
                    warn!("status poll for {} failed: {err}", sub.id);
                    stats.errors += 1;
                    continue;
                }
            };

            match (payload.status.as_str(), payload.score) {
                ("completed", Some(score)) => {
                    if self.ingest_outcome(store, &sub.id, score, now)?
                        != IngestResult::Discarded
                    {
                        stats.applied += 1;
                    }
                }
                ("completed", None) => {
                    warn!("submission {} completed without a score", sub.id);
                    stats.errors += 1;
                }
                ("failed", _) => {
                    if store.fail_submission(&sub.id, now)? {
                        stats.failed += 1;
                    }
                }
                ("pending", _) => {}
                (other, _) => {
                    warn!("submission {} reported unknown status {other:?}", sub.id);
                    stats.errors += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn fetch_status(&self, url: &str) -> Result<StatusPayload, DispatchError> {
        let mut req = self.client.get(url);
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", format!("Basic {auth}"));
        }
        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| DispatchError::Timeout)??;

        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        let payload = tokio::time::timeout(self.timeout, resp.json::<StatusPayload>())
            .await
            .map_err(|_| DispatchError::Timeout)??;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VettingState;
    use crate::providers::tests::{http_response, serve_once};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn open_test_db() -> SharedCatalog {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "mintradar_vetting_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_file(&path);
        SharedCatalog::open(&path).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn snapshot(address: &str) -> TokenSnapshot {
        TokenSnapshot {
            address: address.to_string(),
            chain: "solana".to_string(),
            symbol: Some("ABC".to_string()),
            name: Some("Abc Coin".to_string()),
            decimals: Some(9),
            token_created_at: Some(t0() - chrono::Duration::days(30)),
            age_days: Some(30),
            liquidity_usd: Some(25_000.0),
            top10_holder_pct: Some(35.0),
            mint_authority_active: Some(false),
            freeze_authority_active: Some(false),
            lp_burned_pct: Some(100.0),
            fetched_at: t0(),
        }
    }

    fn dispatcher(webhook_url: String, status_url: Option<String>) -> Dispatcher {
        Dispatcher::new(
            &VettingConfig {
                webhook_url,
                status_url,
                auth_user: None,
                auth_password: None,
                timeout_secs: 2,
                staleness_hours: 24,
            },
            TierThresholds::default(),
        )
    }

    #[tokio::test]
    async fn submit_claims_slot_and_marks_pending() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        let addr = serve_once(http_response("200 OK", r#"{"accepted":true}"#)).await;
        let d = dispatcher(format!("http://{addr}/webhook/vet-token"), None);

        let outcome = d.submit(&db, &snapshot("mintA"), t0()).await.unwrap();
        let id = match outcome {
            SubmitOutcome::Dispatched(id) => id,
            other => panic!("expected Dispatched, got {other:?}"),
        };

        assert!(db.has_in_flight("mintA", "solana").unwrap());
        let sub = db.get_submission(&id).unwrap().unwrap();
        assert_eq!(sub.address, "mintA");
        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::PendingVetting);
        assert_eq!(rec.risk_score, None);
    }

    #[tokio::test]
    async fn occupied_slot_short_circuits_without_network() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        db.insert_submission_if_absent("sub-existing", "mintA", "solana", t0())
            .unwrap();

        // Nothing is listening on this address; the claim must fail first.
        let d = dispatcher("http://127.0.0.1:9/webhook".to_string(), None);
        let outcome = d.submit(&db, &snapshot("mintA"), t0()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::SlotTaken));
    }

    #[tokio::test]
    async fn concurrent_submissions_claim_at_most_one_slot() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        // One response only: the loser has to lose the claim, not the post.
        let addr = serve_once(http_response("200 OK", "{}")).await;
        let d = dispatcher(format!("http://{addr}/webhook"), None);

        // Discovery and sweep can race on the same token.
        let snap = snapshot("mintA");
        let (a, b) = tokio::join!(
            d.submit(&db, &snap, t0()),
            d.submit(&db, &snap, t0()),
        );
        let outcomes = [a.unwrap(), b.unwrap()];

        let dispatched = outcomes
            .iter()
            .filter(|o| matches!(o, SubmitOutcome::Dispatched(_)))
            .count();
        let taken = outcomes
            .iter()
            .filter(|o| matches!(o, SubmitOutcome::SlotTaken))
            .count();
        assert_eq!(dispatched, 1);
        assert_eq!(taken, 1);

        assert_eq!(db.in_flight_submissions().unwrap().len(), 1);
        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::PendingVetting);
    }

    #[tokio::test]
    async fn failed_dispatch_releases_slot() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        let d = dispatcher("http://127.0.0.1:1/webhook".to_string(), None);

        let err = d.submit(&db, &snapshot("mintA"), t0()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Http(_)));

        // Slot is free again and the listing never entered pending.
        assert!(!db.has_in_flight("mintA", "solana").unwrap());
        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::NotEligible);
        assert!(db
            .insert_submission_if_absent("sub-retry", "mintA", "solana", t0())
            .unwrap());
    }

    #[tokio::test]
    async fn rejected_dispatch_releases_slot() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        let addr = serve_once(http_response("503 Service Unavailable", "{}")).await;
        let d = dispatcher(format!("http://{addr}/webhook"), None);

        let err = d.submit(&db, &snapshot("mintA"), t0()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status(503)));
        assert!(!db.has_in_flight("mintA", "solana").unwrap());
    }

    #[tokio::test]
    async fn ingest_applies_score_and_tier() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        db.insert_submission_if_absent("sub-1", "mintA", "solana", t0())
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", t0()).unwrap();
        let d = dispatcher("http://unused.invalid".to_string(), None);

        let result = d.ingest_outcome(&db, "sub-1", 85.0, t0()).unwrap();
        assert_eq!(result, IngestResult::Applied(RiskTier::Critical));

        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::Vetted);
        assert_eq!(rec.risk_score, Some(85.0));
        assert_eq!(rec.risk_tier, Some(RiskTier::Critical));
    }

    #[tokio::test]
    async fn ingest_discards_non_finite_score() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        db.insert_submission_if_absent("sub-1", "mintA", "solana", t0())
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", t0()).unwrap();
        let d = dispatcher("http://unused.invalid".to_string(), None);

        assert_eq!(
            d.ingest_outcome(&db, "sub-1", f64::NAN, t0()).unwrap(),
            IngestResult::Discarded
        );
        assert_eq!(
            d.ingest_outcome(&db, "sub-1", f64::INFINITY, t0()).unwrap(),
            IngestResult::Discarded
        );

        // Submission still open, listing untouched.
        assert!(db.has_in_flight("mintA", "solana").unwrap());
        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::PendingVetting);
        assert_eq!(rec.risk_score, None);
    }

    #[tokio::test]
    async fn ingest_discards_unknown_submission() {
        let db = open_test_db();
        let d = dispatcher("http://unused.invalid".to_string(), None);
        assert_eq!(
            d.ingest_outcome(&db, "no-such-id", 50.0, t0()).unwrap(),
            IngestResult::Discarded
        );
    }

    #[tokio::test]
    async fn poll_applies_completed_submission() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        db.insert_submission_if_absent("sub-1", "mintA", "solana", t0())
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", t0()).unwrap();

        let addr = serve_once(http_response(
            "200 OK",
            r#"{"status":"completed","score":88.0}"#,
        ))
        .await;
        let d = dispatcher(
            "http://unused.invalid".to_string(),
            Some(format!("http://{addr}/vet-status")),
        );

        let stats = d.poll_outcomes(&db, t0()).await.unwrap();
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.errors, 0);

        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::Vetted);
        assert_eq!(rec.risk_score, Some(88.0));
    }

    #[tokio::test]
    async fn poll_handles_workflow_failure() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        db.insert_submission_if_absent("sub-1", "mintA", "solana", t0())
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", t0()).unwrap();

        let addr = serve_once(http_response("200 OK", r#"{"status":"failed"}"#)).await;
        let d = dispatcher(
            "http://unused.invalid".to_string(),
            Some(format!("http://{addr}/vet-status")),
        );

        let stats = d.poll_outcomes(&db, t0()).await.unwrap();
        assert_eq!(stats.failed, 1);

        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::VettingFailed);
        assert_eq!(rec.risk_score, None);
        assert!(!db.has_in_flight("mintA", "solana").unwrap());
    }

    #[tokio::test]
    async fn poll_leaves_pending_submission_alone() {
        let db = open_test_db();
        db.upsert_listing(&snapshot("mintA")).unwrap();
        db.insert_submission_if_absent("sub-1", "mintA", "solana", t0())
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", t0()).unwrap();

        let addr = serve_once(http_response("200 OK", r#"{"status":"pending"}"#)).await;
        let d = dispatcher(
            "http://unused.invalid".to_string(),
            Some(format!("http://{addr}/vet-status")),
        );

        let stats = d.poll_outcomes(&db, t0()).await.unwrap();
        assert_eq!(stats.checked, 1);
        assert_eq!(stats.applied, 0);
        assert!(db.has_in_flight("mintA", "solana").unwrap());
    }

    #[tokio::test]
    async fn poll_without_status_endpoint_is_a_noop() {
        let db = open_test_db();
        db.insert_submission_if_absent("sub-1", "mintA", "solana", t0())
            .unwrap();
        let d = dispatcher("http://unused.invalid".to_string(), None);

        let stats = d.poll_outcomes(&db, t0()).await.unwrap();
        assert_eq!(stats, PollStats::default());
        assert!(db.has_in_flight("mintA", "solana").unwrap());
    }
}
