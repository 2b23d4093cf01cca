use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::pipeline::{CycleStats, Pipeline};
use crate::core::CycleKind;
use crate::db::SharedCatalog;
use crate::providers::pair_index::PairIndexClient;

/// Drives the three periodic jobs: the discovery cycle over fresh pairs,
/// the sweep cycle over unvetted catalog entries, and the result poll.
/// Discovery and sweep each run at most once at a time; a tick that lands
/// while the previous run is still going is skipped, not queued.
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    pair_index: Arc<PairIndexClient>,
    store: SharedCatalog,
    chain: String,
    discovery_interval_secs: u64,
    sweep_interval_secs: u64,
    poll_interval_secs: u64,
    discovery_workers: usize,
    sweep_workers: usize,
    sweep_batch: usize,
    staleness_hours: u64,
    running: Arc<RwLock<bool>>,
    discovery_busy: Arc<Mutex<()>>,
    sweep_busy: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(
        pipeline: Pipeline,
        pair_index: Arc<PairIndexClient>,
        store: SharedCatalog,
        config: &Config,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            pair_index,
            store,
            chain: config.providers.chain.clone(),
            discovery_interval_secs: config.scheduler.discovery_interval_secs,
            sweep_interval_secs: config.scheduler.sweep_interval_secs,
            poll_interval_secs: config.scheduler.poll_interval_secs,
            discovery_workers: config.scheduler.discovery_workers,
            sweep_workers: config.scheduler.sweep_workers,
            sweep_batch: config.scheduler.sweep_batch,
            staleness_hours: config.vetting.staleness_hours,
            running: Arc::new(RwLock::new(false)),
            discovery_busy: Arc::new(Mutex::new(())),
            sweep_busy: Arc::new(Mutex::new(())),
        }
    }

    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("scheduler already running");
                return;
            }
            *running = true;
        }

        let discovery = self.clone();
        tokio::spawn(async move { discovery.discovery_loop().await });
        let sweep = self.clone();
        tokio::spawn(async move { sweep.sweep_loop().await });
        let poller = self.clone();
        tokio::spawn(async move { poller.poll_loop().await });

        info!(
            "scheduler started: discovery every {}s, sweep every {}s, result poll every {}s",
            self.discovery_interval_secs, self.sweep_interval_secs, self.poll_interval_secs
        );
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("scheduler stopping");
    }

    async fn discovery_loop(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.discovery_interval_secs));
        loop {
            interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            match self.discovery_busy.try_lock() {
                Ok(_guard) => {
                    self.discovery_cycle().await;
                }
                Err(_) => warn!("previous discovery cycle still running, skipping tick"),
            }
        }
        info!("discovery loop stopped");
    }

    async fn sweep_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.sweep_interval_secs));
        loop {
            interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            match self.sweep_busy.try_lock() {
                Ok(_guard) => {
                    self.sweep_cycle().await;
                }
                Err(_) => warn!("previous sweep cycle still running, skipping tick"),
            }
        }
        info!("sweep loop stopped");
    }

    async fn poll_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.poll_interval_secs));
        loop {
            interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            match self.pipeline.poll_vetting_outcomes().await {
                Ok(stats) if stats.checked > 0 => info!(
                    "result poll: checked={} applied={} failed={} errors={}",
                    stats.checked, stats.applied, stats.failed, stats.errors
                ),
                Ok(_) => {}
                Err(err) => warn!("result poll failed: {err}"),
            }
        }
        info!("result poll loop stopped");
    }

    /// One discovery pass, serialized against the periodic loop.
    #[allow(dead_code)]
    pub async fn run_discovery_once(&self) -> CycleStats {
        let _guard = self.discovery_busy.lock().await;
        self.discovery_cycle().await
    }

    /// One sweep pass, serialized against the periodic loop.
    #[allow(dead_code)]
    pub async fn run_sweep_once(&self) -> CycleStats {
        let _guard = self.sweep_busy.lock().await;
        self.sweep_cycle().await
    }

    async fn discovery_cycle(&self) -> CycleStats {
        let started = Utc::now();
        let timer = Instant::now();

        let addresses = match self.pair_index.latest_pairs(&self.chain).await {
            Ok(addresses) => addresses,
            Err(err) => {
                warn!("pair index unavailable, discovery skipped: {err}");
                return CycleStats::default();
            }
        };

        // One token can back several fresh pairs; evaluate it once.
        let mut seen = HashSet::new();
        let targets: Vec<(String, String)> = addresses
            .into_iter()
            .filter(|a| seen.insert(a.clone()))
            .map(|a| (self.chain.clone(), a))
            .collect();

        let stats = self.evaluate_batch(targets, self.discovery_workers).await;
        let elapsed = timer.elapsed().as_millis() as u64;
        if let Err(err) = self.store.record_cycle_run(
            CycleKind::Discovery,
            started,
            elapsed,
            stats.processed,
            stats.dispatched,
            stats.failures(),
        ) {
            warn!("failed to record discovery run: {err}");
        }
        info!("discovery cycle done in {elapsed}ms: {}", stats.summary());
        stats
    }

    async fn sweep_cycle(&self) -> CycleStats {
        let started = Utc::now();
        let timer = Instant::now();

        let cutoff = started - chrono::Duration::hours(self.staleness_hours as i64);
        match self.store.expire_stale_submissions(cutoff, started) {
            Ok(0) => {}
            Ok(n) => info!("expired {n} stale vetting submissions"),
            Err(err) => warn!("failed to expire stale submissions: {err}"),
        }

        let candidates = match self.store.unvetted_listings(self.sweep_batch) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("catalog read failed, sweep skipped: {err}");
                return CycleStats::default();
            }
        };
        let targets: Vec<(String, String)> = candidates
            .into_iter()
            .map(|l| (l.chain, l.address))
            .collect();

        let stats = self.evaluate_batch(targets, self.sweep_workers).await;
        let elapsed = timer.elapsed().as_millis() as u64;
        if let Err(err) = self.store.record_cycle_run(
            CycleKind::Sweep,
            started,
            elapsed,
            stats.processed,
            stats.dispatched,
            stats.failures(),
        ) {
            warn!("failed to record sweep run: {err}");
        }
        info!("sweep cycle done in {elapsed}ms: {}", stats.summary());
        stats
    }

    async fn evaluate_batch(
        &self,
        targets: Vec<(String, String)>,
        workers: usize,
    ) -> CycleStats {
        let reports = stream::iter(targets.into_iter().map(|(chain, address)| {
            let pipeline = Arc::clone(&self.pipeline);
            async move { pipeline.evaluate_address(&chain, &address).await }
        }))
        .buffer_unordered(workers.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut stats = CycleStats::default();
        for report in &reports {
            debug!("{}: {:?}", report.address, report.outcome);
            stats.absorb(report);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderEndpoint, TierThresholds, VettingConfig};
    use crate::core::{PartialSnapshot, TokenSnapshot, VettingState};
    use crate::providers::tests::{http_response, serve_once};
    use crate::providers::{Provider, ProviderError};
    use crate::vetting::Dispatcher;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn open_test_db() -> SharedCatalog {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "mintradar_scheduler_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_file(&path);
        SharedCatalog::open(&path).unwrap()
    }

    struct StaticProvider {
        partial: Option<PartialSnapshot>,
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn fetch(
            &self,
            _chain: &str,
            _address: &str,
        ) -> Result<Option<PartialSnapshot>, ProviderError> {
            Ok(self.partial.clone())
        }
    }

    fn aged_partial(days: i64) -> PartialSnapshot {
        PartialSnapshot {
            symbol: Some("ABC".into()),
            token_created_at: Some(Utc::now() - ChronoDuration::days(days)),
            liquidity_usd: Some(10_000.0),
            ..Default::default()
        }
    }

    fn scheduler(
        store: &SharedCatalog,
        providers: Vec<Arc<dyn Provider>>,
        pair_index_url: String,
        webhook_url: String,
    ) -> Scheduler {
        let config = Config::default();
        let dispatcher = Dispatcher::new(
            &VettingConfig {
                webhook_url,
                status_url: None,
                auth_user: None,
                auth_password: None,
                timeout_secs: 2,
                staleness_hours: 24,
            },
            TierThresholds::default(),
        );
        let pipeline = Pipeline::new(providers, dispatcher, store.clone(), 14);
        let pair_index = Arc::new(PairIndexClient::new(&ProviderEndpoint {
            url: pair_index_url,
            timeout_secs: 2,
            cooldown_secs: 30,
        }));
        Scheduler::new(pipeline, pair_index, store.clone(), &config)
    }

    fn seeded_snapshot(address: &str, age_days: i64) -> TokenSnapshot {
        let now = Utc::now();
        TokenSnapshot {
            address: address.to_string(),
            chain: "solana".to_string(),
            symbol: Some("ABC".to_string()),
            name: None,
            decimals: None,
            token_created_at: Some(now - ChronoDuration::days(age_days)),
            age_days: Some(age_days),
            liquidity_usd: Some(10_000.0),
            top10_holder_pct: None,
            mint_authority_active: None,
            freeze_authority_active: None,
            lp_burned_pct: None,
            fetched_at: now,
        }
    }

    #[tokio::test]
    async fn discovery_cycle_dedups_and_records_run() {
        let db = open_test_db();
        let body = r#"[
            {"baseAddress":"mintA"},
            {"baseAddress":"mintB"},
            {"baseAddress":"mintA"}
        ]"#;
        let index_addr = serve_once(http_response("200 OK", body)).await;
        // No enrichment providers: every token comes back inconclusive,
        // so the webhook is never contacted.
        let s = scheduler(
            &db,
            vec![],
            format!("http://{index_addr}"),
            "http://127.0.0.1:1/webhook".into(),
        );

        let stats = s.run_discovery_once().await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.inconclusive, 2);
        assert_eq!(stats.dispatched, 0);

        assert!(db.get_listing("mintA", "solana").unwrap().is_some());
        assert!(db.get_listing("mintB", "solana").unwrap().is_some());
        assert_eq!(db.cycle_run_count(CycleKind::Discovery).unwrap(), 1);
    }

    #[tokio::test]
    async fn discovery_survives_missing_pair_index() {
        let db = open_test_db();
        let s = scheduler(
            &db,
            vec![],
            "http://127.0.0.1:1".into(),
            "http://127.0.0.1:1/webhook".into(),
        );

        let stats = s.run_discovery_once().await;
        assert_eq!(stats.processed, 0);
        // Nothing ran, nothing recorded.
        assert_eq!(db.cycle_run_count(CycleKind::Discovery).unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_cycle_dispatches_matured_listing() {
        let db = open_test_db();
        // Discovered two weeks ago as too young; still unvetted.
        db.upsert_listing(&seeded_snapshot("mintA", 30)).unwrap();

        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(StaticProvider {
            partial: Some(aged_partial(30)),
        })];
        let webhook_addr = serve_once(http_response("200 OK", "{}")).await;
        let s = scheduler(
            &db,
            providers,
            "http://127.0.0.1:1".into(),
            format!("http://{webhook_addr}/webhook"),
        );

        let stats = s.run_sweep_once().await;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dispatched, 1);

        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::PendingVetting);
        assert!(db.has_in_flight("mintA", "solana").unwrap());
        assert_eq!(db.cycle_run_count(CycleKind::Sweep).unwrap(), 1);
    }

    #[tokio::test]
    async fn sweep_expires_stale_submissions_first() {
        let db = open_test_db();
        db.upsert_listing(&seeded_snapshot("mintA", 30)).unwrap();
        let stale_at = Utc::now() - ChronoDuration::hours(48);
        db.insert_submission_if_absent("sub-stale", "mintA", "solana", stale_at)
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", stale_at).unwrap();

        // Fresh provider data and a live webhook: after expiry the token
        // is unvetted again and gets redispatched in the same sweep.
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(StaticProvider {
            partial: Some(aged_partial(30)),
        })];
        let webhook_addr = serve_once(http_response("200 OK", "{}")).await;
        let s = scheduler(
            &db,
            providers,
            "http://127.0.0.1:1".into(),
            format!("http://{webhook_addr}/webhook"),
        );

        let stats = s.run_sweep_once().await;
        assert_eq!(stats.dispatched, 1);

        let old = db.get_submission("sub-stale").unwrap().unwrap();
        assert_eq!(old.state, crate::core::SubmissionState::Expired);
        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::PendingVetting);
    }

    #[tokio::test]
    async fn sweep_refreshes_pending_listing_without_redispatch() {
        let db = open_test_db();
        db.upsert_listing(&seeded_snapshot("mintA", 30)).unwrap();
        db.insert_submission_if_absent("sub-live", "mintA", "solana", Utc::now())
            .unwrap();
        db.mark_pending_vetting("mintA", "solana", Utc::now()).unwrap();

        // Liquidity moved while the verdict is still outstanding.
        let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(StaticProvider {
            partial: Some(PartialSnapshot {
                symbol: Some("ABC".into()),
                token_created_at: Some(Utc::now() - ChronoDuration::days(30)),
                liquidity_usd: Some(55_000.0),
                ..Default::default()
            }),
        })];
        // A second dispatch would fail hard against this address.
        let s = scheduler(
            &db,
            providers,
            "http://127.0.0.1:1".into(),
            "http://127.0.0.1:1/webhook".into(),
        );

        let stats = s.run_sweep_once().await;
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dispatched, 0);
        assert_eq!(stats.skipped_in_flight, 1);

        let rec = db.get_listing("mintA", "solana").unwrap().unwrap();
        assert_eq!(rec.vetting_state, VettingState::PendingVetting);
        assert_eq!(rec.liquidity_usd, Some(55_000.0));
        assert!(db.has_in_flight("mintA", "solana").unwrap());
    }
}
