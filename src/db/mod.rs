pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::core::{
    CycleKind, ListingRecord, RiskTier, SubmissionState, TokenSnapshot, VettingState,
    VettingSubmission,
};

const LISTING_COLUMNS: &str = "address, chain, symbol, name, decimals, token_created_at, \
     liquidity_usd, top10_holder_pct, mint_authority_active, freeze_authority_active, \
     lp_burned_pct, risk_score, risk_tier, vetting_state, last_evaluated_at, created_at, updated_at";

const SUBMISSION_COLUMNS: &str = "id, address, chain, state, submitted_at, completed_at";

pub struct Catalog {
    conn: Connection,
}

/// Thread-safe wrapper around Catalog.
#[derive(Clone)]
pub struct SharedCatalog {
    inner: Arc<Mutex<Catalog>>,
}

impl SharedCatalog {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let catalog = Catalog::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(catalog)),
        })
    }

    /// Write a merged snapshot into the catalog. Returns true when any
    /// persisted field actually changed.
    pub fn upsert_listing(&self, snap: &TokenSnapshot) -> Result<bool, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.upsert_listing(snap)
    }

    /// Make sure a listing row exists and stamp its evaluation time,
    /// without touching any enrichment field.
    pub fn touch_listing(
        &self,
        address: &str,
        chain: &str,
        now: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.touch_listing(address, chain, now)
    }

    pub fn get_listing(
        &self,
        address: &str,
        chain: &str,
    ) -> Result<Option<ListingRecord>, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.get_listing(address, chain)
    }

    /// Most recently updated listings first.
    #[allow(dead_code)]
    pub fn recent_listings(&self, limit: usize) -> Result<Vec<ListingRecord>, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.recent_listings(limit)
    }

    /// Vetted listings in one tier, worst score first.
    #[allow(dead_code)]
    pub fn listings_by_tier(
        &self,
        tier: RiskTier,
        limit: usize,
    ) -> Result<Vec<ListingRecord>, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.listings_by_tier(tier, limit)
    }

    /// Sweep candidates: every listing without a verdict, least recently
    /// evaluated first. Pending listings are included so their metadata
    /// stays fresh; the in-flight check keeps them from being re-sent.
    pub fn unvetted_listings(&self, limit: usize) -> Result<Vec<ListingRecord>, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.unvetted_listings(limit)
    }

    pub fn listing_count(&self) -> Result<usize, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.listing_count()
    }

    pub fn has_in_flight(&self, address: &str, chain: &str) -> Result<bool, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.has_in_flight(address, chain)
    }

    /// Claim the single vetting slot for a token. Returns false when an
    /// in-flight submission already holds it; the insert itself is the
    /// arbiter, there is no separate existence check to race against.
    pub fn insert_submission_if_absent(
        &self,
        id: &str,
        address: &str,
        chain: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.insert_submission_if_absent(id, address, chain, now)
    }

    /// Move a listing into pending_vetting. Any previous verdict is
    /// dropped so a score is only ever paired with the vetted state.
    pub fn mark_pending_vetting(
        &self,
        address: &str,
        chain: &str,
        now: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.mark_pending_vetting(address, chain, now)
    }

    /// Free a claimed slot after a dispatch that never reached the
    /// workflow. The listing keeps whatever state it had.
    pub fn release_submission(&self, id: &str, now: DateTime<Utc>) -> Result<(), rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.release_submission(id, now)
    }

    /// Apply a vetting verdict: complete the submission and stamp the
    /// listing with score, tier and the vetted state in one transaction.
    /// Returns false when the submission is unknown or no longer in
    /// flight, in which case nothing is written.
    pub fn apply_vetting_outcome(
        &self,
        submission_id: &str,
        score: f64,
        tier: RiskTier,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.apply_vetting_outcome(submission_id, score, tier, now)
    }

    /// Record a workflow-reported failure: the submission completes with
    /// no verdict and a pending listing drops to vetting_failed. Returns
    /// false when the submission is unknown or no longer in flight.
    pub fn fail_submission(
        &self,
        submission_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.fail_submission(submission_id, now)
    }

    /// Expire submissions older than `cutoff` and fail their listings
    /// out of pending. Returns how many were expired.
    pub fn expire_stale_submissions(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.expire_stale_submissions(cutoff, now)
    }

    pub fn in_flight_submissions(&self) -> Result<Vec<VettingSubmission>, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.in_flight_submissions()
    }

    #[allow(dead_code)]
    pub fn get_submission(&self, id: &str) -> Result<Option<VettingSubmission>, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.get_submission(id)
    }

    pub fn record_cycle_run(
        &self,
        kind: CycleKind,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        processed: usize,
        dispatched: usize,
        failures: usize,
    ) -> Result<(), rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.record_cycle_run(kind, started_at, duration_ms, processed, dispatched, failures)
    }

    #[allow(dead_code)]
    pub fn cycle_run_count(&self, kind: CycleKind) -> Result<usize, rusqlite::Error> {
        let catalog = self.inner.lock().unwrap();
        catalog.cycle_run_count(kind)
    }
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn upsert_listing(&self, snap: &TokenSnapshot) -> Result<bool, rusqlite::Error> {
        let now = snap.fetched_at.timestamp();
        let Some(prev) = self.get_listing(&snap.address, &snap.chain)? else {
            self.conn.execute(
                "INSERT INTO listings (address, chain, symbol, name, decimals, token_created_at, \
                 liquidity_usd, top10_holder_pct, mint_authority_active, freeze_authority_active, \
                 lp_burned_pct, vetting_state, last_evaluated_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'not_eligible', ?12, ?12, ?12)",
                params![
                    snap.address,
                    snap.chain,
                    snap.symbol,
                    snap.name,
                    snap.decimals.map(|d| d as i64),
                    snap.token_created_at.map(|t| t.timestamp()),
                    snap.liquidity_usd,
                    snap.top10_holder_pct,
                    snap.mint_authority_active.map(|b| b as i32),
                    snap.freeze_authority_active.map(|b| b as i32),
                    snap.lp_burned_pct,
                    now,
                ],
            )?;
            return Ok(true);
        };

        // The first persisted creation timestamp wins for good, so a
        // provider that later reports a younger token cannot reset the age.
        let created = prev.token_created_at.or(snap.token_created_at);
        let changed = prev.symbol != snap.symbol
            || prev.name != snap.name
            || prev.decimals != snap.decimals
            || prev.token_created_at != created
            || prev.liquidity_usd != snap.liquidity_usd
            || prev.top10_holder_pct != snap.top10_holder_pct
            || prev.mint_authority_active != snap.mint_authority_active
            || prev.freeze_authority_active != snap.freeze_authority_active
            || prev.lp_burned_pct != snap.lp_burned_pct;

        if changed {
            self.conn.execute(
                "UPDATE listings SET symbol = ?3, name = ?4, decimals = ?5, token_created_at = ?6, \
                 liquidity_usd = ?7, top10_holder_pct = ?8, mint_authority_active = ?9, \
                 freeze_authority_active = ?10, lp_burned_pct = ?11, \
                 last_evaluated_at = ?12, updated_at = ?12
                 WHERE address = ?1 AND chain = ?2",
                params![
                    snap.address,
                    snap.chain,
                    snap.symbol,
                    snap.name,
                    snap.decimals.map(|d| d as i64),
                    created.map(|t| t.timestamp()),
                    snap.liquidity_usd,
                    snap.top10_holder_pct,
                    snap.mint_authority_active.map(|b| b as i32),
                    snap.freeze_authority_active.map(|b| b as i32),
                    snap.lp_burned_pct,
                    now,
                ],
            )?;
        } else {
            self.conn.execute(
                "UPDATE listings SET last_evaluated_at = ?3 WHERE address = ?1 AND chain = ?2",
                params![snap.address, snap.chain, now],
            )?;
        }
        Ok(changed)
    }

    pub fn touch_listing(
        &self,
        address: &str,
        chain: &str,
        now: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR IGNORE INTO listings (address, chain, vetting_state, last_evaluated_at, created_at, updated_at)
             VALUES (?1, ?2, 'not_eligible', ?3, ?3, ?3)",
            params![address, chain, now.timestamp()],
        )?;
        self.conn.execute(
            "UPDATE listings SET last_evaluated_at = ?3 WHERE address = ?1 AND chain = ?2",
            params![address, chain, now.timestamp()],
        )?;
        Ok(())
    }

    pub fn get_listing(
        &self,
        address: &str,
        chain: &str,
    ) -> Result<Option<ListingRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE address = ?1 AND chain = ?2"
        ))?;
        let mut rows = stmt.query(params![address, chain])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_listing(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn recent_listings(&self, limit: usize) -> Result<Vec<ListingRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings ORDER BY updated_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_listing)?;
        rows.collect()
    }

    pub fn listings_by_tier(
        &self,
        tier: RiskTier,
        limit: usize,
    ) -> Result<Vec<ListingRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE risk_tier = ?1
             ORDER BY risk_score DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![tier.as_str(), limit as i64], Self::row_to_listing)?;
        rows.collect()
    }

    pub fn unvetted_listings(&self, limit: usize) -> Result<Vec<ListingRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings
             WHERE vetting_state != 'vetted'
             ORDER BY last_evaluated_at ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_listing)?;
        rows.collect()
    }

    pub fn listing_count(&self) -> Result<usize, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| {
                row.get::<_, i64>(0).map(|c| c as usize)
            })
    }

    pub fn has_in_flight(&self, address: &str, chain: &str) -> Result<bool, rusqlite::Error> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM submissions
                 WHERE address = ?1 AND chain = ?2 AND state = 'in_flight'",
                params![address, chain],
                |row| row.get::<_, i64>(0),
            )
            .map(|c| c > 0)
    }

    pub fn insert_submission_if_absent(
        &self,
        id: &str,
        address: &str,
        chain: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        // The partial unique index on in-flight (address, chain) turns a
        // second claim into a no-op; the affected-row count tells us who won.
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO submissions (id, address, chain, state, submitted_at)
             VALUES (?1, ?2, ?3, 'in_flight', ?4)",
            params![id, address, chain, now.timestamp()],
        )?;
        Ok(inserted == 1)
    }

    pub fn mark_pending_vetting(
        &self,
        address: &str,
        chain: &str,
        now: DateTime<Utc>,
    ) -> Result<(), rusqlite::Error> {
        // Pending rows carry no score: a stale verdict must not survive
        // into a run whose outcome may be a failure.
        self.conn.execute(
            "UPDATE listings SET vetting_state = 'pending_vetting',
             risk_score = NULL, risk_tier = NULL, updated_at = ?3
             WHERE address = ?1 AND chain = ?2",
            params![address, chain, now.timestamp()],
        )?;
        Ok(())
    }

    pub fn release_submission(&self, id: &str, now: DateTime<Utc>) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE submissions SET state = 'expired', completed_at = ?2
             WHERE id = ?1 AND state = 'in_flight'",
            params![id, now.timestamp()],
        )?;
        Ok(())
    }

    pub fn apply_vetting_outcome(
        &self,
        submission_id: &str,
        score: f64,
        tier: RiskTier,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;

        let target: Option<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT address, chain FROM submissions WHERE id = ?1 AND state = 'in_flight'",
            )?;
            let mut rows = stmt.query(params![submission_id])?;
            match rows.next()? {
                Some(row) => Some((row.get(0)?, row.get(1)?)),
                None => None,
            }
        };
        let Some((address, chain)) = target else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE submissions SET state = 'completed', completed_at = ?2 WHERE id = ?1",
            params![submission_id, now.timestamp()],
        )?;
        tx.execute(
            "UPDATE listings SET risk_score = ?3, risk_tier = ?4, vetting_state = 'vetted', updated_at = ?5
             WHERE address = ?1 AND chain = ?2",
            params![address, chain, score, tier.as_str(), now.timestamp()],
        )?;

        tx.commit()?;
        Ok(true)
    }

    pub fn fail_submission(
        &self,
        submission_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;

        let target: Option<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT address, chain FROM submissions WHERE id = ?1 AND state = 'in_flight'",
            )?;
            let mut rows = stmt.query(params![submission_id])?;
            match rows.next()? {
                Some(row) => Some((row.get(0)?, row.get(1)?)),
                None => None,
            }
        };
        let Some((address, chain)) = target else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE submissions SET state = 'completed', completed_at = ?2 WHERE id = ?1",
            params![submission_id, now.timestamp()],
        )?;
        tx.execute(
            "UPDATE listings SET vetting_state = 'vetting_failed', updated_at = ?3
             WHERE address = ?1 AND chain = ?2 AND vetting_state = 'pending_vetting'",
            params![address, chain, now.timestamp()],
        )?;

        tx.commit()?;
        Ok(true)
    }

    pub fn expire_stale_submissions(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;

        let stale: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, address, chain FROM submissions
                 WHERE state = 'in_flight' AND submitted_at < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff.timestamp()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        {
            let mut expire = tx.prepare_cached(
                "UPDATE submissions SET state = 'expired', completed_at = ?2 WHERE id = ?1",
            )?;
            let mut fail = tx.prepare_cached(
                "UPDATE listings SET vetting_state = 'vetting_failed', updated_at = ?3
                 WHERE address = ?1 AND chain = ?2 AND vetting_state = 'pending_vetting'",
            )?;
            for (id, address, chain) in &stale {
                expire.execute(params![id, now.timestamp()])?;
                fail.execute(params![address, chain, now.timestamp()])?;
            }
        }

        tx.commit()?;
        Ok(stale.len())
    }

    pub fn in_flight_submissions(&self) -> Result<Vec<VettingSubmission>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions
             WHERE state = 'in_flight' ORDER BY submitted_at ASC"
        ))?;
        let rows = stmt.query_map([], Self::row_to_submission)?;
        rows.collect()
    }

    pub fn get_submission(&self, id: &str) -> Result<Option<VettingSubmission>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?1"
        ))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_submission(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn record_cycle_run(
        &self,
        kind: CycleKind,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        processed: usize,
        dispatched: usize,
        failures: usize,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO cycle_runs (kind, started_at, duration_ms, processed, dispatched, failures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                kind.as_str(),
                started_at.timestamp(),
                duration_ms as i64,
                processed as i64,
                dispatched as i64,
                failures as i64
            ],
        )?;
        Ok(())
    }

    pub fn cycle_run_count(&self, kind: CycleKind) -> Result<usize, rusqlite::Error> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM cycle_runs WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get::<_, i64>(0).map(|c| c as usize),
        )
    }

    fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<ListingRecord> {
        let mint: Option<i32> = row.get(8)?;
        let freeze: Option<i32> = row.get(9)?;
        let tier: Option<String> = row.get(12)?;
        let state: String = row.get(13)?;
        Ok(ListingRecord {
            address: row.get(0)?,
            chain: row.get(1)?,
            symbol: row.get(2)?,
            name: row.get(3)?,
            decimals: row.get::<_, Option<i64>>(4)?.map(|d| d as u8),
            token_created_at: row.get::<_, Option<i64>>(5)?.map(ts_from),
            liquidity_usd: row.get(6)?,
            top10_holder_pct: row.get(7)?,
            mint_authority_active: mint.map(|v| v != 0),
            freeze_authority_active: freeze.map(|v| v != 0),
            lp_burned_pct: row.get(10)?,
            risk_score: row.get(11)?,
            risk_tier: tier.as_deref().and_then(RiskTier::parse),
            vetting_state: VettingState::parse(&state).unwrap_or(VettingState::NotEligible),
            last_evaluated_at: ts_from(row.get(14)?),
            created_at: ts_from(row.get(15)?),
            updated_at: ts_from(row.get(16)?),
        })
    }

    fn row_to_submission(row: &rusqlite::Row) -> rusqlite::Result<VettingSubmission> {
        let state: String = row.get(3)?;
        Ok(VettingSubmission {
            id: row.get(0)?,
            address: row.get(1)?,
            chain: row.get(2)?,
            state: SubmissionState::parse(&state).unwrap_or(SubmissionState::Expired),
            submitted_at: ts_from(row.get(4)?),
            completed_at: row.get::<_, Option<i64>>(5)?.map(ts_from),
        })
    }
}

fn ts_from(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
