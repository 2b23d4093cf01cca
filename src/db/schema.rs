use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS listings (
            address                 TEXT NOT NULL,
            chain                   TEXT NOT NULL,
            symbol                  TEXT,
            name                    TEXT,
            decimals                INTEGER,
            token_created_at        INTEGER, -- unix seconds
            liquidity_usd           REAL,
            top10_holder_pct        REAL,
            mint_authority_active   INTEGER,
            freeze_authority_active INTEGER,
            lp_burned_pct           REAL,
            risk_score              REAL,
            risk_tier               TEXT,
            vetting_state           TEXT NOT NULL DEFAULT 'not_eligible',
            last_evaluated_at       INTEGER NOT NULL,
            created_at              INTEGER NOT NULL,
            updated_at              INTEGER NOT NULL,
            PRIMARY KEY (address, chain)
        );

        CREATE TABLE IF NOT EXISTS submissions (
            id           TEXT PRIMARY KEY,
            address      TEXT NOT NULL,
            chain        TEXT NOT NULL,
            state        TEXT NOT NULL,
            submitted_at INTEGER NOT NULL,
            completed_at INTEGER
        );

        -- One live submission per token. The conditional insert in
        -- Catalog::insert_submission_if_absent leans on this index.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_inflight
            ON submissions(address, chain) WHERE state = 'in_flight';

        CREATE TABLE IF NOT EXISTS cycle_runs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL,
            started_at  INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            processed   INTEGER NOT NULL,
            dispatched  INTEGER NOT NULL,
            failures    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_listings_state ON listings(vetting_state, last_evaluated_at);
        CREATE INDEX IF NOT EXISTS idx_listings_updated ON listings(updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_listings_tier ON listings(risk_tier);
        CREATE INDEX IF NOT EXISTS idx_submissions_state ON submissions(state, submitted_at);
        ",
    )?;
    Ok(())
}
