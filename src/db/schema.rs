//! SQLite schema for the offline store.
//!
//! Evolution is additive only: new tables use `CREATE TABLE IF NOT EXISTS`
//! and new columns go through [`ADDED_COLUMNS`].

pub const SCHEMA: &str = r#"
-- Per-owner flight records (local shadows have synced = 0)
CREATE TABLE IF NOT EXISTS my_flights (
    id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    flight_number TEXT NOT NULL DEFAULT '',
    airline_code TEXT NOT NULL DEFAULT '',
    departure_time TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'scheduled',
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (owner_id, id)
);

CREATE INDEX IF NOT EXISTS idx_my_flights_owner ON my_flights(owner_id);
CREATE INDEX IF NOT EXISTS idx_my_flights_synced ON my_flights(synced);

-- Reviews partitioned by collection code (e.g. airline code)
CREATE TABLE IF NOT EXISTS reviews_cache (
    collection_code TEXT NOT NULL,
    position INTEGER NOT NULL,
    review_id TEXT,
    data TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (collection_code, position)
);

CREATE INDEX IF NOT EXISTS idx_reviews_cache_code ON reviews_cache(collection_code);

-- Plans keyed by owner + plan key
CREATE TABLE IF NOT EXISTS plans_cache (
    owner_id TEXT NOT NULL,
    plan_key TEXT NOT NULL,
    data TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (owner_id, plan_key)
);

CREATE INDEX IF NOT EXISTS idx_plans_cache_owner ON plans_cache(owner_id);

-- Profiles keyed by owner
CREATE TABLE IF NOT EXISTS profiles_cache (
    owner_id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Durable mutation queue
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    collection TEXT NOT NULL,
    document_id TEXT,
    payload TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, created_at);
CREATE INDEX IF NOT EXISTS idx_sync_queue_owner ON sync_queue(owner_id);
"#;

/// Columns added after the first release: (table, column, declaration).
pub const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
  ("sync_queue", "updated_at", "TEXT"),
  ("sync_queue", "last_error", "TEXT"),
];

/// Cache tables whose primary key changed: (table, column that must be part
/// of the key). An older table is dropped and recreated, losing only cached
/// rows.
pub const REKEYED_CACHE_TABLES: &[(&str, &str)] = &[("reviews_cache", "position")];

/// Status values from older files, mapped onto current ones at init.
pub const LEGACY_QUEUE_STATUSES: &[(&str, &str)] = &[("failed", "pending")];

/// Tables swept by `clear_expired`.
pub const TTL_TABLES: &[&str] = &["reviews_cache", "plans_cache", "profiles_cache"];
