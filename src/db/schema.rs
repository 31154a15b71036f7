/// Schema for the worker database.
pub const SCHEMA: &str = r#"
-- Cached responses, grouped by generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

-- Generations that exist, even when empty
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Writes waiting for the origin to come back
CREATE TABLE IF NOT EXISTS pending_mutations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pending_mutations_kind ON pending_mutations(kind, seq);

-- Lifecycle of each worker version seen on this device
CREATE TABLE IF NOT EXISTS worker_versions (
    version TEXT PRIMARY KEY,
    phase TEXT NOT NULL,
    skip_waiting INTEGER NOT NULL DEFAULT 0,
    clients_claimed INTEGER NOT NULL DEFAULT 0,
    shell_generation TEXT NOT NULL DEFAULT '',
    static_generation TEXT NOT NULL DEFAULT '',
    api_generation TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_worker_versions_phase ON worker_versions(phase, updated_at);
"#;
