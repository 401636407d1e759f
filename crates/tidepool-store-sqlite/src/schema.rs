//! SQL schema for the tidepool SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per live or tombstoned document. `version` always mirrors the
-- latest event for the document; it is bound in the same transaction that
-- appends the event.
CREATE TABLE IF NOT EXISTS documents (
    id              TEXT NOT NULL,     -- last path segment
    workspace_id    TEXT NOT NULL,
    collection_name TEXT NOT NULL,     -- last collection segment
    path            TEXT NOT NULL,
    owner_id        TEXT NOT NULL,     -- user that first created the doc
    data            TEXT NOT NULL,     -- JSON payload
    version         INTEGER NOT NULL,
    deleted_at      TEXT,              -- ISO 8601 UTC; NULL = live
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (workspace_id, path)
);

-- The event log is strictly append-only and is the authoritative version
-- source: the auto-assigned row id is the workspace-wide monotone version.
CREATE TABLE IF NOT EXISTS events (
    version      INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL,
    doc_id       TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    path         TEXT NOT NULL,
    event_type   TEXT NOT NULL,        -- 'INSERT' | 'UPDATE' | 'SET' | 'DELETE'
    payload      TEXT NOT NULL,        -- full data or patch, JSON
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS events_doc_idx       ON events(doc_id);
CREATE INDEX IF NOT EXISTS events_workspace_idx ON events(workspace_id);
CREATE INDEX IF NOT EXISTS documents_path_idx   ON documents(path);

PRAGMA user_version = 1;
";

/// Teardown for the admin reset surface; the schema is re-run afterwards.
pub const DROP: &str = "
DROP TABLE IF EXISTS documents;
DROP TABLE IF EXISTS events;
";
