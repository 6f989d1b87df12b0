// DDL constants for the tool capability index.

/// Capability records. `name` is the identity; `embedding` holds a
/// little-endian f32 array or NULL when no embedding client is configured.
pub const CAPABILITIES_DDL: &str = "\
CREATE TABLE IF NOT EXISTS llm_capabilities (
    name        TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT '',
    embedding   BLOB,
    updated_at  TEXT NOT NULL
);
";

/// External-content FTS5 index over name + description. The porter stemmer
/// lets `running` match `run`; unicode61 splits `github_create_issue` into
/// separate terms.
pub const CAPABILITIES_FTS_DDL: &str = "\
CREATE VIRTUAL TABLE IF NOT EXISTS llm_capabilities_fts USING fts5(
    name,
    description,
    content = 'llm_capabilities',
    content_rowid = 'rowid',
    tokenize = 'porter unicode61'
);
";

/// Triggers keeping the FTS index in lockstep with the table, inside the
/// writing transaction.
pub const CAPABILITIES_FTS_TRIGGERS_DDL: &str = "\
CREATE TRIGGER IF NOT EXISTS llm_capabilities_ai AFTER INSERT ON llm_capabilities BEGIN
    INSERT INTO llm_capabilities_fts (rowid, name, description)
    VALUES (new.rowid, new.name, new.description);
END;
CREATE TRIGGER IF NOT EXISTS llm_capabilities_ad AFTER DELETE ON llm_capabilities BEGIN
    INSERT INTO llm_capabilities_fts (llm_capabilities_fts, rowid, name, description)
    VALUES ('delete', old.rowid, old.name, old.description);
END;
CREATE TRIGGER IF NOT EXISTS llm_capabilities_au AFTER UPDATE ON llm_capabilities BEGIN
    INSERT INTO llm_capabilities_fts (llm_capabilities_fts, rowid, name, description)
    VALUES ('delete', old.rowid, old.name, old.description);
    INSERT INTO llm_capabilities_fts (rowid, name, description)
    VALUES (new.rowid, new.name, new.description);
END;
";

pub const PRAGMAS: &str = "\
PRAGMA synchronous  = NORMAL;
PRAGMA cache_size   = -2000;
PRAGMA temp_store   = MEMORY;
";

/// Only meaningful for file-backed databases; in-memory ones ignore it.
pub const FILE_PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
";

/// Upsert that goes through `UPDATE` on conflict so the update trigger fires.
/// `INSERT OR REPLACE` would delete the old row without firing the delete
/// trigger (recursive triggers are off by default) and leave a stale FTS row.
pub const UPSERT_CAPABILITY: &str = "\
INSERT INTO llm_capabilities (name, description, embedding, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(name) DO UPDATE SET
    description = excluded.description,
    embedding   = excluded.embedding,
    updated_at  = excluded.updated_at
";

pub const SEARCH_FTS: &str = "\
SELECT t.name, t.description, llm_capabilities_fts.rank
FROM llm_capabilities_fts
JOIN llm_capabilities t ON t.rowid = llm_capabilities_fts.rowid
WHERE llm_capabilities_fts MATCH ?1
  AND t.name IN (SELECT value FROM json_each(?2))
ORDER BY llm_capabilities_fts.rank
LIMIT ?3
";

pub const SEARCH_EMBEDDINGS: &str = "\
SELECT name, description, embedding
FROM llm_capabilities
WHERE embedding IS NOT NULL
  AND name IN (SELECT value FROM json_each(?1))
";

pub const DELETE_CAPABILITIES: &str = "\
DELETE FROM llm_capabilities
WHERE name IN (SELECT value FROM json_each(?1))
";

pub const LIST_CAPABILITIES: &str = "\
SELECT name, description FROM llm_capabilities ORDER BY name
";
