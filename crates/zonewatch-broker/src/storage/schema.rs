//! Per-backend DDL.
//!
//! Schema evolution is a list of explicit patch scripts per backend,
//! applied in order and tracked in `schema_version`. Patch 1 is the
//! original schema with its `params_deterministic_hash` column; patch 2 is
//! the rename to `fingerprint` with the index rebuilt. New installations
//! replay the full list, so a fresh database and a patched old one end up
//! byte-identical.

pub const SQLITE_VERSION_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)";

pub const SQLITE_PATCHES: &[&str] = &[
    r"
CREATE TABLE batch_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    creation_time INTEGER NOT NULL
);
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    api_key TEXT NOT NULL
);
CREATE TABLE test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash_id TEXT NOT NULL UNIQUE,
    params_deterministic_hash INTEGER NOT NULL,
    domain TEXT NOT NULL,
    batch_id INTEGER REFERENCES batch_jobs (id),
    creation_time INTEGER NOT NULL,
    start_time INTEGER,
    end_time INTEGER,
    progress INTEGER NOT NULL DEFAULT 0,
    params TEXT NOT NULL,
    results TEXT,
    undelegated INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 10,
    queue INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX test_results__params_deterministic_hash
    ON test_results (params_deterministic_hash);
CREATE INDEX test_results__domain ON test_results (domain);
CREATE INDEX test_results__queue ON test_results (queue, priority, id);
",
    r"
ALTER TABLE test_results RENAME COLUMN params_deterministic_hash TO fingerprint;
DROP INDEX test_results__params_deterministic_hash;
CREATE INDEX test_results__fingerprint ON test_results (fingerprint);
",
];

pub const POSTGRES_VERSION_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS schema_version (version BIGINT PRIMARY KEY)";

pub const POSTGRES_PATCHES: &[&str] = &[
    r"
CREATE TABLE batch_jobs (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL,
    creation_time BIGINT NOT NULL
);
CREATE TABLE users (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    api_key TEXT NOT NULL
);
CREATE TABLE test_results (
    id BIGSERIAL PRIMARY KEY,
    hash_id TEXT NOT NULL UNIQUE,
    params_deterministic_hash BIGINT NOT NULL,
    domain TEXT NOT NULL,
    batch_id BIGINT REFERENCES batch_jobs (id),
    creation_time BIGINT NOT NULL,
    start_time BIGINT,
    end_time BIGINT,
    progress BIGINT NOT NULL DEFAULT 0,
    params TEXT NOT NULL,
    results TEXT,
    undelegated BOOLEAN NOT NULL DEFAULT FALSE,
    priority BIGINT NOT NULL DEFAULT 10,
    queue BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX test_results__params_deterministic_hash
    ON test_results (params_deterministic_hash);
CREATE INDEX test_results__domain ON test_results (domain);
CREATE INDEX test_results__queue ON test_results (queue, priority, id);
",
    r"
ALTER TABLE test_results RENAME COLUMN params_deterministic_hash TO fingerprint;
DROP INDEX test_results__params_deterministic_hash;
CREATE INDEX test_results__fingerprint ON test_results (fingerprint);
",
];

pub const MYSQL_VERSION_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS schema_version (version BIGINT PRIMARY KEY)";

pub const MYSQL_PATCHES: &[&str] = &[
    r"
CREATE TABLE batch_jobs (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    username VARCHAR(128) NOT NULL,
    creation_time BIGINT NOT NULL
) ENGINE = InnoDB;
CREATE TABLE users (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    username VARCHAR(128) NOT NULL UNIQUE,
    api_key VARCHAR(512) NOT NULL
) ENGINE = InnoDB;
CREATE TABLE test_results (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    hash_id VARCHAR(16) NOT NULL UNIQUE,
    params_deterministic_hash BIGINT NOT NULL,
    domain VARCHAR(255) NOT NULL,
    batch_id BIGINT REFERENCES batch_jobs (id),
    creation_time BIGINT NOT NULL,
    start_time BIGINT,
    end_time BIGINT,
    progress BIGINT NOT NULL DEFAULT 0,
    params MEDIUMTEXT NOT NULL,
    results MEDIUMTEXT,
    undelegated BOOLEAN NOT NULL DEFAULT FALSE,
    priority BIGINT NOT NULL DEFAULT 10,
    queue BIGINT NOT NULL DEFAULT 0
) ENGINE = InnoDB;
CREATE INDEX test_results__params_deterministic_hash
    ON test_results (params_deterministic_hash);
CREATE INDEX test_results__domain ON test_results (domain);
CREATE INDEX test_results__queue ON test_results (queue, priority, id);
",
    r"
ALTER TABLE test_results RENAME COLUMN params_deterministic_hash TO fingerprint;
DROP INDEX test_results__params_deterministic_hash ON test_results;
CREATE INDEX test_results__fingerprint ON test_results (fingerprint);
",
];
