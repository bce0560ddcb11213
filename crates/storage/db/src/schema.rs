//! Embedded DDL, applied idempotently at startup.
//!
//! Timestamps are unix milliseconds (INTEGER) so claim scans order and
//! compare without format concerns. JSON payloads are TEXT. Mutable tables
//! carry a `version` column for optimistic concurrency; append-only tables
//! enforce immutability of their core columns with triggers.

pub(crate) const STATEMENTS: &[&str] = &[
    // --- accounts
    "CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        owner TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_accounts_tenant ON accounts (tenant, created_at)",
    // --- functions
    "CREATE TABLE IF NOT EXISTS functions (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        source TEXT NOT NULL,
        secrets TEXT NOT NULL,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_functions_scope ON functions (tenant, account_id, created_at)",
    // --- executions (append-only)
    "CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        function_id TEXT NOT NULL,
        input TEXT NOT NULL,
        output TEXT,
        status TEXT NOT NULL,
        error TEXT,
        actions TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_executions_scope ON executions (tenant, account_id, started_at)",
    "CREATE INDEX IF NOT EXISTS idx_executions_function ON executions (function_id, started_at)",
    "CREATE TRIGGER IF NOT EXISTS executions_append_only
        BEFORE UPDATE ON executions
     BEGIN
        SELECT RAISE(ABORT, 'executions are append-only');
     END",
    // --- automation jobs
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        function_id TEXT NOT NULL,
        name TEXT NOT NULL,
        schedule TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        check_mode TEXT NOT NULL,
        context TEXT NOT NULL,
        last_fired_at INTEGER,
        last_result TEXT,
        attempts INTEGER NOT NULL,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_scope ON jobs (tenant, account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_enabled ON jobs (enabled, created_at)",
    // --- triggers
    "CREATE TABLE IF NOT EXISTS triggers (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        rule TEXT NOT NULL,
        config TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_triggers_scope ON triggers (tenant, account_id, created_at)",
    // --- oracle
    "CREATE TABLE IF NOT EXISTS oracle_sources (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        method TEXT NOT NULL,
        headers TEXT NOT NULL,
        body_template TEXT,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_oracle_sources_scope
        ON oracle_sources (tenant, account_id, created_at)",
    "CREATE TABLE IF NOT EXISTS oracle_requests (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        source_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        next_attempt_at INTEGER NOT NULL,
        ttl_expires_at INTEGER NOT NULL,
        result TEXT,
        error TEXT,
        claimed_by TEXT,
        claimed_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_oracle_requests_scope
        ON oracle_requests (tenant, account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_oracle_requests_claim
        ON oracle_requests (status, next_attempt_at)",
    // --- gas bank
    "CREATE TABLE IF NOT EXISTS gas_accounts (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        wallet_address TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_gas_accounts_scope
        ON gas_accounts (tenant, account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_gas_accounts_wallet ON gas_accounts (wallet_address)",
    "CREATE TABLE IF NOT EXISTS gas_transactions (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        gas_account_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        amount INTEGER NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        reference TEXT,
        next_attempt_at INTEGER,
        claimed_by TEXT,
        claimed_at INTEGER,
        created_at INTEGER NOT NULL,
        settled_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_gas_transactions_scope
        ON gas_transactions (tenant, account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_gas_transactions_account
        ON gas_transactions (gas_account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_gas_transactions_claim
        ON gas_transactions (kind, status, next_attempt_at)",
    "CREATE TRIGGER IF NOT EXISTS gas_transactions_core_immutable
        BEFORE UPDATE ON gas_transactions
        WHEN OLD.kind != NEW.kind
            OR OLD.amount != NEW.amount
            OR OLD.gas_account_id != NEW.gas_account_id
            OR OLD.tenant != NEW.tenant
            OR OLD.account_id != NEW.account_id
     BEGIN
        SELECT RAISE(ABORT, 'gas ledger entries are append-only');
     END",
    // --- feeds
    "CREATE TABLE IF NOT EXISTS feeds (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        pair TEXT NOT NULL,
        decimals INTEGER NOT NULL,
        heartbeat_secs INTEGER NOT NULL,
        threshold_ppm INTEGER NOT NULL,
        aggregation TEXT NOT NULL,
        signer_set TEXT NOT NULL,
        threshold INTEGER NOT NULL,
        last_value INTEGER,
        last_round_id INTEGER NOT NULL,
        last_publish_at INTEGER,
        enabled INTEGER NOT NULL,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_feeds_scope ON feeds (tenant, account_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_feeds_enabled ON feeds (enabled, created_at)",
    "CREATE TABLE IF NOT EXISTS feed_updates (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        feed_id TEXT NOT NULL,
        round_id INTEGER NOT NULL,
        price INTEGER NOT NULL,
        signer TEXT NOT NULL,
        signature TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_feed_updates_feed
        ON feed_updates (feed_id, round_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_feed_updates_scope
        ON feed_updates (tenant, account_id, created_at)",
    "CREATE TRIGGER IF NOT EXISTS feed_updates_core_immutable
        BEFORE UPDATE ON feed_updates
        WHEN OLD.round_id != NEW.round_id
            OR OLD.price != NEW.price
            OR OLD.signer != NEW.signer
            OR OLD.signature != NEW.signature
            OR OLD.feed_id != NEW.feed_id
     BEGIN
        SELECT RAISE(ABORT, 'feed updates are append-only');
     END",
    // --- secrets
    "CREATE TABLE IF NOT EXISTS secrets (
        id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        ciphertext BLOB NOT NULL,
        version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (tenant, account_id, name)
    )",
];
