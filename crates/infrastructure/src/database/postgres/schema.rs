//! PostgreSQL 数据库结构，所有语句均可重复执行

pub(crate) const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schedulers (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cron VARCHAR(255) NOT NULL,
        payload JSONB NOT NULL DEFAULT '{}',
        status VARCHAR(20) NOT NULL DEFAULT 'running',
        entry_id BIGINT NOT NULL DEFAULT 0,
        start_at TIMESTAMPTZ NOT NULL,
        end_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        deleted_at TIMESTAMPTZ
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_schedulers_running_name ON schedulers(name) WHERE status = 'running' AND deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_schedulers_status ON schedulers(status)",
    r#"
    CREATE TABLE IF NOT EXISTS "groups" (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mix_values (
        id BIGSERIAL PRIMARY KEY,
        group_id BIGINT NOT NULL REFERENCES "groups"(id) ON DELETE CASCADE,
        name VARCHAR(255) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (group_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pools (
        id BIGSERIAL PRIMARY KEY,
        group1_id BIGINT NOT NULL,
        group2_id BIGINT NOT NULL,
        mv1_id BIGINT NOT NULL,
        mv2_id BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        deleted_at TIMESTAMPTZ
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_pools_active ON pools(group1_id, group2_id, mv1_id, mv2_id) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_pools_left ON pools(group1_id, group2_id, mv1_id)",
    r#"INSERT INTO "groups" (name) VALUES ('users'), ('roles'), ('permissions') ON CONFLICT DO NOTHING"#,
];
