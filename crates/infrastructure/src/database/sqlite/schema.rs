//! SQLite 数据库结构，所有语句均可重复执行

pub(crate) const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schedulers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        cron TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'running',
        entry_id INTEGER NOT NULL DEFAULT 0,
        start_at DATETIME NOT NULL,
        end_at DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        deleted_at DATETIME
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_schedulers_running_name ON schedulers(name) WHERE status = 'running' AND deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_schedulers_status ON schedulers(status)",
    r#"
    CREATE TABLE IF NOT EXISTS "groups" (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mix_values (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (group_id, name),
        FOREIGN KEY (group_id) REFERENCES "groups"(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pools (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group1_id INTEGER NOT NULL,
        group2_id INTEGER NOT NULL,
        mv1_id INTEGER NOT NULL,
        mv2_id INTEGER NOT NULL,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        deleted_at DATETIME
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_pools_active ON pools(group1_id, group2_id, mv1_id, mv2_id) WHERE deleted_at IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_pools_left ON pools(group1_id, group2_id, mv1_id)",
    r#"INSERT INTO "groups" (name) VALUES ('users'), ('roles'), ('permissions') ON CONFLICT DO NOTHING"#,
];
