use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "examd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            email TEXT UNIQUE,
            xp INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            level INTEGER NOT NULL DEFAULT 1,
            difficulty TEXT,
            rank_tier TEXT,
            sort_order INTEGER NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            content TEXT NOT NULL,
            question_type TEXT NOT NULL,
            explanation TEXT,
            difficulty INTEGER NOT NULL DEFAULT 1,
            points INTEGER NOT NULL DEFAULT 10,
            tags TEXT NOT NULL DEFAULT '',
            category TEXT,
            image_url TEXT,
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_program ON questions(program_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_program_sort ON questions(program_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_options(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            text TEXT NOT NULL,
            is_correct INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(question_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_options_question ON question_options(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_log(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            program_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            xp_awarded INTEGER NOT NULL,
            score_percent REAL,
            rank_before TEXT NOT NULL,
            rank_after TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_log_user ON activity_log(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activity_log_program ON activity_log(program_id)",
        [],
    )?;

    // Workspaces created before exam tiers were stored per program need the
    // extra columns added and left NULL.
    ensure_programs_difficulty_columns(&conn)?;

    Ok(conn)
}

fn ensure_programs_difficulty_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "programs", "difficulty")? {
        conn.execute("ALTER TABLE programs ADD COLUMN difficulty TEXT", [])?;
    }
    if !table_has_column(conn, "programs", "rank_tier")? {
        conn.execute("ALTER TABLE programs ADD COLUMN rank_tier TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
