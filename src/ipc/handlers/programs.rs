use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, now_rfc3339, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reward::{self, ActivityKind, DifficultyTier, RankTier};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_programs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "programs": [] }));
    };

    // Include counts so the admin dashboard needs no follow-up queries.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           p.id,
           p.title,
           p.kind,
           p.level,
           p.difficulty,
           p.rank_tier,
           (SELECT COUNT(*) FROM questions q WHERE q.program_id = p.id) AS question_count,
           (SELECT COUNT(*) FROM activity_log al WHERE al.program_id = p.id) AS completion_count
         FROM programs p
         ORDER BY p.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let level: i64 = row.get(3)?;
            let difficulty: Option<String> = row.get(4)?;
            let rank_tier: Option<String> = row.get(5)?;
            let question_count: i64 = row.get(6)?;
            let completion_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "title": title,
                "kind": kind,
                "level": level,
                "difficulty": difficulty,
                "rankTier": rank_tier,
                "questionCount": question_count,
                "completionCount": completion_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct ResolvedPlacement {
    level: u32,
    difficulty: Option<DifficultyTier>,
}

/// Level and difficulty come either from an explicit `level` param or from a
/// content-file label such as `intermediate_2` via the unlock-tier rules.
fn resolve_placement(params: &serde_json::Value) -> Result<ResolvedPlacement, HandlerErr> {
    if let Some(label) = params.get("label").and_then(|v| v.as_str()) {
        let Some((tier, seq)) = reward::parse_level_label(label) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("unrecognized level label '{}'", label),
            ));
        };
        let Some(level) = reward::unlock_level(tier, seq) else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("level label '{}' is out of range", label),
            ));
        };
        return Ok(ResolvedPlacement {
            level,
            difficulty: Some(tier),
        });
    }

    let level = match params.get("level") {
        None => 1,
        Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) => n,
            None => {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("level must be an integer in 0..={}", u32::MAX),
                ))
            }
        },
    };

    let difficulty = match params.get("difficulty").and_then(|v| v.as_str()) {
        None => None,
        Some(s) => match DifficultyTier::parse(s) {
            Some(t) => Some(t),
            None => {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("unrecognized difficulty '{}'", s),
                ))
            }
        },
    };

    Ok(ResolvedPlacement { level, difficulty })
}

fn create_program(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }

    let kind_raw = get_required_str(params, "kind")?;
    let Some(kind) = ActivityKind::from_db(&kind_raw) else {
        return Err(HandlerErr::new(
            "bad_params",
            format!("kind must be lecture, test, or exam (got '{}')", kind_raw),
        ));
    };

    let placement = resolve_placement(params)?;

    let rank_tier = match kind {
        ActivityKind::Exam => match params.get("rankTier").and_then(|v| v.as_str()) {
            Some(s) => match RankTier::parse(s) {
                Some(t) => Some(t),
                None => {
                    return Err(HandlerErr::new(
                        "bad_params",
                        format!("unrecognized rankTier '{}'", s),
                    ))
                }
            },
            None => Some(RankTier::from_level(placement.level)),
        },
        _ => None,
    };

    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM programs",
            [],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let program_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(id, title, kind, level, difficulty, rank_tier, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &program_id,
            &title,
            kind.as_str(),
            placement.level as i64,
            placement.difficulty.map(|d| d.as_str()),
            rank_tier.map(|t| t.as_str()),
            sort_order,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "programs" })),
    })?;

    Ok(json!({
        "programId": program_id,
        "title": title,
        "kind": kind.as_str(),
        "level": placement.level,
        "difficulty": placement.difficulty.map(|d| d.as_str()),
        "rankTier": rank_tier.map(|t| t.as_str()),
    }))
}

fn handle_programs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match create_program(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn delete_program(conn: &Connection, program_id: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, "programs", program_id)? {
        return Err(HandlerErr::new("not_found", "program not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicit deletes in dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 4] = [
        ("activity_log", "DELETE FROM activity_log WHERE program_id = ?"),
        (
            "question_options",
            "DELETE FROM question_options
             WHERE question_id IN (SELECT id FROM questions WHERE program_id = ?)",
        ),
        ("questions", "DELETE FROM questions WHERE program_id = ?"),
        ("programs", "DELETE FROM programs WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [program_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))
}

fn handle_programs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match get_required_str(&req.params, "programId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match delete_program(conn, &program_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.list" => Some(handle_programs_list(state, req)),
        "programs.create" => Some(handle_programs_create(state, req)),
        "programs.delete" => Some(handle_programs_delete(state, req)),
        _ => None,
    }
}
