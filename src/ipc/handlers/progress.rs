use crate::csvq::QuestionKind;
use crate::grade::{self, GradableQuestion};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reward::{self, DifficultyTier, RankTier};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

struct ProgramRow {
    kind: String,
    level: u32,
    difficulty: Option<DifficultyTier>,
    rank_tier: Option<RankTier>,
}

fn load_program(conn: &Connection, program_id: &str) -> Result<Option<ProgramRow>, HandlerErr> {
    conn.query_row(
        "SELECT kind, level, difficulty, rank_tier FROM programs WHERE id = ?",
        [program_id],
        |r| {
            let kind: String = r.get(0)?;
            let level: i64 = r.get(1)?;
            let difficulty: Option<String> = r.get(2)?;
            let rank_tier: Option<String> = r.get(3)?;
            Ok((kind, level, difficulty, rank_tier))
        },
    )
    .optional()
    .map_err(HandlerErr::db)
    .map(|row| {
        row.map(|(kind, level, difficulty, rank_tier)| ProgramRow {
            kind,
            level: level.max(0) as u32,
            difficulty: difficulty.as_deref().and_then(DifficultyTier::parse),
            rank_tier: rank_tier.as_deref().and_then(RankTier::parse),
        })
    })
}

fn load_gradable_questions(
    conn: &Connection,
    program_id: &str,
) -> Result<Vec<GradableQuestion>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, question_type, points
             FROM questions
             WHERE program_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let bare: Vec<(String, String, i64)> = stmt
        .query_map([program_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut correct_stmt = conn
        .prepare(
            "SELECT idx FROM question_options
             WHERE question_id = ? AND is_correct = 1",
        )
        .map_err(HandlerErr::db)?;

    let mut out = Vec::with_capacity(bare.len());
    for (id, type_str, points) in bare {
        let kind = QuestionKind::from_db(&type_str).unwrap_or(QuestionKind::Text);
        let correct: BTreeSet<usize> = correct_stmt
            .query_map([&id], |r| r.get::<_, i64>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?
            .into_iter()
            .map(|v| v.max(0) as usize)
            .collect();
        out.push(GradableQuestion {
            id,
            kind,
            points,
            correct,
        });
    }
    Ok(out)
}

fn parse_answers(params: &serde_json::Value) -> Result<Option<HashMap<String, Vec<usize>>>, HandlerErr> {
    let Some(raw) = params.get("answers") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(obj) = raw.as_object() else {
        return Err(HandlerErr::new(
            "bad_params",
            "answers must map questionId to an array of option indexes",
        ));
    };

    let mut map = HashMap::with_capacity(obj.len());
    for (qid, sel) in obj {
        let Some(arr) = sel.as_array() else {
            return Err(HandlerErr::new(
                "bad_params",
                format!("answers.{} must be an array", qid),
            ));
        };
        let mut indexes = Vec::with_capacity(arr.len());
        for v in arr {
            let Some(n) = v.as_u64() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("answers.{} must contain non-negative integers", qid),
                ));
            };
            indexes.push(n as usize);
        }
        map.insert(qid.clone(), indexes);
    }
    Ok(Some(map))
}

fn handle_activity_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let program_id = match get_required_str(&req.params, "programId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let program = match load_program(conn, &program_id) {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "not_found", "program not found", None),
        Err(e) => return e.response(&req.id),
    };

    let answers = match parse_answers(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let grading = match &answers {
        None => None,
        Some(answers) => {
            let questions = match load_gradable_questions(conn, &program_id) {
                Ok(q) => q,
                Err(e) => return e.response(&req.id),
            };
            if questions.is_empty() {
                return err(
                    &req.id,
                    "no_questions",
                    "program has no questions to grade",
                    None,
                );
            }
            Some(grade::grade_answers(&questions, answers))
        }
    };
    let score_percent = grading.as_ref().map(|g| g.score_percent);

    let xp_awarded = reward::calculate_xp_reward(
        &program.kind,
        program.level,
        program.difficulty,
        program.rank_tier,
    );

    // XP is applied as a relative increment inside one transaction with the
    // history row, so two concurrent completions cannot lose an award.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let xp_before: Option<i64> = match tx
        .query_row("SELECT xp FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let Some(xp_before) = xp_before else {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "user not found", None);
    };

    if let Err(e) = tx.execute(
        "UPDATE users SET xp = xp + ? WHERE id = ?",
        (xp_awarded as i64, &user_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let xp_after: i64 = match tx.query_row("SELECT xp FROM users WHERE id = ?", [&user_id], |r| {
        r.get(0)
    }) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let before = reward::calculate_level(xp_before.max(0) as u32);
    let after = reward::calculate_level(xp_after.max(0) as u32);

    if let Err(e) = tx.execute(
        "INSERT INTO activity_log(
           id, user_id, program_id, kind, xp_awarded, score_percent,
           rank_before, rank_after, completed_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &user_id,
            &program_id,
            &program.kind,
            xp_awarded as i64,
            score_percent,
            before.rank,
            after.rank,
            now_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "activity_log" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let total_xp = xp_after.max(0) as u32;
    let mut result = json!({
        "xpAwarded": xp_awarded,
        "totalXp": total_xp,
        "level": after.level,
        "rank": after.rank,
        "rankUp": before.rank != after.rank,
        "progressPercent": reward::progress_percent(total_xp),
        "scorePercent": score_percent,
    });
    if let Some(g) = grading {
        match serde_json::to_value(&g) {
            Ok(v) => result["grading"] = v,
            Err(e) => return err(&req.id, "serialize_failed", e.to_string(), None),
        }
    }
    ok(&req.id, result)
}

fn handle_history_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT al.id, al.program_id, p.title, al.kind, al.xp_awarded,
                al.score_percent, al.rank_before, al.rank_after, al.completed_at
         FROM activity_log al
         JOIN programs p ON p.id = al.program_id
         WHERE al.user_id = ?
         ORDER BY al.completed_at DESC, al.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&user_id], |row| {
            let id: String = row.get(0)?;
            let program_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            let kind: String = row.get(3)?;
            let xp_awarded: i64 = row.get(4)?;
            let score_percent: Option<f64> = row.get(5)?;
            let rank_before: String = row.get(6)?;
            let rank_after: String = row.get(7)?;
            let completed_at: String = row.get(8)?;
            Ok(json!({
                "id": id,
                "programId": program_id,
                "programTitle": title,
                "kind": kind,
                "xpAwarded": xp_awarded,
                "scorePercent": score_percent,
                "rankBefore": rank_before,
                "rankAfter": rank_after,
                "rankUp": rank_before != rank_after,
                "completedAt": completed_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activity.complete" => Some(handle_activity_complete(state, req)),
        "history.list" => Some(handle_history_list(state, req)),
        _ => None,
    }
}
