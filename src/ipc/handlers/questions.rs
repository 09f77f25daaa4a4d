use crate::csvq::{self, CsvQuestionInput};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn handle_preview_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    let csv_text = match get_required_str(&req.params, "csvText") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let outcome = csvq::parse_questions_csv(&csv_text);
    let data = match serde_json::to_value(&outcome.data) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "serialize_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "data": data, "errors": outcome.errors }),
    )
}

fn insert_batch(
    conn: &Connection,
    program_id: &str,
    rows: &[CsvQuestionInput],
) -> Result<usize, HandlerErr> {
    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM questions WHERE program_id = ?",
            [program_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut option_count = 0usize;
    for (offset, q) in rows.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO questions(
               id, program_id, sort_order, content, question_type, explanation,
               difficulty, points, tags, category, image_url
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &question_id,
                program_id,
                next_sort + offset as i64,
                &q.content,
                q.question_type.as_str(),
                q.explanation.as_deref(),
                q.difficulty,
                q.points,
                q.tags.join(","),
                q.category.as_deref(),
                q.image_url.as_deref(),
            ),
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "questions" })),
            });
        }

        for (idx, text) in q.options.iter().enumerate() {
            // CSV correct indices are 1-based; stored idx is 0-based.
            let is_correct = q.correct_indices.contains(&(idx + 1));
            if let Err(e) = tx.execute(
                "INSERT INTO question_options(id, question_id, idx, text, is_correct)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &question_id,
                    idx as i64,
                    text,
                    is_correct as i64,
                ),
            ) {
                let _ = tx.rollback();
                return Err(HandlerErr {
                    code: "db_insert_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "question_options" })),
                });
            }
            option_count += 1;
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(option_count)
}

fn handle_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match get_required_str(&req.params, "programId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let csv_text = match get_required_str(&req.params, "csvText") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match row_exists(conn, "programs", &program_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "program not found", None),
        Err(e) => return e.response(&req.id),
    }

    let outcome = csvq::parse_questions_csv(&csv_text);

    // All-or-nothing: a single bad row rejects the whole file so a partial
    // question bank never reaches takers.
    if !outcome.errors.is_empty() {
        return err(
            &req.id,
            "csv_invalid",
            format!("{} row error(s); nothing imported", outcome.errors.len()),
            Some(json!({
                "errors": outcome.errors,
                "validRows": outcome.data.len(),
            })),
        );
    }
    if outcome.data.is_empty() {
        return err(&req.id, "csv_empty", "no data rows in file", None);
    }

    match insert_batch(conn, &program_id, &outcome.data) {
        Ok(option_count) => ok(
            &req.id,
            json!({
                "imported": outcome.data.len(),
                "optionCount": option_count,
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_questions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match get_required_str(&req.params, "programId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, sort_order, content, question_type, explanation,
                difficulty, points, tags, category, image_url
         FROM questions
         WHERE program_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let questions = stmt
        .query_map([&program_id], |row| {
            let id: String = row.get(0)?;
            let sort_order: i64 = row.get(1)?;
            let content: String = row.get(2)?;
            let question_type: String = row.get(3)?;
            let explanation: Option<String> = row.get(4)?;
            let difficulty: i64 = row.get(5)?;
            let points: i64 = row.get(6)?;
            let tags: String = row.get(7)?;
            let category: Option<String> = row.get(8)?;
            let image_url: Option<String> = row.get(9)?;
            Ok(json!({
                "id": id,
                "sortOrder": sort_order,
                "content": content,
                "questionType": question_type,
                "explanation": explanation,
                "difficulty": difficulty,
                "points": points,
                "tags": tags.split(',').filter(|t| !t.is_empty()).collect::<Vec<_>>(),
                "category": category,
                "imageUrl": image_url,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let mut questions = match questions {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Attach options per question. This is an administrator surface, so the
    // correct flags travel with them.
    let mut opt_stmt = match conn.prepare(
        "SELECT idx, text, is_correct
         FROM question_options
         WHERE question_id = ?
         ORDER BY idx",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for q in questions.iter_mut() {
        let qid = q
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let options = opt_stmt
            .query_map([&qid], |row| {
                let idx: i64 = row.get(0)?;
                let text: String = row.get(1)?;
                let is_correct: i64 = row.get(2)?;
                Ok(json!({
                    "idx": idx,
                    "text": text,
                    "isCorrect": is_correct != 0,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match options {
            Ok(opts) => q["options"] = json!(opts),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    ok(&req.id, json!({ "questions": questions }))
}

fn handle_questions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let question_id = match get_required_str(&req.params, "questionId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match row_exists(conn, "questions", &question_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "question not found", None),
        Err(e) => return e.response(&req.id),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM question_options WHERE question_id = ?",
        [&question_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "question_options" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM questions WHERE id = ?", [&question_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "questions" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.previewCsv" => Some(handle_preview_csv(state, req)),
        "questions.importCsv" => Some(handle_import_csv(state, req)),
        "questions.list" => Some(handle_questions_list(state, req)),
        "questions.delete" => Some(handle_questions_delete(state, req)),
        _ => None,
    }
}
