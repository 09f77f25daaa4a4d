use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reward;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let display_name = match get_required_str(&req.params, "displayName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if display_name.is_empty() {
        return err(&req.id, "bad_params", "displayName must not be empty", None);
    }
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, display_name, email, xp, created_at) VALUES(?, ?, ?, 0, ?)",
        (&user_id, &display_name, email.as_deref(), now_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "displayName": display_name, "email": email }),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           u.id,
           u.display_name,
           u.email,
           u.xp,
           (SELECT COUNT(*) FROM activity_log al WHERE al.user_id = u.id) AS completion_count
         FROM users u
         ORDER BY u.xp DESC, u.display_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            let email: Option<String> = row.get(2)?;
            let xp: i64 = row.get(3)?;
            let completion_count: i64 = row.get(4)?;
            let standing = reward::calculate_level(xp.max(0) as u32);
            Ok(json!({
                "id": id,
                "displayName": display_name,
                "email": email,
                "xp": xp,
                "level": standing.level,
                "rank": standing.rank,
                "completionCount": completion_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn user_xp(
    conn: &rusqlite::Connection,
    user_id: &str,
) -> Result<Option<i64>, HandlerErr> {
    conn.query_row("SELECT xp FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::db)
}

fn handle_users_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let xp = match user_xp(conn, &user_id) {
        Ok(Some(v)) => v.max(0) as u32,
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return e.response(&req.id),
    };

    let standing = reward::calculate_level(xp);
    ok(
        &req.id,
        json!({
            "userId": user_id,
            "xp": xp,
            "level": standing.level,
            "rank": standing.rank,
            "nextLevelXp": standing.next_min_xp,
            "progressPercent": reward::progress_percent(xp),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.progress" => Some(handle_users_progress(state, req)),
        _ => None,
    }
}
