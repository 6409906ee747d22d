use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const MIN_CREDITS: i64 = 1;
const MAX_CREDITS: i64 = 30;

/// Credits must be a whole number between 1 and 30.
fn parse_credits(v: Option<&serde_json::Value>) -> Result<i64, String> {
    let Some(v) = v else {
        return Err("missing credits".to_string());
    };
    let n = match (v.as_i64(), v.as_f64()) {
        (Some(n), _) => n,
        (None, Some(f)) if f.fract() == 0.0 => f as i64,
        (None, Some(_)) => return Err("credits must be a whole number".to_string()),
        _ => return Err("credits must be a number".to_string()),
    };
    if !(MIN_CREDITS..=MAX_CREDITS).contains(&n) {
        return Err(format!(
            "credits must be between {} and {}",
            MIN_CREDITS, MAX_CREDITS
        ));
    }
    Ok(n)
}

fn course_code_exists(
    conn: &Connection,
    code: &str,
    exclude_id: Option<&str>,
) -> Result<bool, rusqlite::Error> {
    let count: i64 = match exclude_id {
        Some(id) => conn.query_row(
            "SELECT COUNT(*) FROM courses WHERE course_code = ? AND id != ?",
            (code, id),
            |r| r.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM courses WHERE course_code = ?",
            [code],
            |r| r.get(0),
        )?,
    };
    Ok(count > 0)
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Correlated subqueries keep the counts join-free.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.course_code,
           c.course_name,
           c.credits,
           (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count,
           (SELECT COUNT(*) FROM final_results fr WHERE fr.course_id = c.id) AS graded_count
         FROM courses c
         ORDER BY c.course_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let course_code: String = row.get(1)?;
            let course_name: String = row.get(2)?;
            let credits: i64 = row.get(3)?;
            let enrollment_count: i64 = row.get(4)?;
            let graded_count: i64 = row.get(5)?;
            Ok(json!({
                "courseId": id,
                "courseCode": course_code,
                "courseName": course_name,
                "credits": credits,
                "enrollmentCount": enrollment_count,
                "gradedCount": graded_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("courseCode").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing courseCode", None),
    };
    let name = match req.params.get("courseName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing courseName", None),
    };
    if code.is_empty() || name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "courseCode and courseName must not be empty",
            None,
        );
    }
    let credits = match parse_credits(req.params.get("credits")) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match course_code_exists(conn, &code, None) {
        Ok(true) => {
            return err(
                &req.id,
                "already_exists",
                "course code already exists",
                Some(json!({ "courseCode": code })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, course_code, course_name, credits, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&course_id, &code, &name, credits, helpers::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    helpers::log_activity(conn, "courses.create", &code);
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "courseCode": code,
            "courseName": name,
            "credits": credits
        }),
    )
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    // Fields omitted from the request keep their stored values.
    let current: Option<(String, String, i64)> = match conn
        .query_row(
            "SELECT course_code, course_name, credits FROM courses WHERE id = ?",
            [&course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((cur_code, cur_name, cur_credits)) = current else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let code = match req.params.get("courseCode").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => cur_code,
    };
    let name = match req.params.get("courseName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => cur_name,
    };
    if code.is_empty() || name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "courseCode and courseName must not be empty",
            None,
        );
    }
    let credits = match req.params.get("credits") {
        Some(v) => match parse_credits(Some(v)) {
            Ok(v) => v,
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        },
        None => cur_credits,
    };

    match course_code_exists(conn, &code, Some(&course_id)) {
        Ok(true) => {
            return err(
                &req.id,
                "already_exists",
                "course code already exists",
                Some(json!({ "courseCode": code })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE courses SET course_code = ?, course_name = ?, credits = ? WHERE id = ?",
        (&code, &name, credits, &course_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    helpers::log_activity(conn, "courses.update", &code);
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "courseCode": code,
            "courseName": name,
            "credits": credits
        }),
    )
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    // Courses with enrollments stay; marks and results hang off enrollments.
    let in_use: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if in_use > 0 {
        return err(
            &req.id,
            "course_in_use",
            "cannot delete a course with active enrollments",
            Some(json!({ "enrollmentCount": in_use })),
        );
    }

    // Orphaned sessions (every enrollment already removed) go with the
    // course; their records were deleted with the enrollments.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM attendance_records
         WHERE session_id IN (SELECT id FROM attendance_sessions WHERE course_id = ?)",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_records" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_sessions WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    helpers::log_activity(conn, "courses.delete", &course_id);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
