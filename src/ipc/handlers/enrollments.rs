use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const INELIGIBLE_STATUSES: [&str; 2] = ["Suspended", "Graduated"];

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "enrollments": [] }));
    };

    let student_id = req.params.get("studentId").and_then(|v| v.as_str());
    let course_id = req.params.get("courseId").and_then(|v| v.as_str());

    let (filter_sql, filter_param) = match (student_id, course_id) {
        (Some(sid), _) => ("WHERE e.student_id = ?", Some(sid.to_string())),
        (None, Some(cid)) => ("WHERE e.course_id = ?", Some(cid.to_string())),
        (None, None) => ("", None),
    };

    let sql = format!(
        "SELECT
           e.id,
           e.student_id,
           s.registration_no,
           s.full_name,
           e.course_id,
           c.course_code,
           c.course_name,
           c.credits,
           e.enrolled_at
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         JOIN courses c ON c.id = e.course_id
         {}
         ORDER BY c.course_code, s.registration_no",
        filter_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "enrollmentId": row.get::<_, String>(0)?,
            "studentId": row.get::<_, String>(1)?,
            "registrationNo": row.get::<_, String>(2)?,
            "fullName": row.get::<_, String>(3)?,
            "courseId": row.get::<_, String>(4)?,
            "courseCode": row.get::<_, String>(5)?,
            "courseName": row.get::<_, String>(6)?,
            "credits": row.get::<_, i64>(7)?,
            "enrolledAt": row.get::<_, Option<String>>(8)?
        }))
    };

    let rows = match filter_param {
        Some(p) => stmt
            .query_map([p], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };

    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let status: Option<String> = match conn
        .query_row(
            "SELECT status FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(status) = status else {
        return err(&req.id, "not_found", "student not found", None);
    };
    if INELIGIBLE_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "not_eligible",
            format!("cannot enroll student with status: {}", status),
            Some(json!({ "status": status })),
        );
    }

    let course_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let duplicate: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE student_id = ? AND course_id = ?",
        (&student_id, &course_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate > 0 {
        return err(
            &req.id,
            "already_exists",
            "student is already enrolled in this course",
            None,
        );
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, enrolled_at) VALUES(?, ?, ?, ?)",
        (&enrollment_id, &student_id, &course_id, helpers::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    helpers::log_activity(
        conn,
        "enrollments.create",
        &format!("{}/{}", student_id, course_id),
    );
    ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "studentId": student_id,
            "courseId": course_id
        }),
    )
}

fn handle_enrollments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let enrollment_id = match req.params.get("enrollmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing enrollmentId", None),
    };

    let pair: Option<(String, String)> = match conn
        .query_row(
            "SELECT student_id, course_id FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, course_id)) = pair else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    // The pair's marks and stored result go with the enrollment; a
    // re-enrollment starts clean.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM marks WHERE student_id = ? AND course_id = ?",
        (&student_id, &course_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM final_results WHERE student_id = ? AND course_id = ?",
        (&student_id, &course_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "final_results" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM attendance_records
         WHERE student_id = ?
           AND session_id IN (SELECT id FROM attendance_sessions WHERE course_id = ?)",
        (&student_id, &course_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_records" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM enrollments WHERE id = ?", [&enrollment_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    helpers::log_activity(
        conn,
        "enrollments.delete",
        &format!("{}/{}", student_id, course_id),
    );
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.delete" => Some(handle_enrollments_delete(state, req)),
        _ => None,
    }
}
