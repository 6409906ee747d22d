use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const KNOWN_STATUSES: [&str; 2] = ["Present", "Absent"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordParam {
    student_id: String,
    status: String,
}

fn handle_attendance_list_sessions(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sessions": [] }));
    };

    let course_id = req.params.get("courseId").and_then(|v| v.as_str());

    let (filter_sql, filter_param) = match course_id {
        Some(cid) => ("WHERE a.course_id = ?", Some(cid.to_string())),
        None => ("", None),
    };

    let sql = format!(
        "SELECT
           a.id,
           a.course_id,
           c.course_code,
           c.course_name,
           a.session_date,
           a.created_at,
           (SELECT COUNT(*) FROM attendance_records ar WHERE ar.session_id = a.id) AS marked_count
         FROM attendance_sessions a
         JOIN courses c ON c.id = a.course_id
         {}
         ORDER BY a.session_date DESC, a.created_at DESC",
        filter_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "sessionId": row.get::<_, String>(0)?,
            "courseId": row.get::<_, String>(1)?,
            "courseCode": row.get::<_, String>(2)?,
            "courseName": row.get::<_, String>(3)?,
            "sessionDate": row.get::<_, String>(4)?,
            "createdAt": row.get::<_, Option<String>>(5)?,
            "markedCount": row.get::<_, i64>(6)?
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
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_attendance_create_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };
    let session_date = match req.params.get("sessionDate").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing sessionDate", None),
    };
    if chrono::NaiveDate::parse_from_str(&session_date, "%Y-%m-%d").is_err() {
        return err(
            &req.id,
            "bad_params",
            "sessionDate must be a valid YYYY-MM-DD date",
            Some(json!({ "sessionDate": session_date })),
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
        "SELECT COUNT(*) FROM attendance_sessions WHERE course_id = ? AND session_date = ?",
        (&course_id, &session_date),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate > 0 {
        return err(
            &req.id,
            "already_exists",
            "a session for this course already exists on this date",
            Some(json!({ "sessionDate": session_date })),
        );
    }

    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO attendance_sessions(id, course_id, session_date, created_at)
         VALUES(?, ?, ?, ?)",
        (&session_id, &course_id, &session_date, helpers::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }

    helpers::log_activity(
        conn,
        "attendance.createSession",
        &format!("{}/{}", course_id, session_date),
    );
    ok(
        &req.id,
        json!({
            "sessionId": session_id,
            "courseId": course_id,
            "sessionDate": session_date
        }),
    )
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match req.params.get("sessionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };
    let records: Vec<RecordParam> = match req.params.get("records") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(r) => r,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("records must be a list of {{studentId, status}}: {}", e),
                    None,
                )
            }
        },
        None => Vec::new(),
    };
    for r in &records {
        if !KNOWN_STATUSES.contains(&r.status.as_str()) {
            return err(
                &req.id,
                "bad_params",
                "status must be Present or Absent",
                Some(json!({ "studentId": r.student_id, "status": r.status })),
            );
        }
    }

    let course_id: Option<String> = match conn
        .query_row(
            "SELECT course_id FROM attendance_sessions WHERE id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "session not found", None);
    };

    let enrolled: Vec<String> = {
        let mut stmt = match conn.prepare(
            "SELECT e.student_id
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.course_id = ?
             ORDER BY s.registration_no",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&course_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let by_student: HashMap<&str, &str> = records
        .iter()
        .map(|r| (r.student_id.as_str(), r.status.as_str()))
        .collect();

    // Every enrolled student gets a row; unmentioned students default to
    // Absent. Re-marking a session overwrites the previous statuses.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for student_id in &enrolled {
        let status = by_student.get(student_id.as_str()).copied().unwrap_or("Absent");
        if let Err(e) = tx.execute(
            "INSERT INTO attendance_records(session_id, student_id, status)
             VALUES(?, ?, ?)
             ON CONFLICT(session_id, student_id) DO UPDATE SET
               status = excluded.status",
            (&session_id, student_id, status),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_records" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    helpers::log_activity(
        conn,
        "attendance.mark",
        &format!("{} ({} students)", session_id, enrolled.len()),
    );
    ok(
        &req.id,
        json!({
            "sessionId": session_id,
            "courseId": course_id,
            "markedCount": enrolled.len()
        }),
    )
}

fn handle_attendance_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Courses the student is enrolled in that have held at least one
    // session; a session with no record for the student counts as neither
    // present nor absent (it predates their marking).
    let mut stmt = match conn.prepare(
        "SELECT c.id, c.course_code, c.course_name,
                COUNT(DISTINCT a.id) AS total_sessions,
                SUM(CASE WHEN ar.status = 'Present' THEN 1 ELSE 0 END) AS present_count,
                SUM(CASE WHEN ar.status = 'Absent' THEN 1 ELSE 0 END) AS absent_count
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         JOIN attendance_sessions a ON a.course_id = c.id
         LEFT JOIN attendance_records ar
           ON ar.session_id = a.id AND ar.student_id = e.student_id
         WHERE e.student_id = ?
         GROUP BY c.id, c.course_code, c.course_name
         ORDER BY c.course_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Result<Vec<(serde_json::Value, i64, i64, i64)>, _> = stmt
        .query_map([&student_id], |row| {
            let course_id: String = row.get(0)?;
            let course_code: String = row.get(1)?;
            let course_name: String = row.get(2)?;
            let total_sessions: i64 = row.get(3)?;
            let present_count: i64 = row.get::<_, Option<i64>>(4)?.unwrap_or(0);
            let absent_count: i64 = row.get::<_, Option<i64>>(5)?.unwrap_or(0);

            let percentage = if total_sessions > 0 {
                grading::round2(present_count as f64 / total_sessions as f64 * 100.0)
            } else {
                0.0
            };
            let course = json!({
                "courseId": course_id,
                "courseCode": course_code,
                "courseName": course_name,
                "totalSessions": total_sessions,
                "presentCount": present_count,
                "absentCount": absent_count,
                "percentage": percentage
            });
            Ok((course, total_sessions, present_count, absent_count))
        })
        .and_then(|it| it.collect());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let total_sessions: i64 = rows.iter().map(|(_, t, _, _)| t).sum();
    let total_present: i64 = rows.iter().map(|(_, _, p, _)| p).sum();
    let total_absent: i64 = rows.iter().map(|(_, _, _, a)| a).sum();
    let overall_percentage = if total_sessions > 0 {
        grading::round2(total_present as f64 / total_sessions as f64 * 100.0)
    } else {
        0.0
    };
    let courses: Vec<serde_json::Value> = rows.into_iter().map(|(c, _, _, _)| c).collect();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "courses": courses,
            "totalSessions": total_sessions,
            "presentCount": total_present,
            "absentCount": total_absent,
            "overallPercentage": overall_percentage
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.listSessions" => Some(handle_attendance_list_sessions(state, req)),
        "attendance.createSession" => Some(handle_attendance_create_session(state, req)),
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.forStudent" => Some(handle_attendance_for_student(state, req)),
        _ => None,
    }
}
