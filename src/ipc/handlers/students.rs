use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const KNOWN_STATUSES: [&str; 3] = ["Active", "Suspended", "Graduated"];

fn registration_exists(
    conn: &Connection,
    reg_no: &str,
    exclude_id: Option<&str>,
) -> Result<bool, rusqlite::Error> {
    let count: i64 = match exclude_id {
        Some(id) => conn.query_row(
            "SELECT COUNT(*) FROM students WHERE registration_no = ? AND id != ?",
            (reg_no, id),
            |r| r.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM students WHERE registration_no = ?",
            [reg_no],
            |r| r.get(0),
        )?,
    };
    Ok(count > 0)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id,
           s.registration_no,
           s.full_name,
           s.status,
           (SELECT COUNT(*) FROM enrollments e WHERE e.student_id = s.id) AS enrollment_count
         FROM students s
         ORDER BY s.registration_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let registration_no: String = row.get(1)?;
            let full_name: String = row.get(2)?;
            let status: String = row.get(3)?;
            let enrollment_count: i64 = row.get(4)?;
            Ok(json!({
                "studentId": id,
                "registrationNo": registration_no,
                "fullName": full_name,
                "status": status,
                "enrollmentCount": enrollment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let reg_no = match req.params.get("registrationNo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing registrationNo", None),
    };
    let full_name = match req.params.get("fullName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing fullName", None),
    };
    if reg_no.is_empty() || full_name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "registrationNo and fullName must not be empty",
            None,
        );
    }

    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("Active")
        .to_string();
    if !KNOWN_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: Active, Suspended, Graduated",
            Some(json!({ "status": status })),
        );
    }

    match registration_exists(conn, &reg_no, None) {
        Ok(true) => {
            return err(
                &req.id,
                "already_exists",
                "registration number already exists",
                Some(json!({ "registrationNo": reg_no })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, registration_no, full_name, status, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, &reg_no, &full_name, &status, helpers::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    helpers::log_activity(conn, "students.create", &reg_no);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "registrationNo": reg_no,
            "fullName": full_name,
            "status": status
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let current: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT registration_no, full_name, status FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((cur_reg, cur_name, cur_status)) = current else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let reg_no = req
        .params
        .get("registrationNo")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or(cur_reg);
    let full_name = req
        .params
        .get("fullName")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or(cur_name);
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or(cur_status);

    if reg_no.is_empty() || full_name.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "registrationNo and fullName must not be empty",
            None,
        );
    }
    if !KNOWN_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: Active, Suspended, Graduated",
            Some(json!({ "status": status })),
        );
    }

    match registration_exists(conn, &reg_no, Some(&student_id)) {
        Ok(true) => {
            return err(
                &req.id,
                "already_exists",
                "registration number already exists",
                Some(json!({ "registrationNo": reg_no })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET registration_no = ?, full_name = ?, status = ? WHERE id = ?",
        (&reg_no, &full_name, &status, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    helpers::log_activity(conn, "students.update", &reg_no);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "registrationNo": reg_no,
            "fullName": full_name,
            "status": status
        }),
    )
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let in_use: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if in_use > 0 {
        return err(
            &req.id,
            "student_in_use",
            "cannot delete a student with active enrollments",
            Some(json!({ "enrollmentCount": in_use })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    helpers::log_activity(conn, "students.delete", &student_id);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
