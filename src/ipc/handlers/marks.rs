use crate::grading::{self, MarkComponent};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn stored_result_json(
    conn: &rusqlite::Connection,
    student_id: &str,
    course_id: &str,
) -> Result<serde_json::Value, rusqlite::Error> {
    let row: Option<(f64, String, f64)> = conn
        .query_row(
            "SELECT total_score, grade, gpa_points
             FROM final_results
             WHERE student_id = ? AND course_id = ?",
            (student_id, course_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    // No stored result means "ungraded", which the UI shows as pending.
    // That is not the same as the lowest grade.
    Ok(match row {
        Some((total_score, grade, gpa_points)) => json!({
            "status": "graded",
            "totalScore": total_score,
            "grade": grade,
            "gpaPoints": gpa_points
        }),
        None => json!({ "status": "pending" }),
    })
}

/// `Some(message)` when either end of the pair is missing.
fn pair_exists(
    conn: &rusqlite::Connection,
    student_id: &str,
    course_id: &str,
) -> Result<Option<&'static str>, rusqlite::Error> {
    let student: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if student.is_none() {
        return Ok(Some("student not found"));
    }
    let course: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()?;
    if course.is_none() {
        return Ok(Some("course not found"));
    }
    Ok(None)
}

fn handle_marks_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match pair_exists(conn, &student_id, &course_id) {
        Ok(None) => {}
        Ok(Some(resp)) => return err(&req.id, "not_found", resp, None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let components = match helpers::load_components(conn, &student_id, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let total_weight: f64 = components.iter().map(|c| c.weight).sum();

    let result = match stored_result_json(conn, &student_id, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "components": components,
            "totalWeight": grading::round2(total_weight),
            "result": result
        }),
    )
}

fn handle_marks_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let components: Vec<MarkComponent> = match req.params.get("components") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(c) => c,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("components must be a list of {{component, score, weight}}: {}", e),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing components", None),
    };

    // Strict entry-side validation, including the <=100 weight-sum rule,
    // before the store is touched at all.
    if let Err(ge) = grading::validate_components(&components) {
        return err(&req.id, &ge.code, ge.message, ge.details);
    }

    let enrolled: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE student_id = ? AND course_id = ?",
        (&student_id, &course_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled == 0 {
        return err(&req.id, "not_enrolled", "student not enrolled in course", None);
    }

    let scale = match helpers::load_scale(conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let result = scale.grade_components(&components);

    // Replace-all semantics: delete the pair's components, insert the new
    // set, recompute and upsert the result, all in one transaction. A
    // reader sees either the old set with the old result or the new set
    // with the new result.
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

    for (i, c) in components.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO marks(id, student_id, course_id, component, score, weight, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &student_id,
                &course_id,
                c.component.trim(),
                c.score,
                c.weight,
                i as i64,
            ),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "marks" })),
            );
        }
    }

    if let Err(e) = helpers::upsert_result(&tx, &student_id, &course_id, &result) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "final_results" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    helpers::log_activity(
        conn,
        "marks.replace",
        &format!("{}/{} -> {}", student_id, course_id, result.grade),
    );
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "componentCount": components.len(),
            "result": {
                "status": "graded",
                "totalScore": result.total_score,
                "grade": result.grade,
                "gpaPoints": result.gpa_points
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.get" => Some(handle_marks_get(state, req)),
        "marks.replace" => Some(handle_marks_replace(state, req)),
        _ => None,
    }
}
