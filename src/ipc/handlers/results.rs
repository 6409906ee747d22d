use crate::grading::{self, GpaEntry};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn result_json(total_score: Option<f64>, grade: Option<String>, gpa_points: Option<f64>) -> serde_json::Value {
    match (total_score, grade, gpa_points) {
        (Some(total), Some(grade), Some(gpa)) => json!({
            "status": "graded",
            "totalScore": total,
            "grade": grade,
            "gpaPoints": gpa
        }),
        _ => json!({ "status": "pending" }),
    }
}

fn handle_results_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let student: Option<(String, String)> = match conn
        .query_row(
            "SELECT registration_no, full_name FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((registration_no, full_name)) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.course_code, c.course_name, c.credits,
                fr.total_score, fr.grade, fr.gpa_points
         FROM enrollments e
         JOIN courses c ON c.id = e.course_id
         LEFT JOIN final_results fr
           ON fr.student_id = e.student_id AND fr.course_id = e.course_id
         WHERE e.student_id = ?
         ORDER BY c.course_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Result<Vec<(serde_json::Value, GpaEntry)>, _> = stmt
        .query_map([&student_id], |row| {
            let course_id: String = row.get(0)?;
            let course_code: String = row.get(1)?;
            let course_name: String = row.get(2)?;
            let credits: i64 = row.get(3)?;
            let total_score: Option<f64> = row.get(4)?;
            let grade: Option<String> = row.get(5)?;
            let gpa_points: Option<f64> = row.get(6)?;

            let entry = GpaEntry {
                gpa_points,
                credits,
            };
            let course = json!({
                "courseId": course_id,
                "courseCode": course_code,
                "courseName": course_name,
                "credits": credits,
                "result": result_json(total_score, grade, gpa_points)
            });
            Ok((course, entry))
        })
        .and_then(|it| it.collect());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let entries: Vec<GpaEntry> = rows.iter().map(|(_, e)| *e).collect();
    let overall_gpa = grading::compute_overall_gpa(&entries);
    let graded: Vec<&GpaEntry> = entries.iter().filter(|e| e.gpa_points.is_some()).collect();
    let graded_credits: i64 = graded.iter().map(|e| e.credits).sum();
    let courses: Vec<serde_json::Value> = rows.into_iter().map(|(c, _)| c).collect();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "registrationNo": registration_no,
            "fullName": full_name,
            "courses": courses,
            "overallGpa": overall_gpa,
            "gradedCourses": graded.len(),
            "totalCredits": graded_credits
        }),
    )
}

fn handle_results_for_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    let course: Option<(String, String, i64)> = match conn
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
    let Some((course_code, course_name, credits)) = course else {
        return err(&req.id, "not_found", "course not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.registration_no, s.full_name,
                (SELECT COALESCE(SUM(m.weight), 0) FROM marks m
                 WHERE m.student_id = s.id AND m.course_id = e.course_id) AS total_weight,
                fr.total_score, fr.grade, fr.gpa_points
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN final_results fr
           ON fr.student_id = e.student_id AND fr.course_id = e.course_id
         WHERE e.course_id = ?
         ORDER BY s.registration_no",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&course_id], |row| {
            let student_id: String = row.get(0)?;
            let registration_no: String = row.get(1)?;
            let full_name: String = row.get(2)?;
            let total_weight: f64 = row.get(3)?;
            let total_score: Option<f64> = row.get(4)?;
            let grade: Option<String> = row.get(5)?;
            let gpa_points: Option<f64> = row.get(6)?;
            Ok(json!({
                "studentId": student_id,
                "registrationNo": registration_no,
                "fullName": full_name,
                "totalWeight": grading::round2(total_weight),
                "result": result_json(total_score, grade, gpa_points)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({
                "courseId": course_id,
                "courseCode": course_code,
                "courseName": course_name,
                "credits": credits,
                "students": students
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.forStudent" => Some(handle_results_for_student(state, req)),
        "results.forCourse" => Some(handle_results_for_course(state, req)),
        _ => None,
    }
}
