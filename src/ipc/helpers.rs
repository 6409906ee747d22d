use crate::grading::{CourseResult, GradeBoundary, GradeScale, MarkComponent};
use rusqlite::Connection;
use uuid::Uuid;

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Read the configured boundary table. An empty table is "not configured"
/// and the engine falls back to its hardcoded defaults; rows come back
/// descending by min_score, the order lookup requires.
pub fn load_scale(conn: &Connection) -> Result<GradeScale, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT grade, min_score, gpa_points
         FROM grade_config
         ORDER BY min_score DESC",
    )?;
    let rows: Vec<GradeBoundary> = stmt
        .query_map([], |r| {
            Ok(GradeBoundary {
                grade: r.get(0)?,
                min_score: r.get(1)?,
                gpa_points: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let config = if rows.is_empty() { None } else { Some(rows) };
    Ok(GradeScale::from_config(config))
}

/// The current component set for one (student, course) pair, in submission
/// order.
pub fn load_components(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<Vec<MarkComponent>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT component, score, weight
         FROM marks
         WHERE student_id = ? AND course_id = ?
         ORDER BY sort_order",
    )?;
    let components: Vec<MarkComponent> = stmt
        .query_map([student_id, course_id], |r| {
            Ok(MarkComponent {
                component: r.get(0)?,
                score: r.get(1)?,
                weight: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(components)
}

/// One stored CourseResult per pair, keyed by (student_id, course_id).
pub fn upsert_result(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    result: &CourseResult,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO final_results(student_id, course_id, total_score, grade, gpa_points, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id) DO UPDATE SET
           total_score = excluded.total_score,
           grade = excluded.grade,
           gpa_points = excluded.gpa_points,
           updated_at = excluded.updated_at",
        (
            student_id,
            course_id,
            result.total_score,
            &result.grade,
            result.gpa_points,
            now_iso(),
        ),
    )?;
    Ok(())
}

/// Recompute every stored result against `scale` from each pair's stored
/// components. Runs against whatever connection the caller hands in; the
/// caller owns the transaction so a partial sweep never commits.
pub fn recalc_all_results(
    conn: &Connection,
    scale: &GradeScale,
) -> Result<usize, rusqlite::Error> {
    let pairs: Vec<(String, String)> = {
        let mut stmt =
            conn.prepare("SELECT student_id, course_id FROM final_results ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (student_id, course_id) in &pairs {
        let components = load_components(conn, student_id, course_id)?;
        let result = scale.grade_components(&components);
        upsert_result(conn, student_id, course_id, &result)?;
    }

    Ok(pairs.len())
}

/// Best-effort audit trail. Never fails the request that triggered it.
pub fn log_activity(conn: &Connection, action: &str, details: &str) {
    let _ = conn.execute(
        "INSERT INTO activity_log(id, action, details, created_at) VALUES(?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            action,
            details,
            now_iso(),
        ),
    );
}
