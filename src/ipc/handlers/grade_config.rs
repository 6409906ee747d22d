use crate::grading::{self, GradeBoundary, GradeScale};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundaryParam {
    grade: String,
    min_score: f64,
    gpa_points: f64,
    #[serde(default)]
    label: String,
}

fn handle_grade_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT grade, min_score, gpa_points, label
         FROM grade_config
         ORDER BY min_score DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "grade": r.get::<_, String>(0)?,
                "minScore": r.get::<_, f64>(1)?,
                "gpaPoints": r.get::<_, f64>(2)?,
                "label": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if rows.is_empty() {
        let defaults: Vec<serde_json::Value> = grading::default_scale()
            .iter()
            .map(|b| {
                json!({
                    "grade": b.grade,
                    "minScore": b.min_score,
                    "gpaPoints": b.gpa_points,
                    "label": ""
                })
            })
            .collect();
        return ok(
            &req.id,
            json!({ "source": "default", "boundaries": defaults }),
        );
    }

    ok(&req.id, json!({ "source": "config", "boundaries": rows }))
}

fn handle_grade_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let params: Vec<BoundaryParam> = match req.params.get("boundaries") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(b) => b,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!(
                        "boundaries must be a list of {{grade, minScore, gpaPoints}}: {}",
                        e
                    ),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing boundaries", None),
    };

    let boundaries: Vec<GradeBoundary> = params
        .iter()
        .map(|p| GradeBoundary {
            grade: p.grade.trim().to_string(),
            min_score: p.min_score,
            gpa_points: p.gpa_points,
        })
        .collect();

    // Monotonicity is enforced here, at configuration-write time, so every
    // later lookup can trust the stored order.
    if let Err(ge) = grading::validate_boundaries(&boundaries) {
        return err(&req.id, &ge.code, ge.message, ge.details);
    }

    let scale = GradeScale::from_config(Some(boundaries.clone()));

    // Replace the table and re-grade every stored result against the new
    // scale in one transaction; a half-migrated result set has no meaning,
    // so any failure rolls everything back.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM grade_config", []) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    for (b, p) in boundaries.iter().zip(params.iter()) {
        if let Err(e) = tx.execute(
            "INSERT INTO grade_config(grade, min_score, gpa_points, label) VALUES(?, ?, ?, ?)",
            (&b.grade, b.min_score, b.gpa_points, p.label.trim()),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "grade": b.grade })),
            );
        }
    }

    let recalculated = match helpers::recalc_all_results(&tx, &scale) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "recalc_failed", e.to_string(), None);
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    helpers::log_activity(
        conn,
        "gradeConfig.update",
        &format!("{} boundaries, {} results recalculated", boundaries.len(), recalculated),
    );
    ok(
        &req.id,
        json!({
            "source": "config",
            "boundaryCount": boundaries.len(),
            "recalculated": recalculated
        }),
    )
}

fn handle_grade_config_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let scale = GradeScale::from_config(None);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM grade_config", []) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    let recalculated = match helpers::recalc_all_results(&tx, &scale) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "recalc_failed", e.to_string(), None);
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    helpers::log_activity(
        conn,
        "gradeConfig.reset",
        &format!("{} results recalculated", recalculated),
    );
    ok(
        &req.id,
        json!({ "source": "default", "recalculated": recalculated }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradeConfig.get" => Some(handle_grade_config_get(state, req)),
        "gradeConfig.update" => Some(handle_grade_config_update(state, req)),
        "gradeConfig.reset" => Some(handle_grade_config_reset(state, req)),
        _ => None,
    }
}
