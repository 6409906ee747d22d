use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

/// One graded item for a (student, course) pair. Weight is a percentage of
/// the course total, so a component contributes `score * weight / 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkComponent {
    pub component: String,
    pub score: f64,
    pub weight: f64,
}

/// One row of the grade scale. A score earns `grade` when it is at least
/// `min_score` and no higher boundary matched first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBoundary {
    pub grade: String,
    pub min_score: f64,
    pub gpa_points: f64,
}

/// The computed outcome for one (student, course) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseResult {
    pub total_score: f64,
    pub grade: String,
    pub gpa_points: f64,
}

/// One course's contribution to a student's overall GPA. `gpa_points` is
/// `None` while the course is ungraded; ungraded courses are excluded from
/// the average rather than counted as zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpaEntry {
    pub gpa_points: Option<f64>,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradingError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

pub const MAX_TOTAL_WEIGHT: f64 = 100.0;
pub const MAX_GPA_POINTS: f64 = 4.0;

/// Half-away-from-zero rounding to 2 decimal places, as the marks pages
/// have always displayed scores and GPA.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The scale shipped with the system, used whenever no configured scale
/// exists. Descending by min_score; F is the catch-all floor.
pub fn default_scale() -> Vec<GradeBoundary> {
    [
        ("A", 75.0, 4.0),
        ("B", 65.0, 3.0),
        ("C", 55.0, 2.0),
        ("D", 45.0, 1.0),
        ("F", 0.0, 0.0),
    ]
    .iter()
    .map(|&(grade, min_score, gpa_points)| GradeBoundary {
        grade: grade.to_string(),
        min_score,
        gpa_points,
    })
    .collect()
}

/// `round(sum(score * weight / 100), 2)` over the pair's components.
/// An empty set computes to 0.00. Trusts validated input; range and
/// weight-sum checks happen in `validate_components` before persisting.
pub fn compute_total_score(components: &[MarkComponent]) -> f64 {
    let total: f64 = components
        .iter()
        .map(|c| c.score * c.weight / 100.0)
        .sum();
    round2(total)
}

/// Credit-weighted GPA over graded courses:
/// `round(sum(gpa * credits) / sum(credits), 2)`, or 0.00 when no graded
/// course carries credit.
pub fn compute_overall_gpa(entries: &[GpaEntry]) -> f64 {
    let mut point_sum = 0.0_f64;
    let mut credit_sum = 0_i64;
    for e in entries {
        let Some(gpa) = e.gpa_points else {
            continue;
        };
        point_sum += gpa * e.credits as f64;
        credit_sum += e.credits;
    }
    if credit_sum <= 0 {
        return 0.0;
    }
    round2(point_sum / credit_sum as f64)
}

/// Strict submission-side validation. The engine itself trusts its input;
/// this runs before any component set reaches the store.
pub fn validate_components(components: &[MarkComponent]) -> Result<(), GradingError> {
    if components.is_empty() {
        return Err(GradingError::new(
            "bad_params",
            "at least one mark component is required",
        ));
    }

    let mut total_weight = 0.0_f64;
    for (i, c) in components.iter().enumerate() {
        if c.component.trim().is_empty() {
            return Err(GradingError::with_details(
                "bad_params",
                format!("component name #{} is required", i + 1),
                json!({ "index": i }),
            ));
        }
        if !c.score.is_finite() || c.score < 0.0 || c.score > 100.0 {
            return Err(GradingError::with_details(
                "bad_params",
                format!("score for \"{}\" must be 0-100", c.component),
                json!({ "component": c.component, "score": c.score }),
            ));
        }
        if !c.weight.is_finite() || c.weight < 0.0 || c.weight > 100.0 {
            return Err(GradingError::with_details(
                "bad_params",
                format!("weight for \"{}\" must be 0-100", c.component),
                json!({ "component": c.component, "weight": c.weight }),
            ));
        }
        total_weight += c.weight;
    }

    // Over-total is a data-entry error and is never clamped. Under-total is
    // accepted: incomplete marks compute a partial score.
    if total_weight > MAX_TOTAL_WEIGHT {
        return Err(GradingError::with_details(
            "weight_exceeded",
            format!("total weight ({:.1}%) exceeds 100%", total_weight),
            json!({ "totalWeight": total_weight }),
        ));
    }

    Ok(())
}

/// Configuration-write-time validation that keeps `lookup_grade`
/// well-defined: boundaries must arrive sorted strictly descending by
/// min_score, with every value in range.
pub fn validate_boundaries(boundaries: &[GradeBoundary]) -> Result<(), GradingError> {
    if boundaries.is_empty() {
        return Err(GradingError::new(
            "bad_params",
            "at least one grade boundary is required",
        ));
    }

    let mut prev_score = f64::INFINITY;
    let mut seen_labels: HashSet<&str> = HashSet::new();
    for (i, b) in boundaries.iter().enumerate() {
        if b.grade.trim().is_empty() {
            return Err(GradingError::with_details(
                "bad_params",
                format!("grade label #{} is required", i + 1),
                json!({ "index": i }),
            ));
        }
        // Labels key the stored table and the points lookup; a repeat would
        // make both ambiguous.
        if !seen_labels.insert(b.grade.trim()) {
            return Err(GradingError::with_details(
                "bad_params",
                format!("grade label \"{}\" appears more than once", b.grade),
                json!({ "grade": b.grade }),
            ));
        }
        if !b.min_score.is_finite() || b.min_score < 0.0 || b.min_score > 100.0 {
            return Err(GradingError::with_details(
                "bad_params",
                format!("grade {}: min score must be 0-100", b.grade),
                json!({ "grade": b.grade, "minScore": b.min_score }),
            ));
        }
        if !b.gpa_points.is_finite() || b.gpa_points < 0.0 || b.gpa_points > MAX_GPA_POINTS {
            return Err(GradingError::with_details(
                "bad_params",
                format!("grade {}: GPA points must be 0-4", b.grade),
                json!({ "grade": b.grade, "gpaPoints": b.gpa_points }),
            ));
        }
        if b.min_score >= prev_score {
            return Err(GradingError::with_details(
                "bad_params",
                "grade boundaries must be in strictly descending order",
                json!({ "grade": b.grade, "minScore": b.min_score }),
            ));
        }
        prev_score = b.min_score;
    }

    Ok(())
}

/// The grade scale in effect: either the configured boundary table or the
/// hardcoded defaults. Built from an explicit `Option` so "not configured"
/// is a branch, not a caught store error.
#[derive(Debug, Clone)]
pub struct GradeScale {
    boundaries: Vec<GradeBoundary>,
    configured: bool,
}

impl GradeScale {
    pub fn from_config(config: Option<Vec<GradeBoundary>>) -> Self {
        match config {
            Some(rows) if !rows.is_empty() => Self {
                boundaries: rows,
                configured: true,
            },
            _ => Self {
                boundaries: default_scale(),
                configured: false,
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn boundaries(&self) -> &[GradeBoundary] {
        &self.boundaries
    }

    /// First boundary (descending order) whose min_score <= score wins.
    /// A score below every threshold maps to the lowest-ranked grade; a
    /// well-formed scale has a floor at 0 so that branch only fires on a
    /// floorless table, and grade display must never fail.
    pub fn lookup_grade(&self, score: f64) -> &str {
        for b in &self.boundaries {
            if score >= b.min_score {
                return &b.grade;
            }
        }
        // Unreachable with a catch-all floor; boundaries is never empty.
        &self.boundaries[self.boundaries.len() - 1].grade
    }

    /// GPA points for a grade label. A label with no mapping is end-of-scale
    /// and worth zero; "ungraded" is handled by the caller via missing
    /// results, not through this lookup.
    pub fn gpa_points_for(&self, grade: &str) -> f64 {
        self.boundaries
            .iter()
            .find(|b| b.grade == grade)
            .map(|b| b.gpa_points)
            .unwrap_or(0.0)
    }

    /// The composed per-pair computation: weighted total, then grade, then
    /// GPA points. Used by mark submission and by the recalculation sweep.
    pub fn grade_components(&self, components: &[MarkComponent]) -> CourseResult {
        let total_score = compute_total_score(components);
        let grade = self.lookup_grade(total_score).to_string();
        let gpa_points = self.gpa_points_for(&grade);
        CourseResult {
            total_score,
            grade,
            gpa_points,
        }
    }
}
