use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_acadmd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn acadmd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn raw_request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = raw_request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = raw_request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], false, "{} unexpectedly succeeded: {}", method, value);
    value["error"].clone()
}

/// Two enrolled students in one course: one graded at 57.50 (C on the
/// default scale), one at 72.00 (B). Returns (course_id, student ids).
fn seed_graded_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, String) {
    let course = request_ok(
        stdin,
        reader,
        "seed-c",
        "courses.create",
        json!({ "courseCode": "MTH201", "courseName": "Linear Algebra", "credits": 4 }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();

    let mut student_ids = Vec::new();
    for (i, reg) in ["REG-100", "REG-101"].iter().enumerate() {
        let student = request_ok(
            stdin,
            reader,
            &format!("seed-s{}", i),
            "students.create",
            json!({ "registrationNo": reg, "fullName": format!("Student {}", i) }),
        );
        let sid = student["studentId"].as_str().expect("studentId").to_string();
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-e{}", i),
            "enrollments.create",
            json!({ "studentId": sid, "courseId": course_id }),
        );
        student_ids.push(sid);
    }

    // 27.5 + 30.0 = 57.50
    let _ = request_ok(
        stdin,
        reader,
        "seed-m0",
        "marks.replace",
        json!({
            "studentId": student_ids[0],
            "courseId": course_id,
            "components": [
                { "component": "Midterm", "score": 55.0, "weight": 50.0 },
                { "component": "Final", "score": 60.0, "weight": 50.0 }
            ]
        }),
    );
    // 72.00
    let _ = request_ok(
        stdin,
        reader,
        "seed-m1",
        "marks.replace",
        json!({
            "studentId": student_ids[1],
            "courseId": course_id,
            "components": [
                { "component": "Final", "score": 72.0, "weight": 100.0 }
            ]
        }),
    );

    (course_id, student_ids[0].clone(), student_ids[1].clone())
}

fn result_for(course: &serde_json::Value, student_id: &str) -> serde_json::Value {
    course["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["studentId"] == student_id)
        .expect("student row")["result"]
        .clone()
}

#[test]
fn raising_a_boundary_regrades_only_the_affected_results() {
    let workspace = temp_dir("acadm-sweep-boundary-move");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, s_low, s_high) = seed_graded_course(&mut stdin, &mut reader);

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );
    assert_eq!(result_for(&before, &s_low)["grade"], "C");
    assert_eq!(result_for(&before, &s_high)["grade"], "B");

    // C's floor moves from 55 to 60: 57.50 now falls through to D.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "gradeConfig.update",
        json!({
            "boundaries": [
                { "grade": "A", "minScore": 75.0, "gpaPoints": 4.0 },
                { "grade": "B", "minScore": 65.0, "gpaPoints": 3.0 },
                { "grade": "C", "minScore": 60.0, "gpaPoints": 2.0 },
                { "grade": "D", "minScore": 45.0, "gpaPoints": 1.0 },
                { "grade": "F", "minScore": 0.0, "gpaPoints": 0.0 }
            ]
        }),
    );
    assert_eq!(updated["recalculated"], 2);

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );
    let low = result_for(&after, &s_low);
    assert_eq!(low["grade"], "D");
    assert!((low["gpaPoints"].as_f64().expect("gpa") - 1.0).abs() < 1e-9);
    assert!((low["totalScore"].as_f64().expect("total") - 57.5).abs() < 1e-9);
    // The 72.00 result sits outside [55,60) and is untouched.
    assert_eq!(result_for(&after, &s_high), result_for(&before, &s_high));

    let _ = child.kill();
}

#[test]
fn sweep_is_idempotent_for_unchanged_boundaries() {
    let workspace = temp_dir("acadm-sweep-idempotent");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, _, _) = seed_graded_course(&mut stdin, &mut reader);

    let boundaries = json!({
        "boundaries": [
            { "grade": "A", "minScore": 75.0, "gpaPoints": 4.0 },
            { "grade": "B", "minScore": 65.0, "gpaPoints": 3.0 },
            { "grade": "C", "minScore": 55.0, "gpaPoints": 2.0 },
            { "grade": "D", "minScore": 45.0, "gpaPoints": 1.0 },
            { "grade": "F", "minScore": 0.0, "gpaPoints": 0.0 }
        ]
    });

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gradeConfig.update",
        boundaries.clone(),
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gradeConfig.update",
        boundaries,
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );

    assert_eq!(first["students"], second["students"]);

    let _ = child.kill();
}

#[test]
fn malformed_boundaries_are_rejected_and_results_stand() {
    let workspace = temp_dir("acadm-sweep-bad-config");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, _, _) = seed_graded_course(&mut stdin, &mut reader);

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );

    // Ascending order.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "gradeConfig.update",
        json!({
            "boundaries": [
                { "grade": "F", "minScore": 0.0, "gpaPoints": 0.0 },
                { "grade": "A", "minScore": 75.0, "gpaPoints": 4.0 }
            ]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    // Tied thresholds.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "gradeConfig.update",
        json!({
            "boundaries": [
                { "grade": "A", "minScore": 75.0, "gpaPoints": 4.0 },
                { "grade": "B", "minScore": 75.0, "gpaPoints": 3.0 }
            ]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    // GPA out of range.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "gradeConfig.update",
        json!({
            "boundaries": [
                { "grade": "A", "minScore": 75.0, "gpaPoints": 4.5 }
            ]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    // Repeated label: rejected up front, not by the store's primary key.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "5b",
        "gradeConfig.update",
        json!({
            "boundaries": [
                { "grade": "A", "minScore": 90.0, "gpaPoints": 4.0 },
                { "grade": "A", "minScore": 80.0, "gpaPoints": 3.0 },
                { "grade": "F", "minScore": 0.0, "gpaPoints": 0.0 }
            ]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    let config = request_ok(&mut stdin, &mut reader, "6", "gradeConfig.get", json!({}));
    assert_eq!(config["source"], "default");

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );
    assert_eq!(before["students"], after["students"]);

    let _ = child.kill();
}

#[test]
fn custom_grade_alphabet_applies_to_sweep_and_new_submissions() {
    let workspace = temp_dir("acadm-sweep-alphabet");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, s_low, s_high) = seed_graded_course(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gradeConfig.update",
        json!({
            "boundaries": [
                { "grade": "Distinction", "minScore": 70.0, "gpaPoints": 4.0, "label": "Outstanding" },
                { "grade": "Merit", "minScore": 55.0, "gpaPoints": 3.0 },
                { "grade": "Pass", "minScore": 40.0, "gpaPoints": 2.0 },
                { "grade": "Fail", "minScore": 0.0, "gpaPoints": 0.0 }
            ]
        }),
    );

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );
    assert_eq!(result_for(&after, &s_low)["grade"], "Merit");
    assert_eq!(result_for(&after, &s_high)["grade"], "Distinction");

    let config = request_ok(&mut stdin, &mut reader, "4", "gradeConfig.get", json!({}));
    assert_eq!(config["source"], "config");
    assert_eq!(config["boundaries"][0]["grade"], "Distinction");
    assert_eq!(config["boundaries"][0]["label"], "Outstanding");

    // Back to defaults, and every stored result is re-graded once more.
    let reset = request_ok(&mut stdin, &mut reader, "5", "gradeConfig.reset", json!({}));
    assert_eq!(reset["recalculated"], 2);
    let reverted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "results.forCourse",
        json!({ "courseId": course_id }),
    );
    assert_eq!(result_for(&reverted, &s_low)["grade"], "C");
    assert_eq!(result_for(&reverted, &s_high)["grade"], "B");

    let _ = child.kill();
}
