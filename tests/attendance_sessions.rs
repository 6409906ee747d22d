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

/// One course with two enrolled students. Returns (course_id, ana, ben).
fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String, String) {
    let course = request_ok(
        stdin,
        reader,
        "seed-c",
        "courses.create",
        json!({ "courseCode": "CS101", "courseName": "Intro to Computing", "credits": 3 }),
    );
    let course_id = course["courseId"].as_str().expect("courseId").to_string();

    let mut ids = Vec::new();
    for (i, (reg, name)) in [("REG-500", "Ana Silva"), ("REG-501", "Ben Carter")]
        .iter()
        .enumerate()
    {
        let student = request_ok(
            stdin,
            reader,
            &format!("seed-s{}", i),
            "students.create",
            json!({ "registrationNo": reg, "fullName": name }),
        );
        let sid = student["studentId"].as_str().expect("studentId").to_string();
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-e{}", i),
            "enrollments.create",
            json!({ "studentId": sid, "courseId": course_id }),
        );
        ids.push(sid);
    }

    (course_id, ids[0].clone(), ids[1].clone())
}

#[test]
fn session_creation_is_unique_per_course_and_date() {
    let workspace = temp_dir("acadm-att-sessions");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, _, _) = seed_class(&mut stdin, &mut reader);

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.createSession",
        json!({ "courseId": course_id, "sessionDate": "2026-03-02" }),
    );
    assert!(session["sessionId"].is_string());

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.createSession",
        json!({ "courseId": course_id, "sessionDate": "2026-03-02" }),
    );
    assert_eq!(error["code"], "already_exists");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.createSession",
        json!({ "courseId": course_id, "sessionDate": "not-a-date" }),
    );
    assert_eq!(error["code"], "bad_params");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.createSession",
        json!({ "courseId": "no-such-course", "sessionDate": "2026-03-03" }),
    );
    assert_eq!(error["code"], "not_found");

    // A second date on the same course is fine; newest session lists first.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.createSession",
        json!({ "courseId": course_id, "sessionDate": "2026-03-09" }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.listSessions",
        json!({ "courseId": course_id }),
    );
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["sessionDate"], "2026-03-09");
    assert_eq!(sessions[0]["markedCount"], 0);

    let _ = child.kill();
}

#[test]
fn marking_covers_every_enrolled_student_and_defaults_to_absent() {
    let workspace = temp_dir("acadm-att-marking");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, ana, ben) = seed_class(&mut stdin, &mut reader);

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.createSession",
        json!({ "courseId": course_id, "sessionDate": "2026-03-02" }),
    );
    let session_id = session["sessionId"].as_str().expect("sessionId").to_string();

    // Only Ana is submitted; Ben gets an Absent row all the same.
    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "records": [ { "studentId": ana, "status": "Present" } ]
        }),
    );
    assert_eq!(marked["markedCount"], 2);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.forStudent",
        json!({ "studentId": ben }),
    );
    assert_eq!(summary["totalSessions"], 1);
    assert_eq!(summary["presentCount"], 0);
    assert_eq!(summary["absentCount"], 1);

    // Re-marking the same session overwrites, it does not double-count.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "records": [
                { "studentId": ana, "status": "Present" },
                { "studentId": ben, "status": "Present" }
            ]
        }),
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.forStudent",
        json!({ "studentId": ben }),
    );
    assert_eq!(summary["totalSessions"], 1);
    assert_eq!(summary["presentCount"], 1);
    assert_eq!(summary["absentCount"], 0);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "records": [ { "studentId": ana, "status": "Late" } ]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.mark",
        json!({ "sessionId": "no-such-session", "records": [] }),
    );
    assert_eq!(error["code"], "not_found");

    let _ = child.kill();
}

#[test]
fn student_summary_aggregates_per_course_with_rounded_rate() {
    let workspace = temp_dir("acadm-att-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (course_id, ana, ben) = seed_class(&mut stdin, &mut reader);

    // A second course Ana takes that never holds a session; it must not
    // appear in her summary.
    let idle = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseCode": "BIO110", "courseName": "Biology", "credits": 2 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.create",
        json!({ "studentId": ana, "courseId": idle["courseId"] }),
    );

    // Three sessions: Ben present for two of them.
    for (i, (date, ben_status)) in [
        ("2026-03-02", "Present"),
        ("2026-03-09", "Present"),
        ("2026-03-16", "Absent"),
    ]
    .iter()
    .enumerate()
    {
        let session = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "attendance.createSession",
            json!({ "courseId": course_id, "sessionDate": date }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "attendance.mark",
            json!({
                "sessionId": session["sessionId"],
                "records": [
                    { "studentId": ana, "status": "Present" },
                    { "studentId": ben, "status": ben_status }
                ]
            }),
        );
    }

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.forStudent",
        json!({ "studentId": ben }),
    );
    assert_eq!(summary["totalSessions"], 3);
    assert_eq!(summary["presentCount"], 2);
    assert_eq!(summary["absentCount"], 1);
    // 2/3 rounds to 66.67.
    assert!((summary["overallPercentage"].as_f64().expect("rate") - 66.67).abs() < 1e-9);

    let courses = summary["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["courseCode"], "CS101");
    assert!((courses[0]["percentage"].as_f64().expect("rate") - 66.67).abs() < 1e-9);

    // Ana's summary also omits the session-less course.
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.forStudent",
        json!({ "studentId": ana }),
    );
    assert_eq!(summary["courses"].as_array().expect("courses").len(), 1);
    assert!((summary["overallPercentage"].as_f64().expect("rate") - 100.0).abs() < 1e-9);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.forStudent",
        json!({ "studentId": "no-such-student" }),
    );
    assert_eq!(error["code"], "not_found");

    let _ = child.kill();
}
