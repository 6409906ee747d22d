use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("acadm.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            registration_no TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Active',
            created_at TEXT
        )",
        [],
    )?;
    // Existing workspaces may predate the status column. Add and backfill if needed.
    ensure_students_status(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_registration ON students(registration_no)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL UNIQUE,
            course_name TEXT NOT NULL,
            credits INTEGER NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            enrolled_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            component TEXT NOT NULL,
            score REAL NOT NULL,
            weight REAL NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    ensure_marks_sort_order(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_pair ON marks(student_id, course_id)",
        [],
    )?;

    // Empty table means "not configured": the grading engine then applies
    // its hardcoded default scale.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_config(
            grade TEXT PRIMARY KEY,
            min_score REAL NOT NULL,
            gpa_points REAL NOT NULL,
            label TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS final_results(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            total_score REAL NOT NULL,
            grade TEXT NOT NULL,
            gpa_points REAL NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_final_results_student ON final_results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_final_results_course ON final_results(course_id)",
        [],
    )?;

    // One session per course per calendar date; records hang off sessions.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, session_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_course
         ON attendance_sessions(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_student
         ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_log(
            id TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            details TEXT NOT NULL DEFAULT '',
            created_at TEXT
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_status(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN status TEXT NOT NULL DEFAULT 'Active'",
        [],
    )?;
    Ok(())
}

fn ensure_marks_sort_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "marks", "sort_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE marks ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Backfill per pair using insert order as a best-effort.
    let mut pair_stmt = conn.prepare(
        "SELECT DISTINCT student_id, course_id FROM marks ORDER BY rowid",
    )?;
    let pairs = pair_stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut mark_stmt = conn.prepare(
        "SELECT id FROM marks WHERE student_id = ? AND course_id = ? ORDER BY rowid",
    )?;
    for (student_id, course_id) in pairs {
        let mark_ids = mark_stmt
            .query_map([&student_id, &course_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for (i, mid) in mark_ids.iter().enumerate() {
            conn.execute(
                "UPDATE marks SET sort_order = ? WHERE id = ?",
                (i as i64, mid),
            )?;
        }
    }

    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
