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
    let exe = env!("CARGO_BIN_EXE_examd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
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
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

const TEST_CSV: &str = "\
content,question_type,option_1,option_2,correct_indices
Which lockout tag color is standard?,single,Red,Purple,1
Which extinguisher class covers electrical fires?,single,Class A,Class C,2
";

#[test]
fn graded_test_awards_xp_and_ranks_up() {
    let workspace = temp_dir("examd-xp-award");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let user = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "displayName": "Dana Ops", "email": "dana@example.com" }),
    );
    let user_id = user
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();

    let program = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({ "title": "Floor Safety Test", "kind": "test", "level": 1, "difficulty": "BEGINNER" }),
    );
    let program_id = program
        .get("programId")
        .and_then(|v| v.as_str())
        .expect("programId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.importCsv",
        json!({ "programId": program_id, "csvText": TEST_CSV }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.list",
        json!({ "programId": program_id }),
    );
    let questions = listed
        .get("questions")
        .and_then(|v| v.as_array())
        .expect("questions");
    let q1 = questions[0].get("id").and_then(|v| v.as_str()).expect("q1 id");
    let q2 = questions[1].get("id").and_then(|v| v.as_str()).expect("q2 id");

    // One right, one wrong: 50%. XP for a level-1 beginner test is
    // (100 + 1*50) * 1.0 = 150, which crosses the 100 XP threshold.
    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "activity.complete",
        json!({
            "userId": user_id,
            "programId": program_id,
            "answers": { (q1): [0], (q2): [0] }
        }),
    );
    assert_eq!(completed.get("xpAwarded").and_then(|v| v.as_u64()), Some(150));
    assert_eq!(completed.get("totalXp").and_then(|v| v.as_u64()), Some(150));
    assert_eq!(completed.get("scorePercent").and_then(|v| v.as_f64()), Some(50.0));
    assert_eq!(completed.get("level").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(completed.get("rank").and_then(|v| v.as_str()), Some("Apprentice"));
    assert_eq!(completed.get("rankUp").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        completed
            .pointer("/grading/correctCount")
            .and_then(|v| v.as_u64()),
        Some(1)
    );

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "users.progress",
        json!({ "userId": user_id }),
    );
    assert_eq!(progress.get("xp").and_then(|v| v.as_u64()), Some(150));
    assert_eq!(progress.get("level").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(progress.get("nextLevelXp").and_then(|v| v.as_u64()), Some(250));
    let pct = progress
        .get("progressPercent")
        .and_then(|v| v.as_f64())
        .expect("progressPercent");
    assert!((pct - 100.0 * 50.0 / 150.0).abs() < 1e-9);

    // A second pass stacks XP monotonically and ranks up again.
    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "activity.complete",
        json!({
            "userId": user_id,
            "programId": program_id,
            "answers": { (q1): [0], (q2): [1] }
        }),
    );
    assert_eq!(completed.get("totalXp").and_then(|v| v.as_u64()), Some(300));
    assert_eq!(completed.get("scorePercent").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(completed.get("rank").and_then(|v| v.as_str()), Some("Associate"));
    assert_eq!(completed.get("rankUp").and_then(|v| v.as_bool()), Some(true));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "history.list",
        json!({ "userId": user_id }),
    );
    let entries = history
        .get("entries")
        .and_then(|v| v.as_array())
        .expect("entries");
    assert_eq!(entries.len(), 2);
    for e in entries {
        assert_eq!(e.get("kind").and_then(|v| v.as_str()), Some("test"));
        assert_eq!(e.get("xpAwarded").and_then(|v| v.as_i64()), Some(150));
    }
}

#[test]
fn lecture_and_exam_rewards_match_config() {
    let workspace = temp_dir("examd-xp-kinds");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let user_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "displayName": "Sam" }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("userId")
    .to_string();

    // Lectures pay the flat constant no matter the level.
    let lecture_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({ "title": "Welcome Deck", "kind": "lecture", "level": 9 }),
    )
    .get("programId")
    .and_then(|v| v.as_str())
    .expect("programId")
    .to_string();
    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "activity.complete",
        json!({ "userId": user_id, "programId": lecture_id }),
    );
    assert_eq!(completed.get("xpAwarded").and_then(|v| v.as_u64()), Some(50));
    assert!(completed.get("scorePercent").map(|v| v.is_null()).unwrap_or(false));

    // An exam program derives its tier from the level when none is given.
    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "programs.create",
        json!({ "title": "Certification Exam", "kind": "exam", "label": "advanced_2" }),
    );
    assert_eq!(exam.get("level").and_then(|v| v.as_u64()), Some(8));
    assert_eq!(exam.get("rankTier").and_then(|v| v.as_str()), Some("PLATINUM"));
    let exam_id = exam
        .get("programId")
        .and_then(|v| v.as_str())
        .expect("programId")
        .to_string();
    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "activity.complete",
        json!({ "userId": user_id, "programId": exam_id }),
    );
    assert_eq!(completed.get("xpAwarded").and_then(|v| v.as_u64()), Some(1000));
    assert_eq!(completed.get("totalXp").and_then(|v| v.as_u64()), Some(1050));

    let users = request_ok(&mut stdin, &mut reader, "7", "users.list", json!({}));
    let row = users
        .get("users")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("user row");
    assert_eq!(row.get("xp").and_then(|v| v.as_i64()), Some(1050));
    assert_eq!(row.get("rank").and_then(|v| v.as_str()), Some("Specialist"));
    assert_eq!(row.get("completionCount").and_then(|v| v.as_i64()), Some(2));
}
