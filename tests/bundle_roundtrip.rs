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

const CSV: &str = "\
content,question_type,option_1,option_2,correct_indices
Which form reports a near miss?,single,NM-1,TPS,1
";

#[test]
fn export_then_import_moves_a_workspace() {
    let src_workspace = temp_dir("examd-bundle-src");
    let dst_workspace = temp_dir("examd-bundle-dst");
    let bundle_path = temp_dir("examd-bundle-out").join("workspace.examdbundle");

    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": src_workspace.to_string_lossy() }),
    );
    let program_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "programs.create",
        json!({ "title": "Incident Reporting", "kind": "lecture" }),
    )
    .get("programId")
    .and_then(|v| v.as_str())
    .expect("programId")
    .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.importCsv",
        json!({ "programId": program_id, "csvText": CSV }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({ "displayName": "Robin" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.exportBundle",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("examd-workspace-v1")
    );
    assert!(bundle_path.is_file(), "bundle file written");

    // Import into a fresh workspace and verify the content travelled.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": dst_workspace.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.importBundle",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        imported
            .get("bundleFormatDetected")
            .and_then(|v| v.as_str()),
        Some("examd-workspace-v1")
    );

    let programs = request_ok(&mut stdin, &mut reader, "8", "programs.list", json!({}));
    let row = programs
        .get("programs")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("program row");
    assert_eq!(
        row.get("title").and_then(|v| v.as_str()),
        Some("Incident Reporting")
    );
    assert_eq!(row.get("questionCount").and_then(|v| v.as_i64()), Some(1));

    let users = request_ok(&mut stdin, &mut reader, "9", "users.list", json!({}));
    assert_eq!(
        users.get("users").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn importing_garbage_reports_failure_and_keeps_daemon_alive() {
    let workspace = temp_dir("examd-bundle-bad");
    let junk_zip = temp_dir("examd-bundle-junk").join("junk.zip");
    // Zip signature with trailing garbage: detected as zip, rejected as bundle.
    std::fs::write(&junk_zip, [0x50, 0x4B, 0x03, 0x04, 0xFF, 0xFF]).expect("write junk");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.importBundle",
        json!({ "inPath": junk_zip.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("import_failed")
    );

    // The daemon reopened the untouched workspace and still answers.
    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    let programs = request_ok(&mut stdin, &mut reader, "4", "programs.list", json!({}));
    assert_eq!(
        programs
            .get("programs")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}
