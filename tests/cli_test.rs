use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const PROMPT: &str = "Compress this chat into a state snapshot";
const RESOLVE_URL: &str = "/$rpc/google.internal.alkali.applications.makersuite.v1.MakerSuiteService/ResolveDriveResource";

fn fragment(text: &str) -> Value {
    let mut slots = vec![Value::Null; 13];
    slots[1] = json!(text);
    slots[12] = json!(false);
    Value::Array(slots)
}

fn write_history(dir: &Path) -> PathBuf {
    let path = dir.join("history.json");
    let body = json!([
        "models/gemini",
        [
            [[fragment("first question")], "user"],
            [[fragment("first answer")], "model"],
            [[fragment("second question")], "user"],
            [[fragment("second answer")], "model"],
            [[fragment(PROMPT)], "user"]
        ]
    ]);
    fs::write(&path, body.to_string()).expect("write history");
    path
}

fn write_response(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("response.json");
    let candidate = json!([[[fragment(text)], "model"]]);
    let event = json!([[candidate]]);
    fs::write(&path, json!([[event]]).to_string()).expect("write response");
    path
}

fn write_settings(home: &Path) {
    fs::create_dir_all(home).expect("mkdir home");
    let settings = json!({
        "compressPrompt": PROMPT,
        "snapshotRegex": "",
        "tailPercent": 100,
        "tailMinChars": 0
    });
    fs::write(home.join("settings.json"), settings.to_string()).expect("write settings");
}

fn cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("aistudio-compressor");
    cmd.current_dir(home)
        .env("COMPRESSOR_HOME", home)
        .env_remove("COMPRESSOR_SETTINGS_PATH")
        .env_remove("COMPRESSOR_CONFIG_PATH")
        .env("COMPRESSOR_LOG", "off");
    cmd
}

#[test]
fn decode_history_lists_turns() {
    let tmp = tempdir().expect("tempdir");
    let history = write_history(tmp.path());

    cmd(tmp.path())
        .arg("decode-history")
        .arg("--file")
        .arg(&history)
        .assert()
        .success()
        .stdout(predicate::str::contains("turns=5"))
        .stdout(predicate::str::contains("turn[1] role=model chars=12"));
}

#[test]
fn decode_history_flags_invalid_payload() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("bad.json");
    fs::write(&path, "{\"turns\": []}").expect("write");

    cmd(tmp.path())
        .args(["--json", "decode-history", "--file"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ok\": false"))
        .stdout(predicate::str::contains("payload is object"));
}

#[test]
fn extract_summary_applies_pattern_with_fallback() {
    let tmp = tempdir().expect("tempdir");
    let response = write_response(tmp.path(), "noise <state_snapshot>\nkept\n</state_snapshot> tail");

    cmd(tmp.path())
        .arg("extract-summary")
        .arg("--file")
        .arg(&response)
        .args(["--pattern", "<state_snapshot>.*</state_snapshot>"])
        .assert()
        .success()
        .stdout(predicate::str::contains("summary=<state_snapshot>\nkept\n</state_snapshot>"));

    cmd(tmp.path())
        .arg("extract-summary")
        .arg("--file")
        .arg(&response)
        .args(["--pattern", "<missing>"])
        .assert()
        .success()
        .stdout(predicate::str::contains("summary=noise <state_snapshot>"));
}

#[test]
fn rebuild_writes_resolve_and_list_bodies() {
    let tmp = tempdir().expect("tempdir");
    write_settings(tmp.path());
    let history = write_history(tmp.path());
    let response = write_response(tmp.path(), "SUMMARY");
    let create = tmp.path().join("create.json");
    let mut root = vec![Value::Null; 14];
    root[13] = json!([[["old turn"]]]);
    fs::write(&create, json!([root]).to_string()).expect("write create");
    let out = tmp.path().join("out");

    cmd(tmp.path())
        .arg("rebuild")
        .arg("--history")
        .arg(&history)
        .arg("--response")
        .arg(&response)
        .arg("--create-body")
        .arg(&create)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("tail_turns=4"))
        .stdout(predicate::str::contains("injected_turns=6"));

    let resolve: Value =
        serde_json::from_str(&fs::read_to_string(out.join("resolve.json")).expect("resolve"))
            .expect("json");
    assert_eq!(resolve[0], json!([[[null, "SUMMARY"]], "user"]));
    assert_eq!(resolve.as_array().map(Vec::len), Some(6));

    let list = fs::read_to_string(out.join("list.json")).expect("list");
    assert_eq!(list.trim(), "[[\"SUMMARY\",0]]");

    let created: Value =
        serde_json::from_str(&fs::read_to_string(out.join("create.json")).expect("create"))
            .expect("json");
    assert_eq!(created[0][13][0][0][0], json!("SUMMARY"));
    assert_eq!(created[0][13][1], json!([]));
}

#[test]
fn settings_set_show_and_reset() {
    let tmp = tempdir().expect("tempdir");

    cmd(tmp.path())
        .args(["settings", "set", "--tail-percent", "45", "--tail-min-chars", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tail_percent=45"));

    let stored: Value = serde_json::from_str(
        &fs::read_to_string(tmp.path().join("settings.json")).expect("settings"),
    )
    .expect("json");
    assert_eq!(stored["tailMinChars"], json!(10));

    cmd(tmp.path())
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tail_min_chars=10"));

    cmd(tmp.path())
        .args(["settings", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tail_percent=30"));
}

#[test]
fn settings_set_rejects_invalid_regex() {
    let tmp = tempdir().expect("tempdir");
    cmd(tmp.path())
        .args(["settings", "set", "--snapshot-regex", "(unclosed"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("E007_INVALID_SETTINGS"));
    assert!(!tmp.path().join("settings.json").exists());
}

#[test]
fn settings_set_without_options_fails() {
    let tmp = tempdir().expect("tempdir");
    cmd(tmp.path())
        .args(["settings", "set"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("no settings provided"));
}

#[test]
fn replay_serves_pending_resolve_without_network() {
    let tmp = tempdir().expect("tempdir");
    write_settings(tmp.path());
    let history = write_history(tmp.path());
    let response = write_response(tmp.path(), "SUMMARY");
    let body = tmp.path().join("body.json");
    fs::write(&body, "[]").expect("write body");

    cmd(tmp.path())
        .args(["replay", "--url", RESOLVE_URL, "--body-file"])
        .arg(&body)
        .arg("--history")
        .arg(&history)
        .arg("--response")
        .arg(&response)
        .assert()
        .success()
        .stdout(predicate::str::contains("disposition=served:ResolveDriveResource"))
        .stdout(predicate::str::contains("pending_injection=remaining"));
}

#[test]
fn replay_requires_history_and_response_together() {
    let tmp = tempdir().expect("tempdir");
    let history = write_history(tmp.path());
    cmd(tmp.path())
        .args(["replay", "--url", RESOLVE_URL, "--history"])
        .arg(&history)
        .assert()
        .failure()
        .stdout(predicate::str::contains("must be given together"));
}

#[test]
fn status_reports_paths_and_env_overrides() {
    let tmp = tempdir().expect("tempdir");
    cmd(tmp.path())
        .env("COMPRESSOR_POLL_INTERVAL_MS", "200")
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("timing poll=200ms"))
        .stdout(predicate::str::contains("COMPRESSOR_POLL_INTERVAL_MS"))
        .stdout(predicate::str::contains("settings_file_state=missing"));
}

#[test]
fn status_flags_invalid_config_file() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("compressor.toml"),
        "[host]\norigin = \"not a url\"\n",
    )
    .expect("write config");
    cmd(tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("config invalid"));
}
