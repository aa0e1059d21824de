use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const RULES: &str = r#"
[[rules]]
id = "pricing"
owner_id = "user_1"
account_id = "acct_1"
name = "Pricing comments"
priority = 10
created_at = "2024-01-01T00:00:00Z"
trigger = { type = "keyword_comment", keywords = ["price", "cost"] }
action = { type = "send_reply", template = "Hi {userName}! Prices are at {linkPageUrl}" }

[[rules]]
id = "welcome"
owner_id = "user_1"
account_id = "acct_1"
priority = 1
created_at = "2024-01-02T00:00:00Z"
trigger = { type = "first_message" }
action = { type = "send_reply", template = "Welcome {userName}!" }
"#;

fn write_rules(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("rules.toml");
    fs::write(&path, content).expect("write rules");
    path
}

fn write_event(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("write event");
    path
}

#[test]
fn config_init_writes_example_file() {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("linkreply.toml");

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .success();

    let content = fs::read_to_string(&config_path).expect("read config");
    assert!(content.contains("rules_path"));
    assert!(content.contains("dry_run = true"));

    // A second init without --force refuses to overwrite
    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn evaluate_outputs_rendered_reply_as_json() {
    let dir = TempDir::new().expect("temp dir");
    let rules = write_rules(&dir, RULES);
    let event = write_event(
        &dir,
        "event.json",
        r#"{
            "kind": "comment",
            "content": "What's the PRICE of this?",
            "sender_name": "Jordan",
            "timestamp": "2024-05-01T14:00:00Z",
            "platform": "instagram",
            "account_id": "acct_1"
        }"#,
    );

    let mut cmd = cargo_bin_cmd!("linkreply");
    let output = cmd
        .current_dir(dir.path())
        .args(["evaluate", "--json", "--link-page-url", "https://lnk.example/jordan-shop"])
        .arg("--rules")
        .arg(&rules)
        .arg("--event")
        .arg(&event)
        .output()
        .expect("run evaluate");

    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(value["matched"], true);
    assert_eq!(value["rule_id"], "pricing");
    assert_eq!(
        value["rendered_message"],
        "Hi Jordan! Prices are at https://lnk.example/jordan-shop"
    );
    assert_eq!(value["chosen_action"]["type"], "send_reply");
}

#[test]
fn evaluate_reports_no_match() {
    let dir = TempDir::new().expect("temp dir");
    let rules = write_rules(&dir, RULES);
    let event = write_event(
        &dir,
        "event.json",
        r#"{"kind": "mention", "timestamp": "2024-05-01T14:00:00Z", "platform": "instagram", "account_id": "acct_1"}"#,
    );

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .arg("evaluate")
        .arg("--rules")
        .arg(&rules)
        .arg("--event")
        .arg(&event)
        .assert()
        .success()
        .stdout(predicate::str::contains("No rule matched"));
}

#[test]
fn evaluate_reads_event_from_stdin() {
    let dir = TempDir::new().expect("temp dir");
    let rules = write_rules(&dir, RULES);

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .args(["evaluate", "--event", "-"])
        .arg("--rules")
        .arg(&rules)
        .write_stdin(
            r#"{"kind": "first_message", "timestamp": "2024-05-01T14:00:00Z", "platform": "facebook", "account_id": "acct_1"}"#,
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("Matched rule: welcome"))
        .stdout(predicate::str::contains("Welcome @user!"));
}

#[test]
fn rules_validate_fails_on_duplicate_ids() {
    let dir = TempDir::new().expect("temp dir");
    let duplicated = format!(
        "{}\n{}",
        RULES,
        RULES.replace("id = \"welcome\"", "id = \"other\"")
    );
    let rules = write_rules(&dir, &duplicated);

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .args(["rules", "validate", "--rules"])
        .arg(&rules)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Validation failed"));
}

#[test]
fn rules_validate_flags_rules_that_never_fire() {
    let dir = TempDir::new().expect("temp dir");
    let rules = write_rules(
        &dir,
        r#"
[[rules]]
id = "late_night"
owner_id = "user_1"
account_id = "acct_1"
created_at = "2024-01-01T00:00:00Z"
trigger = { type = "out_of_hours", hour = 25 }
action = { type = "send_reply", template = "We're closed" }
"#,
    );

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .args(["rules", "validate", "--rules"])
        .arg(&rules)
        .assert()
        .failure()
        .stderr(predicate::str::contains("late_night"))
        .stderr(predicate::str::contains("outside 0-23"));
}

#[test]
fn rules_import_then_list_from_sqlite() {
    let dir = TempDir::new().expect("temp dir");
    let rules = write_rules(&dir, RULES);
    let db = dir.path().join("state.sqlite");

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .args(["rules", "import", "--rules"])
        .arg(&rules)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 rules"));

    let mut cmd = cargo_bin_cmd!("linkreply");
    let output = cmd
        .current_dir(dir.path())
        .env("LINKREPLY__GENERAL__RULE_SOURCE", "sqlite")
        .env("LINKREPLY__GENERAL__STATE_DB_PATH", &db)
        .args(["rules", "list", "--json"])
        .output()
        .expect("run rules list");

    assert!(output.status.success());

    let value: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(value["count"], 2);
    assert_eq!(value["rules"][0]["id"], "pricing");
    assert_eq!(value["rules"][1]["id"], "welcome");
}

#[test]
fn run_dry_run_processes_events_file() {
    let dir = TempDir::new().expect("temp dir");
    write_rules(&dir, RULES);
    let events = write_event(
        &dir,
        "events.jsonl",
        concat!(
            r#"{"kind":"comment","content":"cost?","sender_name":"Sam","timestamp":"2024-05-01T14:00:00Z","platform":"instagram","account_id":"acct_1","event_id":"c1"}"#,
            "\n",
            r#"{"kind":"comment","content":"cost?","sender_name":"Sam","timestamp":"2024-05-01T14:00:00Z","platform":"instagram","account_id":"acct_1","event_id":"c1"}"#,
            "\n",
            r#"{"kind":"comment","content":"nice photo","timestamp":"2024-05-01T14:00:00Z","platform":"instagram","account_id":"acct_1","event_id":"c2"}"#,
            "\n",
            "garbage\n",
        ),
    );

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .env("LINKREPLY__DISPATCH__MAX_CONCURRENT", "1")
        .args(["run", "--dry-run", "--events"])
        .arg(&events)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingested 3 events (1 rejected)"))
        .stdout(predicate::str::contains(
            "1 replied, 1 no match, 1 skipped, 0 failed",
        ));

    assert!(dir.path().join("linkreply.sqlite").exists());
}

#[test]
fn run_require_approval_writes_outbox() {
    let dir = TempDir::new().expect("temp dir");
    write_rules(&dir, RULES);
    let events = write_event(
        &dir,
        "events.jsonl",
        r#"{"kind":"comment","content":"price please","sender_name":"Ana","timestamp":"2024-05-01T14:00:00Z","platform":"instagram","account_id":"acct_1","event_id":"c9","sender_id":"igsid_9"}"#,
    );
    let outbox = dir.path().join("outbox.jsonl");

    let mut cmd = cargo_bin_cmd!("linkreply");
    cmd.current_dir(dir.path())
        .env("LINKREPLY__INSTAGRAM__ENABLED", "true")
        .env("LINKREPLY__GENERAL__LINK_PAGE_URL", "https://lnk.example/ana")
        .args(["run", "--require-approval", "--events"])
        .arg(&events)
        .arg("--outbox")
        .arg(&outbox)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 replied"));

    let contents = fs::read_to_string(&outbox).expect("read outbox");
    let entry: Value = serde_json::from_str(contents.trim()).expect("valid json");
    assert_eq!(entry["platform"], "instagram");
    assert_eq!(entry["recipient_id"], "igsid_9");
    assert_eq!(entry["text"], "Hi Ana! Prices are at https://lnk.example/ana");
}
