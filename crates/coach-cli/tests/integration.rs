#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PARTICIPANT: &str = "0b6f3a10-2c41-4d7e-9a55-1f00000000a1";

const BUNDLE: &str = r#"
intervention:
  id: 0b6f3a10-2c41-4d7e-9a55-1f0000000001
  name: Sleep better
  active: true
  monitoring_active: true
participants:
  - id: 0b6f3a10-2c41-4d7e-9a55-1f00000000a1
    intervention_id: 0b6f3a10-2c41-4d7e-9a55-1f0000000001
    nickname: Robin
    monitoring_active: true
dialog_options:
  - id: 0b6f3a10-2c41-4d7e-9a55-1f00000000b1
    participant_id: 0b6f3a10-2c41-4d7e-9a55-1f00000000a1
    kind: sms
    data: "+41790000042"
dialog_statuses:
  - id: 0b6f3a10-2c41-4d7e-9a55-1f00000000c1
    participant_id: 0b6f3a10-2c41-4d7e-9a55-1f00000000a1
    contact_data_available: true
    screening_survey_performed: true
variables:
  - participant_id: 0b6f3a10-2c41-4d7e-9a55-1f00000000a1
    name: $bedtime
    value: "22"
"#;

fn coach(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("coach").unwrap();
    cmd.current_dir(dir.path()).env("COACH_ROOT", dir.path());
    cmd
}

fn init_with_bundle(dir: &TempDir) {
    coach(dir).arg("init").assert().success();
    let bundle = dir.path().join("bundle.yaml");
    std::fs::write(&bundle, BUNDLE).unwrap();
    coach(dir).arg("import").arg(&bundle).assert().success();
}

fn json_of(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

// ---------------------------------------------------------------------------
// coach init / config
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_database() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created:"));
    assert!(dir.path().join(".coach/config.yaml").exists());
    assert!(dir.path().join(".coach/engine.redb").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    coach(&dir).arg("init").assert().success();
    coach(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:"));
}

#[test]
fn default_config_validates() {
    let dir = TempDir::new().unwrap();
    coach(&dir).arg("init").assert().success();
    coach(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn inverted_send_hours_fail_validation() {
    let dir = TempDir::new().unwrap();
    coach(&dir).arg("init").assert().success();
    std::fs::write(
        dir.path().join(".coach/config.yaml"),
        "engine:\n  min_send_hour: 20\n  max_send_hour: 8\n",
    )
    .unwrap();
    coach(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .arg("tick")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// coach import / status
// ---------------------------------------------------------------------------

#[test]
fn import_reports_counts() {
    let dir = TempDir::new().unwrap();
    coach(&dir).arg("init").assert().success();
    let bundle = dir.path().join("bundle.yaml");
    std::fs::write(&bundle, BUNDLE).unwrap();

    let output = coach(&dir)
        .args(["--json", "import"])
        .arg(&bundle)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = json_of(&output.stdout);
    assert_eq!(json["report"]["participants"], 1);
    assert_eq!(json["report"]["statuses_created"], 0);
    assert_eq!(json["report"]["variables"], 1);
}

#[test]
fn status_of_imported_participant() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    let output = coach(&dir)
        .args(["--json", "status", PARTICIPANT])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = json_of(&output.stdout);
    assert_eq!(json["status"]["contact_data_available"], true);
    assert_eq!(json["messages"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// coach send / dispatch / receive
// ---------------------------------------------------------------------------

#[test]
fn manual_message_is_dispatched() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);

    coach(&dir)
        .args(["send", PARTICIPANT, "Good night $participantName"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Good night Robin"));

    let output = coach(&dir).args(["--json", "dispatch"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(json_of(&output.stdout)["sent"], 1);
}

#[test]
fn received_message_without_open_question_is_unexpected() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    let output = coach(&dir)
        .args(["--json", "receive", "--sender", "+41790000042", "slept well"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = json_of(&output.stdout);
    assert_eq!(json["outcome"], "unexpected");
    assert_eq!(json["handled"], false);
}

#[test]
fn unknown_channel_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    coach(&dir)
        .args(["receive", "--channel", "fax", "--sender", "+1", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fax"));
}

// ---------------------------------------------------------------------------
// coach tick / recover / stats / participant
// ---------------------------------------------------------------------------

#[test]
fn tick_reports_json() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    let output = coach(&dir)
        .args(["--json", "tick", "--dispatch"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = json_of(&output.stdout);
    assert_eq!(json["tick"]["participants"], 1);
    assert!(json["dispatch"].is_object());
}

#[test]
fn recover_on_clean_database_reverts_nothing() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    coach(&dir)
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reverted 0"));
}

#[test]
fn stats_list_intervention() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    coach(&dir)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sleep better"));
}

#[test]
fn protected_variable_cannot_be_set() {
    let dir = TempDir::new().unwrap();
    init_with_bundle(&dir);
    coach(&dir)
        .args(["participant", "set-var", PARTICIPANT, "$mood", "6"])
        .assert()
        .success();
    coach(&dir)
        .args(["participant", "set-var", PARTICIPANT, "$participantName", "Sam"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("write protected"));
}
