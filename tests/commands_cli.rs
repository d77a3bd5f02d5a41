use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use clap::error::ErrorKind;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const PEER: &str = "AA:BB:CC:DD:EE:FF";
const DOCUMENT: &str = r#"{"device_name":"Greenhouse","device_id":"D7","user_id":"U2","adoption_status":1}"#;

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl devinfo::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

struct CommandRun {
    result: anyhow::Result<()>,
    stdout: String,
}

impl CommandRun {
    fn json(&self) -> Value {
        serde_json::from_str(&self.stdout).expect("stdout should be a JSON document")
    }

    fn error_message(&self) -> String {
        let error = self
            .result
            .as_ref()
            .expect_err("command should have failed");
        format!("{error:#}")
    }
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<CommandRun> {
    let args = devinfo::Args::try_parse_from(argv)?;
    let log_level = args.log_level();
    let settings = args.session_settings();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let transport = match maybe_fake_args {
        Some(fake_args) => devinfo::fake_transport(fake_args),
        None => devinfo::real_transport(),
    };

    let mut output = Vec::new();
    let result = devinfo::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        transport,
        settings,
        log_level,
    )
    .await;
    Ok(CommandRun {
        result,
        stdout: String::from_utf8(output)?,
    })
}

fn unique_identity_file(name: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("devinfo-cli-{name}-{suffix}"))
        .join("user-id")
}

#[tokio::test(start_paused = true)]
async fn probe_prints_json_outcome_off_terminal() -> anyhow::Result<()> {
    let run = run_with_argv([
        "devinfo",
        "--fake",
        "--fake-reply",
        DOCUMENT,
        "probe",
        "--address",
        PEER,
    ])
    .await?;

    run.result.as_ref().expect("probe should succeed");
    let output = run.json();
    assert_eq!("success", output["kind"]);
    assert_eq!("Greenhouse", output["value"]["device_name"]);
    assert_eq!("", output["value"]["broker_url"]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn probe_pretty_output_lists_payload_fields() -> anyhow::Result<()> {
    let run = run_with_argv([
        "devinfo",
        "--output",
        "pretty",
        "--fake",
        "--fake-reply",
        DOCUMENT,
        "probe",
        "--address",
        PEER,
    ])
    .await?;

    run.result.as_ref().expect("probe should succeed");
    assert!(run.stdout.starts_with("Device info\n"));
    assert!(run.stdout.contains("Greenhouse"));
    assert!(run.stdout.contains("│ device_id "));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn probe_failure_is_printed_then_returned() -> anyhow::Result<()> {
    let run = run_with_argv([
        "devinfo",
        "--fake",
        "--fake-reply",
        DOCUMENT,
        "--fake-write-status",
        "133",
        "probe",
        "--address",
        PEER,
    ])
    .await?;

    assert_eq!(json!({"kind": "failure", "value": "write failed"}), run.json());
    assert_eq!(
        "device-info exchange failed: write failed",
        run.error_message()
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn probe_sends_the_configured_command() -> anyhow::Result<()> {
    let run = run_with_argv([
        "devinfo",
        "--command",
        r#"{"request":"info"}"#,
        "--settle-delay",
        "10ms",
        "--fake",
        "--fake-chunks",
        "7b7d",
        "probe",
        "--address",
        PEER,
    ])
    .await?;

    run.result.as_ref().expect("probe should succeed");
    assert_eq!("success", run.json()["kind"]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn classify_uses_the_explicit_user_id() -> anyhow::Result<()> {
    let run = run_with_argv([
        "devinfo",
        "--fake",
        "--fake-reply",
        DOCUMENT,
        "classify",
        "--address",
        PEER,
        "--user-id",
        "U2",
    ])
    .await?;

    run.result.as_ref().expect("classify should succeed");
    let output = run.json();
    assert_eq!("owner", output["kind"]);
    assert_eq!("D7", output["value"]["device_id"]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn classify_reads_the_stored_identity() -> anyhow::Result<()> {
    let identity_file = unique_identity_file("classify");
    let identity_path = identity_file.to_string_lossy().into_owned();
    let stored = run_with_argv([
        "devinfo",
        "--identity-file",
        &identity_path,
        "identity",
        "set",
        "U1",
    ])
    .await?;
    stored.result.as_ref().expect("identity should be stored");

    let run = run_with_argv([
        "devinfo",
        "--identity-file",
        &identity_path,
        "--fake",
        "--fake-reply",
        DOCUMENT,
        "classify",
        "--address",
        PEER,
    ])
    .await?;

    run.result.as_ref().expect("classify should succeed");
    assert_eq!(json!({"kind": "unauthorized"}), run.json());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn incomplete_reply_fails_classification() -> anyhow::Result<()> {
    let run = run_with_argv([
        "devinfo",
        "--fake",
        "--fake-chunks",
        "7b22",
        "classify",
        "--address",
        PEER,
        "--user-id",
        "U2",
    ])
    .await?;

    assert_eq!(
        json!({"kind": "error", "value": "incomplete device info (2 bytes received)"}),
        run.json()
    );
    assert_eq!(
        "device could not be classified: incomplete device info (2 bytes received)",
        run.error_message()
    );

    Ok(())
}

#[tokio::test]
async fn identity_commands_manage_the_stored_user_id() -> anyhow::Result<()> {
    let identity_file = unique_identity_file("identity");
    let identity_path = identity_file.to_string_lossy().into_owned();

    let set = run_with_argv([
        "devinfo",
        "--identity-file",
        &identity_path,
        "identity",
        "set",
        "U9",
    ])
    .await?;
    set.result.as_ref().expect("identity set should succeed");
    assert_eq!("U9", set.json()["user_id"]);

    let show = run_with_argv([
        "devinfo",
        "--identity-file",
        &identity_path,
        "identity",
        "show",
    ])
    .await?;
    assert_eq!(
        json!({"user_id": "U9", "path": identity_path}),
        show.json()
    );

    let clear = run_with_argv([
        "devinfo",
        "--identity-file",
        &identity_path,
        "identity",
        "clear",
    ])
    .await?;
    assert_eq!(Value::Null, clear.json()["user_id"]);
    assert!(!identity_file.exists());

    Ok(())
}

#[tokio::test]
async fn identity_set_rejects_whitespace() -> anyhow::Result<()> {
    let identity_file = unique_identity_file("identity-invalid");
    let identity_path = identity_file.to_string_lossy().into_owned();

    let run = run_with_argv([
        "devinfo",
        "--identity-file",
        &identity_path,
        "identity",
        "set",
        "U 9",
    ])
    .await?;

    assert_eq!("invalid user identifier `U 9`", run.error_message());
    assert!(run.stdout.is_empty());

    Ok(())
}

#[test]
fn probe_requires_an_address() {
    let error = devinfo::Args::try_parse_from(["devinfo", "probe"])
        .expect_err("probe without an address should be rejected");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}
