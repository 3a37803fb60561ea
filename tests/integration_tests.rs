//! Integration tests for the sideloader CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

use sideloader::db::SideloaderDb;
use sideloader::release::{NewRelease, NewStream, Release, ReleaseExecutor, ReleaseGate};

/// Helper to create a sideloader Command
fn sideloader() -> Command {
    let mut cmd = cargo_bin_cmd!("sideloader");
    cmd.env_remove("SIDELOADER_DB_PATH")
        .env_remove("SIDELOADER_DEPLOY_CMD")
        .env_remove("SIDELOADER_PUBLIC_URL")
        .env_remove("SIDELOADER_PROJECT_DIR")
        .env("RUST_LOG", "warn");
    cmd
}

fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    sideloader()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
    dir
}

struct NoopExecutor;

impl ReleaseExecutor for NoopExecutor {
    fn execute_release(&self, _release: &Release) -> anyhow::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        sideloader()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_version() {
        sideloader().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = TempDir::new().unwrap();
        sideloader()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Release database ready"));

        assert!(dir.path().join(".sideloader/sideloader.toml").exists());
        assert!(dir.path().join(".sideloader/sideloader.db").exists());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = init_project();
        sideloader()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already present"));
    }

    #[test]
    fn test_commands_require_init() {
        let dir = TempDir::new().unwrap();
        sideloader()
            .current_dir(dir.path())
            .args(["stream", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("sideloader init"));
    }
}

// =============================================================================
// Streams and releases
// =============================================================================

mod streams {
    use super::*;

    #[test]
    fn test_stream_add_and_list() {
        let dir = init_project();
        sideloader()
            .current_dir(dir.path())
            .args([
                "stream",
                "add",
                "--name",
                "production",
                "--require-signoff",
                "--signoff-list",
                "ops@example.com, qa@example.com",
                "--quorum",
                "1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created stream #1 (production)"))
            .stdout(predicate::str::contains("1 of 2"));

        sideloader()
            .current_dir(dir.path())
            .args(["stream", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("production"))
            .stdout(predicate::str::contains("sign-off 1/2"));
    }

    #[test]
    fn test_stream_add_rejects_unreachable_quorum() {
        let dir = init_project();
        sideloader()
            .current_dir(dir.path())
            .args([
                "stream",
                "add",
                "--name",
                "production",
                "--require-signoff",
                "--signoff-list",
                "ops@example.com",
                "--quorum",
                "3",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("quorum"));
    }

    #[test]
    fn test_status_shows_pending_signatures() {
        let dir = init_project();
        let db = SideloaderDb::new(&dir.path().join(".sideloader/sideloader.db")).unwrap();
        let gate = ReleaseGate::new();
        let stream = gate
            .create_stream(
                &db,
                &NewStream {
                    name: "production".into(),
                    require_signoff: true,
                    signoff_list: "ops@example.com\nqa@example.com".into(),
                    quorum: 0,
                },
            )
            .unwrap();
        let pushed = gate
            .push_release(
                &db,
                &NoopExecutor,
                &NewRelease {
                    stream_id: stream.id,
                    build_id: 42,
                    scheduled_at: None,
                },
            )
            .unwrap();
        gate.record_signoff(&db, &NoopExecutor, &pushed.signoffs[0].token)
            .unwrap();
        drop(db);

        sideloader()
            .current_dir(dir.path())
            .args(["status", &pushed.release.id.to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("Waiting for 1 signature"))
            .stdout(predicate::str::contains("1 signed, 1 remaining"))
            .stdout(predicate::str::contains(format!(
                "http://127.0.0.1:8000/sign/{}",
                pushed.signoffs[1].token
            )));

        sideloader()
            .current_dir(dir.path())
            .args(["releases", &stream.id.to_string()])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 release(s)"))
            .stdout(predicate::str::contains("build 42"));
    }

    #[test]
    fn test_stream_edit_and_rm() {
        let dir = init_project();
        sideloader()
            .current_dir(dir.path())
            .args(["stream", "add", "--name", "staging"])
            .assert()
            .success();

        sideloader()
            .current_dir(dir.path())
            .args([
                "stream",
                "edit",
                "1",
                "--require-signoff",
                "true",
                "--signoff-list",
                "ops@example.com qa@example.com",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Updated stream #1 (staging)"))
            .stdout(predicate::str::contains("2 of 2"));

        sideloader()
            .current_dir(dir.path())
            .args(["stream", "edit", "1", "--quorum", "5"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("quorum"));

        sideloader()
            .current_dir(dir.path())
            .args(["stream", "rm", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed stream #1"));

        sideloader()
            .current_dir(dir.path())
            .args(["stream", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No streams defined."));

        sideloader()
            .current_dir(dir.path())
            .args(["stream", "rm", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Stream 1 not found"));
    }

    #[test]
    fn test_status_unknown_release_fails() {
        let dir = init_project();
        sideloader()
            .current_dir(dir.path())
            .args(["status", "99"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Release 99 not found"));
    }
}
