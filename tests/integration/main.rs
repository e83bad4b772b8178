//! Integration tests for the volsnap binary

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Binary with a scrubbed environment and settings isolated in `dir`
    fn volsnap(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("volsnap");
        cmd.env_clear()
            .env("VOLSNAP_CONFIG", dir.path().join("config.toml"))
            .env("VOLSNAP_STATE_DIR", dir.path().join("state"));
        cmd
    }

    fn job_env(cmd: &mut Command) -> &mut Command {
        cmd.env("INPUT_PATH", "/data")
            .env("GITHUB_REF_NAME", "main")
            .env("GITHUB_REPOSITORY", "acme/app")
            .env("RUNS_ON_INSTANCE_ID", "i-0abc")
            .env("RUNS_ON_AWS_AZ", "us-east-1a")
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        volsnap(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("restore"))
            .stdout(predicate::str::contains("save"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        volsnap(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("volsnap"));
    }

    #[test]
    fn save_help_lists_job_inputs() {
        let dir = TempDir::new().unwrap();
        volsnap(&dir)
            .args(["save", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--wait-for-completion"))
            .stdout(predicate::str::contains("INPUT_PATH"));
    }

    #[test]
    fn restore_without_job_environment_fails() {
        let dir = TempDir::new().unwrap();
        volsnap(&dir)
            .args(["restore", "--path", "/data"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Missing required input"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn restore_rejects_relative_path() {
        let dir = TempDir::new().unwrap();
        job_env(&mut volsnap(&dir))
            .args(["restore", "--path", "cache"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("must be an absolute path"));
    }

    #[test]
    fn save_without_volume_record_fails() {
        let dir = TempDir::new().unwrap();
        job_env(&mut volsnap(&dir))
            .arg("save")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No volume record for /data"))
            .stderr(predicate::str::contains("volsnap restore"));
    }

    #[test]
    fn post_flag_runs_save() {
        let dir = TempDir::new().unwrap();
        job_env(&mut volsnap(&dir))
            .arg("--post")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No volume record"));
    }

    #[test]
    fn save_disabled_skips() {
        let dir = TempDir::new().unwrap();
        job_env(&mut volsnap(&dir))
            .env("INPUT_SAVE", "false")
            .arg("save")
            .assert()
            .success()
            .stdout(predicate::str::contains("Skipping snapshot of /data"));
    }

    #[test]
    fn invalid_settings_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[volume\nsize_gib =").unwrap();

        job_env(&mut volsnap(&dir))
            .arg("restore")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn zero_volume_size_rejected() {
        let dir = TempDir::new().unwrap();
        job_env(&mut volsnap(&dir))
            .env("INPUT_VOLUME_SIZE", "0")
            .arg("restore")
            .assert()
            .failure()
            .stderr(predicate::str::contains("volume_size"));
    }
}
