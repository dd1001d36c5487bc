//! Unit tests for configuration parsing and validation.

use install_queue::config::{ExecutorKind, GlobalConfig, RelaunchMode};
use install_queue::AppError;

fn minimal_toml(data_dir: &str) -> String {
    format!("data_dir = '{data_dir}'\n")
}

fn full_toml(data_dir: &str) -> String {
    format!(
        r#"
data_dir = '{data_dir}'
retention_days = 7
executor = "simulated"
msiexec_path = 'C:\Windows\System32\msiexec.exe'

[relaunch]
enabled = false
app_name = "PatchTuesday"
mode = "resume"

[retry]
unknown_attempts = 2

[simulation]
default_exit_code = 0
delay_ms = 25
unobservable = ["flaky.exe"]

[simulation.exit_codes]
"driver.msi" = 3010
"broken.msi" = 1603
"#
    )
}

/// Only `data_dir` is required; everything else has defaults.
#[test]
fn minimal_config_uses_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config =
        GlobalConfig::from_toml_str(&minimal_toml(&temp.path().display().to_string()))
            .expect("valid config");

    assert_eq!(config.retention_days, 30);
    assert_eq!(config.executor, ExecutorKind::Auto);
    assert_eq!(config.msiexec_path.to_string_lossy(), "msiexec.exe");
    assert!(config.relaunch.enabled);
    assert_eq!(config.relaunch.app_name, "InstallQueue");
    assert_eq!(config.relaunch.mode, RelaunchMode::Notify);
    assert_eq!(config.retry.unknown_attempts, 0);
    assert_eq!(config.simulation.default_exit_code, 0);
    assert!(config.simulation.exit_codes.is_empty());
}

/// Every section is parsed.
#[test]
fn full_config_parses_all_sections() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::from_toml_str(&full_toml(&temp.path().display().to_string()))
        .expect("valid config");

    assert_eq!(config.retention_days, 7);
    assert_eq!(config.executor, ExecutorKind::Simulated);
    assert!(!config.relaunch.enabled);
    assert_eq!(config.relaunch.app_name, "PatchTuesday");
    assert_eq!(config.relaunch.mode, RelaunchMode::Resume);
    assert_eq!(config.retry.unknown_attempts, 2);
    assert_eq!(config.simulation.delay_ms, 25);
    assert_eq!(config.simulation.exit_codes.get("driver.msi"), Some(&3010));
    assert_eq!(config.simulation.exit_codes.get("broken.msi"), Some(&1603));
    assert_eq!(config.simulation.unobservable, vec!["flaky.exe".to_owned()]);
}

/// A missing data directory is created and canonicalised.
#[test]
fn data_dir_is_created() {
    let temp = tempfile::tempdir().expect("tempdir");
    let nested = temp.path().join("state").join("queue");
    let config = GlobalConfig::from_toml_str(&minimal_toml(&nested.display().to_string()))
        .expect("valid config");

    assert!(nested.is_dir());
    assert!(config.data_dir.is_absolute());
}

/// Derived paths live under the data directory.
#[test]
fn derived_paths() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config =
        GlobalConfig::from_toml_str(&minimal_toml(&temp.path().display().to_string()))
            .expect("valid config");

    assert_eq!(config.db_path(), config.data_dir.join("install-queue.db"));
    assert_eq!(config.lock_path(), config.data_dir.join("install-queue.lock"));
    assert_eq!(config.audit_dir(), config.data_dir.join("logs"));
}

/// An empty relaunch name is rejected.
#[test]
fn empty_app_name_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let raw = format!(
        "{}\n[relaunch]\napp_name = \"  \"\n",
        minimal_toml(&temp.path().display().to_string())
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("must reject");
    assert!(matches!(err, AppError::Config(_)), "got {err}");
}

/// Unknown executor names fail to parse.
#[test]
fn invalid_executor_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let raw = format!(
        "{}executor = \"quantum\"\n",
        minimal_toml(&temp.path().display().to_string())
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("must reject");
    assert!(matches!(err, AppError::Config(_)), "got {err}");
}

/// Config without `data_dir` is invalid.
#[test]
fn missing_data_dir_is_rejected() {
    let err = GlobalConfig::from_toml_str("retention_days = 3\n").expect_err("must reject");
    assert!(matches!(err, AppError::Config(_)));
}

/// Loading from a file path reads and validates it.
#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, minimal_toml(&temp.path().display().to_string())).expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.retention_days, 30);

    let err = GlobalConfig::load_from_path(temp.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}
