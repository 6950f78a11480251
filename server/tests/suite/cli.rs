use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn help_lists_runtime_flags() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("livecc-server")?
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--exec-timeout-ms"))
        .stdout(contains("--terminal-strategy"));
    Ok(())
}

#[test]
fn unknown_strategy_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("livecc-server")?
        .args(["--terminal-strategy", "telnet"])
        .assert()
        .failure()
        .stderr(contains("posix-shell"));
    Ok(())
}

#[test]
fn malformed_config_fails_startup() -> Result<(), Box<dyn std::error::Error>> {
    let home = TempDir::new()?;
    std::fs::write(home.path().join("config.toml"), "exec_timeout_ms = \"soon\"\n")?;

    Command::cargo_bin("livecc-server")?
        .env("LIVECC_HOME", home.path())
        .args(["--bind", "127.0.0.1:0"])
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
    Ok(())
}
