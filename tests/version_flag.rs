use std::process::Command;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_pinfeed");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run pinfeed --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    let exe = env!("CARGO_BIN_EXE_pinfeed");
    let output = Command::new(exe)
        .arg("--help")
        .output()
        .expect("run pinfeed --help");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(stdout.contains("pinfeed"));
    assert!(stdout.contains("--search"));
    assert!(stdout.contains("--offline"));
}

#[test]
fn rejects_unknown_flags() {
    let exe = env!("CARGO_BIN_EXE_pinfeed");
    let output = Command::new(exe)
        .arg("--bogus")
        .output()
        .expect("run pinfeed --bogus");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("unknown argument"));
}

#[test]
fn missing_config_file_fails_before_starting_ui() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exe = env!("CARGO_BIN_EXE_pinfeed");
    let output = Command::new(exe)
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .output()
        .expect("run pinfeed --config");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("load config"));
}
