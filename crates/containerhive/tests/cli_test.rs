#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("hive").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("validate"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("hive").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("containerhive"));
}

/// renderコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_render_help() {
    let mut cmd = Command::cargo_bin("hive").unwrap();
    cmd.arg("render")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dist"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("hive").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// 設定ファイルのないディレクトリでrenderを実行するとエラーになることを確認
#[test]
fn test_render_without_hive_config() {
    let empty = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("hive").unwrap();
    cmd.arg("render").arg(empty.path()).assert().failure();
}
