//! CLI contract tests for `luahost`.
//!
//! Each run gets its own asset, data and config locations so nothing touches
//! the user's real configuration.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

#[allow(deprecated)]
fn luahost(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("luahost").expect("luahost binary should be built");
    let config = home.join("luahost.toml");
    if !config.exists() {
        std::fs::write(&config, "").unwrap();
    }
    cmd.env("LUAHOST_CONFIG", config);
    cmd.env_remove("RUST_LOG");
    cmd
}

fn assets(script: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("init.lua"), script).unwrap();
    dir
}

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    luahost(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn run_delivers_lifecycle_and_stdin_posts() {
    let home = tempfile::tempdir().unwrap();
    let app = assets(
        "function onCreate() print('created') end
         function onResume() print('resumed') end
         function onPause() print('paused') end
         function onDestroy() print('destroyed') end",
    );
    luahost(home.path())
        .args(["run", "--duration-ms", "10000", "--assets"])
        .arg(app.path())
        .arg("--data-dir")
        .arg(home.path().join("files"))
        .write_stdin("print('posted ' .. 6 * 7)\n")
        .assert()
        .success()
        .stdout(predicate::str::is_match("(?s)created.*resumed.*posted 42.*paused.*destroyed").unwrap());
}

#[test]
fn scripts_can_finish_the_run() {
    let home = tempfile::tempdir().unwrap();
    let app = assets(
        "bridge.on('onResume', function() post('print(\"finishing\"); finish()') end)
         bridge.on('onStop', function() print('stopped') end)",
    );
    luahost(home.path())
        .args(["run", "--duration-ms", "10000", "--assets"])
        .arg(app.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("finishing"))
        .stdout(predicate::str::contains("stopped"));
}

#[test]
fn script_errors_do_not_fail_the_run() {
    let home = tempfile::tempdir().unwrap();
    let app = assets("function onStart() error('broken start') end");
    luahost(home.path())
        .args(["run", "--queued", "--duration-ms", "2000", "--assets"])
        .arg(app.path())
        .write_stdin("this is not lua\nprint('still running')\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("still running"))
        .stderr(predicate::str::contains("broken start"));
}

#[test]
fn missing_asset_directory_fails() {
    let home = tempfile::tempdir().unwrap();
    luahost(home.path())
        .args(["run", "--assets"])
        .arg(home.path().join("nope"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("asset directory"));
}

#[test]
fn config_prints_effective_settings() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join("luahost.toml"),
        "[channel]\nmode = \"queued\"\nqueue_capacity = 8\n",
    )
    .unwrap();
    luahost(home.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("mode = \"queued\""))
        .stdout(predicate::str::contains("queue_capacity = 8"))
        .stdout(predicate::str::contains("read_buffer_size = 4096"));
}

#[test]
fn invalid_config_is_reported() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("luahost.toml"), "[looper]\nmax_drain_passes = 0\n").unwrap();
    luahost(home.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_drain_passes"));
}
