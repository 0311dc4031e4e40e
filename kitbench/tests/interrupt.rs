//! Ctrl+C against the `kitbench` binary while a run is blocked.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;

const KITBENCH: &str = env!("CARGO_BIN_EXE_kitbench");
const STUB_ENGINE: &str = env!("CARGO_BIN_EXE_kitbench-stub-engine");

/// Pids announced by the stub engines under `scratch`, once all `expected` are up.
fn stub_pids(scratch: &Path, expected: usize) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir(scratch) else {
        return Vec::new();
    };
    let pids: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("shore.log")).ok())
        .filter_map(|log| {
            log.lines().find_map(|line| {
                line.strip_prefix("Stub engine started (pid ")?
                    .strip_suffix(')')?
                    .parse()
                    .ok()
            })
        })
        .collect();
    if pids.len() == expected {
        pids
    } else {
        Vec::new()
    }
}

/// True while the process exists and is not a zombie.
fn is_running(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.trim_start().chars().next())
        .is_some_and(|state| state != 'Z' && state != 'X')
}

#[tokio::test]
async fn test_sigint_kills_engines_and_exits() -> Result<(), Box<dyn std::error::Error>> {
    let work = TempDir::new()?;
    let scratch = TempDir::new()?;
    let template = work.path().join("shore.conf.template");
    std::fs::write(&template, "# engine defaults\n")?;
    let config_path: PathBuf = work.path().join("kitbench.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[harness]
output = "{output}"
template = "{template}"
temp_dir = "{scratch}"
port_range = [20000, 60000]
poll_interval_ms = 50

[engine]
path = "{stub}"
args = ["-n", "-p", "{{port}}", "--never-ready"]
pin_affinity = false

[configurations.c]
sf = 1

[runs.stuck]
configuration = "c"
affinity = [[0], [1]]
commands = ["measure 1 1 1 5 1 1"]
"#,
            output = work.path().join("output.log").display(),
            template = template.display(),
            scratch = scratch.path().display(),
            stub = STUB_ENGINE,
        ),
    )?;

    let mut harness = Command::new(KITBENCH)
        .arg("--config")
        .arg(&config_path)
        .current_dir(work.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let harness_pid = harness.id().ok_or("harness exited early")?;

    // Both engines are up and the harness is blocked waiting for the first.
    let mut engines = Vec::new();
    for _ in 0..200 {
        engines = stub_pids(scratch.path(), 2);
        if !engines.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(engines.len(), 2, "engines did not start");
    assert!(engines.iter().all(|&pid| is_running(pid)));

    kill(Pid::from_raw(i32::try_from(harness_pid)?), Signal::SIGINT)?;
    let status = tokio::time::timeout(Duration::from_secs(10), harness.wait()).await??;
    assert_eq!(status.code(), Some(130));

    for pid in engines {
        let mut running = is_running(pid);
        for _ in 0..100 {
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            running = is_running(pid);
        }
        assert!(!running, "engine {pid} survived the interrupt");
    }

    // Nothing was recorded for the interrupted run.
    assert!(!work.path().join("output.log").exists());
    Ok(())
}
