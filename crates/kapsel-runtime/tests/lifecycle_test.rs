//! End-to-end lifecycle tests that need no privileges.
//!
//! The init process is replaced by an ordinary host process, mounts are
//! recorded, `ip`/`iptables` calls are recorded, and the cgroup hierarchy
//! is a plain directory tree.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};

use kapsel_common::config::{CgroupPolicy, RuntimeConfig};
use kapsel_common::error::{KapselError, Result};
use kapsel_common::types::{ContainerStatus, ResourceConfig};
use kapsel_core::cgroup::Hierarchy;
use kapsel_core::filesystem::mounter::{MountCall, RecordingMounter};
use kapsel_net::command::RecordingRunner;
use kapsel_net::netns::InlineNetns;
use kapsel_net::network::NetworkEngine;
use kapsel_runtime::container::ContainerRecord;
use kapsel_runtime::engine::{Engine, EngineParts, RunOptions, RunOutcome};
use kapsel_runtime::process::{InitProcess, LaunchSpec, Launcher};

/// Starts `program` on the host in place of the namespaced init.
struct HostLauncher {
    program: Vec<&'static str>,
    fail: bool,
    sent: Arc<Mutex<Vec<String>>>,
    specs: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl HostLauncher {
    fn new(program: &[&'static str]) -> Self {
        Self {
            program: program.to_vec(),
            fail: false,
            sent: Arc::default(),
            specs: Arc::default(),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&["true"])
        }
    }
}

impl Launcher for HostLauncher {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn InitProcess>> {
        self.specs.lock().unwrap().push(spec.clone());
        if self.fail {
            return Err(KapselError::syscall("clone", "Operation not permitted"));
        }
        let child = Command::new(self.program[0])
            .args(&self.program[1..])
            .spawn()
            .expect("spawn host process");
        Ok(Box::new(HostProcess {
            child,
            sent: self.sent.clone(),
        }))
    }
}

struct HostProcess {
    child: Child,
    sent: Arc<Mutex<Vec<String>>>,
}

impl InitProcess for HostProcess {
    fn pid(&self) -> i32 {
        i32::try_from(self.child.id()).unwrap()
    }

    fn send_command(&mut self, command: &[String]) -> Result<()> {
        self.sent.lock().unwrap().push(command.join(" "));
        Ok(())
    }

    fn wait(&mut self) -> Result<i32> {
        Ok(self.child.wait().unwrap().code().unwrap_or(-1))
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    engine: Engine,
    mounter: Arc<RecordingMounter>,
    runner: Arc<RecordingRunner>,
    sent: Arc<Mutex<Vec<String>>>,
    specs: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl Fixture {
    fn new(launcher: HostLauncher) -> Self {
        Self::with_runner(launcher, RecordingRunner::new())
    }

    fn with_runner(launcher: HostLauncher, runner: RecordingRunner) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("image/busybox.tar"));

        let mut config = RuntimeConfig::with_root(dir.path());
        config.cgroup_policy = CgroupPolicy::Strict;
        let mounter = Arc::new(RecordingMounter::new());
        let runner = Arc::new(runner);
        let sent = launcher.sent.clone();
        let specs = launcher.specs.clone();
        let parts = EngineParts {
            mounter: mounter.clone(),
            launcher: Arc::new(launcher),
            network: NetworkEngine::with_parts(&config, runner.clone(), Arc::new(InlineNetns)),
            hierarchy: Hierarchy::at(dir.path().join("cgroup")),
        };
        Self {
            engine: Engine::with_parts(config, parts),
            dir,
            mounter,
            runner,
            sent,
            specs,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn cgroup(&self, subsystem: &str, id: &str) -> std::path::PathBuf {
        self.root().join("cgroup").join(subsystem).join("kapsel").join(id)
    }

    fn overlay(&self, id: &str) -> std::path::PathBuf {
        self.root().join("overlay2").join(id)
    }
}

fn write_image(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    let content = b"#!/bin/sh\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "bin/sh", &content[..])
        .unwrap();
    builder.finish().unwrap();
}

fn opts(command: &[&str]) -> RunOptions {
    RunOptions {
        image: "busybox".into(),
        command: command.iter().map(|s| (*s).to_string()).collect(),
        ..RunOptions::default()
    }
}

fn detached_id(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Detached(id) => id.to_string(),
        RunOutcome::Exited { id, .. } => unreachable!("{id} was not detached"),
    }
}

#[test]
fn run_stop_remove() {
    let fx = Fixture::new(HostLauncher::new(&["sleep", "30"]));
    let mut run = opts(&["top", "-b"]);
    run.name = Some("web".into());
    run.resources = ResourceConfig::from_raw("100m", 50, "");
    run.env = vec!["MODE=test".into()];

    let id = detached_id(fx.engine.run(run).unwrap());
    assert_eq!(fx.sent.lock().unwrap().as_slice(), ["top -b"]);
    let spec = fx.specs.lock().unwrap()[0].clone();
    assert_eq!(spec.workdir, fx.overlay(&id).join("merged"));
    assert_eq!(spec.env, ["MODE=test"]);
    assert_eq!(
        spec.log_file.unwrap(),
        fx.root().join(format!("containers/{id}/{id}-json.log"))
    );

    let record = fx.engine.inspect("web").unwrap();
    assert_eq!(record.id.as_str(), id);
    assert_eq!(record.status, ContainerStatus::Running);
    let pid = record.pid().unwrap();
    assert_eq!(
        std::fs::read_to_string(fx.cgroup("memory", &id).join("memory.limit_in_bytes")).unwrap(),
        "100m"
    );
    assert_eq!(
        std::fs::read_to_string(fx.cgroup("cpu", &id).join("cpu.cfs_quota_us")).unwrap(),
        "50000"
    );
    assert_eq!(
        std::fs::read_to_string(fx.cgroup("memory", &id).join("tasks")).unwrap(),
        pid.to_string()
    );
    assert!(fx.overlay(&id).join("lower/bin/sh").exists());

    assert!(matches!(
        fx.engine.remove(&id, false),
        Err(KapselError::InvalidState { .. })
    ));

    let stopped = fx.engine.stop("web").unwrap();
    assert_eq!(stopped.status, ContainerStatus::Stopped);
    assert!(stopped.pid.is_empty());
    assert_eq!(fx.engine.inspect(&id).unwrap(), stopped);
    assert!(fx.engine.stop(&id).is_err());

    fx.engine.remove(&id, false).unwrap();
    assert!(!fx.root().join("containers").join(&id).exists());
    assert!(!fx.overlay(&id).exists());
    assert!(!fx.cgroup("memory", &id).exists());
    assert!(!fx.cgroup("cpu", &id).exists());
    assert!(matches!(
        fx.engine.inspect(&id),
        Err(KapselError::NotFound { .. })
    ));

    let merged = fx.overlay(&id).join("merged");
    assert_eq!(
        fx.mounter.calls().last(),
        Some(&MountCall::Unmount { target: merged })
    );
}

#[test]
fn force_remove_of_running_container() {
    let fx = Fixture::new(HostLauncher::new(&["sleep", "30"]));
    let id = detached_id(fx.engine.run(opts(&["sleep", "30"])).unwrap());
    fx.engine.remove(&id, true).unwrap();
    assert!(fx.engine.list().unwrap().is_empty());
    assert!(!fx.overlay(&id).exists());
}

#[test]
fn interactive_run_cleans_up_after_exit() {
    let fx = Fixture::new(HostLauncher::new(&["sh", "-c", "exit 3"]));
    let mut run = opts(&["sh"]);
    run.interactive = true;
    run.resources = ResourceConfig::from_raw("64m", 0, "");

    let RunOutcome::Exited { id, code } = fx.engine.run(run).unwrap() else {
        unreachable!("interactive run detached");
    };
    assert_eq!(code, 3);
    assert!(fx.specs.lock().unwrap()[0].log_file.is_none());
    assert!(!fx.overlay(id.as_str()).exists());
    assert!(!fx.cgroup("memory", id.as_str()).exists());
    assert!(fx.engine.list().unwrap().is_empty());
}

#[test]
fn failed_spawn_leaves_nothing_behind() {
    let fx = Fixture::new(HostLauncher::failing());
    assert!(fx.engine.run(opts(&["sleep", "1"])).is_err());
    assert!(fx.engine.list().unwrap().is_empty());
    let overlay_entries = std::fs::read_dir(fx.root().join("overlay2")).unwrap().count();
    assert_eq!(overlay_entries, 0);
}

#[test]
fn invalid_arguments_are_rejected_before_any_mount() {
    let fx = Fixture::new(HostLauncher::new(&["true"]));

    let mut bad_volume = opts(&["sh"]);
    bad_volume.volume = Some("relative:/data".into());
    assert!(fx.engine.run(bad_volume).is_err());

    let mut bad_env = opts(&["sh"]);
    bad_env.env = vec!["NOVALUE".into()];
    assert!(fx.engine.run(bad_env).is_err());

    let mut missing_net = opts(&["sh"]);
    missing_net.network = Some("nonet".into());
    assert!(fx.engine.run(missing_net).is_err());

    assert!(fx.engine.run(opts(&[])).is_err());
    assert!(fx.mounter.calls().is_empty());
    assert!(fx.specs.lock().unwrap().is_empty());
}

#[test]
fn missing_image_fails_without_launch() {
    let fx = Fixture::new(HostLauncher::new(&["true"]));
    let mut run = opts(&["sh"]);
    run.image = "alpine".into();
    assert!(matches!(
        fx.engine.run(run),
        Err(KapselError::NotFound { kind: "image", .. })
    ));
    assert!(fx.specs.lock().unwrap().is_empty());
}

#[test]
fn networked_container_gets_address_and_port_rules() {
    let fx = Fixture::new(HostLauncher::new(&["sleep", "30"]));
    fx.engine
        .network()
        .create_network("bridge", "192.168.50.0/24", "testbr")
        .unwrap();

    let mut run = opts(&["sleep", "30"]);
    run.network = Some("testbr".into());
    run.port_mapping = vec!["8080:80".into()];
    let id = detached_id(fx.engine.run(run).unwrap());

    let record = fx.engine.inspect(&id).unwrap();
    assert_eq!(record.ip, "192.168.50.2");
    assert_eq!(record.network_name, "testbr");
    let dnat = "iptables -t nat -A PREROUTING ! -i testbr -p tcp -m tcp --dport 8080 -j DNAT --to-destination 192.168.50.2:80";
    assert!(fx.runner.calls().iter().any(|c| c == dnat));

    fx.engine.remove(&id, true).unwrap();
    let undo = dnat.replace(" -A ", " -D ");
    assert!(fx.runner.calls().iter().any(|c| *c == undo));

    let mut again = opts(&["sleep", "30"]);
    again.network = Some("testbr".into());
    let id = detached_id(fx.engine.run(again).unwrap());
    assert_eq!(fx.engine.inspect(&id).unwrap().ip, "192.168.50.2");
    fx.engine.remove(&id, true).unwrap();
}

#[test]
fn network_failure_after_start_rolls_back() {
    let fx = Fixture::with_runner(
        HostLauncher::new(&["sleep", "30"]),
        RecordingRunner::new().failing_on("ip link add veth", "RTNETLINK answers: File exists"),
    );
    fx.engine
        .network()
        .create_network("bridge", "10.20.0.0/24", "br0")
        .unwrap();

    let mut run = opts(&["sleep", "30"]);
    run.network = Some("br0".into());
    run.resources = ResourceConfig::from_raw("100m", 0, "");
    assert!(fx.engine.run(run).is_err());

    assert!(fx.engine.list().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(fx.root().join("overlay2")).unwrap().count(), 0);
    let groups = fx.root().join("cgroup/memory/kapsel");
    assert_eq!(std::fs::read_dir(groups).unwrap().count(), 0);
    assert!(fx.sent.lock().unwrap().is_empty());
}

#[test]
fn list_marks_dead_containers_exited() {
    let fx = Fixture::new(HostLauncher::new(&["true"]));
    let mut gone = Command::new("true").spawn().unwrap();
    let pid = i32::try_from(gone.id()).unwrap();
    gone.wait().unwrap();

    let record = ContainerRecord::running(
        kapsel_common::types::ContainerId::new("deadbeef00"),
        None,
        pid,
        &["true".into()],
    );
    let path = fx.root().join("containers/deadbeef00");
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("config.json"), serde_json::to_string(&record).unwrap()).unwrap();

    let listed = fx.engine.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, ContainerStatus::Exited);
    assert_eq!(
        fx.engine.inspect("deadbeef00").unwrap().status,
        ContainerStatus::Exited
    );

    assert!(matches!(
        fx.engine.remove("deadbeef00", false),
        Err(KapselError::InvalidState { .. })
    ));
    assert!(path.exists());
    fx.engine.remove("deadbeef00", true).unwrap();
    assert!(!path.exists());
}

#[test]
fn logs_and_commit() {
    let fx = Fixture::new(HostLauncher::new(&["sleep", "30"]));
    let id = detached_id(fx.engine.run(opts(&["sleep", "30"])).unwrap());
    assert_eq!(fx.engine.logs(&id).unwrap(), "");
    std::fs::write(
        fx.root().join(format!("containers/{id}/{id}-json.log")),
        "hello\n",
    )
    .unwrap();
    assert_eq!(fx.engine.logs(&id).unwrap(), "hello\n");

    std::fs::write(fx.overlay(&id).join("merged/marker"), "x").unwrap();
    let archive = fx.engine.commit(&id, "snapshot").unwrap();
    assert_eq!(archive, fx.root().join("image/snapshot.tar"));
    assert!(archive.exists());
    assert!(fx.engine.commit(&id, "bad/name").is_err());

    fx.engine.remove(&id, true).unwrap();
}
