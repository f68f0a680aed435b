//! Runtime engine that orchestrates the container lifecycle.
//!
//! Starting a container is one ordered sequence across the overlay
//! workspace, the init process, the cgroup, and the network. Every step
//! after the workspace exists has a matching teardown, run in reverse when
//! a later step fails.

use std::path::PathBuf;
use std::sync::Arc;

use kapsel_common::config::RuntimeConfig;
use kapsel_common::constants::CGROUP_PARENT;
use kapsel_common::error::{KapselError, Result};
use kapsel_common::types::{ContainerId, ContainerStatus, ResourceConfig};
use kapsel_core::cgroup::{CgroupManager, Hierarchy};
use kapsel_core::filesystem::mounter::{Mounter, SystemMounter};
use kapsel_core::filesystem::overlayfs::OverlayManager;
use kapsel_core::filesystem::volume::VolumeSpec;
use kapsel_net::network::{Attachment, NetworkEngine};

use crate::container::ContainerRecord;
use crate::process::{self, LaunchSpec, Launcher, NamespaceLauncher};
use crate::state::ContainerStore;

/// Options for [`Engine::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Image name, resolved to `<image dir>/<image>.tar`.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Optional display name.
    pub name: Option<String>,
    /// Attach stdio and wait for the command instead of detaching.
    pub interactive: bool,
    /// Cgroup limits.
    pub resources: ResourceConfig,
    /// `hostPath:containerPath` volume.
    pub volume: Option<String>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// `hostPort:containerPort` entries, used with a network.
    pub port_mapping: Vec<String>,
}

/// What [`Engine::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container keeps running in the background.
    Detached(ContainerId),
    /// The interactive command finished and the container was cleaned up.
    Exited {
        /// Container that ran.
        id: ContainerId,
        /// Exit code of the command.
        code: i32,
    },
}

/// Kernel-facing parts of the engine, replaceable in tests.
pub struct EngineParts {
    /// Performs overlay and bind mounts.
    pub mounter: Arc<dyn Mounter>,
    /// Starts init processes.
    pub launcher: Arc<dyn Launcher>,
    /// Network engine used for `--net`.
    pub network: NetworkEngine,
    /// Where the cgroup hierarchies live.
    pub hierarchy: Hierarchy,
}

impl std::fmt::Debug for EngineParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineParts")
            .field("network", &self.network)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

/// The runtime engine that coordinates all container operations.
pub struct Engine {
    config: RuntimeConfig,
    store: ContainerStore,
    overlay: OverlayManager,
    launcher: Arc<dyn Launcher>,
    network: NetworkEngine,
    hierarchy: Hierarchy,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("overlay", &self.overlay)
            .field("network", &self.network)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine that talks to the real kernel and tools.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let parts = EngineParts {
            mounter: Arc::new(SystemMounter),
            launcher: Arc::new(NamespaceLauncher),
            network: NetworkEngine::new(&config),
            hierarchy: Hierarchy::system(),
        };
        Self::with_parts(config, parts)
    }

    /// Creates an engine from explicit parts.
    #[must_use]
    pub fn with_parts(config: RuntimeConfig, parts: EngineParts) -> Self {
        Self {
            store: ContainerStore::new(&config),
            overlay: OverlayManager::new(&config, parts.mounter),
            launcher: parts.launcher,
            network: parts.network,
            hierarchy: parts.hierarchy,
            config,
        }
    }

    /// The network engine, for network management commands.
    #[must_use]
    pub const fn network(&self) -> &NetworkEngine {
        &self.network
    }

    /// Creates and starts a container.
    ///
    /// Arguments are validated before anything is created. If a step fails
    /// after the init process started, the process is killed and the
    /// workspace, cgroup, network attachment, and record are removed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid, the image is missing,
    /// or any launch step fails.
    pub fn run(&self, opts: RunOptions) -> Result<RunOutcome> {
        if opts.command.is_empty() {
            return Err(KapselError::config("no command given"));
        }
        let volume = VolumeSpec::parse_optional(opts.volume.as_deref().unwrap_or_default())?;
        process::validate_env(&opts.env)?;
        if let Some(network) = &opts.network {
            let _ = self.network.load_network(network)?;
        }

        let id = ContainerId::generate();
        let layout = self
            .overlay
            .create(id.as_str(), &opts.image, volume.as_ref())?;

        let spec = LaunchSpec {
            workdir: layout.merged(),
            log_file: (!opts.interactive).then(|| self.config.container_log(id.as_str())),
            env: opts.env.clone(),
        };
        let mut child = match self.launcher.spawn(&spec) {
            Ok(child) => child,
            Err(e) => {
                self.remove_workspace(id.as_str(), volume.as_ref());
                self.remove_record(id.as_str());
                return Err(e);
            }
        };
        let pid = child.pid();

        let cgroup = self.cgroup_for(&id, opts.resources.clone());
        let mut record =
            ContainerRecord::running(id.clone(), opts.name.as_deref(), pid, &opts.command);
        record.volume = opts.volume.clone().unwrap_or_default();
        record.port_mapping.clone_from(&opts.port_mapping);

        let started = self
            .attach(&cgroup, &mut record, pid, opts.network.as_deref())
            .and_then(|()| self.store.save(&record))
            .and_then(|()| child.send_command(&opts.command));
        if let Err(e) = started {
            tracing::error!(id = %id, error = %e, "container start failed, cleaning up");
            child.kill();
            self.teardown(&record, &cgroup, volume.as_ref());
            return Err(e);
        }
        tracing::info!(id = %id, pid, name = %record.name, "container started");

        if !opts.interactive {
            return Ok(RunOutcome::Detached(id));
        }

        let waited = child.wait();
        self.teardown(&record, &cgroup, volume.as_ref());
        let code = waited?;
        tracing::info!(id = %id, code, "container exited");
        Ok(RunOutcome::Exited { id, code })
    }

    fn attach(
        &self,
        cgroup: &CgroupManager,
        record: &mut ContainerRecord,
        pid: i32,
        network: Option<&str>,
    ) -> Result<()> {
        let task = u32::try_from(pid).map_err(|e| KapselError::syscall("clone", e))?;
        cgroup.set()?;
        cgroup.apply(task)?;

        if let Some(network) = network {
            let ip = self.network.connect(
                network,
                Attachment {
                    container_id: record.id.as_str(),
                    pid,
                    port_mapping: &record.port_mapping,
                },
            )?;
            record.network_name = network.to_string();
            record.ip = ip.to_string();
        }
        Ok(())
    }

    /// Sends SIGTERM to a running container and marks it stopped. Does not
    /// wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, is not running, or
    /// cannot be signalled.
    pub fn stop(&self, id_or_name: &str) -> Result<ContainerRecord> {
        let mut record = self.store.resolve(id_or_name)?;
        if record.status != ContainerStatus::Running {
            return Err(invalid_state(&record, "only running containers can be stopped"));
        }
        if let Some(pid) = record.pid() {
            process::terminate(pid)?;
        }
        record.mark_stopped();
        self.store.save(&record)?;
        tracing::info!(id = %record.id, "container stopped");
        Ok(record)
    }

    /// Removes a container: cgroup, network attachment, workspace, and
    /// record.
    ///
    /// A stopped container is removed directly. A running container is only
    /// removed with `force`, which stops it first. An exited container also
    /// needs `force`; its process is already gone so nothing is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::InvalidState`] for a running or exited
    /// container without `force`, or an error if the workspace or record
    /// cannot be removed.
    pub fn remove(&self, id_or_name: &str, force: bool) -> Result<()> {
        let record = self.store.resolve(id_or_name)?;
        match record.status {
            ContainerStatus::Running if !force => {
                return Err(invalid_state(&record, "stop it first or remove with force"));
            }
            ContainerStatus::Running => {
                let _ = self.stop(record.id.as_str())?;
                return self.remove(record.id.as_str(), false);
            }
            ContainerStatus::Exited if !force => {
                return Err(invalid_state(&record, "remove it with force"));
            }
            ContainerStatus::Stopped | ContainerStatus::Exited => {}
        }

        let volume = match VolumeSpec::parse_optional(&record.volume) {
            Ok(volume) => volume,
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "ignoring unreadable volume spec");
                None
            }
        };
        self.disconnect(&record);
        self.cgroup_for(&record.id, ResourceConfig::default()).destroy();
        self.overlay.delete(record.id.as_str(), volume.as_ref())?;
        self.store.delete(record.id.as_str())?;
        tracing::info!(id = %record.id, "container removed");
        Ok(())
    }

    /// Lists containers. Running records whose process is gone are marked
    /// exited first.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut records = self.store.list()?;
        for record in &mut records {
            self.refresh(record);
        }
        Ok(records)
    }

    fn refresh(&self, record: &mut ContainerRecord) {
        if record.status != ContainerStatus::Running {
            return;
        }
        if record.pid().is_some_and(process::is_alive) {
            return;
        }
        record.pid.clear();
        record.status = ContainerStatus::Exited;
        if let Err(e) = self.store.save(record) {
            tracing::warn!(id = %record.id, error = %e, "failed to record exit");
        }
    }

    /// Loads one container record by id or name.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::NotFound`] if there is no such container.
    pub fn inspect(&self, id_or_name: &str) -> Result<ContainerRecord> {
        self.store.resolve(id_or_name)
    }

    /// Returns the log output of a detached container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist or the log cannot
    /// be read.
    pub fn logs(&self, id_or_name: &str) -> Result<String> {
        let record = self.store.resolve(id_or_name)?;
        crate::logs::read_logs(&self.config.container_log(record.id.as_str()))
    }

    /// Packs a container's merged root into `<image dir>/<image>.tar`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container or its root does not exist, the
    /// image name is invalid, or the archive cannot be written.
    pub fn commit(&self, id_or_name: &str, image: &str) -> Result<PathBuf> {
        if image.is_empty() || image.contains('/') {
            return Err(KapselError::config(format!("invalid image name `{image}`")));
        }
        let record = self.store.resolve(id_or_name)?;
        let merged = self.overlay.layout(record.id.as_str()).merged();
        let archive = self.config.image_archive(image);
        kapsel_image::commit::commit(&merged, &archive)?;
        tracing::info!(id = %record.id, image, "container committed");
        Ok(archive)
    }

    /// Runs `command` inside a running container and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not running or the command
    /// cannot be started.
    pub fn exec(&self, id_or_name: &str, command: &[String]) -> Result<i32> {
        let record = self.store.resolve(id_or_name)?;
        let pid = record
            .pid()
            .filter(|_| record.status == ContainerStatus::Running)
            .ok_or_else(|| invalid_state(&record, "exec needs a running container"))?;
        crate::exec::exec_in_container(pid, command)
    }

    fn cgroup_for(&self, id: &ContainerId, resources: ResourceConfig) -> CgroupManager {
        CgroupManager::new(
            format!("{CGROUP_PARENT}/{id}"),
            resources,
            &self.hierarchy,
            self.config.cgroup_policy,
        )
    }

    fn disconnect(&self, record: &ContainerRecord) {
        let Some(network) = record.network() else {
            return;
        };
        if let Err(e) = self.network.disconnect(
            network,
            record.id.as_str(),
            record.ip_addr(),
            &record.port_mapping,
        ) {
            tracing::warn!(id = %record.id, network, error = %e, "failed to disconnect network");
        }
    }

    fn remove_workspace(&self, id: &str, volume: Option<&VolumeSpec>) {
        if let Err(e) = self.overlay.delete(id, volume) {
            tracing::warn!(id, error = %e, "failed to delete workspace");
        }
    }

    fn remove_record(&self, id: &str) {
        if let Err(e) = self.store.delete(id) {
            tracing::warn!(id, error = %e, "failed to delete container record");
        }
    }

    /// Best-effort reversal of everything `run` set up.
    fn teardown(
        &self,
        record: &ContainerRecord,
        cgroup: &CgroupManager,
        volume: Option<&VolumeSpec>,
    ) {
        self.disconnect(record);
        cgroup.destroy();
        self.remove_workspace(record.id.as_str(), volume);
        self.remove_record(record.id.as_str());
    }
}

fn invalid_state(record: &ContainerRecord, message: &str) -> KapselError {
    KapselError::InvalidState {
        id: record.id.to_string(),
        status: record.status.to_string(),
        message: message.to_string(),
    }
}

