//! Container engine access through the `docker` CLI.

use crate::{network::NetworkTopology, Error};
use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;
use tracing::{debug, warn};

/// Substring docker prints when a container is already gone.
const NO_SUCH_CONTAINER: &str = "No such container";

/// A running (or exited) container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    id: String,
}

impl Container {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First 12 characters of the id, as docker prints it.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// Everything needed to launch one node container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSpec {
    pub image: String,
    pub network: String,
    pub ip: Ipv4Addr,
    pub ports: Vec<u16>,
    pub volumes: Vec<String>,
    pub args: Vec<String>,
    /// Remove the container once it exits.
    pub remove: bool,
}

impl RunSpec {
    /// Arguments for `docker`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-d".to_string()];
        if self.remove {
            args.push("--rm".into());
        }
        args.push("--network".into());
        args.push(self.network.clone());
        args.push("--ip".into());
        args.push(self.ip.to_string());
        for port in &self.ports {
            args.push("-p".into());
            args.push(format!("{port}:{port}/tcp"));
        }
        for volume in &self.volumes {
            args.push("-v".into());
            args.push(volume.clone());
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// Handle to the container engine.
#[derive(Clone, Debug)]
pub struct Docker {
    binary: String,
}

impl Default for Docker {
    fn default() -> Self {
        Self::new()
    }
}

impl Docker {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different executable (for example `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a command and return its trimmed stdout.
    async fn exec<I, S>(&self, args: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let output = Command::new(&self.binary).args(&args).output().await?;
        if !output.status.success() {
            return Err(Error::Docker {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a command on a container, treating a vanished container as success.
    async fn exec_on(&self, verb: &str, container: &Container) -> Result<(), Error> {
        match self.exec([verb, container.id()]).await {
            Ok(_) => Ok(()),
            Err(err) if err.mentions(NO_SUCH_CONTAINER) => {
                debug!(container = container.short_id(), verb, "container already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn network_exists(&self, name: &str) -> Result<bool, Error> {
        let filter = format!("name=^{name}$");
        let output = self
            .exec(["network", "ls", "--filter", filter.as_str(), "--format", "{{.Name}}"])
            .await?;
        Ok(output.lines().any(|line| line.trim() == name))
    }

    pub async fn create_network(&self, topology: &NetworkTopology) -> Result<(), Error> {
        self.exec([
            "network".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            "bridge".to_string(),
            "--subnet".to_string(),
            topology.subnet.to_string(),
            "--ip-range".to_string(),
            topology.ip_range.to_string(),
            "--gateway".to_string(),
            topology.gateway.to_string(),
            topology.name.clone(),
        ])
        .await?;
        Ok(())
    }

    /// Start a detached container.
    pub async fn run(&self, spec: &RunSpec) -> Result<Container, Error> {
        debug!(image = spec.image, args = ?spec.args, "starting container");
        let id = self.exec(spec.to_args()).await?;
        let id = id.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(Error::Docker {
                command: format!("run {}", spec.image),
                stderr: "no container id returned".into(),
            });
        }
        Ok(Container::new(id))
    }

    /// Copy the container's stdout and stderr into `path` until it exits.
    ///
    /// The copy runs in a detached task. Failures are logged and otherwise ignored.
    pub fn drain_logs(&self, container: &Container, path: PathBuf) {
        let binary = self.binary.clone();
        let container = container.clone();
        debug!(container = container.short_id(), path = ?path, "setting up logs");
        tokio::spawn(async move {
            if let Err(err) = drain(&binary, &container, &path).await {
                warn!(container = container.short_id(), ?err, "log drain failed");
            }
        });
    }

    pub async fn stop(&self, container: &Container) -> Result<(), Error> {
        self.exec_on("stop", container).await
    }

    pub async fn kill(&self, container: &Container) -> Result<(), Error> {
        self.exec_on("kill", container).await
    }

    pub async fn remove(&self, container: &Container) -> Result<(), Error> {
        self.exec_on("rm", container).await
    }

    /// Remove a container whether or not it is still running.
    pub async fn force_remove(&self, container: &Container) -> Result<(), Error> {
        match self.exec(["rm", "-f", container.id()]).await {
            Ok(_) => Ok(()),
            Err(err) if err.mentions(NO_SUCH_CONTAINER) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn restart(&self, container: &Container) -> Result<(), Error> {
        self.exec(["restart", container.id()]).await.map(|_| ())
    }

    pub async fn pause(&self, container: &Container) -> Result<(), Error> {
        self.exec(["pause", container.id()]).await.map(|_| ())
    }

    pub async fn unpause(&self, container: &Container) -> Result<(), Error> {
        self.exec(["unpause", container.id()]).await.map(|_| ())
    }

    /// Container state (`running`, `paused`, `exited`, ...) or `None` if it is gone.
    pub async fn status(&self, container: &Container) -> Result<Option<String>, Error> {
        match self
            .exec(["inspect", "--format", "{{.State.Status}}", container.id()])
            .await
        {
            Ok(status) => Ok(Some(status)),
            Err(err) if err.mentions(NO_SUCH_CONTAINER) || err.mentions("No such object") => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Force-remove a container without an async runtime (used from `Drop`).
    pub fn remove_blocking(&self, container: &Container) {
        let result = std::process::Command::new(&self.binary)
            .args(["rm", "-f", container.id()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(err) = result {
            warn!(container = container.short_id(), ?err, "force remove failed");
        }
    }
}

async fn drain(binary: &str, container: &Container, path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let stdout = std::fs::File::create(path)?;
    let stderr = stdout.try_clone()?;
    let status = Command::new(binary)
        .args(["logs", "-f", container.id()])
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .await?;
    debug!(container = container.short_id(), ?status, "log drain finished");
    Ok(())
}
