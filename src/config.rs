//! Configuration related structures
use crate::cni::Cni;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use getset::{CopyGetters, Getters};
use ipnetwork::Ipv4Network;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, canonicalize, create_dir_all, read_to_string},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Parser, Deserialize, Getters, CopyGetters, Serialize)]
#[serde(rename_all = "kebab-case")]
#[command(
    after_help = "E.g.: kubeup --cni weave --logs",
    version,
    about = "Bring up a single node Kubernetes cluster on CentOS or Ubuntu"
)]
/// The global configuration
pub struct Config {
    #[get = "pub"]
    #[serde(skip)]
    #[command(subcommand)]
    /// All available subcommands
    subcommand: Option<SubCommand>,

    #[serde(skip)]
    #[arg(long, env = "KUBEUP_CONFIG", value_name = "PATH")]
    /// Load the configuration from a TOML file instead of the command line
    config: Option<PathBuf>,

    #[get = "pub"]
    #[arg(
        default_value = "kubeup-run",
        env = "KUBEUP_ROOT",
        global = true,
        long,
        short,
        value_name = "PATH"
    )]
    /// Path where downloads and generated files are stored
    root: PathBuf,

    #[get_copy = "pub"]
    #[arg(
        default_value = "info",
        env = "KUBEUP_LOG_LEVEL",
        global = true,
        long,
        short,
        value_name = "LEVEL"
    )]
    /// The logging level of the application
    log_level: LevelFilter,

    #[get = "pub"]
    #[arg(
        default_value = "2.8.1",
        env = "KUBEUP_HELM_VERSION",
        long,
        value_name = "VERSION"
    )]
    /// The helm version to be installed
    helm_version: String,

    #[get = "pub"]
    #[arg(
        default_value = "1.10.0",
        env = "KUBEUP_K8S_VERSION",
        long,
        value_name = "VERSION"
    )]
    /// The expected Kubernetes version
    k8s_version: String,

    #[get_copy = "pub"]
    #[arg(default_value = "canal", env = "KUBEUP_CNI", long, value_enum)]
    /// The pod network (CNI) to be deployed
    cni: Cni,

    #[get_copy = "pub"]
    #[arg(env = "KUBEUP_LOGS", long)]
    /// Install the fluent-bit log aggregator
    logs: bool,

    #[get_copy = "pub"]
    #[arg(env = "KUBEUP_DEMO", long, short)]
    /// Explain every step and wait for confirmation
    demo: bool,

    #[get_copy = "pub"]
    #[arg(env = "KUBEUP_FORCE", long, short, requires = "demo")]
    /// Do not wait for confirmation in demo mode
    force: bool,

    #[get_copy = "pub"]
    #[arg(env = "KUBEUP_CLEANUP", long, short)]
    /// Cleanup an existing cluster before creating a new one
    cleanup: bool,

    #[get_copy = "pub"]
    #[arg(
        default_value = "10.1.0.0/16",
        env = "KUBEUP_POD_CIDR",
        long,
        value_name = "CIDR"
    )]
    /// The CIDR used for the pod network
    pod_cidr: Ipv4Network,

    #[get_copy = "pub"]
    #[arg(
        default_value = "10.3.3.0/24",
        env = "KUBEUP_SERVICE_CIDR",
        long,
        value_name = "CIDR"
    )]
    /// The CIDR used for services
    service_cidr: Ipv4Network,

    #[get_copy = "pub"]
    #[arg(
        default_value = "6",
        env = "KUBEUP_SYSTEM_PODS",
        long,
        value_name = "PODS"
    )]
    /// The minimum number of kube-system pods to wait for
    system_pods: u64,

    #[get_copy = "pub"]
    #[arg(
        default_value = "2000",
        env = "KUBEUP_SYSTEM_TIMEOUT",
        long,
        value_name = "SECONDS"
    )]
    /// Seconds to wait for the kube-system pods
    system_timeout: u64,

    #[get_copy = "pub"]
    #[arg(
        default_value = "1000",
        env = "KUBEUP_RUNNING_TIMEOUT",
        long,
        value_name = "SECONDS"
    )]
    /// Seconds to wait for all pods to be running
    running_timeout: u64,

    #[get_copy = "pub"]
    #[arg(
        default_value = "15",
        env = "KUBEUP_BUSY_BACKOFF",
        long,
        value_name = "SECONDS"
    )]
    /// Seconds to back off if the control plane is busy
    busy_backoff: u64,
}

/// Possible subcommands
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize, Subcommand)]
pub enum SubCommand {
    /// Cleanup an existing cluster and exit, rebooting the host is advised
    Cleanup,

    /// Only install the tools, useful to prepare a node joining a cluster
    Minion,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

impl Config {
    const FILENAME: &'static str = "kubeup.toml";

    /// Parse the command line and load the configuration file if requested
    pub fn load() -> Result<Self> {
        let config = Self::default();
        match &config.config {
            Some(file) => {
                let mut loaded = Self::from_file(file)?;
                loaded.subcommand = config.subcommand;
                Ok(loaded)
            }
            None => Ok(config),
        }
    }

    /// Read the configuration from a TOML file
    pub fn from_file(file: &Path) -> Result<Self> {
        toml::from_str(&read_to_string(file).with_context(|| {
            format!(
                "Unable to read expected configuration file '{}'",
                file.display(),
            )
        })?)
        .with_context(|| format!("Unable to load config file '{}'", file.display()))
    }

    /// Make the configs root path absolute
    pub fn canonicalize_root(&mut self) -> Result<()> {
        self.create_root_dir()?;
        self.root =
            canonicalize(self.root()).context("Unable to canonicalize config root directory")?;
        Ok(())
    }

    /// Write the current configuration to the internal set root path
    pub fn to_file(&self) -> Result<()> {
        self.create_root_dir()?;
        fs::write(self.root().join(Self::FILENAME), toml::to_string(&self)?)
            .context("Unable to write configuration to file")?;
        Ok(())
    }

    /// Returns true if the prerequisites should be installed only
    pub fn minion(&self) -> bool {
        self.subcommand == Some(SubCommand::Minion)
    }

    /// Returns true if an existing cluster should only be removed
    pub fn cleanup_only(&self) -> bool {
        self.subcommand == Some(SubCommand::Cleanup)
    }

    /// The kube-system wait budget
    pub fn system_wait(&self) -> Duration {
        Duration::from_secs(self.system_timeout)
    }

    /// The all pods running wait budget
    pub fn running_wait(&self) -> Duration {
        Duration::from_secs(self.running_timeout)
    }

    /// The backoff on a busy control plane
    pub fn busy_wait(&self) -> Duration {
        Duration::from_secs(self.busy_backoff)
    }

    fn create_root_dir(&self) -> Result<()> {
        create_dir_all(self.root()).context("Unable to create root directory")
    }
}
