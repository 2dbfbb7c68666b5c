//! # kubeup
//!
//! Bring up a single node Kubernetes cluster on a fresh CentOS or Ubuntu host
#![deny(missing_docs)]

mod cni;
mod command;
mod config;
mod demo;
mod deploy;
mod dns;
mod helm;
mod kubeadm;
mod kubectl;
mod logger;
mod platform;
mod poller;
mod progress;
mod step;
mod system;

pub use cni::Cni;
pub use command::{Cmd, CommandOutput, Runner, SystemRunner};
pub use config::{Config, SubCommand};
pub use platform::Platform;
pub use poller::{
    BUSY_BACKOFF, Condition, NotReady, Parser, Phase, PollState, PollTarget, Poller,
    RETRY_INTERVAL, Sleeper, TIMEOUT, ThreadSleeper,
};
pub use progress::{Progress, ProgressCounter, ProgressSlot, Reporter};

use demo::banner;
use deploy::{Deployment, Paths};
use logger::Logger;
use system::System;

use anyhow::{Context, Result};
use log::{debug, info};
use nix::unistd::getuid;
use std::fs::read_to_string;

const OS_RELEASE: &str = "/etc/os-release";

/// The main entry point for the application
pub struct Kubeup;

impl Kubeup {
    /// Start kubeup by consuming the provided configuration
    pub fn start(mut config: Config) -> Result<()> {
        let slot = ProgressSlot::default();
        Self::prepare_env(&mut config, slot.clone())?;

        let platform = Platform::detect()?;
        let runner = SystemRunner::new(config.demo());
        Self::summary(&config, platform, &runner);
        Self::authenticate(&runner)?;

        let mut progress = Progress::new(0, config.log_level(), slot);
        let poller = Poller::new(config.busy_wait())?;
        let result = Deployment::new(
            &config,
            platform,
            &runner,
            &mut progress,
            poller,
            Paths::host()?,
        )
        .run();
        progress.finish();
        result
    }

    /// Prepare the environment based on the provided config
    fn prepare_env(config: &mut Config, slot: ProgressSlot) -> Result<()> {
        config.canonicalize_root()?;
        config.to_file()?;

        // Setup the logger
        log::set_boxed_logger(Logger::new(config.log_level(), slot))
            .context("Unable to set logger")?;
        debug!("Using root directory {}", config.root().display());
        Ok(())
    }

    /// Print what is about to be deployed
    fn summary(config: &Config, platform: Platform, runner: &dyn Runner) {
        let os = read_to_string(OS_RELEASE)
            .map(|c| Platform::pretty_name(&c))
            .unwrap_or_else(|_| platform.to_string());

        let mut lines = vec![
            format!("Linux OS: {}", os),
            format!("CNI: {}", config.cni()),
            format!("Docker version: {}", System::docker_version(runner)),
            format!("Helm version: {}", config.helm_version()),
            format!("Kubernetes version: {}", config.k8s_version()),
        ];
        for (enabled, option) in [
            (config.logs(), "logs"),
            (config.demo(), "demo"),
            (config.force(), "force"),
            (config.cleanup(), "cleanup"),
            (config.minion(), "minion"),
        ] {
            if enabled {
                lines.push(format!("Option enabled: {}", option));
            }
        }
        println!("{}", banner(&lines.join("\n")));
    }

    /// Cache the sudo credentials before the first privileged command
    fn authenticate(runner: &dyn Runner) -> Result<()> {
        if getuid().is_root() {
            return Ok(());
        }
        info!("Privileged commands need sudo, you may be asked for your password");
        runner
            .run(&Cmd::new("sudo").arg("-v"))
            .context("Unable to authenticate via sudo")?;
        Ok(())
    }
}
