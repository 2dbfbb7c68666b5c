use crate::{
    command::{Cmd, Runner},
    poller::{Condition, Parser, PollTarget},
    system::System,
};
use anyhow::{Context, Result};
use std::{path::Path, time::Duration};

const HELM_BINARY: &str = "/usr/local/bin/helm";
const HELM_URL: &str = "https://storage.googleapis.com/kubernetes-helm";
const FLUENT_BIT_RELEASE: &str = "my-release";
const FLUENT_BIT_CHART: &str = "stable/fluent-bit";

/// Installs helm and its server side component tiller
pub struct Helm<'a> {
    version: &'a str,
}

impl<'a> Helm<'a> {
    /// Create a new helm installer for the provided version
    pub fn new(version: &'a str) -> Self {
        Self { version }
    }

    fn archive(&self) -> String {
        format!("helm-v{}-linux-amd64.tar.gz", self.version)
    }

    /// Download, unpack and install the helm binary
    pub fn install(&self, runner: &dyn Runner, dir: &Path) -> Result<()> {
        let archive = dir.join(self.archive());
        System::download(runner, &format!("{}/{}", HELM_URL, self.archive()), &archive)?;
        runner
            .run(&Cmd::new("tar").arg("-xzf").path(&archive).arg("-C").path(dir))
            .context("Unable to unpack helm")?;
        runner.run(
            &Cmd::privileged("mv")
                .arg("-f")
                .path(&dir.join("linux-amd64").join("helm"))
                .arg(HELM_BINARY),
        )?;
        Ok(())
    }

    /// Deploy tiller into the cluster
    pub fn init(&self, runner: &dyn Runner) -> Result<()> {
        runner
            .run(&Cmd::new("helm").arg("init"))
            .context("Unable to initialize helm")?;
        Ok(())
    }

    /// Client and server both report the requested version
    pub fn version_reported(&self, timeout: Duration) -> Result<PollTarget> {
        Ok(PollTarget::new(
            format!("Helm {}", self.version),
            Cmd::new("helm").arg("version"),
            Parser::matching(self.version)?,
            Condition::Equals(2),
        )
        .every(Duration::from_secs(1))
        .timeout(timeout))
    }

    /// Install the fluent-bit log aggregator chart
    pub fn install_fluent_bit(&self, runner: &dyn Runner) -> Result<()> {
        runner
            .run(
                &Cmd::new("helm")
                    .args(["install", "--name", FLUENT_BIT_RELEASE, FLUENT_BIT_CHART]),
            )
            .context("Unable to install fluent-bit")?;
        Ok(())
    }
}
