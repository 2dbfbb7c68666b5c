use crate::{
    command::{Cmd, Runner},
    poller::{Condition, Parser, PollTarget},
};
use anyhow::Result;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Builds kubectl invocations against one kubeconfig
pub struct Kubectl {
    kubeconfig: PathBuf,
}

impl Kubectl {
    /// Create a new kubectl wrapper for the provided kubeconfig
    pub fn new(kubeconfig: &Path) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
        }
    }

    /// A generic kubectl command
    pub fn cmd(&self, args: &[&str]) -> Cmd {
        Cmd::new("kubectl")
            .arg("--kubeconfig")
            .path(&self.kubeconfig)
            .args(args)
    }

    /// Run kubectl apply
    pub fn apply(&self, runner: &dyn Runner, file: &Path) -> Result<()> {
        runner.run(&self.cmd(&["apply", "-f"]).path(file))?;
        Ok(())
    }

    /// Run kubectl create
    pub fn create(&self, runner: &dyn Runner, file: &Path) -> Result<()> {
        runner.run(&self.cmd(&["create", "-f"]).path(file))?;
        Ok(())
    }

    /// All pods of every namespace without the table header
    fn all_pods(&self) -> Cmd {
        self.cmd(&["get", "pods", "--no-headers", "--all-namespaces"])
    }

    /// At least `count` pods are present in kube-system
    pub fn kube_system_started(&self, count: u64, timeout: Duration) -> PollTarget {
        PollTarget::new(
            "Kubernetes kube-system pods",
            self.cmd(&["get", "pods", "-n", "kube-system", "--no-headers"]),
            Parser::Rows { header: false },
            Condition::AtLeast(count),
        )
        .every(Duration::from_secs(10))
        .timeout(timeout)
    }

    /// No pod of any namespace is outside the Running state
    pub fn all_running(&self, timeout: Duration) -> Result<PollTarget> {
        Ok(PollTarget::new(
            "Pods not in Running state",
            self.all_pods(),
            Parser::not_matching("Running")?,
            Condition::Zero,
        )
        .timeout(timeout))
    }

    /// At least one pod whose line mentions `workload` exists
    pub fn workload_started(&self, workload: &str, timeout: Duration) -> Result<PollTarget> {
        Ok(PollTarget::new(
            format!("Kubernetes {} pods", workload),
            self.all_pods(),
            Parser::matching(workload)?,
            Condition::AtLeast(1),
        )
        .timeout(timeout))
    }
}
