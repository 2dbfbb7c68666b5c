use crate::command::{Cmd, Runner};
use anyhow::{Context, Result};
use ipnetwork::Ipv4Network;
use log::debug;
use nix::unistd::{getgid, getuid};
use std::{
    env::var_os,
    fs::create_dir_all,
    path::{Path, PathBuf},
};

/// The admin kubeconfig written by kubeadm
pub const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";

pub struct Kubeadm;

impl Kubeadm {
    /// Reset any previous kubeadm installation
    pub fn reset(runner: &dyn Runner) -> Result<()> {
        runner.run(&Cmd::privileged("kubeadm").arg("reset").allow_failure())?;
        Ok(())
    }

    /// Initialize the control plane and return the join command, if any
    pub fn init(
        runner: &dyn Runner,
        pod_cidr: Ipv4Network,
        service_cidr: Ipv4Network,
    ) -> Result<Option<String>> {
        let output = runner
            .run(&Cmd::privileged("kubeadm").args([
                "init".to_owned(),
                format!("--pod-network-cidr={}", pod_cidr),
                format!("--service-cidr={}", service_cidr),
                "--ignore-preflight-errors=all".to_owned(),
            ]))
            .context("Unable to initialize the control plane")?;
        Ok(Self::join_command(&output.stdout))
    }

    /// Extract the join command including its continuation lines
    fn join_command(output: &str) -> Option<String> {
        let mut lines = output
            .lines()
            .map(str::trim)
            .skip_while(|l| !l.starts_with("kubeadm join"));
        let first = lines.next()?;
        let mut command = first.trim_end_matches('\\').trim().to_owned();
        if first.ends_with('\\') {
            for line in lines.by_ref() {
                command.push(' ');
                command.push_str(line.trim_end_matches('\\').trim());
                if !line.ends_with('\\') {
                    break;
                }
            }
        }
        Some(command)
    }

    /// The user kubeconfig location, `$HOME/.kube/config`
    pub fn user_kubeconfig() -> Result<PathBuf> {
        let home = var_os("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".kube").join("config"))
    }

    /// Copy the admin credentials to the kubeconfig owned by the current user
    pub fn load_credentials(runner: &dyn Runner, kubeconfig: &Path) -> Result<()> {
        if let Some(dir) = kubeconfig.parent() {
            create_dir_all(dir)
                .with_context(|| format!("Unable to create '{}'", dir.display()))?;
        }
        debug!("Copying {} to {}", ADMIN_CONF, kubeconfig.display());
        runner.run(&Cmd::privileged("cp").arg(ADMIN_CONF).path(kubeconfig))?;
        runner.run(
            &Cmd::privileged("chown")
                .arg(format!("{}:{}", getuid(), getgid()))
                .path(kubeconfig),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, tests::ScriptedRunner};
    use tempfile::tempdir;

    #[test]
    fn join_command_single_line() {
        let out = "Your Kubernetes master has initialized successfully!\n\n  \
                   kubeadm join --token abc 10.0.0.1:6443 --discovery-token-ca-cert-hash sha256:ff\n";
        assert_eq!(
            Kubeadm::join_command(out).as_deref(),
            Some("kubeadm join --token abc 10.0.0.1:6443 --discovery-token-ca-cert-hash sha256:ff")
        );
    }

    #[test]
    fn join_command_continued() {
        let out = "kubeadm join 10.0.0.1:6443 --token abc \\\n    --discovery-token-ca-cert-hash sha256:ff\nother\n";
        assert_eq!(
            Kubeadm::join_command(out).as_deref(),
            Some("kubeadm join 10.0.0.1:6443 --token abc --discovery-token-ca-cert-hash sha256:ff")
        );
    }

    #[test]
    fn join_command_missing() {
        assert!(Kubeadm::join_command("nothing here").is_none());
    }

    #[test]
    fn init_success() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply("kubeadm init", CommandOutput::ok("kubeadm join 1.2.3.4:6443\n"));
        let join = Kubeadm::init(&runner, "10.1.0.0/16".parse()?, "10.3.3.0/24".parse()?)?;
        assert_eq!(join.as_deref(), Some("kubeadm join 1.2.3.4:6443"));
        assert_eq!(
            runner.executed()[0],
            "sudo kubeadm init --pod-network-cidr=10.1.0.0/16 \
             --service-cidr=10.3.3.0/24 --ignore-preflight-errors=all"
        );
        Ok(())
    }

    #[test]
    fn init_failure() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply("kubeadm init", CommandOutput::failed(1, "preflight"));
        assert!(Kubeadm::init(&runner, "10.1.0.0/16".parse()?, "10.3.3.0/24".parse()?).is_err());
        Ok(())
    }

    #[test]
    fn reset_tolerates_failure() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply("reset", CommandOutput::failed(1, "kubeadm: not found"));
        Kubeadm::reset(&runner)
    }

    #[test]
    fn load_credentials_success() -> Result<()> {
        let d = tempdir()?;
        let kubeconfig = d.path().join(".kube").join("config");
        let runner = ScriptedRunner::default();
        Kubeadm::load_credentials(&runner, &kubeconfig)?;
        assert!(d.path().join(".kube").is_dir());
        assert!(runner.executed()[1].starts_with("sudo chown"));
        Ok(())
    }
}
