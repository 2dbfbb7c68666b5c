use crate::command::{Cmd, Runner};
use anyhow::{Context, Result};
use log::{debug, info};
use std::{
    fs::{self, read_to_string},
    io::ErrorKind,
    net::Ipv4Addr,
    path::Path,
};

/// The kubeadm drop-in of the kubelet systemd unit
pub const KUBELET_DROPIN: &str = "/etc/systemd/system/kubelet.service.d/10-kubeadm.conf";

/// The persistent sysctl configuration
pub const SYSCTL_CONF: &str = "/etc/sysctl.conf";

const DEFAULT_CLUSTER_DNS: &str = "10.96.0.10";

const BRIDGE_SYSCTLS: &[&str] = &[
    "net.bridge.bridge-nf-call-ip6tables=1",
    "net.bridge.bridge-nf-call-iptables=1",
];

pub struct System;

impl System {
    /// Retrieve the local hostname
    pub fn hostname() -> Result<String> {
        let hostname = hostname::get()
            .context("Unable to retrieve hostname")?
            .to_string_lossy()
            .into_owned();
        debug!("Using hostname {}", hostname);
        Ok(hostname)
    }

    /// Retrieve the installed docker version, if any
    pub fn docker_version(runner: &dyn Runner) -> String {
        runner
            .output(&Cmd::new("docker").arg("--version").quiet())
            .ok()
            .filter(|o| o.success())
            .and_then(|o| {
                o.stdout
                    .split_whitespace()
                    .nth(2)
                    .map(|v| v.trim_end_matches(',').to_owned())
            })
            .unwrap_or_else(|| "not installed".into())
    }

    /// Download an URL into a file
    pub fn download(runner: &dyn Runner, url: &str, file: &Path) -> Result<()> {
        debug!("Downloading {} to {}", url, file.display());
        runner
            .run(&Cmd::new("curl").args(["-sSL", "--fail", url, "-o"]).path(file))
            .with_context(|| format!("Unable to download '{}'", url))?;
        Ok(())
    }

    /// Write `content` into the working directory and install it root owned
    /// to the privileged destination
    pub fn install_file(
        runner: &dyn Runner,
        dir: &Path,
        content: impl AsRef<[u8]>,
        dest: &Path,
    ) -> Result<()> {
        let name = dest
            .file_name()
            .with_context(|| format!("Destination '{}' has no file name", dest.display()))?;
        let staged = dir.join(name);
        fs::write(&staged, content)
            .with_context(|| format!("Unable to write '{}'", staged.display()))?;
        runner.run(
            &Cmd::privileged("install")
                .args(["-D", "-m", "0644", "-o", "root", "-g", "root"])
                .path(&staged)
                .path(dest),
        )?;
        Ok(())
    }

    /// Point the kubelet to the cluster DNS and relax its cgroup and swap checks
    pub fn configure_kubelet(
        runner: &dyn Runner,
        dir: &Path,
        dropin: &Path,
        cluster_dns: Ipv4Addr,
        hostname: &str,
    ) -> Result<()> {
        let current = read_to_string(dropin)
            .with_context(|| format!("Unable to read kubelet drop-in '{}'", dropin.display()))?;
        let content = Self::kubelet_dropin(&current, cluster_dns, hostname);
        Self::install_file(runner, dir, &content, dropin)
    }

    fn kubelet_dropin(current: &str, cluster_dns: Ipv4Addr, hostname: &str) -> String {
        let mut content = current.replace(DEFAULT_CLUSTER_DNS, &cluster_dns.to_string());
        if !content.ends_with('\n') {
            content.push('\n');
        }
        for line in [
            "Environment=\"KUBELET_CGROUP_ARGS=--cgroup-driver=systemd\"".to_owned(),
            "Environment=\"KUBELET_EXTRA_ARGS=--fail-swap-on=false\"".to_owned(),
            format!(
                "Environment=\"KUBELET_DOS_ARGS=--runtime-cgroups=/systemd/system.slice \
                 --kubelet-cgroups=/systemd/system.slice --hostname-override={} \
                 --fail-swap-on=false\"",
                hostname
            ),
        ] {
            if !content.contains(&line) {
                content.push_str(&line);
                content.push('\n');
            }
        }
        content
    }

    /// Enable bridged traffic filtering persistently. Returns true if the
    /// configuration had to be changed.
    pub fn enable_bridging(runner: &dyn Runner, dir: &Path, sysctl_conf: &Path) -> Result<bool> {
        let mut content = match fs::read(sysctl_conf) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Unable to read '{}'", sysctl_conf.display()));
            }
        };
        let current = String::from_utf8_lossy(&content);
        let missing: Vec<_> = BRIDGE_SYSCTLS
            .iter()
            .filter(|s| !current.lines().any(|l| l.trim() == **s))
            .collect();
        if missing.is_empty() {
            debug!("Bridging already enabled in {}", sysctl_conf.display());
            return Ok(false);
        }

        // Keep the existing bytes untouched, even if they are not valid UTF-8
        if content.last().is_some_and(|b| *b != b'\n') {
            content.push(b'\n');
        }
        for sysctl in missing {
            info!("Setting {} in {}", sysctl, sysctl_conf.display());
            content.extend_from_slice(sysctl.as_bytes());
            content.push(b'\n');
        }
        Self::install_file(runner, dir, &content, sysctl_conf)?;
        runner.run(&Cmd::privileged("sysctl").arg("-p"))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tests::ScriptedRunner;
    use crate::command::CommandOutput;
    use tempfile::tempdir;

    #[test]
    fn hostname_success() {
        assert!(System::hostname().is_ok());
    }

    #[test]
    fn docker_version_parsed() {
        let runner = ScriptedRunner::default();
        runner.reply("docker", CommandOutput::ok("Docker version 17.12.1-ce, build 7390fc6\n"));
        assert_eq!(System::docker_version(&runner), "17.12.1-ce");
    }

    #[test]
    fn docker_version_missing() {
        let runner = ScriptedRunner::default();
        runner.reply("docker", CommandOutput::failed(127, "not found"));
        assert_eq!(System::docker_version(&runner), "not installed");
    }

    #[test]
    fn kubelet_dropin_rewritten() {
        let current = "Environment=\"KUBELET_DNS_ARGS=--cluster-dns=10.96.0.10\"";
        let content = System::kubelet_dropin(current, Ipv4Addr::new(10, 3, 3, 10), "node");
        assert!(content.contains("--cluster-dns=10.3.3.10"));
        assert!(content.contains("--hostname-override=node"));
        assert_eq!(content.lines().count(), 4);

        // Applying twice does not duplicate lines
        let again = System::kubelet_dropin(&content, Ipv4Addr::new(10, 3, 3, 10), "node");
        assert_eq!(content, again);
    }

    #[test]
    fn configure_kubelet_success() -> Result<()> {
        let d = tempdir()?;
        let work = d.path().join("work");
        fs::create_dir(&work)?;
        let dropin = d.path().join("10-kubeadm.conf");
        fs::write(&dropin, "[Service]\n")?;
        let runner = ScriptedRunner::default();
        System::configure_kubelet(&runner, &work, &dropin, Ipv4Addr::new(10, 3, 3, 10), "node")?;
        assert!(read_to_string(work.join("10-kubeadm.conf"))?.contains("KUBELET_EXTRA_ARGS"));
        assert_eq!(
            runner.executed()[0],
            format!(
                "sudo install -D -m 0644 -o root -g root {} {}",
                work.join("10-kubeadm.conf").display(),
                dropin.display()
            )
        );
        Ok(())
    }

    #[test]
    fn configure_kubelet_missing_dropin() -> Result<()> {
        let d = tempdir()?;
        let runner = ScriptedRunner::default();
        assert!(
            System::configure_kubelet(
                &runner,
                d.path(),
                &d.path().join("missing.conf"),
                Ipv4Addr::new(10, 3, 3, 10),
                "node"
            )
            .is_err()
        );
        Ok(())
    }

    #[test]
    fn enable_bridging_appends_missing() -> Result<()> {
        let d = tempdir()?;
        let work = d.path().join("work");
        fs::create_dir(&work)?;
        let conf = d.path().join("sysctl.conf");
        fs::write(&conf, "net.bridge.bridge-nf-call-iptables=1")?;
        let runner = ScriptedRunner::default();
        assert!(System::enable_bridging(&runner, &work, &conf)?);
        let written = read_to_string(work.join("sysctl.conf"))?;
        assert_eq!(
            written,
            "net.bridge.bridge-nf-call-iptables=1\nnet.bridge.bridge-nf-call-ip6tables=1\n"
        );
        assert_eq!(runner.executed().last().map(String::as_str), Some("sudo sysctl -p"));
        Ok(())
    }

    #[test]
    fn enable_bridging_unchanged() -> Result<()> {
        let d = tempdir()?;
        let conf = d.path().join("sysctl.conf");
        fs::write(&conf, BRIDGE_SYSCTLS.join("\n"))?;
        let runner = ScriptedRunner::default();
        assert!(!System::enable_bridging(&runner, d.path(), &conf)?);
        assert!(runner.executed().is_empty());
        Ok(())
    }

    #[test]
    fn enable_bridging_keeps_non_utf8_content() -> Result<()> {
        let d = tempdir()?;
        let work = d.path().join("work");
        fs::create_dir(&work)?;
        let conf = d.path().join("sysctl.conf");
        fs::write(&conf, b"# caf\xe9 tuning\nvm.swappiness=10")?;
        let runner = ScriptedRunner::default();
        assert!(System::enable_bridging(&runner, &work, &conf)?);
        let written = fs::read(work.join("sysctl.conf"))?;
        assert_eq!(
            written,
            b"# caf\xe9 tuning\nvm.swappiness=10\n\
              net.bridge.bridge-nf-call-ip6tables=1\n\
              net.bridge.bridge-nf-call-iptables=1\n"
                .to_vec()
        );
        Ok(())
    }

    #[test]
    fn enable_bridging_missing_file() -> Result<()> {
        let d = tempdir()?;
        let work = d.path().join("work");
        fs::create_dir(&work)?;
        let runner = ScriptedRunner::default();
        assert!(System::enable_bridging(&runner, &work, &d.path().join("sysctl.conf"))?);
        assert_eq!(
            read_to_string(work.join("sysctl.conf"))?,
            BRIDGE_SYSCTLS.join("\n") + "\n"
        );
        Ok(())
    }

    #[test]
    fn enable_bridging_unreadable() -> Result<()> {
        let d = tempdir()?;
        let work = d.path().join("work");
        fs::create_dir(&work)?;
        let conf = d.path().join("sysctl.conf");
        fs::create_dir(&conf)?;
        let runner = ScriptedRunner::default();
        assert!(System::enable_bridging(&runner, &work, &conf).is_err());
        assert!(runner.executed().is_empty());
        Ok(())
    }
}
