use crate::{command::Runner, kubectl::Kubectl, poller::Parser};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::{fs, path::Path};

const POD_NAME: &str = "dns-test";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pod {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata,
    spec: PodSpec,
}

#[derive(Serialize)]
struct Metadata {
    name: &'static str,
}

#[derive(Serialize)]
struct PodSpec {
    containers: Vec<Container>,
}

#[derive(Serialize)]
struct Container {
    name: &'static str,
    image: &'static str,
    args: Vec<&'static str>,
}

/// Verifies the cluster DNS from inside a pod
pub struct DnsCheck;

impl DnsCheck {
    /// Write the busybox test pod manifest and return its location
    pub fn write_manifest(dir: &Path) -> Result<std::path::PathBuf> {
        let pod = Pod {
            api_version: "v1",
            kind: "Pod",
            metadata: Metadata { name: POD_NAME },
            spec: PodSpec {
                containers: vec![Container {
                    name: "busybox",
                    image: "busybox",
                    args: vec!["sleep", "1000000"],
                }],
            },
        };
        let file = dir.join("busybox.yaml");
        fs::write(&file, serde_yml::to_string(&pod)?)
            .with_context(|| format!("Unable to write '{}'", file.display()))?;
        Ok(file)
    }

    /// Create the test pod, replacing a leftover one
    pub fn create(runner: &dyn Runner, kubectl: &Kubectl, manifest: &Path) -> Result<()> {
        runner.run(
            &kubectl
                .cmd(&["delete", "pod", POD_NAME, "--ignore-not-found"])
                .allow_failure(),
        )?;
        kubectl
            .create(runner, manifest)
            .context("Unable to create DNS test pod")
    }

    /// Resolve `kubernetes` from inside the test pod. Returns true if both the
    /// server and the service address have been reported.
    pub fn lookup(runner: &dyn Runner, kubectl: &Kubectl) -> Result<bool> {
        let output = runner.run(
            &kubectl
                .cmd(&["exec", POD_NAME, "--", "nslookup", "kubernetes"])
                .allow_failure(),
        )?;
        let addresses = Parser::matching("address")?.parse(&output.stdout)?;
        debug!("nslookup reported {} address lines", addresses);
        if addresses != 2 {
            warn!("'nslookup kubernetes' failed, continuing anyway");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, tests::ScriptedRunner};
    use tempfile::tempdir;

    fn kubectl() -> Kubectl {
        Kubectl::new(Path::new("config"))
    }

    #[test]
    fn write_manifest_success() -> Result<()> {
        let d = tempdir()?;
        let file = DnsCheck::write_manifest(d.path())?;
        let content = fs::read_to_string(file)?;
        assert!(content.contains("apiVersion: v1"));
        assert!(content.contains("name: dns-test"));
        assert!(content.contains("image: busybox"));
        Ok(())
    }

    #[test]
    fn write_manifest_failure() {
        assert!(DnsCheck::write_manifest(Path::new("/proc/invalid")).is_err());
    }

    #[test]
    fn lookup_success() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply(
            "nslookup",
            CommandOutput::ok(
                "Server:    10.3.3.10\nAddress 1: 10.3.3.10 kube-dns.kube-system.svc.cluster.local\n\n\
                 Name:      kubernetes\nAddress 1: 10.3.3.1 kubernetes.default.svc.cluster.local\n",
            ),
        );
        assert!(DnsCheck::lookup(&runner, &kubectl())?);
        Ok(())
    }

    #[test]
    fn lookup_failure_is_tolerated() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply("nslookup", CommandOutput::failed(1, "can't resolve"));
        assert!(!DnsCheck::lookup(&runner, &kubectl())?);
        Ok(())
    }

    #[test]
    fn create_replaces_leftover() -> Result<()> {
        let runner = ScriptedRunner::default();
        DnsCheck::create(&runner, &kubectl(), Path::new("busybox.yaml"))?;
        let executed = runner.executed();
        assert!(executed[0].contains("delete pod dns-test"));
        assert!(executed[1].ends_with("create -f busybox.yaml"));
        Ok(())
    }
}
