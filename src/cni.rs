use crate::{command::Runner, kubectl::Kubectl, system::System};
use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

const CANAL_URL: &str = "https://raw.githubusercontent.com/projectcalico/canal/master/k8s-install/1.7";
const WEAVE_URL: &str = "https://cloud.weave.works/k8s/net";

/// The available pod networks
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Cni {
    /// Calico policy with flannel networking
    Canal,

    /// Weave Net
    Weave,
}

impl fmt::Display for Cni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cni::Canal => write!(f, "canal"),
            Cni::Weave => write!(f, "weave"),
        }
    }
}

impl Cni {
    /// The human readable step description
    pub fn description(&self) -> String {
        let name = match self {
            Cni::Canal => "Canal",
            Cni::Weave => "Weave",
        };
        format!("Deploy pod network SDN using {} CNI", name)
    }

    /// Download the manifests into `dir` and deploy them to the cluster
    pub fn deploy(&self, runner: &dyn Runner, kubectl: &Kubectl, dir: &Path) -> Result<()> {
        match self {
            Cni::Canal => {
                for manifest in ["rbac.yaml", "canal.yaml"] {
                    let file = dir.join(manifest);
                    System::download(runner, &format!("{}/{}", CANAL_URL, manifest), &file)?;
                    kubectl
                        .create(runner, &file)
                        .with_context(|| format!("Unable to create Canal {}", manifest))?;
                }
            }
            Cni::Weave => {
                let file = dir.join("weave.yaml");
                System::download(runner, &Self::weave_url(runner, kubectl)?, &file)?;
                kubectl
                    .apply(runner, &file)
                    .context("Unable to apply Weave Net")?;
            }
        }
        Ok(())
    }

    /// Weave selects its manifest by the base64 encoded `kubectl version`
    fn weave_url(runner: &dyn Runner, kubectl: &Kubectl) -> Result<String> {
        let output = runner.run(&kubectl.cmd(&["version"]))?;
        // Weave expects the output as printed, trailing newline included
        let version = STANDARD.encode(&output.stdout);
        debug!("Weave Kubernetes version: {}", version);
        Ok(format!("{}?k8s-version={}", WEAVE_URL, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, tests::ScriptedRunner};

    #[test]
    fn deploy_canal() -> Result<()> {
        let runner = ScriptedRunner::default();
        let kubectl = Kubectl::new(Path::new("admin.conf"));
        Cni::Canal.deploy(&runner, &kubectl, Path::new("/work"))?;
        let executed = runner.executed();
        assert_eq!(executed.len(), 4);
        assert!(executed[0].starts_with("curl"));
        assert!(executed[0].contains("/work/rbac.yaml"));
        assert!(executed[1].ends_with("create -f /work/rbac.yaml"));
        assert!(executed[3].ends_with("create -f /work/canal.yaml"));
        Ok(())
    }

    #[test]
    fn deploy_weave() -> Result<()> {
        let runner = ScriptedRunner::default();
        runner.reply(" version", CommandOutput::ok("Client Version: v1.10.0\n"));
        let kubectl = Kubectl::new(Path::new("admin.conf"));
        Cni::Weave.deploy(&runner, &kubectl, Path::new("/work"))?;
        let executed = runner.executed();
        assert_eq!(executed.len(), 3);
        assert!(executed[1].contains(&format!(
            "k8s-version={} ",
            STANDARD.encode("Client Version: v1.10.0\n")
        )));
        assert!(executed[2].ends_with("apply -f /work/weave.yaml"));
        Ok(())
    }

    #[test]
    fn description() {
        assert_eq!(
            Cni::Weave.description(),
            "Deploy pod network SDN using Weave CNI"
        );
    }
}
