use crate::{
    Config,
    command::{Cmd, Runner},
    demo::{Demo, banner},
    dns::DnsCheck,
    helm::Helm,
    kubeadm::Kubeadm,
    kubectl::Kubectl,
    platform::{Platform, Repository},
    poller::{PollTarget, Poller, Sleeper},
    progress::Reporter,
    step::{Step, cleanup_plan, cluster_plan},
    system::{KUBELET_DROPIN, SYSCTL_CONF, System},
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::{
    fs::{self, read_dir},
    path::{Path, PathBuf},
};

const SELINUX_CONFIG: &str = "/etc/selinux/config";

const ETC_DIRS: &[&str] = &["/etc/kolla", "/etc/kolla-kubernetes", "/etc/kubernetes"];

const VAR_DIRS: &[&str] = &[
    "/var/lib/kolla",
    "/var/etcd",
    "/var/run/kubernetes",
    "/var/lib/kubelet",
    "/var/run/lock/kubelet.lock",
    "/var/run/lock/api-server.lock",
    "/var/run/lock/etcd.lock",
];

/// Everything written into the working directory during a deployment
const DOWNLOADS: &[&str] = &[
    "rbac.yaml",
    "canal.yaml",
    "weave.yaml",
    "busybox.yaml",
    "apt-key.gpg",
    "linux-amd64",
    "kubernetes.repo",
    "kubernetes.list",
    "sysctl.conf",
    "10-kubeadm.conf",
];

fn is_download(name: &str) -> bool {
    DOWNLOADS.contains(&name)
        || (name.starts_with("helm-v") && name.ends_with("-linux-amd64.tar.gz"))
}

/// System locations touched by a deployment
pub struct Paths {
    /// The kubeconfig of the invoking user
    pub kubeconfig: PathBuf,
    /// The kubeadm drop-in of the kubelet unit
    pub kubelet_dropin: PathBuf,
    /// The persistent sysctl configuration
    pub sysctl_conf: PathBuf,
    /// Left behind cinder volume data
    pub data: PathBuf,
}

impl Paths {
    /// The locations on a regular host
    pub fn host() -> Result<Self> {
        Ok(Self {
            kubeconfig: Kubeadm::user_kubeconfig()?,
            kubelet_dropin: KUBELET_DROPIN.into(),
            sysctl_conf: SYSCTL_CONF.into(),
            data: PathBuf::from("/").join("data"),
        })
    }
}

/// Executes deployment plans step by step
pub struct Deployment<'a, S: Sleeper> {
    config: &'a Config,
    platform: Platform,
    runner: &'a dyn Runner,
    reporter: &'a mut dyn Reporter,
    poller: Poller<S>,
    demo: Demo,
    kubectl: Kubectl,
    paths: Paths,
}

impl<'a, S: Sleeper> Deployment<'a, S> {
    pub fn new(
        config: &'a Config,
        platform: Platform,
        runner: &'a dyn Runner,
        reporter: &'a mut dyn Reporter,
        poller: Poller<S>,
        paths: Paths,
    ) -> Self {
        Self {
            config,
            platform,
            runner,
            reporter,
            poller,
            demo: Demo::new(config.demo(), config.force()),
            kubectl: Kubectl::new(&paths.kubeconfig),
            paths,
        }
    }

    /// Run everything requested by the configuration
    pub fn run(&mut self) -> Result<()> {
        if self.config.cleanup_only() {
            self.cleanup()?;
            info!("Cleanup done. Highly recommend rebooting your host");
            return Ok(());
        }

        if self.config.cleanup() {
            self.cleanup()?;
            info!("Cleanup done. Will attempt to proceed with installation");
        }

        // The kubelet service may come back after a reboot
        Kubeadm::reset(self.runner)?;

        let plan = cluster_plan(self.config, self.platform);
        self.execute_plan(&plan)?;

        if self.config.minion() {
            println!("{}", banner("Kubernetes tools installed, minion ready"));
            return Ok(());
        }

        self.showcase()?;
        info!("Everything is up and running");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        println!(
            "{}",
            banner("Kubernetes - Cleaning up an existing Kubernetes Cluster")
        );
        let plan = cleanup_plan(self.paths.data.exists());
        self.execute_plan(&plan)
    }

    fn execute_plan(&mut self, plan: &[Step]) -> Result<()> {
        self.reporter.reset(plan.len() as u64);
        for step in plan {
            let description = step.description(self.config);
            self.reporter.step(step.component(), &description);
            self.execute(*step)
                .with_context(|| format!("{} - {} failed", step.component(), description))?;
        }
        Ok(())
    }

    fn execute(&mut self, step: Step) -> Result<()> {
        let config = self.config;
        let profile = self.platform.profile();
        let runner = self.runner;

        match step {
            Step::KubeadmReset => Kubeadm::reset(runner)?,
            Step::DeleteEtc => self.remove(ETC_DIRS)?,
            Step::DeleteVar => self.remove(VAR_DIRS)?,
            Step::DeleteDownloads => self.delete_downloads()?,
            Step::RemoveCinder => {
                for cmd in [
                    Cmd::privileged("vgremove").args(["cinder-volumes", "-f"]),
                    Cmd::privileged("losetup").args(["-d", "/dev/loop0"]),
                    Cmd::privileged("rm").arg("-rf").path(&self.paths.data),
                ] {
                    runner.run(&cmd.allow_failure())?;
                }
            }
            Step::CleanupDocker => self.cleanup_docker()?,

            Step::InstallTools => {
                for cmd in profile.update() {
                    runner.run(&cmd)?;
                }
                runner.run(&profile.install(profile.tools))?;
                for cmd in profile.autoremove() {
                    runner.run(&cmd.allow_failure())?;
                }
                runner.run(&Cmd::privileged("swapoff").arg("-a"))?;
                runner.run(&profile.install(&[profile.docker]))?;
            }
            Step::SetupNtp => {
                for cmd in profile.ntp() {
                    runner.run(&cmd)?;
                }
            }
            Step::DisableSelinux => {
                runner.run(&Cmd::privileged("setenforce").arg("0").allow_failure())?;
                runner.run(
                    &Cmd::privileged("sed")
                        .args(["-i", "s/enforcing/permissive/g", SELINUX_CONFIG])
                        .allow_failure(),
                )?;
            }
            Step::DisableFirewall => {
                for cmd in profile.firewall_off() {
                    runner.run(&cmd)?;
                }
            }
            Step::InstallKubernetes => {
                self.create_repository()?;
                self.demo.show(
                    "Installing Kubernetes",
                    &format!(
                        "Installing {} (expected version {})",
                        profile.kubernetes.join(" "),
                        config.k8s_version()
                    ),
                )?;
                runner.run(&profile.install(profile.kubernetes))?;
            }
            Step::EnableServices => {
                for (action, service) in [
                    ("enable", "kubelet.service"),
                    ("enable", "docker.service"),
                    ("start", "docker.service"),
                ] {
                    runner.run(&Cmd::privileged("systemctl").args([action, service]))?;
                }
            }
            Step::ConfigureKubelet => {
                for action in ["enable", "start"] {
                    runner.run(&Cmd::privileged("systemctl").args([action, "docker"]))?;
                }
                let dns = config
                    .service_cidr()
                    .nth(10)
                    .with_context(|| {
                        format!("Service CIDR {} has no DNS address", config.service_cidr())
                    })?;
                debug!("Using cluster DNS {}", dns);
                System::configure_kubelet(
                    runner,
                    config.root(),
                    &self.paths.kubelet_dropin,
                    dns,
                    &System::hostname()?,
                )?;
            }
            Step::ReloadServices => {
                runner.run(&Cmd::privileged("systemctl").arg("daemon-reload"))?;
            }
            Step::StartKubelet => {
                self.demo.show(
                    "Enable and start kubelet",
                    "kubelet is the node agent running the pods of the cluster",
                )?;
                for action in ["enable", "start"] {
                    runner.run(&Cmd::privileged("systemctl").args([action, "kubelet"]))?;
                }
            }
            Step::FixIptables => {
                self.demo.show(
                    "Fix bridging",
                    "Setting net.bridge.bridge-nf-call-iptables=1 in /etc/sysctl.conf",
                )?;
                System::enable_bridging(runner, config.root(), &self.paths.sysctl_conf)?;
            }
            Step::KubeadmInit => {
                self.demo.show(
                    "Initializes your Kubernetes Master",
                    &format!(
                        "kubeadm init --pod-network-cidr={} --service-cidr={}",
                        config.pod_cidr(),
                        config.service_cidr()
                    ),
                )?;
                if let Some(join) =
                    Kubeadm::init(runner, config.pod_cidr(), config.service_cidr())?
                {
                    info!(
                        "You can now join any number of machines by running the following on each node as root:"
                    );
                    info!("  {}", join);
                }
            }
            Step::LoadCredentials => {
                Kubeadm::load_credentials(runner, &self.paths.kubeconfig)?;
                info!("Note \"kubectl get pods --all-namespaces\" should work now");
            }
            Step::WaitKubeSystem => {
                let target = self
                    .kubectl
                    .kube_system_started(config.system_pods(), config.system_wait());
                self.wait(&target)?;
                self.print(&["get", "pods", "-n", "kube-system"]);
            }
            Step::DeployCni => {
                config
                    .cni()
                    .deploy(runner, &self.kubectl, config.root())?;
                self.demo.show(
                    "Wait for CNI to be deployed",
                    "A successfully deployed CNI will result in a valid dns pod",
                )?;
            }
            Step::WaitCni => {
                let cni = config.cni().to_string();
                let started = self.kubectl.workload_started(&cni, config.running_wait())?;
                self.wait(&started)?;
                self.wait_running()?;
            }
            Step::UntaintMaster => {
                self.demo.show(
                    "Running on the master is different though",
                    "There is a special taint on our node telling Kubernetes not to\n\
                     schedule containers on our master node.",
                )?;
                runner.run(
                    &self
                        .kubectl
                        .cmd(&[
                            "taint",
                            "nodes",
                            "--all",
                            "node-role.kubernetes.io/master:NoSchedule-",
                        ])
                        .allow_failure(),
                )?;
            }
            Step::CheckDns => {
                let manifest = DnsCheck::write_manifest(config.root())?;
                DnsCheck::create(runner, &self.kubectl, &manifest)?;
                self.wait_running()?;
                if DnsCheck::lookup(runner, &self.kubectl)? {
                    println!("{}", banner("Kubernetes Cluster is up and running"));
                }
            }
            Step::DeployHelm => {
                let helm = Helm::new(config.helm_version());
                self.demo.show(
                    "Download the version of helm requested and install it",
                    "Installing means the Tiller Server will be instantiated in a pod",
                )?;
                helm.install(runner, config.root())?;
                helm.init(runner)?;
                let tiller = self
                    .kubectl
                    .workload_started("tiller", config.running_wait())?;
                self.wait(&tiller)?;
                self.wait_running()?;
                self.wait(&helm.version_reported(config.running_wait())?)?;
                self.reporter.status("*Helm successfully installed*");
            }
            Step::InstallLogging => {
                Helm::new(config.helm_version()).install_fluent_bit(runner)?;
                self.wait_running()?;
            }
        }
        Ok(())
    }

    fn wait(&mut self, target: &PollTarget) -> Result<()> {
        self.poller.wait(target, self.runner, &mut *self.reporter)?;
        Ok(())
    }

    fn wait_running(&mut self) -> Result<()> {
        self.reporter
            .status("Wait for all pods to be in Running state:");
        let target = self.kubectl.all_running(self.config.running_wait())?;
        self.wait(&target)
    }

    fn create_repository(&self) -> Result<()> {
        let dir = self.config.root();
        match self.platform.profile().repository {
            Repository::Yum { path, content } => {
                System::install_file(self.runner, dir, content, Path::new(path))?;
            }
            Repository::Apt {
                key_url,
                path,
                content,
            } => {
                let key = dir.join("apt-key.gpg");
                System::download(self.runner, key_url, &key)?;
                self.runner
                    .run(&Cmd::privileged("apt-key").arg("add").path(&key))?;
                System::install_file(self.runner, dir, content, Path::new(path))?;
                self.runner.run(&Cmd::privileged("apt-get").arg("update"))?;
            }
        }
        Ok(())
    }

    fn remove(&self, paths: &[&str]) -> Result<()> {
        self.runner
            .run(&Cmd::privileged("rm").arg("-rf").args(paths).allow_failure())?;
        Ok(())
    }

    /// Remove the files kubeup downloaded or staged in the working directory
    fn delete_downloads(&self) -> Result<()> {
        let root = self.config.root();
        if !root.exists() {
            return Ok(());
        }
        for entry in read_dir(root)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_download(name) {
                continue;
            }
            debug!("Removing {}", path.display());
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.with_context(|| format!("Unable to remove '{}'", path.display()))?;
        }
        Ok(())
    }

    fn cleanup_docker(&self) -> Result<()> {
        let lists: [(&[&str], &[&str]); 5] = [
            (&["ps", "-q", "-f", "status=exited"], &["rm"]),
            (&["images", "-q", "-f", "dangling=true"], &["rmi"]),
            (&["volume", "ls", "-q", "-f", "dangling=true"], &["volume", "rm", "-f"]),
            (&["images", "-a", "-q"], &["rmi", "-f"]),
            (&["container", "ls", "-a", "-q"], &["container", "stop"]),
        ];
        for (list, action) in lists {
            let output = self
                .runner
                .run(&Cmd::privileged("docker").args(list).allow_failure())?;
            let ids: Vec<_> = output.stdout.split_whitespace().collect();
            if ids.is_empty() {
                continue;
            }
            self.runner.run(
                &Cmd::privileged("docker")
                    .args(action)
                    .args(ids)
                    .allow_failure(),
            )?;
        }
        self.runner.run(
            &Cmd::privileged("docker")
                .args(["system", "prune", "-a", "-f"])
                .allow_failure(),
        )?;
        Ok(())
    }

    /// Print the output of an informational kubectl command in demo mode
    fn print(&self, args: &[&str]) {
        if !self.demo.enabled() {
            return;
        }
        match self.runner.run(&self.kubectl.cmd(args).quiet()) {
            Ok(output) => self.demo.print(&output.stdout),
            Err(e) => warn!("{:#}", e),
        }
    }

    /// Walk through the running cluster in demo mode
    fn showcase(&self) -> Result<()> {
        if !self.demo.enabled() {
            return Ok(());
        }
        let walkthrough: [(&str, &[&str]); 8] = [
            ("Determine IP and port information from Service:", &["get", "svc", "-n", "kube-system"]),
            ("View all k8s namespaces:", &["get", "namespaces"]),
            ("View all deployed services:", &["get", "deployment", "-n", "kube-system"]),
            ("View configuration maps:", &["get", "configmap", "-n", "kube-system"]),
            ("General Cluster information:", &["cluster-info"]),
            ("View all jobs:", &["get", "jobs", "--all-namespaces"]),
            ("View all deployments:", &["get", "deployments", "--all-namespaces"]),
            ("View secrets:", &["get", "secrets"]),
        ];
        for (title, args) in walkthrough {
            self.demo.show("Test CLI:", title)?;
            self.print(args);
        }

        self.demo.show("Test CLI:", "View deployed Helm Charts")?;
        match self.runner.run(&Cmd::new("helm").arg("list").quiet()) {
            Ok(output) => self.demo.print(&output.stdout),
            Err(e) => warn!("{:#}", e),
        }
        self.demo.show(
            "Test CLI:",
            "Working cluster kill a pod and watch resilience.\nkubectl delete pods <name>",
        )
    }
}
