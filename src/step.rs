use crate::{Config, platform::Platform};

/// A single unit of a deployment plan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    KubeadmReset,
    DeleteEtc,
    DeleteVar,
    DeleteDownloads,
    RemoveCinder,
    CleanupDocker,
    InstallTools,
    SetupNtp,
    DisableSelinux,
    DisableFirewall,
    InstallKubernetes,
    EnableServices,
    ConfigureKubelet,
    ReloadServices,
    StartKubelet,
    FixIptables,
    KubeadmInit,
    LoadCredentials,
    WaitKubeSystem,
    DeployCni,
    WaitCni,
    UntaintMaster,
    CheckDns,
    DeployHelm,
    InstallLogging,
}

impl Step {
    /// The component the step belongs to
    pub fn component(&self) -> &'static str {
        match self {
            Step::DeployHelm | Step::InstallLogging => "Helm",
            _ => "Kubernetes",
        }
    }

    /// The human readable description
    pub fn description(&self, config: &Config) -> String {
        match self {
            Step::KubeadmReset => "Kubeadm reset".into(),
            Step::DeleteEtc => "Delete /etc files and dirs".into(),
            Step::DeleteVar => "Delete /var files and dirs".into(),
            Step::DeleteDownloads => "Delete downloaded files".into(),
            Step::RemoveCinder => "Remove cinder volumes and data".into(),
            Step::CleanupDocker => "Cleanup docker containers and images".into(),
            Step::InstallTools => "Installing environment".into(),
            Step::SetupNtp => "Setup NTP".into(),
            Step::DisableSelinux => "Turn off SELinux".into(),
            Step::DisableFirewall => "Turn off firewall and ISCSID".into(),
            Step::InstallKubernetes => "Create Kubernetes repo and install Kubernetes".into(),
            Step::EnableServices => "Enable kubelet and docker services".into(),
            Step::ConfigureKubelet => {
                "Start docker and setup the DNS server with the service CIDR".into()
            }
            Step::ReloadServices => "Reload the hand-modified service files".into(),
            Step::StartKubelet => "Enable and start kubelet".into(),
            Step::FixIptables => "Fix iptables to enable bridging".into(),
            Step::KubeadmInit => "Deploying Kubernetes with kubeadm (Slow!)".into(),
            Step::LoadCredentials => "Load kubeadm credentials into the system".into(),
            Step::WaitKubeSystem => format!(
                "Wait for basic Kubernetes ({} pods) infrastructure",
                config.system_pods()
            ),
            Step::DeployCni => config.cni().description(),
            Step::WaitCni => format!("Wait for {} pods to be running", config.cni()),
            Step::UntaintMaster => {
                "Mark master node as schedulable by untainting the node".into()
            }
            Step::CheckDns => "Test 'nslookup kubernetes' - bring up test pod".into(),
            Step::DeployHelm => "Deploy Helm Tiller pod".into(),
            Step::InstallLogging => "Install fluent-bit log aggregator".into(),
        }
    }
}

/// The steps removing an existing cluster
pub fn cleanup_plan(data_exists: bool) -> Vec<Step> {
    let mut plan = vec![
        Step::KubeadmReset,
        Step::DeleteEtc,
        Step::DeleteVar,
        Step::DeleteDownloads,
    ];
    if data_exists {
        plan.push(Step::RemoveCinder);
    }
    plan.push(Step::CleanupDocker);
    plan
}

/// The steps bringing up a cluster, or only preparing a minion
pub fn cluster_plan(config: &Config, platform: Platform) -> Vec<Step> {
    let mut plan = vec![Step::InstallTools, Step::SetupNtp];
    if platform.profile().selinux {
        plan.push(Step::DisableSelinux);
    }
    plan.extend([Step::DisableFirewall, Step::InstallKubernetes]);

    if config.minion() {
        plan.push(Step::EnableServices);
        return plan;
    }

    plan.extend([
        Step::ConfigureKubelet,
        Step::ReloadServices,
        Step::StartKubelet,
        Step::FixIptables,
        Step::KubeadmInit,
        Step::LoadCredentials,
        Step::WaitKubeSystem,
        Step::DeployCni,
        Step::WaitCni,
        Step::UntaintMaster,
        Step::CheckDns,
        Step::DeployHelm,
    ]);
    if config.logs() {
        plan.push(Step::InstallLogging);
    }
    plan
}
