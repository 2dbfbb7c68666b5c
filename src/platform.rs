use crate::command::Cmd;
use anyhow::{Context, Result, bail};
use std::{fmt, fs::read_to_string, path::Path};

/// The supported host distributions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// CentOS and other yum based distributions
    Centos,

    /// Ubuntu and other apt based distributions
    Ubuntu,
}

/// How the kubernetes package repository gets configured
pub enum Repository {
    /// Write a yum repo file
    Yum {
        /// Destination of the repo file
        path: &'static str,
        /// Content of the repo file
        content: &'static str,
    },

    /// Import a signing key and write an apt sources list
    Apt {
        /// URL of the signing key
        key_url: &'static str,
        /// Destination of the sources list
        path: &'static str,
        /// Content of the sources list
        content: &'static str,
    },
}

/// Everything which differs between the platforms
pub struct Profile {
    /// The package manager executable
    pub package_manager: &'static str,
    /// Arguments for a non interactive install
    pub install: &'static [&'static str],
    /// Commands to update the whole system
    pub update: &'static [&'static [&'static str]],
    /// Commands to remove unneeded packages after updating
    pub autoremove: &'static [&'static [&'static str]],
    /// Base tooling needed for the deployment
    pub tools: &'static [&'static str],
    /// The docker package
    pub docker: &'static str,
    /// The kubernetes packages
    pub kubernetes: &'static [&'static str],
    /// The NTP package
    pub ntp_package: &'static str,
    /// The NTP systemd service
    pub ntp_service: &'static str,
    /// Commands to turn off the firewall and conflicting services
    pub firewall_off: &'static [&'static [&'static str]],
    /// SELinux needs to be set to permissive
    pub selinux: bool,
    /// The kubernetes package repository
    pub repository: Repository,
}

static CENTOS: Profile = Profile {
    package_manager: "yum",
    install: &["install", "-y"],
    update: &[&["yum", "update", "-y"], &["yum", "upgrade", "-y"]],
    autoremove: &[],
    tools: &[
        "qemu",
        "epel-release",
        "bridge-utils",
        "python-pip",
        "python-devel",
        "libffi-devel",
        "gcc",
        "openssl-devel",
        "sshpass",
        "git",
        "crudini",
        "jq",
        "curl",
        "lvm2",
    ],
    docker: "docker",
    kubernetes: &["ebtables", "kubelet", "kubeadm", "kubectl", "kubernetes-cni"],
    ntp_package: "ntp",
    ntp_service: "ntpd.service",
    firewall_off: &[
        &["systemctl", "stop", "firewalld"],
        &["systemctl", "disable", "firewalld"],
    ],
    selinux: true,
    repository: Repository::Yum {
        path: "/etc/yum.repos.d/kubernetes.repo",
        content: "[kubernetes]
name=Kubernetes
baseurl=http://yum.kubernetes.io/repos/kubernetes-el7-x86_64
enabled=1
gpgcheck=0
repo_gpgcheck=1
gpgkey=https://packages.cloud.google.com/yum/doc/yum-key.gpg
       https://packages.cloud.google.com/yum/doc/rpm-package-key.gpg
",
    },
};

static UBUNTU: Profile = Profile {
    package_manager: "apt-get",
    install: &["install", "-y", "--allow-downgrades"],
    update: &[
        &["apt-get", "update"],
        &[
            "apt-get",
            "dist-upgrade",
            "-y",
            "--allow-downgrades",
            "--no-install-recommends",
        ],
    ],
    autoremove: &[&["apt", "autoremove", "-y"], &["apt", "autoclean"]],
    tools: &[
        "qemu",
        "bridge-utils",
        "python-dev",
        "libffi-dev",
        "gcc",
        "libssl-dev",
        "python-pip",
        "sshpass",
        "apt-transport-https",
        "git",
        "crudini",
        "jq",
        "curl",
        "lvm2",
    ],
    docker: "docker.io",
    kubernetes: &["ebtables", "kubelet", "kubeadm", "kubectl", "kubernetes-cni"],
    ntp_package: "ntp",
    ntp_service: "ntp",
    firewall_off: &[
        &["ufw", "disable"],
        &["systemctl", "stop", "iscsid"],
        &["systemctl", "stop", "iscsid.service"],
    ],
    selinux: false,
    repository: Repository::Apt {
        key_url: "https://packages.cloud.google.com/apt/doc/apt-key.gpg",
        path: "/etc/apt/sources.list.d/kubernetes.list",
        content: "deb http://apt.kubernetes.io/ kubernetes-xenial main\n",
    },
};

impl Platform {
    const OS_RELEASE: &'static str = "/etc/os-release";

    /// Detect the platform of the running host
    pub fn detect() -> Result<Self> {
        Self::from_os_release(Path::new(Self::OS_RELEASE))
    }

    /// Detect the platform from an os-release file
    pub fn from_os_release(path: &Path) -> Result<Self> {
        let content = read_to_string(path)
            .with_context(|| format!("Unable to read '{}'", path.display()))?;
        Self::parse(&content)
    }

    fn parse(os_release: &str) -> Result<Self> {
        let fields = Self::fields(os_release);
        let find = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_lowercase())
                .unwrap_or_default()
        };
        let (id, like, name) = (find("ID"), find("ID_LIKE"), find("NAME"));

        for candidate in [&id, &name, &like] {
            if candidate.contains("centos") || candidate.contains("rhel") {
                return Ok(Platform::Centos);
            }
            if candidate.contains("ubuntu") || candidate.contains("debian") {
                return Ok(Platform::Ubuntu);
            }
        }
        bail!("Linux '{}' is not supported yet", Self::pretty_name(os_release))
    }

    /// Retrieve the human readable distribution name of an os-release file
    pub fn pretty_name(os_release: &str) -> String {
        let fields = Self::fields(os_release);
        ["PRETTY_NAME", "NAME"]
            .iter()
            .find_map(|key| fields.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.to_string())
            .unwrap_or_else(|| "unknown".into())
    }

    fn fields(os_release: &str) -> Vec<(&str, &str)> {
        os_release
            .lines()
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
            .collect()
    }

    /// The capabilities of the platform
    pub fn profile(&self) -> &'static Profile {
        match self {
            Platform::Centos => &CENTOS,
            Platform::Ubuntu => &UBUNTU,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Centos => write!(f, "centos"),
            Platform::Ubuntu => write!(f, "ubuntu"),
        }
    }
}

impl Profile {
    /// The command to install the provided packages
    pub fn install(&self, packages: &[&str]) -> Cmd {
        Cmd::privileged(self.package_manager)
            .args(self.install)
            .args(packages)
    }

    /// The commands to update the whole system
    pub fn update(&self) -> Vec<Cmd> {
        Self::commands(self.update)
    }

    /// The commands to clean up after updating
    pub fn autoremove(&self) -> Vec<Cmd> {
        Self::commands(self.autoremove)
    }

    /// The commands to turn off the firewall
    pub fn firewall_off(&self) -> Vec<Cmd> {
        Self::commands(self.firewall_off)
            .into_iter()
            .map(Cmd::allow_failure)
            .collect()
    }

    /// The commands to enable and start the NTP service
    pub fn ntp(&self) -> Vec<Cmd> {
        let systemctl = |action| Cmd::privileged("systemctl").args([action, self.ntp_service]);
        vec![
            self.install(&[self.ntp_package]),
            systemctl("enable"),
            systemctl("restart"),
        ]
    }

    fn commands(table: &[&[&str]]) -> Vec<Cmd> {
        table
            .iter()
            .filter_map(|c| c.split_first())
            .map(|(program, args)| Cmd::privileged(*program).args(args))
            .collect()
    }
}
