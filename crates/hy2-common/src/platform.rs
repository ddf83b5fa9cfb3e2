//! Host platform context.
//!
//! Detects the distribution family, package manager, init system and the
//! matching firewall persistence backend. The result is an explicit value
//! handed to the firewall code instead of process-wide state.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Hy2Error, Hy2Result};

/// Locations of the os-release file, in lookup order.
pub const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

/// Default rule dump for [`PersistenceBackend::SaveFile`] (IPv4).
pub const DEFAULT_IPV4_RULES_FILE: &str = "/etc/iptables/iptables.rules";

/// Default rule dump for [`PersistenceBackend::SaveFile`] (IPv6).
pub const DEFAULT_IPV6_RULES_FILE: &str = "/etc/iptables/ip6tables.rules";

static OS_RELEASE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z0-9_]+)=(.*)$").expect("Invalid regex pattern"));

/// Distribution family, as far as firewall tooling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives.
    Debian,
    /// RHEL, CentOS, Fedora, Rocky, Alma, Amazon Linux.
    RedHat,
    /// Alpine Linux.
    Alpine,
    /// Arch Linux and derivatives.
    Arch,
    /// Anything else.
    Unknown,
}

impl OsFamily {
    /// Classifies an os-release `ID` plus its `ID_LIKE` list.
    pub fn from_ids(id: &str, id_like: &str) -> Self {
        std::iter::once(id)
            .chain(id_like.split_whitespace())
            .map(Self::from_single_id)
            .find(|family| *family != OsFamily::Unknown)
            .unwrap_or(OsFamily::Unknown)
    }

    fn from_single_id(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" | "kali" => OsFamily::Debian,
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "amzn" => {
                OsFamily::RedHat
            }
            "alpine" => OsFamily::Alpine,
            "arch" | "manjaro" | "endeavouros" => OsFamily::Arch,
            _ => OsFamily::Unknown,
        }
    }

    /// Returns the family name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Debian => "debian",
            OsFamily::RedHat => "redhat",
            OsFamily::Alpine => "alpine",
            OsFamily::Arch => "arch",
            OsFamily::Unknown => "unknown",
        }
    }
}

/// System package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Apk,
    Pacman,
    Unknown,
}

impl PackageManager {
    /// Returns the package manager binary name.
    pub fn command(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Apk => "apk",
            PackageManager::Pacman => "pacman",
            PackageManager::Unknown => "unknown",
        }
    }

    /// Package that ships the rule persistence helper, if one exists.
    pub fn persistence_package(&self) -> Option<&'static str> {
        match self {
            PackageManager::Apt => Some("iptables-persistent"),
            PackageManager::Dnf | PackageManager::Yum => Some("iptables-services"),
            PackageManager::Apk | PackageManager::Pacman => Some("iptables"),
            PackageManager::Unknown => None,
        }
    }
}

/// Init system driving services on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitSystem {
    Systemd,
    OpenRc,
    Unknown,
}

impl InitSystem {
    /// Returns the init system name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::OpenRc => "openrc",
            InitSystem::Unknown => "unknown",
        }
    }
}

/// How the live rule set is written to disk so it survives a reboot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PersistenceBackend {
    /// `netfilter-persistent save`.
    NetfilterPersistent,
    /// `service iptables save` / `service ip6tables save`.
    ServiceSave,
    /// `/etc/init.d/iptables save` / `/etc/init.d/ip6tables save`.
    InitScript,
    /// `<controller>-save > v4` / `<controller>-save > v6`.
    SaveFile {
        /// IPv4 dump location.
        v4: PathBuf,
        /// IPv6 dump location.
        v6: PathBuf,
    },
    /// Rules are not persisted.
    None,
}

impl PersistenceBackend {
    /// `SaveFile` with the conventional `/etc/iptables` locations.
    pub fn default_save_file() -> Self {
        PersistenceBackend::SaveFile {
            v4: PathBuf::from(DEFAULT_IPV4_RULES_FILE),
            v6: PathBuf::from(DEFAULT_IPV6_RULES_FILE),
        }
    }

    /// Picks the backend conventionally used on a distribution family.
    pub fn for_platform(family: OsFamily, init: InitSystem) -> Self {
        match (family, init) {
            (OsFamily::Debian, _) => PersistenceBackend::NetfilterPersistent,
            (OsFamily::RedHat, _) => PersistenceBackend::ServiceSave,
            (OsFamily::Alpine, _) | (OsFamily::Unknown, InitSystem::OpenRc) => {
                PersistenceBackend::InitScript
            }
            (OsFamily::Arch, _) => Self::default_save_file(),
            (OsFamily::Unknown, _) => PersistenceBackend::None,
        }
    }

    /// Returns the configuration name of the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceBackend::NetfilterPersistent => "netfilter-persistent",
            PersistenceBackend::ServiceSave => "service",
            PersistenceBackend::InitScript => "init-script",
            PersistenceBackend::SaveFile { .. } => "save-file",
            PersistenceBackend::None => "none",
        }
    }
}

impl fmt::Display for PersistenceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PersistenceBackend {
    type Err = Hy2Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netfilter-persistent" => Ok(PersistenceBackend::NetfilterPersistent),
            "service" => Ok(PersistenceBackend::ServiceSave),
            "init-script" => Ok(PersistenceBackend::InitScript),
            "save-file" => Ok(Self::default_save_file()),
            "none" => Ok(PersistenceBackend::None),
            other => Err(Hy2Error::platform(format!(
                "unknown persistence backend '{}'",
                other
            ))),
        }
    }
}

/// Detected host context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Raw os-release `ID` (empty when unknown).
    pub os_id: String,
    /// Raw os-release `VERSION_ID` (empty when unknown).
    pub version_id: String,
    pub os_family: OsFamily,
    pub package_manager: PackageManager,
    pub init_system: InitSystem,
    pub persistence: PersistenceBackend,
}

impl Platform {
    /// Detects the running host.
    ///
    /// A host without any os-release file is reported as `Unknown` rather
    /// than as an error; unreadable files are errors.
    pub fn detect() -> Hy2Result<Self> {
        let init = detect_init_system();
        for path in OS_RELEASE_PATHS {
            match fs::read_to_string(path) {
                Ok(content) => return Ok(Self::from_os_release(&content, init)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Hy2Error::platform(format!("failed to read {}: {}", path, e)))
                }
            }
        }
        tracing::warn!("No os-release file found, platform is unknown");
        Ok(Self::from_os_release("", init))
    }

    /// Builds the context from os-release content and a known init system.
    pub fn from_os_release(content: &str, init_system: InitSystem) -> Self {
        let fields = parse_os_release(content);
        let field = |key: &str| fields.get(key).cloned().unwrap_or_default();

        let os_id = field("ID");
        let version_id = field("VERSION_ID");
        let os_family = OsFamily::from_ids(&os_id, &field("ID_LIKE"));
        let package_manager = package_manager_for(os_family, &os_id, &version_id);
        let persistence = PersistenceBackend::for_platform(os_family, init_system);

        Self {
            os_id,
            version_id,
            os_family,
            package_manager,
            init_system,
            persistence,
        }
    }
}

fn package_manager_for(family: OsFamily, os_id: &str, version_id: &str) -> PackageManager {
    match family {
        OsFamily::Debian => PackageManager::Apt,
        OsFamily::RedHat => {
            let major = version_id
                .split('.')
                .next()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0);
            let uses_dnf = match os_id {
                "fedora" => true,
                "amzn" => major >= 2023,
                _ => major >= 8,
            };
            if uses_dnf {
                PackageManager::Dnf
            } else {
                PackageManager::Yum
            }
        }
        OsFamily::Alpine => PackageManager::Apk,
        OsFamily::Arch => PackageManager::Pacman,
        OsFamily::Unknown => PackageManager::Unknown,
    }
}

/// Parses `KEY=value` lines, stripping one layer of quotes.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| OS_RELEASE_LINE_RE.captures(line.trim()))
        .map(|caps| {
            let value = caps[2].trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (caps[1].to_string(), value.to_string())
        })
        .collect()
}

/// Detects the init system from well-known paths.
pub fn detect_init_system() -> InitSystem {
    if Path::new("/run/systemd/system").exists() {
        return InitSystem::Systemd;
    }
    if Path::new("/sbin/openrc").exists() || Path::new("/run/openrc").exists() {
        return InitSystem::OpenRc;
    }
    match fs::read_to_string("/proc/1/comm") {
        Ok(comm) if comm.trim() == "systemd" => InitSystem::Systemd,
        _ => InitSystem::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = r#"
NAME="Ubuntu"
VERSION_ID="22.04"
ID=ubuntu
ID_LIKE=debian
"#;

    const ROCKY: &str = r#"
NAME="Rocky Linux"
ID="rocky"
ID_LIKE="rhel centos fedora"
VERSION_ID="9.3"
"#;

    const CENTOS7: &str = "ID=\"centos\"\nVERSION_ID=\"7\"\nID_LIKE=\"rhel fedora\"\n";

    #[test]
    fn test_parse_os_release() {
        let fields = parse_os_release(UBUNTU);
        assert_eq!(fields.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(fields.get("NAME").map(String::as_str), Some("Ubuntu"));
        assert_eq!(fields.get("VERSION_ID").map(String::as_str), Some("22.04"));
    }

    #[test]
    fn test_ubuntu_platform() {
        let platform = Platform::from_os_release(UBUNTU, InitSystem::Systemd);
        assert_eq!(platform.os_family, OsFamily::Debian);
        assert_eq!(platform.package_manager, PackageManager::Apt);
        assert_eq!(platform.persistence, PersistenceBackend::NetfilterPersistent);
    }

    #[test]
    fn test_rhel_family_package_manager() {
        let rocky = Platform::from_os_release(ROCKY, InitSystem::Systemd);
        assert_eq!(rocky.os_family, OsFamily::RedHat);
        assert_eq!(rocky.package_manager, PackageManager::Dnf);
        assert_eq!(rocky.persistence, PersistenceBackend::ServiceSave);

        let centos = Platform::from_os_release(CENTOS7, InitSystem::Systemd);
        assert_eq!(centos.package_manager, PackageManager::Yum);
    }

    #[test]
    fn test_alpine_and_arch() {
        let alpine = Platform::from_os_release("ID=alpine\n", InitSystem::OpenRc);
        assert_eq!(alpine.package_manager, PackageManager::Apk);
        assert_eq!(alpine.persistence, PersistenceBackend::InitScript);

        let arch = Platform::from_os_release("ID=arch\n", InitSystem::Systemd);
        assert_eq!(arch.package_manager, PackageManager::Pacman);
        assert_eq!(arch.persistence, PersistenceBackend::default_save_file());
    }

    #[test]
    fn test_unknown_platform() {
        let platform = Platform::from_os_release("", InitSystem::Unknown);
        assert_eq!(platform.os_family, OsFamily::Unknown);
        assert_eq!(platform.persistence, PersistenceBackend::None);

        let openrc = Platform::from_os_release("ID=gentoo\n", InitSystem::OpenRc);
        assert_eq!(openrc.persistence, PersistenceBackend::InitScript);
    }

    #[test]
    fn test_id_like_fallback() {
        assert_eq!(OsFamily::from_ids("linuxmint", ""), OsFamily::Debian);
        assert_eq!(OsFamily::from_ids("zorin", "ubuntu debian"), OsFamily::Debian);
        assert_eq!(OsFamily::from_ids("nobara", "fedora"), OsFamily::RedHat);
    }

    #[test]
    fn test_persistence_backend_from_str() {
        assert_eq!(
            "netfilter-persistent".parse::<PersistenceBackend>().unwrap(),
            PersistenceBackend::NetfilterPersistent
        );
        assert_eq!(
            "None".parse::<PersistenceBackend>().unwrap(),
            PersistenceBackend::None
        );
        assert!("iptables-legacy".parse::<PersistenceBackend>().is_err());
    }

    #[test]
    fn test_persistence_package() {
        assert_eq!(
            PackageManager::Apt.persistence_package(),
            Some("iptables-persistent")
        );
        assert_eq!(PackageManager::Unknown.persistence_package(), None);
    }
}
