//! Test fixtures for common firewall scenarios
//!
//! Provides rule specs and host files reused across manager tests

/// Redirect spec in the form the manager inserts it
pub fn hopping_spec(start: u16, end: u16, target: u16) -> String {
    format!(
        "-p udp --dport {}:{} -j REDIRECT --to-ports {}",
        start, end, target
    )
}

/// Common pre-existing PREROUTING rules the manager must leave alone
pub mod unrelated_rules {
    /// Docker's local-address jump
    pub const DOCKER_JUMP: &str = "-m addrtype --dst-type LOCAL -j DOCKER";

    /// TCP redirect on the same range
    pub const TCP_REDIRECT: &str =
        "-p tcp -m tcp --dport 35000:36000 -j REDIRECT --to-ports 443";

    /// Interface-scoped UDP redirect on the same range
    pub const IFACE_REDIRECT: &str =
        "-i eth0 -p udp -m udp --dport 35000:36000 -j REDIRECT --to-ports 443";

    /// UDP redirect of another range to another port
    pub const OTHER_HOPPING: &str = "-p udp -m udp --dport 40000:41000 -j REDIRECT --to-ports 8443";
}

/// os-release contents for the supported distribution families
pub mod os_release {
    pub const DEBIAN_12: &str = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
ID=debian
"#;

    pub const UBUNTU_22: &str = r#"NAME="Ubuntu"
VERSION_ID="22.04"
ID=ubuntu
ID_LIKE=debian
"#;

    pub const ROCKY_9: &str = r#"NAME="Rocky Linux"
ID="rocky"
ID_LIKE="rhel centos fedora"
VERSION_ID="9.3"
"#;

    pub const CENTOS_7: &str = r#"NAME="CentOS Linux"
ID="centos"
ID_LIKE="rhel fedora"
VERSION_ID="7"
"#;

    pub const ALPINE_3: &str = r#"NAME="Alpine Linux"
ID=alpine
VERSION_ID=3.19.1
"#;

    pub const ARCH: &str = r#"NAME="Arch Linux"
ID=arch
"#;
}
