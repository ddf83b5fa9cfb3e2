//! Shell command builders for NAT redirect operations

use hy2_common::shell::{self, NETFILTER_PERSISTENT_CMD, SERVICE_CMD};
use hy2_common::PersistenceBackend;

use crate::tables::{actions, NAT_TABLE, PREROUTING_CHAIN};
use crate::types::{AddressFamily, RedirectRule};

fn chain_cmd(controller: &str, action: &str, spec: &str) -> String {
    format!(
        "{} {} {} {} {} {}",
        shell::shellquote(controller),
        actions::TABLE,
        NAT_TABLE,
        action,
        PREROUTING_CHAIN,
        spec
    )
}

/// Build PREROUTING listing command (save format, one rule per line)
pub fn build_list_cmd(controller: &str) -> String {
    format!(
        "{} {} {} {} {}",
        shell::shellquote(controller),
        actions::TABLE,
        NAT_TABLE,
        actions::LIST_RULES,
        PREROUTING_CHAIN
    )
}

/// Build redirect append command
pub fn build_append_cmd(controller: &str, rule: &RedirectRule) -> String {
    chain_cmd(controller, actions::APPEND, &rule.spec())
}

/// Build redirect existence check command (exit 0 = present)
pub fn build_check_cmd(controller: &str, rule: &RedirectRule) -> String {
    chain_cmd(controller, actions::CHECK, &rule.spec())
}

/// Build redirect delete command (removes the first exact match)
pub fn build_delete_cmd(controller: &str, rule: &RedirectRule) -> String {
    chain_cmd(controller, actions::DELETE, &rule.spec())
}

/// Build the non-mutating NAT table probe
pub fn build_probe_cmd(controller: &str) -> String {
    format!(
        "{} {} {} {} {}",
        shell::shellquote(controller),
        actions::TABLE,
        NAT_TABLE,
        actions::LIST,
        actions::NUMERIC
    )
}

/// Build the persistence command for one family
///
/// The save-file backend dumps through the `-save` companion of
/// `controller`. Returns `None` when the backend does not persist anything.
pub fn build_save_cmd(
    backend: &PersistenceBackend,
    family: AddressFamily,
    controller: &str,
) -> Option<String> {
    let service = match family {
        AddressFamily::Ipv4 => "iptables",
        AddressFamily::Ipv6 => "ip6tables",
    };

    match backend {
        PersistenceBackend::NetfilterPersistent => {
            Some(format!("{} save", NETFILTER_PERSISTENT_CMD))
        }
        PersistenceBackend::ServiceSave => Some(format!("{} {} save", SERVICE_CMD, service)),
        PersistenceBackend::InitScript => {
            Some(format!("{}/{} save", shell::INIT_D_DIR, service))
        }
        PersistenceBackend::SaveFile { v4, v6 } => {
            let path = match family {
                AddressFamily::Ipv4 => v4,
                AddressFamily::Ipv6 => v6,
            };
            let save_cmd = shell::shellquote(&format!("{}-save", controller));
            let path = path.to_string_lossy();
            let dir = path.rsplit_once('/').map(|(d, _)| d).filter(|d| !d.is_empty());
            Some(match dir {
                Some(dir) => format!(
                    "mkdir -p {} && {} > {}",
                    shell::shellquote(dir),
                    save_cmd,
                    shell::shellquote(&path)
                ),
                None => format!("{} > {}", save_cmd, shell::shellquote(&path)),
            })
        }
        PersistenceBackend::None => None,
    }
}
