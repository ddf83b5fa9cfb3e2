//! Stateful fake of the packet-filter command surface
//!
//! [`FakeNetfilter`] implements [`CommandExecutor`] and interprets the
//! command strings the redirect manager builds: `command -v`, the
//! `-t nat -S/-A/-C/-D PREROUTING` rule operations, the `-t nat -L -n`
//! probe, and the persistence helpers. It keeps a per-family PREROUTING
//! chain so tests can assert on final state, and records every command.
//!
//! Listings are rendered the way the kernel tools print them (implicit
//! `-m udp`, `N` for a one-port `N:N` range), not in the form the rules
//! were inserted with.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use hy2_common::shell::EXIT_COMMAND_NOT_FOUND;
use hy2_common::{CommandExecutor, ExecResult, Hy2Result};

const BAD_RULE: &str = "iptables: Bad rule (does a matching rule exist in that chain?).";
const PERMISSION_DENIED: &str = "iptables: Permission denied (you must be root).";
const NO_CHAIN: &str = "iptables: No chain/target/match by that name.";
const NAT_UNAVAILABLE: &str = "ip6tables v1.8.7 (legacy): can't initialize ip6tables table `nat': \
Table does not exist (do you need to insmod?)";

/// Address family of a fake controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

#[derive(Debug)]
struct FakeState {
    chains: HashMap<Family, Vec<String>>,
    commands: Vec<String>,
    installed: HashSet<String>,
    ipv6_nat: bool,
    failing_append: HashSet<Family>,
    failing_list: HashSet<Family>,
    failing_check: HashMap<Family, i32>,
    failing_delete: HashSet<Family>,
    racing_delete: HashSet<Family>,
    failing_persistence: bool,
    sticky_delete: bool,
    saves: usize,
}

/// Fake packet-filter executor with an in-memory NAT PREROUTING chain
#[derive(Debug)]
pub struct FakeNetfilter {
    state: Mutex<FakeState>,
}

impl Default for FakeNetfilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNetfilter {
    /// Both controllers and all persistence helpers installed, IPv6 NAT usable
    pub fn new() -> Self {
        let installed = [
            "iptables",
            "ip6tables",
            "iptables-save",
            "ip6tables-save",
            "netfilter-persistent",
            "service",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            state: Mutex::new(FakeState {
                chains: HashMap::new(),
                commands: Vec::new(),
                installed,
                ipv6_nat: true,
                failing_append: HashSet::new(),
                failing_list: HashSet::new(),
                failing_check: HashMap::new(),
                failing_delete: HashSet::new(),
                racing_delete: HashSet::new(),
                failing_persistence: false,
                sticky_delete: false,
                saves: 0,
            }),
        }
    }

    /// Kernel without a usable IPv6 NAT table
    pub fn without_ipv6_nat(self) -> Self {
        self.state().ipv6_nat = false;
        self
    }

    /// Remove a binary from the fake `PATH`
    pub fn without_binary(self, program: &str) -> Self {
        self.state().installed.remove(program);
        self
    }

    /// Add a binary to the fake `PATH`
    pub fn with_binary(self, program: &str) -> Self {
        self.state().installed.insert(program.to_string());
        self
    }

    /// Every append on `family` exits non-zero
    pub fn with_failing_append(self, family: Family) -> Self {
        self.state().failing_append.insert(family);
        self
    }

    /// Every `-S` listing on `family` exits non-zero
    pub fn with_failing_list(self, family: Family) -> Self {
        self.state().failing_list.insert(family);
        self
    }

    /// Every `-C` on `family` exits with `exit_code`
    pub fn with_failing_check(self, family: Family, exit_code: i32) -> Self {
        self.state().failing_check.insert(family, exit_code);
        self
    }

    /// Every `-D` on `family` exits non-zero without touching the chain
    pub fn with_failing_delete(self, family: Family) -> Self {
        self.state().failing_delete.insert(family);
        self
    }

    /// Another writer removes the rule between each `-C` and `-D` on `family`
    pub fn with_racing_delete(self, family: Family) -> Self {
        self.state().racing_delete.insert(family);
        self
    }

    /// Every persistence command exits non-zero
    pub fn with_failing_persistence(self) -> Self {
        self.state().failing_persistence = true;
        self
    }

    /// Deletes report success but leave the rule in place
    pub fn with_sticky_delete(self) -> Self {
        self.state().sticky_delete = true;
        self
    }

    /// Seed the chain with a rule spec (without the `-A PREROUTING` prefix)
    pub fn with_rule(self, family: Family, spec: &str) -> Self {
        self.state()
            .chains
            .entry(family)
            .or_default()
            .push(canonical_spec(spec));
        self
    }

    /// Canonical specs currently installed for `family`, in chain order
    pub fn rules(&self, family: Family) -> Vec<String> {
        self.state()
            .chains
            .get(&family)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of installed rules equal to `spec` after canonicalization
    pub fn rule_count(&self, family: Family, spec: &str) -> usize {
        let wanted = canonical_spec(spec);
        self.rules(family).iter().filter(|r| **r == wanted).count()
    }

    /// Every command received, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of controller commands using `action` (`-A`, `-C`, `-D`, `-S`, `-L`)
    pub fn action_count(&self, action: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|cmd| controller_family(cmd).is_some())
            .filter(|cmd| cmd.split_whitespace().any(|t| t == action))
            .count()
    }

    pub fn insert_count(&self) -> usize {
        self.action_count("-A")
    }

    pub fn delete_count(&self) -> usize {
        self.action_count("-D")
    }

    /// Number of persistence commands that succeeded
    pub fn save_count(&self) -> usize {
        self.state().saves
    }

    /// Forget recorded commands and saves, keeping chain state
    pub fn clear_commands(&self) {
        let mut state = self.state();
        state.commands.clear();
        state.saves = 0;
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake netfilter state poisoned")
    }
}

#[async_trait]
impl CommandExecutor for FakeNetfilter {
    async fn exec(&self, cmd: &str) -> Hy2Result<ExecResult> {
        tracing::debug!(command = %cmd, "Fake netfilter command");
        let mut state = self.state();
        state.commands.push(cmd.to_string());
        Ok(state.handle(cmd))
    }
}

impl FakeState {
    fn handle(&mut self, cmd: &str) -> ExecResult {
        if let Some(rest) = cmd.strip_prefix("command -v ") {
            let program = rest.split_whitespace().next().map(unquote).unwrap_or("");
            return if self.is_installed(program) {
                ExecResult::ok(program)
            } else {
                ExecResult::failed(1, "")
            };
        }

        if is_persistence_cmd(cmd) {
            return self.handle_save(cmd);
        }

        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        let Some(program) = tokens.first().map(|t| unquote(t)) else {
            return ExecResult::failed(2, "empty command");
        };
        if !self.is_installed(program) {
            return not_found(program);
        }
        let Some(family) = controller_family(cmd) else {
            return ExecResult::failed(
                2,
                format!("fake netfilter: unsupported command '{}'", cmd),
            );
        };

        match tokens.get(1..3) {
            Some(["-t", "nat"]) => {}
            _ => return ExecResult::failed(2, "fake netfilter: only the nat table is modelled"),
        }
        if family == Family::V6 && !self.ipv6_nat {
            return ExecResult::failed(3, NAT_UNAVAILABLE);
        }

        let action = tokens.get(3).copied().unwrap_or("");
        if action == "-L" {
            return ExecResult::ok(self.render_table(family));
        }
        if tokens.get(4).copied() != Some("PREROUTING") {
            return ExecResult::failed(1, NO_CHAIN);
        }
        let spec = canonical_spec(&tokens[5..].join(" "));

        match action {
            "-S" => self.handle_list(family),
            "-A" => self.handle_append(family, spec),
            "-C" => {
                if let Some(&exit_code) = self.failing_check.get(&family) {
                    return ExecResult::failed(exit_code, PERMISSION_DENIED);
                }
                if self.chain(family).contains(&spec) {
                    ExecResult::ok("")
                } else {
                    ExecResult::failed(1, BAD_RULE)
                }
            }
            "-D" => self.handle_delete(family, &spec),
            other => ExecResult::failed(
                2,
                format!("fake netfilter: unsupported action '{}'", other),
            ),
        }
    }

    fn is_installed(&self, program: &str) -> bool {
        let name = program.rsplit('/').next().unwrap_or(program);
        self.installed.contains(name)
    }

    fn chain(&mut self, family: Family) -> &mut Vec<String> {
        self.chains.entry(family).or_default()
    }

    fn handle_list(&mut self, family: Family) -> ExecResult {
        if self.failing_list.contains(&family) {
            return ExecResult::failed(4, PERMISSION_DENIED);
        }
        let mut lines = vec!["-P PREROUTING ACCEPT".to_string()];
        lines.extend(
            self.chain(family)
                .iter()
                .map(|spec| format!("-A PREROUTING {}", kernel_spec(spec))),
        );
        ExecResult::ok(lines.join("\n"))
    }

    fn handle_append(&mut self, family: Family, spec: String) -> ExecResult {
        if self.failing_append.contains(&family) {
            return ExecResult::failed(1, NO_CHAIN);
        }
        self.chain(family).push(spec);
        ExecResult::ok("")
    }

    fn handle_delete(&mut self, family: Family, spec: &str) -> ExecResult {
        if self.failing_delete.contains(&family) {
            return ExecResult::failed(4, PERMISSION_DENIED);
        }
        let sticky = self.sticky_delete;
        let racing = self.racing_delete.contains(&family);
        let chain = self.chain(family);
        match chain.iter().position(|r| r == spec) {
            Some(_) if sticky => ExecResult::ok(""),
            Some(index) if racing => {
                chain.remove(index);
                ExecResult::failed(1, BAD_RULE)
            }
            Some(index) => {
                chain.remove(index);
                ExecResult::ok("")
            }
            None => ExecResult::failed(1, BAD_RULE),
        }
    }

    fn handle_save(&mut self, cmd: &str) -> ExecResult {
        let helper = cmd.split_whitespace().next().map(unquote).unwrap_or("");
        let helper = if helper == "mkdir" {
            cmd.split("&&")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .map(unquote)
                .unwrap_or("")
        } else {
            helper
        };
        if !helper.starts_with('/') && !self.is_installed(helper) {
            return not_found(helper);
        }
        if self.failing_persistence {
            return ExecResult::failed(1, format!("{}: failed to save rules", helper));
        }
        self.saves += 1;
        ExecResult::ok("")
    }

    fn render_table(&mut self, family: Family) -> String {
        let rules = self.chain(family).len();
        format!(
            "Chain PREROUTING (policy ACCEPT)\ntarget     prot opt source               destination\n{}",
            "REDIRECT   udp  --  0.0.0.0/0            0.0.0.0/0\n".repeat(rules)
        )
    }
}

fn not_found(program: &str) -> ExecResult {
    ExecResult::failed(
        EXIT_COMMAND_NOT_FOUND,
        format!("sh: 1: {}: not found", program),
    )
}

fn unquote(token: &str) -> &str {
    token.trim_matches('"')
}

fn is_persistence_cmd(cmd: &str) -> bool {
    cmd.ends_with(" save") || cmd.contains("-save\" >")
}

/// Family of a controller command, by program name
fn controller_family(cmd: &str) -> Option<Family> {
    let program = unquote(cmd.split_whitespace().next()?);
    let name = program.rsplit('/').next().unwrap_or(program);
    match name {
        "ip6tables" | "ip6tables-legacy" | "ip6tables-nft" => Some(Family::V6),
        "iptables" | "iptables-legacy" | "iptables-nft" => Some(Family::V4),
        _ => None,
    }
}

/// Drops `-m udp` and collapses `--dport N:N` to `--dport N`
fn canonical_spec(spec: &str) -> String {
    let tokens: Vec<&str> = spec.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        match (tokens[i], tokens.get(i + 1)) {
            ("-m", Some(&"udp")) => {
                i += 2;
                continue;
            }
            ("--dport", Some(value)) => {
                let value = match value.split_once(':') {
                    Some((start, end)) if start == end => start.to_string(),
                    _ => value.to_string(),
                };
                out.push("--dport".to_string());
                out.push(value);
                i += 2;
                continue;
            }
            (token, _) => out.push(token.to_string()),
        }
        i += 1;
    }
    out.join(" ")
}

/// Re-adds the implicit `-m udp` the kernel tools print after `-p udp`
fn kernel_spec(spec: &str) -> String {
    spec.replacen("-p udp", "-p udp -m udp", 1)
}
