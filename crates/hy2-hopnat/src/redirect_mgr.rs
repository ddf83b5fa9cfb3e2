//! Redirect Manager - idempotent NAT PREROUTING redirect lifecycle
//!
//! Every operation re-queries the kernel through the controller; nothing
//! about the rule set is cached between calls. The only cached facts are
//! controller availability and the IPv6 NAT probe, and only for the
//! lifetime of one manager (one program invocation).

use std::collections::HashMap;

use hy2_common::CommandExecutor;
use tracing::{debug, error, info, warn};

use crate::commands::*;
use crate::context::NatContext;
use crate::error::{HopNatError, HopNatResult};
use crate::listing::parse_listing;
use crate::persistence::persist;
use crate::report::{FamilyOutcome, RedirectReport, RuleChange, SkipReason};
use crate::tables::NAT_UNAVAILABLE_MARKERS;
use crate::types::{AddressFamily, PortRange, RedirectRule};

/// `-C`/`-D` exit status meaning "no matching rule"
const NO_MATCH: i32 = 1;

#[derive(Debug, Clone, Copy)]
enum Ensure {
    Present,
    Absent,
}

/// Redirect Manager
///
/// Installs and removes UDP port-range REDIRECT rules for IPv4 and, when the
/// kernel supports it, IPv6, then persists the result best-effort.
pub struct RedirectMgr<E: CommandExecutor> {
    executor: E,
    ctx: NatContext,

    /// IPv6 NAT probe result for this invocation
    ipv6_nat_supported: Option<bool>,

    /// Controller binary presence per family
    controllers: HashMap<AddressFamily, bool>,
}

impl<E: CommandExecutor> RedirectMgr<E> {
    /// Create a new RedirectMgr instance
    pub fn new(executor: E, ctx: NatContext) -> Self {
        debug!(
            iptables = %ctx.iptables_cmd,
            ip6tables = %ctx.ip6tables_cmd,
            persistence = %ctx.persistence,
            "RedirectMgr initialized"
        );

        Self {
            executor,
            ctx,
            ipv6_nat_supported: None,
            controllers: HashMap::new(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Probe whether the IPv6 NAT table is usable
    ///
    /// Lists the table without touching any rule. The answer is cached for
    /// the lifetime of this manager only.
    pub async fn probe_ipv6_nat_support(&mut self) -> bool {
        if let Some(supported) = self.ipv6_nat_supported {
            return supported;
        }

        let cmd = build_probe_cmd(self.ctx.controller(AddressFamily::Ipv6));
        let supported = match self.executor.exec(&cmd).await {
            Ok(result) => result.success() && !reports_nat_unavailable(&result.combined_output()),
            Err(e) => {
                warn!("IPv6 NAT probe could not run: {}", e);
                false
            }
        };

        if supported {
            debug!("IPv6 NAT table available");
        } else {
            warn!("IPv6 NAT table is not available, IPv6 redirects will be skipped");
        }
        self.ipv6_nat_supported = Some(supported);
        supported
    }

    async fn controller_available(&mut self, family: AddressFamily) -> HopNatResult<bool> {
        if let Some(&available) = self.controllers.get(&family) {
            return Ok(available);
        }
        let controller = self.ctx.controller(family);
        let available = self.executor.command_exists(controller).await?;
        if !available {
            warn!("{} controller '{}' is not installed", family, controller);
        }
        self.controllers.insert(family, available);
        Ok(available)
    }

    /// Returns why `family` must be skipped, if it must
    async fn gate(&mut self, family: AddressFamily) -> HopNatResult<Option<SkipReason>> {
        if family == AddressFamily::Ipv6 && !self.ctx.ipv6_enabled {
            return Ok(Some(SkipReason::Disabled));
        }
        if !self.controller_available(family).await? {
            return Ok(Some(SkipReason::ControllerUnavailable));
        }
        if family == AddressFamily::Ipv6 && !self.probe_ipv6_nat_support().await {
            return Ok(Some(SkipReason::Ipv6NatUnsupported));
        }
        Ok(None)
    }

    /// Query and parse the live PREROUTING chain
    async fn query(&self, family: AddressFamily) -> HopNatResult<Vec<RedirectRule>> {
        let controller = self.ctx.controller(family);
        let cmd = build_list_cmd(controller);
        let result = self.executor.exec(&cmd).await?;

        if result.is_command_not_found() {
            return Err(HopNatError::ControllerUnavailable {
                family,
                command: controller.to_string(),
            });
        }
        if !result.success() {
            return Err(HopNatError::ListFailed {
                family,
                command: cmd,
                exit_code: result.exit_code,
                output: result.combined_output(),
            });
        }

        Ok(parse_listing(&result.stdout, family))
    }

    /// Redirect rules currently installed for `family`
    ///
    /// Only rules with the shape this tool manages are returned.
    pub async fn list(&mut self, family: AddressFamily) -> HopNatResult<Vec<RedirectRule>> {
        match self.gate(family).await? {
            None => self.query(family).await,
            Some(SkipReason::Disabled) => Ok(Vec::new()),
            Some(SkipReason::Ipv6NatUnsupported) => Err(HopNatError::CapabilityUnsupported),
            Some(SkipReason::ControllerUnavailable) => Err(HopNatError::ControllerUnavailable {
                family,
                command: self.ctx.controller(family).to_string(),
            }),
        }
    }

    /// Install `rule` unless an identical rule is already present
    pub async fn ensure_present(&mut self, rule: &RedirectRule) -> HopNatResult<RuleChange> {
        validate(rule)?;
        if let Some(reason) = self.gate(rule.family).await? {
            return Ok(RuleChange::skipped(reason));
        }

        let installed = match self.query(rule.family).await {
            Ok(rules) => rules,
            Err(HopNatError::ControllerUnavailable { .. }) => {
                return Ok(RuleChange::skipped(SkipReason::ControllerUnavailable))
            }
            Err(e) => return Err(e),
        };

        let outcome = if installed.contains(rule) {
            info!("Redirect {} already present", rule);
            FamilyOutcome::AlreadyPresent
        } else {
            let cmd = build_append_cmd(self.ctx.controller(rule.family), rule);
            let result = self.executor.exec(&cmd).await?;
            if !result.success() {
                return Err(HopNatError::InsertFailed {
                    family: rule.family,
                    command: cmd,
                    exit_code: result.exit_code,
                    output: result.combined_output(),
                });
            }
            info!("Redirect {} installed", rule);
            FamilyOutcome::Inserted
        };

        let persistence = persist(&self.executor, &self.ctx, rule.family).await;
        Ok(RuleChange {
            outcome,
            persistence,
        })
    }

    /// Remove every rule identical to `rule`
    ///
    /// Repeats check-and-delete until the check reports no match, bounded
    /// by `max_delete_iterations` delete attempts. A delete that finds no
    /// matching rule is not an error.
    pub async fn ensure_absent(&mut self, rule: &RedirectRule) -> HopNatResult<RuleChange> {
        validate(rule)?;
        if let Some(reason) = self.gate(rule.family).await? {
            return Ok(RuleChange::skipped(reason));
        }

        let controller = self.ctx.controller(rule.family);
        let check_cmd = build_check_cmd(controller, rule);
        let delete_cmd = build_delete_cmd(controller, rule);
        let max_iterations = self.ctx.max_delete_iterations;
        let mut attempts = 0u32;
        let mut removed = 0u32;

        loop {
            let check = self.executor.exec(&check_cmd).await?;
            if check.is_command_not_found() {
                return Ok(RuleChange::skipped(SkipReason::ControllerUnavailable));
            }
            if check.exit_code == NO_MATCH {
                break;
            }
            if !check.success() {
                return Err(HopNatError::CheckFailed {
                    family: rule.family,
                    command: check_cmd,
                    exit_code: check.exit_code,
                    output: check.combined_output(),
                });
            }

            if attempts >= max_iterations {
                error!("Redirect {} still present after {} deletions", rule, attempts);
                return Err(HopNatError::ConvergenceExceeded {
                    rule: rule.to_string(),
                    iterations: attempts,
                });
            }
            attempts += 1;

            let delete = self.executor.exec(&delete_cmd).await?;
            if delete.exit_code == NO_MATCH {
                // Removed by someone else since the check
                debug!("Redirect {} vanished before delete", rule);
                continue;
            }
            if !delete.success() {
                return Err(HopNatError::DeleteFailed {
                    family: rule.family,
                    command: delete_cmd,
                    exit_code: delete.exit_code,
                    output: delete.combined_output(),
                });
            }
            removed += 1;
        }

        let outcome = if removed == 0 {
            info!("Redirect {} already absent", rule);
            FamilyOutcome::AlreadyAbsent
        } else {
            info!("Redirect {} removed ({} rule(s))", rule, removed);
            FamilyOutcome::Removed { count: removed }
        };

        let persistence = persist(&self.executor, &self.ctx, rule.family).await;
        Ok(RuleChange {
            outcome,
            persistence,
        })
    }

    /// Ensure the redirect `ports -> target_port` exists for each of `families`
    ///
    /// Families are handled independently: a hard failure in one is recorded
    /// in the report and does not stop or undo the others.
    pub async fn apply(
        &mut self,
        ports: PortRange,
        target_port: u16,
        families: &[AddressFamily],
    ) -> HopNatResult<RedirectReport> {
        self.run(Ensure::Present, ports, target_port, families).await
    }

    /// Ensure the redirect `ports -> target_port` is gone for each of `families`
    pub async fn remove(
        &mut self,
        ports: PortRange,
        target_port: u16,
        families: &[AddressFamily],
    ) -> HopNatResult<RedirectReport> {
        self.run(Ensure::Absent, ports, target_port, families).await
    }

    async fn run(
        &mut self,
        op: Ensure,
        ports: PortRange,
        target_port: u16,
        families: &[AddressFamily],
    ) -> HopNatResult<RedirectReport> {
        let mut report = RedirectReport::new();

        for &family in families {
            let rule = RedirectRule::udp(family, ports, target_port)?;
            let result = match op {
                Ensure::Present => self.ensure_present(&rule).await,
                Ensure::Absent => self.ensure_absent(&rule).await,
            };
            if let Err(e) = &result {
                error!(family = %family, "{}", e);
            }
            report.push(family, result);
        }

        Ok(report)
    }
}

fn validate(rule: &RedirectRule) -> HopNatResult<()> {
    if rule.target_port == 0 {
        return Err(HopNatError::invalid_rule("target port must not be 0"));
    }
    Ok(())
}

fn reports_nat_unavailable(output: &str) -> bool {
    let output = output.to_ascii_lowercase();
    NAT_UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
}
