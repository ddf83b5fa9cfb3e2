//! Best-effort saving of the live rule set.
//!
//! A failed save never unwinds a rule change that is already live; it is
//! logged and reported as [`PersistOutcome::Failed`].

use hy2_common::CommandExecutor;
use tracing::{debug, warn};

use crate::commands::build_save_cmd;
use crate::context::NatContext;
use crate::report::PersistOutcome;
use crate::types::AddressFamily;

/// Saves the rules of `family` through the backend configured in `ctx`.
pub async fn persist<E>(executor: &E, ctx: &NatContext, family: AddressFamily) -> PersistOutcome
where
    E: CommandExecutor + ?Sized,
{
    let backend = &ctx.persistence;
    let Some(cmd) = build_save_cmd(backend, family, ctx.controller(family)) else {
        warn!(
            family = %family,
            "No persistence backend configured, rules will not survive a reboot"
        );
        return PersistOutcome::NotConfigured;
    };

    match executor.exec(&cmd).await {
        Ok(result) if result.success() => {
            debug!(family = %family, backend = %backend, "Rules persisted");
            PersistOutcome::Saved
        }
        Ok(result) => {
            let message = format!(
                "'{}' exited with code {}: {}",
                cmd,
                result.exit_code,
                result.combined_output()
            );
            warn!(family = %family, backend = %backend, "Failed to persist rules: {}", message);
            PersistOutcome::Failed { message }
        }
        Err(e) => {
            warn!(family = %family, backend = %backend, "Failed to persist rules: {}", e);
            PersistOutcome::Failed {
                message: e.to_string(),
            }
        }
    }
}
