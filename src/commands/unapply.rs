//! Unapply command implementation.
use std::sync::Arc;

use anyhow::Result;

use crate::cli::{GlobalOpts, UnapplyOpts};
use crate::engine::Reconciler;
use crate::logging::Logger;
use crate::policy::{PolicyObject, RemovedPolicy};

/// Run the unapply command: remove everything recorded for the given guids.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the State Store
/// cannot be read or written, or any attribute failed to unapply.
pub fn run(global: &GlobalOpts, opts: &UnapplyOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let mut store = setup.open_store()?;
    let ctx = setup.context(global, log);

    let removed = removed_policies(&opts.guids);
    let report = Reconciler::new(&ctx, &mut store).reconcile(&removed, &[])?;

    super::finish(&report, log)
}

/// Treat each guid as a removed policy object known only by its identity.
fn removed_policies(guids: &[String]) -> Vec<RemovedPolicy> {
    guids
        .iter()
        .map(|guid| RemovedPolicy::new(PolicyObject::new(guid.as_str(), guid.as_str())))
        .collect()
}
