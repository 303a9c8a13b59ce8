//! Apply command implementation.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cli::{ApplyOpts, GlobalOpts};
use crate::config::RefreshList;
use crate::engine::Reconciler;
use crate::logging::Logger;

/// Run the apply command: one full reconciliation pass over a refresh list.
///
/// # Errors
///
/// Returns an error if the configuration or refresh list cannot be loaded,
/// the State Store cannot be read or written, or any attribute failed.
pub fn run(global: &GlobalOpts, opts: &ApplyOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;

    log.stage("Reading refresh list");
    let path = dunce::canonicalize(&opts.refresh_list)
        .with_context(|| format!("refresh list not found: {}", opts.refresh_list.display()))?;
    let refresh = RefreshList::load(&path)?;
    log.info(&format!(
        "{} current, {} removed policy object(s)",
        refresh.current.len(),
        refresh.removed.len()
    ));
    super::report_warnings(&refresh.validate(), log);

    let mut store = setup.open_store()?;
    let ctx = setup.context(global, log);
    let report = Reconciler::new(&ctx, &mut store)
        .reconcile(&refresh.removed_policies(), &refresh.current)?;

    super::finish(&report, log)
}
