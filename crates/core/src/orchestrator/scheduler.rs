//! Schedules the variants of one work item.

use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::{ItemPolicy, RunProfile};
use super::dispatcher::{ItemContext, VariantDispatcher};
use super::retry::cool_down;
use super::types::{AbortInfo, ItemOutcome, ItemReport, RunAbort, VariantOutcome};
use crate::batch::{VariantStatus, WorkItem};
use crate::store::RowHandle;

/// Runs the variants of a work item according to the item policy.
#[derive(Clone)]
pub struct ItemScheduler {
    dispatcher: VariantDispatcher,
    policy: ItemPolicy,
    profile: RunProfile,
    cooldown: Duration,
    cooldown_after_success: bool,
}

impl ItemScheduler {
    pub fn new(
        dispatcher: VariantDispatcher,
        policy: ItemPolicy,
        profile: RunProfile,
        cooldown: Duration,
        cooldown_after_success: bool,
    ) -> Self {
        Self {
            dispatcher,
            policy,
            profile,
            cooldown,
            cooldown_after_success,
        }
    }

    /// Drive every dispatchable variant of `item`.
    ///
    /// Under the fail-fast profile the first exhausted variant stops the item
    /// and is reported back as a [`RunAbort`]; the item's remaining variants
    /// are left untouched.
    pub async fn run_item(
        &self,
        batch_id: &str,
        row: RowHandle,
        item: &mut WorkItem,
        cancel: &CancellationToken,
    ) -> Result<ItemReport, RunAbort> {
        let WorkItem {
            external_id,
            source_asset_ref,
            variants,
            ..
        } = &mut *item;
        let ctx = ItemContext {
            batch_id,
            row,
            external_id,
            source_asset_ref,
        };

        let mut cancelled = false;
        let abort = match self.policy {
            ItemPolicy::Sequential => {
                let mut abort = None;
                for task in variants.iter_mut().filter(|t| t.is_dispatchable()) {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }

                    match self.dispatcher.dispatch(ctx, task, cancel).await {
                        Ok(VariantOutcome::Completed) => {
                            if self.cooldown_after_success && !cool_down(self.cooldown, cancel).await {
                                cancelled = true;
                                break;
                            }
                        }
                        Ok(VariantOutcome::Cancelled) => {
                            cancelled = true;
                            break;
                        }
                        Ok(VariantOutcome::Unchanged(_)) => {}
                        Err(exhausted) => {
                            if self.profile == RunProfile::FailFast {
                                abort = Some(AbortInfo::from(exhausted));
                                break;
                            }
                        }
                    }
                }
                abort
            }
            ItemPolicy::FanOut => {
                let dispatches = variants
                    .iter_mut()
                    .filter(|t| t.is_dispatchable())
                    .map(|task| self.dispatcher.dispatch(ctx, task, cancel));

                let mut abort = None;
                for result in join_all(dispatches).await {
                    match result {
                        Ok(VariantOutcome::Cancelled) => cancelled = true,
                        Ok(_) => {}
                        Err(exhausted) => {
                            if self.profile == RunProfile::FailFast && abort.is_none() {
                                abort = Some(AbortInfo::from(exhausted));
                            }
                        }
                    }
                }
                abort
            }
        };

        if let Some(info) = abort {
            warn!(
                batch_id,
                external_id = %info.external_id,
                variant = info.variant_number,
                "Item exhausted under fail-fast profile"
            );
            return Err(RunAbort { info });
        }

        let report = report_for(item, cancelled || cancel.is_cancelled());
        debug!(
            batch_id,
            external_id = %report.external_id,
            outcome = ?report.outcome,
            completed = report.completed,
            failed = report.failed,
            "Item finished"
        );
        Ok(report)
    }
}

fn report_for(item: &WorkItem, cancelled: bool) -> ItemReport {
    let failed = item.count(VariantStatus::Failed);
    let unfinished = item.variants.iter().any(|v| v.is_dispatchable());

    let outcome = if cancelled || unfinished {
        ItemOutcome::Interrupted
    } else if failed > 0 {
        ItemOutcome::PartialFailure
    } else {
        ItemOutcome::Success
    };

    ItemReport {
        external_id: item.external_id.clone(),
        outcome,
        completed: item.count(VariantStatus::Completed),
        failed,
        skipped: item.count(VariantStatus::Skipped),
    }
}
