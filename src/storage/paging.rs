//! Paging controller: keeps each channel's unpaged window bounded.
//!
//! The oldest `full_size` references of a channel (by insertion order) are
//! unpaged. Every other reference carries a page ordinal, and a channel's
//! ordinals form one contiguous run `[min, max]` in insertion order.

use std::sync::Arc;

use tracing::{debug, info};

use super::StoreContext;
use super::backend::{Statement, StoreTx};
use crate::core::{ChannelId, InitialLoadInfo, MessageReference, PagingWindow, ReferenceInfo};
use crate::error::{Result, StoreError};

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidArgument(format!("count {value} is out of range")))
}

/// Last ordinal of the `count`-long range starting at `start`.
fn range_end(start: i64, count: usize) -> Result<i64> {
    to_i64(count - 1)?.checked_add(start).ok_or_else(|| {
        StoreError::InvalidArgument(format!(
            "range of {count} ordinals starting at {start} is out of range"
        ))
    })
}

#[derive(Debug, Clone)]
pub struct PagingController {
    ctx: Arc<StoreContext>,
}

impl PagingController {
    pub(crate) const fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Load a channel's unpaged references, first reconciling the paging
    /// window with `full_size`.
    pub fn get_initial_reference_infos(
        &self,
        channel_id: ChannelId,
        full_size: usize,
    ) -> Result<InitialLoadInfo> {
        self.ctx.read(|tx| {
            let mut window = tx.page_order_bounds(channel_id)?;
            let mut refs = tx.load_unpaged_references(channel_id)?;

            if refs.len() < full_size {
                if let Some(current) = window {
                    window = Self::unpage_oldest(tx, channel_id, current, full_size - refs.len())?;
                    refs = tx.load_unpaged_references(channel_id)?;
                }
            } else if refs.len() > full_size {
                let extras = refs.split_off(full_size);
                window = Some(self.page_newest(tx, channel_id, window, &extras)?);
            }

            debug!(
                channel = channel_id,
                unpaged = refs.len(),
                min = window.map(|w| w.min),
                max = window.map(|w| w.max),
                "loaded initial references"
            );
            Ok(InitialLoadInfo { window, refs })
        })
    }

    /// The window grew: unpage the oldest paged references to fill it.
    fn unpage_oldest(
        tx: &dyn StoreTx,
        channel_id: ChannelId,
        window: PagingWindow,
        deficit: usize,
    ) -> Result<Option<PagingWindow>> {
        let count = window.len().min(to_i64(deficit)?);
        let last = window.min + count - 1;
        let cleared = tx.clear_page_order_range(channel_id, window.min, last)?;
        info!(channel = channel_id, first = window.min, last, cleared, "unpaged references into grown window");

        let min = last + 1;
        Ok((min <= window.max).then_some(PagingWindow {
            min,
            max: window.max,
        }))
    }

    /// The window shrank: page the newest unpaged references, which come
    /// before every already-paged reference in insertion order.
    fn page_newest(
        &self,
        tx: &dyn StoreTx,
        channel_id: ChannelId,
        window: Option<PagingWindow>,
        extras: &[ReferenceInfo],
    ) -> Result<PagingWindow> {
        let excess = to_i64(extras.len())?;
        let start = window.map_or(0, |w| w.min);
        if window.is_some() {
            tx.shift_page_order(channel_id, excess)?;
        }

        let mut batch = self.ctx.batch(tx);
        for (page_ord, info) in (start..).zip(extras) {
            batch.add(Statement::UpdatePageOrder {
                channel_id,
                message_id: info.message_id,
                page_ord,
            })?;
        }
        batch.flush()?;

        let max = window.map_or(start + excess - 1, |w| w.max + excess);
        info!(channel = channel_id, paged = excess, min = start, max, "paged references out of shrunk window");
        Ok(PagingWindow { min: start, max })
    }

    /// Load `count` paged references starting at ordinal `start`.
    pub fn get_paged_reference_infos(
        &self,
        channel_id: ChannelId,
        start: i64,
        count: usize,
    ) -> Result<Vec<ReferenceInfo>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let last = range_end(start, count)?;
        let rows = self
            .ctx
            .read(|tx| tx.load_paged_references(channel_id, start, last))?;

        if rows.len() != count {
            return Err(StoreError::Consistency(format!(
                "channel {channel_id}: expected {count} paged references from {start}, found {}",
                rows.len()
            )));
        }
        rows.into_iter()
            .zip(start..)
            .map(|((page_ord, info), expected)| {
                if page_ord == expected {
                    Ok(info)
                } else {
                    Err(StoreError::Consistency(format!(
                        "channel {channel_id}: page ordinal {page_ord} where {expected} was expected"
                    )))
                }
            })
            .collect()
    }

    /// Clear the page ordinal of `count` references starting at `start`,
    /// retrying on contention.
    pub fn update_reliable_references_not_paged_in_range(
        &self,
        channel_id: ChannelId,
        start: i64,
        count: usize,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let last = range_end(start, count)?;
        self.ctx
            .settings
            .retry
            .run("update_reliable_references_not_paged_in_range", || {
                self.ctx.read(|tx| {
                    let cleared = tx.clear_page_order_range(channel_id, start, last)?;
                    if cleared == count {
                        Ok(())
                    } else {
                        Err(StoreError::Consistency(format!(
                            "channel {channel_id}: unpaged {cleared} references in [{start}, {last}], expected {count}"
                        )))
                    }
                })
            })
    }

    /// Persist each reference's page ordinal.
    pub fn update_page_order(&self, channel_id: ChannelId, refs: &[MessageReference]) -> Result<()> {
        let mut updates = Vec::with_capacity(refs.len());
        for reference in refs {
            let page_ord = reference.paging_order.ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "reference to message {} has no paging order",
                    reference.message_id()
                ))
            })?;
            updates.push(Statement::UpdatePageOrder {
                channel_id,
                message_id: reference.message_id(),
                page_ord,
            });
        }
        if updates.is_empty() {
            return Ok(());
        }

        self.ctx.read(|tx| {
            let mut batch = self.ctx.batch(tx);
            for update in updates {
                batch.add(update)?;
            }
            batch.flush()
        })
    }
}
