//! ID block allocator for named counters.

use std::sync::Arc;

use tracing::debug;

use super::StoreContext;
use crate::error::{Result, StoreError};

/// Hands out non-overlapping ranges of integers per counter name.
///
/// The read and the write of one reservation share a backend transaction,
/// but reservations from separate allocator processes are not coordinated.
#[derive(Debug, Clone)]
pub struct IdBlockAllocator {
    ctx: Arc<StoreContext>,
}

impl IdBlockAllocator {
    pub(crate) const fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Reserve `size` ids from `name`, returning the first of the block.
    pub fn reserve_id_block(&self, name: &str, size: i64) -> Result<i64> {
        if size <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "id block size must be greater than 0, got {size}"
            )));
        }

        let start = self.ctx.read(|tx| match tx.select_counter(name)? {
            None => {
                tx.insert_counter(name, size)?;
                Ok(0)
            }
            Some(current) => {
                let next = current.checked_add(size).ok_or_else(|| {
                    StoreError::InvalidArgument(format!("counter {name} would overflow"))
                })?;
                let rows = tx.update_counter(name, next)?;
                if rows != 1 {
                    return Err(StoreError::Consistency(format!(
                        "counter {name} update affected {rows} rows"
                    )));
                }
                Ok(current)
            }
        })?;

        debug!(counter = name, start, size, "reserved id block");
        Ok(start)
    }
}
