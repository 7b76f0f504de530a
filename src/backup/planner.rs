//! Proves, before anything is created, that every pool can hold the
//! snapshots the plan needs.
//!
//! Permanent snapshots (in-place entries) stay alive for the whole run and
//! add up. Transient snapshots are created and dropped one entry at a time,
//! so a pool only ever needs room for its largest one on top of all the
//! permanent reservations.

use crate::backup::context::Context;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::services::SnapshotService;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const MIB: u64 = 1024 * 1024;

/// Memoized pool lookups for a single validation pass. Dropped once the pass
/// is over so the next pass reads live values again.
pub struct PoolCache {
    service: Rc<dyn SnapshotService>,
    pools: HashMap<PathBuf, String>,
    free: HashMap<String, u64>,
}

impl PoolCache {
    pub fn new(service: Rc<dyn SnapshotService>) -> Self {
        Self {
            service,
            pools: HashMap::new(),
            free: HashMap::new(),
        }
    }

    pub fn pool_of(&mut self, device: &Path) -> Result<String> {
        if let Some(pool) = self.pools.get(device) {
            return Ok(pool.clone());
        }
        let pool = self.service.pool_of(device)?;
        self.pools.insert(device.to_path_buf(), pool.clone());
        Ok(pool)
    }

    pub fn free_space(&mut self, pool: &str) -> Result<u64> {
        if let Some(free) = self.free.get(pool) {
            return Ok(*free);
        }
        let free = self.service.free_space(pool)?;
        self.free.insert(pool.to_string(), free);
        Ok(free)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityLedger {
    permanent: BTreeMap<String, u64>,
    transient_peak: BTreeMap<String, u64>,
}

impl CapacityLedger {
    pub fn add_permanent(&mut self, pool: &str, size: u64) {
        let total = self.permanent.entry(pool.to_string()).or_default();
        *total = total.saturating_add(size);
    }

    pub fn add_transient(&mut self, pool: &str, size: u64) {
        let peak = self.transient_peak.entry(pool.to_string()).or_default();
        *peak = (*peak).max(size);
    }

    /// `permanent + transient peak` per pool, in pool name order.
    pub fn required(&self) -> BTreeMap<String, u64> {
        let mut required = self.permanent.clone();
        for (pool, peak) in &self.transient_peak {
            let total = required.entry(pool.clone()).or_default();
            *total = total.saturating_add(*peak);
        }
        required
    }
}

pub struct CapacityPlanner<'a> {
    ctx: &'a Context,
}

impl<'a> CapacityPlanner<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub fn plan(&self, cache: &mut PoolCache) -> Result<CapacityLedger> {
        let config = self.ctx.config();
        let mut ledger = CapacityLedger::default();

        for (index, entry) in config.table().iter().enumerate() {
            if !entry.entry_type().uses_snapshot() {
                continue;
            }
            let pool = cache
                .pool_of(Path::new(entry.source()))
                .add_msg(format!("Looking up the pool of entry {index}"))?;
            let size = self.ctx.options().size(index, "snap_size")?;

            if self.ctx.is_in_place(index)? {
                tracing::debug!("entry {index}: permanent snapshot of {size} bytes in {pool}");
                ledger.add_permanent(&pool, size);
            } else {
                tracing::debug!("entry {index}: transient snapshot of {size} bytes in {pool}");
                ledger.add_transient(&pool, size);
            }
        }

        Ok(ledger)
    }

    /// Fails on the first pool (by name) that cannot hold its requirement.
    pub fn validate(&self, cache: &mut PoolCache) -> Result<CapacityLedger> {
        let ledger = self.plan(cache)?;
        for (pool, required) in ledger.required() {
            let free = cache.free_space(&pool)?;
            if required > free {
                return Err(Error::configuration(format!(
                    "Not enough free space in pool {pool}: {} MiB required, {} MiB available",
                    required.div_ceil(MIB),
                    free / MIB
                )));
            }
            tracing::info!(
                "Pool {pool} has {} MiB free for {} MiB of snapshots",
                free / MIB,
                required.div_ceil(MIB)
            );
        }

        Ok(ledger)
    }
}
