//! Clean-number allocation.
//!
//! Hands out one clean phone number per request, spreading load across candidates:
//! numbers that were allocated less often, not today, or not recently weigh more.
//! Allocation is serialized by one lock so the same draw cannot race itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::MIN_ALLOCATION_RETENTION_DAYS;
use crate::database::models::{
    AllocationDbModel, AllocationUsage, DailyAllocationCount, PhoneDbModel, PurposeAllocationCount,
};
use crate::database::repositories::{AllocationRepository, PhoneRepository};
use crate::database::time::{DAY_MS, HOUR_MS, days_ago_ms, now_ms, start_of_today_ms};
use crate::{Error, Result};

/// Keeps heavily used numbers selectable.
const WEIGHT_FLOOR: f64 = 0.1;

/// Uniform sample in `[0, 1)`.
pub type Sampler = Box<dyn Fn() -> f64 + Send + Sync>;

/// A number handed out to a requester.
#[derive(Debug, Clone, Serialize)]
pub struct AllocatedNumber {
    pub phone_id: String,
    pub number: String,
    pub allocation: AllocationDbModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationSummary {
    pub days: i64,
    pub total: i64,
    pub by_day: Vec<DailyAllocationCount>,
    pub by_purpose: Vec<PurposeAllocationCount>,
}

pub struct NumberAllocator {
    phones: Arc<dyn PhoneRepository>,
    allocations: Arc<dyn AllocationRepository>,
    lock: Mutex<()>,
    sampler: Sampler,
}

impl NumberAllocator {
    pub fn new(phones: Arc<dyn PhoneRepository>, allocations: Arc<dyn AllocationRepository>) -> Self {
        Self::with_sampler(phones, allocations, Box::new(rand::random::<f64>))
    }

    pub fn with_sampler(
        phones: Arc<dyn PhoneRepository>,
        allocations: Arc<dyn AllocationRepository>,
        sampler: Sampler,
    ) -> Self {
        Self {
            phones,
            allocations,
            lock: Mutex::new(()),
            sampler,
        }
    }

    /// Pick a clean number and record the allocation.
    ///
    /// Fails with `NoCandidatesAvailable` when no active number is currently clean.
    pub async fn allocate(
        &self,
        requester_id: &str,
        purpose: &str,
        metadata: serde_json::Value,
    ) -> Result<AllocatedNumber> {
        let _guard = self.lock.lock().await;

        let candidates = self.phones.list_clean_phones().await?;
        let phone = match candidates.len() {
            0 => return Err(Error::no_candidates("no clean numbers available")),
            1 => &candidates[0],
            _ => {
                let usage: HashMap<String, AllocationUsage> = self
                    .allocations
                    .usage(start_of_today_ms())
                    .await?
                    .into_iter()
                    .map(|u| (u.phone_id.clone(), u))
                    .collect();
                let weights = compute_weights(&candidates, &usage, now_ms());
                let index = weighted_index(&weights, (self.sampler)());
                debug!(
                    candidates = candidates.len(),
                    chosen = %candidates[index].number,
                    weight = weights[index],
                    "Weighted allocation draw"
                );
                &candidates[index]
            }
        };

        let allocation = AllocationDbModel::new(&phone.id, requester_id, purpose, &metadata);
        self.allocations.insert_allocation(&allocation).await?;

        info!(
            phone_id = %phone.id,
            requester = %requester_id,
            purpose = %purpose,
            "Number allocated"
        );
        Ok(AllocatedNumber {
            phone_id: phone.id.clone(),
            number: phone.number.clone(),
            allocation,
        })
    }

    /// Allocation counts over the last `days` days.
    pub async fn usage_summary(&self, days: i64) -> Result<AllocationSummary> {
        let days = days.max(1);
        let since = days_ago_ms(days);
        let by_day = self.allocations.counts_by_day(since).await?;
        let by_purpose = self.allocations.counts_by_purpose(since).await?;
        Ok(AllocationSummary {
            days,
            total: by_day.iter().map(|d| d.count).sum(),
            by_day,
            by_purpose,
        })
    }

    /// Delete allocations older than `retention_days`, never less than the retention floor.
    pub async fn cleanup(&self, retention_days: i64) -> Result<u64> {
        let days = retention_days.max(MIN_ALLOCATION_RETENTION_DAYS);
        let deleted = self
            .allocations
            .delete_older_than(days_ago_ms(days))
            .await?;
        if deleted > 0 {
            info!(deleted, retention_days = days, "Purged old allocations");
        }
        Ok(deleted)
    }
}

/// Selection weight of each candidate.
pub fn compute_weights(
    candidates: &[PhoneDbModel],
    usage: &HashMap<String, AllocationUsage>,
    now: i64,
) -> Vec<f64> {
    let max_count = candidates
        .iter()
        .filter_map(|p| usage.get(&p.id))
        .map(|u| u.total_allocations)
        .max()
        .unwrap_or(0);

    candidates
        .iter()
        .map(|phone| {
            let usage = usage.get(&phone.id);
            let count = usage.map(|u| u.total_allocations).unwrap_or(0);

            let mut weight = if max_count > 0 {
                1.0 - count as f64 / max_count as f64
            } else {
                1.0
            } + WEIGHT_FLOOR;

            if usage.map(|u| u.allocations_today).unwrap_or(0) == 0 {
                weight *= 2.0;
            }

            match usage.and_then(|u| u.last_allocated_at) {
                None => weight *= 3.0,
                Some(last) => {
                    let idle = now - last;
                    if idle > DAY_MS {
                        weight *= 2.0;
                    } else if idle > HOUR_MS {
                        weight *= 1.5;
                    }
                }
            }

            weight
        })
        .collect()
}

/// Index picked by a cumulative walk over `weights` for a sample in `[0, 1)`.
pub fn weighted_index(weights: &[f64], sample: f64) -> usize {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || total <= 0.0 {
        return 0;
    }

    let target = sample.clamp(0.0, 1.0) * total;
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if target < cumulative {
            return i;
        }
    }
    weights.len() - 1
}
