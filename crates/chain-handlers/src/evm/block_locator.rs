// Copyright 2024 Threshold Network Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Block-by-timestamp location for the historical backfill.
//!
//! Binary-searches block headers for the newest block at or before a
//! target timestamp. The resulting range is an inclusive bound that may
//! over-cover; consumers re-filter by deposit id anyway.

use ethers::providers::{Http, Provider};
use tbtc_relayer_utils::Result;

/// A minimal header-timestamp oracle, the seam that keeps the search
/// testable without a node.
#[async_trait::async_trait]
pub trait BlockTimestamps: Send + Sync {
    /// The timestamp of the given block, or `None` when the header is
    /// not (yet) available.
    async fn timestamp_of(&self, block_number: u64) -> Result<Option<u64>>;
}

#[async_trait::async_trait]
impl BlockTimestamps for Provider<Http> {
    async fn timestamp_of(&self, block_number: u64) -> Result<Option<u64>> {
        use ethers::providers::Middleware;
        let block = self.get_block(block_number).await?;
        Ok(block.map(|b| b.timestamp.as_u64()))
    }
}

/// An inclusive block range to query events over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// First block of the range.
    pub start_block: u64,
    /// Last block of the range.
    pub end_block: u64,
}

/// Finds the event query range covering everything since
/// `target_timestamp`.
///
/// Binary search over `[start_block, latest_block]`: a header at or
/// before the target becomes the lower-bound candidate; a missing or
/// newer header narrows the high end. With no candidate at all the
/// range falls back to `start_block`.
pub async fn find_block_range<T>(
    timestamps: &T,
    target_timestamp: u64,
    start_block: u64,
    latest_block: u64,
) -> Result<BlockRange>
where
    T: BlockTimestamps + ?Sized,
{
    let mut low = start_block;
    let mut high = latest_block;
    let mut candidate = None;
    while low <= high {
        let mid = low + (high - low) / 2;
        match timestamps.timestamp_of(mid).await? {
            Some(ts) if ts == target_timestamp => {
                candidate = Some(mid);
                break;
            }
            Some(ts) if ts < target_timestamp => {
                candidate = Some(mid);
                low = mid + 1;
            }
            _ => {
                // Header newer than the target, or not available yet.
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            }
        }
    }
    Ok(BlockRange {
        start_block: candidate.unwrap_or(start_block),
        end_block: latest_block,
    })
}
