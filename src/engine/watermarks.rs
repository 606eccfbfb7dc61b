//! Pure offset and limit arithmetic. No I/O happens here; the coordinator
//! feeds in live watermarks and gets back concrete per-partition plans.

use crate::broker::Watermarks;

/// Concrete, clamped consumption plan for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub partition: i32,
    pub offset: i64,
    pub limit: usize,
}

/// Resolve a requested offset against live watermarks.
///
/// Negative offsets are reinterpreted as a distance back from one past the
/// high watermark (`-1` lands exactly on `high`), then the result is clamped
/// into `[low, high]`. An output equal to `high` means nothing to read.
pub fn resolve_offset(offset: i64, watermarks: &Watermarks) -> i64 {
    let offset = if offset < 0 {
        watermarks.high + 1 + offset
    } else {
        offset
    };
    offset.clamp(watermarks.low, watermarks.high)
}

/// Reduce a requested limit to what the partition can actually serve from
/// `offset`, optionally bounded by an exclusive `end` offset. Never increases
/// the limit.
pub fn cap_limit(offset: i64, limit: usize, watermarks: &Watermarks, end: Option<i64>) -> usize {
    let bound = match end {
        Some(end) => watermarks.high.min(end),
        None => watermarks.high,
    };
    let available = (bound - offset).max(0) as usize;
    limit.min(available)
}

/// Split `total` across `partitions` shares without losing or double-counting
/// remainder units: share i of n gets `remaining / (n - i)`.
pub fn distribute_limit(total: usize, partitions: usize) -> Vec<usize> {
    let mut shares = Vec::with_capacity(partitions);
    let mut remaining = total;
    for i in 0..partitions {
        let share = remaining / (partitions - i);
        shares.push(share);
        remaining -= share;
    }
    shares
}

/// The per-partition start for a negative offset fanned out over several
/// partitions: "the last `limit` records" of each partition.
pub fn fan_out_start(limit: usize) -> i64 {
    -(limit as i64) - 1
}

/// Resolve one partition end to end: concrete start offset plus the limit it
/// can actually serve.
pub fn plan_partition(
    partition: i32,
    requested_offset: i64,
    limit: usize,
    watermarks: &Watermarks,
    end: Option<i64>,
) -> PartitionPlan {
    let offset = resolve_offset(requested_offset, watermarks);
    let limit = cap_limit(offset, limit, watermarks, end);
    PartitionPlan {
        partition,
        offset,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(offset: i64, limit: usize, low: i64, high: i64) -> PartitionPlan {
        plan_partition(0, offset, limit, &Watermarks::new(low, high), None)
    }

    #[test]
    fn in_range_offset_is_untouched() {
        let p = plan(50, 10, 0, 100);
        assert_eq!(p.offset, 50);
        assert_eq!(p.limit, 10);
    }

    #[test]
    fn end_sentinel_resolves_to_high_with_nothing_to_read() {
        let p = plan(-1, 10, 0, 100);
        assert_eq!(p.offset, 100);
        assert_eq!(p.limit, 0);
    }

    #[test]
    fn deep_negative_offset_clamps_to_low() {
        let p = plan(-200, 10, 10, 100);
        assert_eq!(p.offset, 10);
        assert_eq!(p.limit, 10);
    }

    #[test]
    fn offset_below_low_clamps_to_low() {
        let p = plan(5, 10, 20, 100);
        assert_eq!(p.offset, 20);
        assert_eq!(p.limit, 10);
    }

    #[test]
    fn limit_is_reduced_near_the_high_watermark() {
        let p = plan(90, 20, 0, 100);
        assert_eq!(p.offset, 90);
        assert_eq!(p.limit, 10);
    }

    #[test]
    fn empty_partition_yields_zero_limit() {
        for offset in [-5, -1, 0, 3, 100] {
            let p = plan(offset, 10, 0, 0);
            assert_eq!(p.offset, 0, "offset {offset}");
            assert_eq!(p.limit, 0, "offset {offset}");
        }
    }

    #[test]
    fn offset_above_high_clamps_and_zeroes_limit() {
        let p = plan(500, 10, 0, 100);
        assert_eq!(p.offset, 100);
        assert_eq!(p.limit, 0);
    }

    #[test]
    fn resolved_offset_always_within_watermarks() {
        let wm = Watermarks::new(13, 87);
        for offset in -200..200 {
            let resolved = resolve_offset(offset, &wm);
            assert!((wm.low..=wm.high).contains(&resolved), "offset {offset}");
        }
    }

    #[test]
    fn exclusive_end_bounds_the_limit() {
        let wm = Watermarks::new(0, 100);
        assert_eq!(cap_limit(10, 50, &wm, Some(30)), 20);
        assert_eq!(cap_limit(10, 5, &wm, Some(30)), 5);
        // end below start reads nothing
        assert_eq!(cap_limit(40, 50, &wm, Some(30)), 0);
        // end beyond high falls back to the watermark
        assert_eq!(cap_limit(90, 50, &wm, Some(500)), 10);
    }

    #[test]
    fn distribute_limit_sums_exactly() {
        for total in 0..=120 {
            for partitions in 1..=7 {
                let shares = distribute_limit(total, partitions);
                assert_eq!(shares.len(), partitions);
                assert_eq!(shares.iter().sum::<usize>(), total, "{total}/{partitions}");
            }
        }
    }

    #[test]
    fn distribute_limit_splits_evenly_when_divisible() {
        assert_eq!(distribute_limit(100, 4), vec![25, 25, 25, 25]);
        assert_eq!(distribute_limit(10, 3), vec![3, 3, 4]);
    }

    #[test]
    fn fan_out_start_reads_the_last_share() {
        // share of 3 from a partition with records [0, 100): offsets 97..100
        let wm = Watermarks::new(0, 100);
        let p = plan_partition(0, fan_out_start(3), 3, &wm, None);
        assert_eq!(p.offset, 97);
        assert_eq!(p.limit, 3);
    }
}
