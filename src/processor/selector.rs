use chrono::{DateTime, Duration, Utc};
use ethers::types::U256;

use crate::database::types::Payment;

/// Returns the largest prefix of `snapshot` eligible to be sent under
/// `closure_time_delay`.
///
/// `snapshot` must already be sorted ascending by `processed_ts` (the order
/// in which a batch must be submitted, §8 invariant 3). Since the
/// eligibility predicate - "has this payment aged past `closure_time_delay`"
/// - only gets easier to satisfy as `processed_ts` shrinks, the eligible set
/// is always a prefix, never a scattered subset.
#[must_use]
pub fn eligible_prefix(snapshot: &[Payment], now: DateTime<Utc>, closure_time_delay: Duration) -> &[Payment] {
    let cutoff = snapshot.partition_point(|p| p.processed_ts + closure_time_delay <= now);
    &snapshot[..cutoff]
}

/// The three scarce resources a batch transfer competes against.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub token_balance:          U256,
    pub gas_asset_balance:      U256,
    pub gas_price:              U256,
    pub block_gas_limit:        U256,
    pub gas_per_payment:        u64,
    pub gas_batch_payment_base: u64,
    pub block_gas_limit_ratio:  f64,
}

/// Clips `candidates` (already the eligible prefix) to the largest
/// resource-feasible prefix, then trims any trailing run of payments that
/// share a `processed_ts` with the first excluded payment, so the resulting
/// closure-time boundary remains exact: either every payment at a given
/// timestamp is included, or none are.
#[must_use]
pub fn clip_to_resources<'a>(candidates: &'a [Payment], limits: &ResourceLimits) -> &'a [Payment] {
    let gas_budget = (limits.block_gas_limit.as_u64() as f64 * limits.block_gas_limit_ratio) as u64;

    let mut total_value = U256::zero();
    let mut included = 0usize;

    for payment in candidates {
        let k = (included + 1) as u64;
        let gas_cost = limits.gas_batch_payment_base + k * limits.gas_per_payment;
        let gas_asset_cost = U256::from(gas_cost).saturating_mul(limits.gas_price);
        let next_value = total_value + payment.value;

        if next_value > limits.token_balance
            || gas_asset_cost > limits.gas_asset_balance
            || gas_cost > gas_budget
        {
            break;
        }

        total_value = next_value;
        included += 1;
    }

    if included > 0 && included < candidates.len() {
        let boundary_ts = candidates[included - 1].processed_ts;
        if candidates[included].processed_ts == boundary_ts {
            while included > 0 && candidates[included - 1].processed_ts == boundary_ts {
                included -= 1;
            }
        }
    }

    &candidates[..included]
}

#[cfg(test)]
mod tests {
    use ethers::types::Address;

    use super::*;
    use crate::database::types::{PaymentDetails, PaymentStatus};

    fn payment(id: i64, ts_secs: i64, value: u64) -> Payment {
        Payment {
            id,
            subtask_id: format!("task-{id}"),
            payee: Address::from_low_u64_be(id as u64),
            value: U256::from(value),
            processed_ts: DateTime::from_timestamp(ts_secs, 0).unwrap(),
            status: PaymentStatus::Awaiting,
            details: PaymentDetails::default(),
            created_ts: DateTime::from_timestamp(ts_secs, 0).unwrap(),
            modified_ts: DateTime::from_timestamp(ts_secs, 0).unwrap(),
        }
    }

    fn unlimited() -> ResourceLimits {
        ResourceLimits {
            token_balance:          U256::MAX,
            gas_asset_balance:      U256::MAX,
            gas_price:              U256::from(1),
            block_gas_limit:        U256::from(30_000_000),
            gas_per_payment:        30_000,
            gas_batch_payment_base: 21_000,
            block_gas_limit_ratio:  0.5,
        }
    }

    #[test]
    fn forced_mode_includes_everything_up_to_now() {
        let now = DateTime::from_timestamp(100, 0).unwrap();
        let snapshot = vec![payment(1, 50, 1), payment(2, 90, 1), payment(3, 200, 1)];

        let eligible = eligible_prefix(&snapshot, now, Duration::zero());

        assert_eq!(eligible.len(), 2);
    }

    #[test]
    fn opportunistic_mode_requires_the_max_delay_to_have_elapsed() {
        let max_delay = Duration::seconds(3600);
        let snapshot = vec![payment(1, 100, 1)];

        let too_soon = DateTime::from_timestamp(100 + 3600 - 1, 0).unwrap();
        assert!(eligible_prefix(&snapshot, too_soon, max_delay).is_empty());

        let just_right = DateTime::from_timestamp(100 + 3600, 0).unwrap();
        assert_eq!(eligible_prefix(&snapshot, just_right, max_delay).len(), 1);
    }

    #[test]
    fn token_balance_clips_the_batch() {
        // S2 - token-limited.
        let snapshot = vec![
            payment(1, 1, 1_000_000_000_000_000_000),
            payment(2, 2, 2_000_000_000_000_000_000),
            payment(3, 3, 5_000_000_000_000_000_000),
        ];
        let mut limits = unlimited();
        limits.token_balance = U256::from(4_000_000_000_000_000_000u128);

        let clipped = clip_to_resources(&snapshot, &limits);

        assert_eq!(clipped.len(), 2);
        assert_eq!(clipped[1].id, 2);
    }

    #[test]
    fn gas_asset_balance_clips_the_batch() {
        // S4 - gas-asset limited: exactly enough for two payments.
        let snapshot = vec![payment(1, 1, 1), payment(2, 2, 1), payment(3, 3, 1)];
        let mut limits = unlimited();
        limits.gas_price = U256::from(1);
        limits.gas_asset_balance =
            U256::from(limits.gas_batch_payment_base + 2 * limits.gas_per_payment);

        let clipped = clip_to_resources(&snapshot, &limits);

        assert_eq!(clipped.len(), 2);
    }

    #[test]
    fn closure_time_grouping_drops_a_truncated_timestamp_entirely() {
        // Two payments share processed_ts=5 but only the first fits the budget;
        // both must be excluded to keep the closure-time boundary exact.
        let snapshot = vec![payment(1, 1, 1), payment(2, 5, 1), payment(3, 5, 1)];
        let mut limits = unlimited();
        limits.token_balance = U256::from(2); // room for p1 and one more, not both at ts=5

        let clipped = clip_to_resources(&snapshot, &limits);

        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped[0].id, 1);
    }

    #[test]
    fn block_gas_limit_clips_the_batch() {
        let snapshot = vec![payment(1, 1, 1), payment(2, 2, 1), payment(3, 3, 1)];
        let mut limits = unlimited();
        // base 21_000 + k*30_000, budget = gas_limit * ratio.
        // Allow exactly 2 payments: 21_000 + 2*30_000 = 81_000.
        limits.block_gas_limit = U256::from(81_000);
        limits.block_gas_limit_ratio = 1.0;

        let clipped = clip_to_resources(&snapshot, &limits);

        assert_eq!(clipped.len(), 2);
    }

    #[test]
    fn block_gas_limit_ratio_below_one_shrinks_the_budget() {
        let snapshot = vec![payment(1, 1, 1), payment(2, 2, 1), payment(3, 3, 1)];
        let mut limits = unlimited();
        // Budget is half the block: 81_000 * 0.5 = 40_500, only enough for
        // one payment (21_000 + 30_000 = 51_000 already exceeds it).
        limits.block_gas_limit = U256::from(81_000);
        limits.block_gas_limit_ratio = 0.5;

        let clipped = clip_to_resources(&snapshot, &limits);

        assert_eq!(clipped.len(), 0);
    }
}
