//! Guest system counter (CNTPCT_EL0) derivation

/// Console CPU base clock in Hz
pub const BASE_CLOCK_RATE: u64 = 1_019_215_872;

/// Frequency of the generic timer as reported by CNTFRQ_EL0
pub const CNTFREQ: u64 = 19_200_000;

/// Convert a host tick count at [`BASE_CLOCK_RATE`] into counter ticks at
/// [`CNTFREQ`].
///
/// The product does not fit in 64 bits for host tick counts above roughly
/// 2^39, so the multiply is done in 128 bits. `CNTFREQ < BASE_CLOCK_RATE`
/// keeps the quotient inside `u64`.
#[inline]
pub fn host_ticks_to_cntpct(host_ticks: u64) -> u64 {
    ((host_ticks as u128 * CNTFREQ as u128) / BASE_CLOCK_RATE as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Little-endian base-2^32 arbitrary precision reference of
    /// `floor(ticks * CNTFREQ / BASE_CLOCK_RATE)`.
    fn reference(ticks: u64) -> u64 {
        let mut limbs = vec![ticks as u32, (ticks >> 32) as u32];

        let mut carry = 0u64;
        for limb in limbs.iter_mut() {
            let product = *limb as u64 * CNTFREQ + carry;
            *limb = product as u32;
            carry = product >> 32;
        }
        while carry != 0 {
            limbs.push(carry as u32);
            carry >>= 32;
        }

        let mut remainder = 0u64;
        for limb in limbs.iter_mut().rev() {
            let current = (remainder << 32) | *limb as u64;
            *limb = (current / BASE_CLOCK_RATE) as u32;
            remainder = current % BASE_CLOCK_RATE;
        }

        assert!(limbs[2..].iter().all(|&l| l == 0));
        limbs[0] as u64 | (limbs[1] as u64) << 32
    }

    #[test]
    fn test_constants_fit_single_limb() {
        assert!(CNTFREQ <= u32::MAX as u64);
        assert!(BASE_CLOCK_RATE <= u32::MAX as u64);
    }

    #[test]
    fn test_representative_values() {
        let samples = [
            0,
            1,
            BASE_CLOCK_RATE - 1,
            BASE_CLOCK_RATE,
            BASE_CLOCK_RATE * 60,
            1 << 40,
            u64::MAX / CNTFREQ,
            u64::MAX / CNTFREQ + 1,
            u64::MAX - BASE_CLOCK_RATE,
            u64::MAX - 1,
            u64::MAX,
        ];
        for ticks in samples {
            assert_eq!(host_ticks_to_cntpct(ticks), reference(ticks), "ticks = {ticks}");
        }
    }

    #[test]
    fn test_one_second() {
        assert_eq!(host_ticks_to_cntpct(BASE_CLOCK_RATE), CNTFREQ);
        assert_eq!(host_ticks_to_cntpct(BASE_CLOCK_RATE - 1), CNTFREQ - 1);
    }

    #[test]
    fn test_naive_multiply_would_overflow() {
        let ticks = u64::MAX / 2;
        assert!(ticks.checked_mul(CNTFREQ).is_none());
        assert_eq!(host_ticks_to_cntpct(ticks), reference(ticks));
    }

    proptest! {
        #[test]
        fn prop_matches_bigint_reference(ticks in any::<u64>()) {
            prop_assert_eq!(host_ticks_to_cntpct(ticks), reference(ticks));
        }

        #[test]
        fn prop_monotonic(a in any::<u64>(), b in any::<u64>()) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(host_ticks_to_cntpct(lo) <= host_ticks_to_cntpct(hi));
        }
    }
}
