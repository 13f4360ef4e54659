//! Escalating-risk model: the probability that a draw resolves to the
//! forfeiting "zero" outcome as a function of the draw index.

use crate::config::GameConfig;

/// Hard ceiling on the zero probability. The curve asymptotically approaches
/// 1 but the engine always leaves a survival chance.
pub const MAX_ZERO_PROBABILITY: f64 = 0.95;

/// Probability of a zero outcome at `draw_index` (1-based) under `config`.
///
/// The first `min_draws_before_zero` draws are guaranteed safe. After that
/// the probability follows `base + (1 - base) · (1 - e^(-k·n))` where `n` is
/// the number of draws past the safe window, capped at
/// [`MAX_ZERO_PROBABILITY`]. Monotonically non-decreasing in `draw_index`
/// for a fixed config.
pub fn zero_probability(draw_index: u32, config: &GameConfig) -> f64 {
    if draw_index <= config.min_draws_before_zero {
        return 0.0;
    }
    let base = config.zero_base_rate;
    let steps = (draw_index - config.min_draws_before_zero) as f64;
    let p = base + (1.0 - base) * (1.0 - (-config.zero_growth_rate * steps).exp());
    p.min(MAX_ZERO_PROBABILITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GameConfig {
        GameConfig {
            zero_base_rate: 0.05,
            zero_growth_rate: 0.15,
            min_draws_before_zero: 2,
            ..GameConfig::default()
        }
    }

    #[test]
    fn test_safe_window_is_exactly_zero() {
        let config = test_config();
        assert_eq!(zero_probability(1, &config), 0.0);
        assert_eq!(zero_probability(2, &config), 0.0);
        assert!(zero_probability(3, &config) > 0.0);
    }

    #[test]
    fn test_monotone_non_decreasing() {
        let config = test_config();
        let mut previous = 0.0;
        for draw_index in 1..=200 {
            let p = zero_probability(draw_index, &config);
            assert!(
                p >= previous,
                "probability decreased at draw {}: {} -> {}",
                draw_index,
                previous,
                p
            );
            previous = p;
        }
    }

    #[test]
    fn test_capped_below_certainty() {
        let config = test_config();
        for draw_index in 1..=10_000 {
            let p = zero_probability(draw_index, &config);
            assert!(p <= MAX_ZERO_PROBABILITY);
            assert!(p < 1.0);
        }
        // Deep into the session the cap is actually reached.
        assert_eq!(zero_probability(10_000, &config), MAX_ZERO_PROBABILITY);
    }

    #[test]
    fn test_first_risky_draw_starts_near_base() {
        let config = test_config();
        let p = zero_probability(3, &config);
        // base + (1-base)(1 - e^-k) with k = 0.15
        let expected = 0.05 + 0.95 * (1.0 - (-0.15f64).exp());
        assert!((p - expected).abs() < 1e-12);
    }
}
