//! Deterministic metric recomputation applied on every successful transition.
//!
//! Nothing here reads the clock or a random source: the same sequence of
//! transitions always yields the same level trajectory.

use super::entity::EntityMetrics;
use super::machine::StateMachineDefinition;
use crate::error::{EvolutionError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// One full oscillation of the damping factor, indexed by
/// `evolution_count % DAMPING_CYCLE.len()`.
pub const DAMPING_CYCLE: [Decimal; 6] = [
    dec!(1.00),
    dec!(1.02),
    dec!(1.04),
    dec!(1.00),
    dec!(0.98),
    dec!(0.96),
];

/// Decimal places kept for level and coherence.
pub const METRIC_SCALE: u32 = 6;

pub fn damping_factor(evolution_count: u64) -> Decimal {
    DAMPING_CYCLE[(evolution_count % DAMPING_CYCLE.len() as u64) as usize]
}

/// `previous × multiplier × damping(evolution_count)`, rounded to
/// [`METRIC_SCALE`].
pub fn next_level(previous: Decimal, multiplier: Decimal, evolution_count: u64) -> Result<Decimal> {
    previous
        .checked_mul(multiplier)
        .and_then(|level| level.checked_mul(damping_factor(evolution_count)))
        .map(|level| level.round_dp(METRIC_SCALE))
        .ok_or_else(|| {
            EvolutionError::TransitionEvaluation(format!(
                "level overflow computing {previous} x {multiplier} at cycle {evolution_count}"
            ))
        })
}

/// Moves coherence a quarter of the way towards how close the damping factor
/// is to neutral (`1 - 10·|damping - 1|`), clamped to `[0, 1]`.
pub fn next_coherence(previous: Decimal, evolution_count: u64) -> Result<Decimal> {
    let closeness = Decimal::ONE - (damping_factor(evolution_count) - Decimal::ONE).abs() * dec!(10);
    previous
        .checked_mul(dec!(3))
        .and_then(|weighted| weighted.checked_add(closeness))
        .map(|blended| {
            (blended / dec!(4))
                .clamp(Decimal::ZERO, Decimal::ONE)
                .round_dp(METRIC_SCALE)
        })
        .ok_or_else(|| {
            EvolutionError::TransitionEvaluation(format!(
                "coherence overflow blending {previous} at cycle {evolution_count}"
            ))
        })
}

/// Metrics after entering `target`, given the count of transitions already
/// applied.
pub fn evolve_metrics(
    definition: &StateMachineDefinition,
    previous: &EntityMetrics,
    target: &str,
    evolution_count: u64,
) -> Result<EntityMetrics> {
    Ok(EntityMetrics {
        level: next_level(previous.level, definition.multiplier(target), evolution_count)?,
        coherence: next_coherence(previous.coherence, evolution_count)?,
        dimensions: definition.dimensions(target),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::machine::tests::abc_machine;

    #[test]
    fn test_damping_is_cyclic_and_bounded() {
        for n in 0..60u64 {
            let d = damping_factor(n);
            assert_eq!(d, damping_factor(n + DAMPING_CYCLE.len() as u64));
            assert!(d >= dec!(0.96) && d <= dec!(1.04));
        }
    }

    #[test]
    fn test_next_level_is_deterministic() {
        let first: Vec<Decimal> = (0..20)
            .scan(Decimal::ONE, |level, n| {
                *level = next_level(*level, dec!(1.5), n).unwrap();
                Some(*level)
            })
            .collect();
        let second: Vec<Decimal> = (0..20)
            .scan(Decimal::ONE, |level, n| {
                *level = next_level(*level, dec!(1.5), n).unwrap();
                Some(*level)
            })
            .collect();
        assert_eq!(first, second);
        assert_eq!(first[0], dec!(1.5));
        assert_eq!(first[1], dec!(2.295));
    }

    #[test]
    fn test_next_level_overflow_is_an_error() {
        let huge = Decimal::MAX;
        assert!(matches!(
            next_level(huge, dec!(2), 0),
            Err(EvolutionError::TransitionEvaluation(_))
        ));
    }

    #[test]
    fn test_coherence_stays_in_unit_range() {
        let mut coherence = Decimal::ONE;
        for n in 0..100 {
            coherence = next_coherence(coherence, n).unwrap();
            assert!(coherence >= Decimal::ZERO && coherence <= Decimal::ONE);
        }
        assert_eq!(next_coherence(Decimal::ONE, 0).unwrap(), Decimal::ONE);
        assert_eq!(next_coherence(Decimal::ONE, 2).unwrap(), dec!(0.9));
    }

    #[test]
    fn test_next_coherence_overflow_is_an_error() {
        assert!(matches!(
            next_coherence(Decimal::MAX, 0),
            Err(EvolutionError::TransitionEvaluation(_))
        ));
    }

    #[test]
    fn test_evolve_metrics_uses_target_tables() {
        let def = abc_machine();
        let metrics = evolve_metrics(&def, &EntityMetrics::default(), "B", 0).unwrap();
        assert_eq!(metrics.level, dec!(1.5));
        assert_eq!(metrics.dimensions.len(), 1);

        let metrics = evolve_metrics(&def, &metrics, "C", 1).unwrap();
        assert_eq!(metrics.level, dec!(3.06));
        assert!(metrics.dimensions.is_empty());
    }
}
