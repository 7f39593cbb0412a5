use core::time::Duration;

use crate::{config::ExhaustionStrategy, generator::Tenure, layout::BitLayout};

/// Unit and sequence bookkeeping shared by both engines.
///
/// `sequence` is the next sequence to hand out in `last_unit`; a value above
/// the layout's `max_sequence` means the unit is used up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct GenerationState {
    pub acquisition: u64,
    pub last_unit: u64,
    pub sequence: u64,
}

impl GenerationState {
    /// State for the first tenure of an engine.
    ///
    /// Units before `ceil(effective_time / unit)` may overlap the previous
    /// holder of the same lease-id, so the state starts exhausted just below
    /// the first whole unit of the lease.
    pub fn new(layout: &BitLayout, tenure: &Tenure) -> Self {
        let first = layout.first_unit_at_or_after(tenure.lease.effective_time);
        if first == 0 {
            return Self {
                acquisition: tenure.acquisition,
                last_unit: 0,
                sequence: 0,
            };
        }
        Self {
            acquisition: tenure.acquisition,
            last_unit: first - 1,
            sequence: layout.max_sequence() + 1,
        }
    }

    /// Switches to a newly acquired tenure without ever moving backward.
    pub fn rebase(&mut self, layout: &BitLayout, tenure: &Tenure) {
        let first = layout.first_unit_at_or_after(tenure.lease.effective_time);
        self.acquisition = tenure.acquisition;
        self.last_unit = self.last_unit.max(first.saturating_sub(1));
        self.sequence = layout.max_sequence() + 1;
    }

    /// Takes the next sequence for `unit`, or `None` if `last_unit` is used up.
    ///
    /// A unit at or below `last_unit` continues `last_unit`.
    pub fn advance(&mut self, layout: &BitLayout, unit: u64) -> Option<u64> {
        if unit > self.last_unit {
            self.last_unit = unit;
            self.sequence = 0;
        }
        if self.sequence > layout.max_sequence() {
            return None;
        }
        let sequence = self.sequence;
        self.sequence += 1;
        Some(sequence)
    }

    /// How long to back off once `last_unit` is used up at store time `now`.
    pub fn backoff(&self, layout: &BitLayout, strategy: ExhaustionStrategy, now: u64) -> Duration {
        match strategy {
            ExhaustionStrategy::BusyWait { interval } => interval,
            ExhaustionStrategy::SleepUntilNextUnit => {
                let next = layout.unit_start_millis(self.last_unit + 1);
                Duration::from_millis(next.saturating_sub(now).max(1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::Lease;

    fn tenure(effective_time: u64, acquisition: u64) -> Tenure {
        Tenure {
            lease: Lease {
                lease_id: 1,
                effective_time,
                expiry_time: effective_time + 1_000,
            },
            clock_offset: 0,
            acquisition,
        }
    }

    #[test]
    fn starts_exhausted_below_first_whole_unit() {
        let layout = BitLayout::TIMING_BRICK;
        let state = GenerationState::new(&layout, &tenure(16_005, 1));
        assert_eq!(state.last_unit, 1_000);
        assert_eq!(state.sequence, layout.max_sequence() + 1);

        let aligned = GenerationState::new(&layout, &tenure(16_000, 1));
        assert_eq!(aligned.last_unit, 999);
    }

    #[test]
    fn sequence_resets_only_on_unit_increase() {
        let layout = BitLayout::TIME_CHANNEL;
        let mut state = GenerationState::new(&layout, &tenure(100, 1));
        assert_eq!(state.advance(&layout, 100), Some(0));
        assert_eq!(state.advance(&layout, 100), Some(1));
        // Going backward keeps the current unit.
        assert_eq!(state.advance(&layout, 90), Some(2));
        assert_eq!(state.last_unit, 100);
        assert_eq!(state.advance(&layout, 101), Some(0));
    }

    #[test]
    fn exhausts_after_max_sequence() {
        let layout = BitLayout::new(51, 8, 4).unwrap();
        let mut state = GenerationState::new(&layout, &tenure(0, 1));
        for expected in 0..=15 {
            assert_eq!(state.advance(&layout, 5), Some(expected));
        }
        assert_eq!(state.advance(&layout, 5), None);
        assert_eq!(state.advance(&layout, 6), Some(0));
    }

    #[test]
    fn rebase_never_moves_backward() {
        let layout = BitLayout::TIME_CHANNEL;
        let mut state = GenerationState::new(&layout, &tenure(500, 1));
        state.advance(&layout, 800);

        state.rebase(&layout, &tenure(600, 2));
        assert_eq!(state.acquisition, 2);
        assert_eq!(state.last_unit, 800);
        assert_eq!(state.advance(&layout, 800), None);

        state.rebase(&layout, &tenure(900, 3));
        assert_eq!(state.last_unit, 899);
        assert_eq!(state.advance(&layout, 900), Some(0));
    }

    #[test]
    fn sleep_backoff_targets_next_unit_boundary() {
        let layout = BitLayout::TIMING_BRICK;
        let state = GenerationState {
            acquisition: 1,
            last_unit: 1_000,
            sequence: layout.max_sequence() + 1,
        };
        let strategy = ExhaustionStrategy::SleepUntilNextUnit;
        assert_eq!(
            state.backoff(&layout, strategy, 16_005),
            Duration::from_millis(11)
        );
        assert_eq!(
            state.backoff(&layout, strategy, 16_016),
            Duration::from_millis(1)
        );

        let busy = ExhaustionStrategy::BusyWait {
            interval: Duration::from_micros(5),
        };
        assert_eq!(state.backoff(&layout, busy, 16_005), Duration::from_micros(5));
    }
}
