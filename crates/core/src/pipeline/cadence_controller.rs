use crate::shared::error::PipelineError;

/// What the consumer loop should do with the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CadenceDecision {
    /// Invoke the detector.
    Run,
    /// Redraw the previous detection result.
    Reuse,
}

/// Deterministic run-every-Nth-frame schedule.
///
/// Position 0 of each cycle runs the detector; the remaining `N - 1`
/// positions reuse its result.
#[derive(Debug)]
pub struct CadenceController {
    interval: usize,
    position: usize,
}

impl CadenceController {
    pub fn new(interval: usize) -> Result<Self, PipelineError> {
        if interval < 2 {
            return Err(PipelineError::InvalidInterval(interval));
        }
        Ok(Self {
            interval,
            position: 0,
        })
    }

    /// Decision for the current position, then step forward.
    pub fn advance(&mut self) -> CadenceDecision {
        let decision = if self.position == 0 {
            CadenceDecision::Run
        } else {
            CadenceDecision::Reuse
        };
        self.position = (self.position + 1) % self.interval;
        decision
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    fn test_interval_below_two_rejected(#[case] interval: usize) {
        assert!(matches!(
            CadenceController::new(interval),
            Err(PipelineError::InvalidInterval(n)) if n == interval
        ));
    }

    #[test]
    fn test_first_advance_runs() {
        let mut cadence = CadenceController::new(3).unwrap();
        assert_eq!(cadence.advance(), CadenceDecision::Run);
        assert_eq!(cadence.advance(), CadenceDecision::Reuse);
        assert_eq!(cadence.advance(), CadenceDecision::Reuse);
        assert_eq!(cadence.advance(), CadenceDecision::Run);
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(7)]
    fn test_exactly_one_run_per_window(#[case] interval: usize) {
        let mut cadence = CadenceController::new(interval).unwrap();
        let decisions: Vec<_> = (0..interval * 20).map(|_| cadence.advance()).collect();
        for window in decisions.windows(interval) {
            let runs = window.iter().filter(|d| **d == CadenceDecision::Run).count();
            assert_eq!(runs, 1);
        }
        for (i, d) in decisions.iter().enumerate() {
            assert_eq!(*d == CadenceDecision::Run, i % interval == 0);
        }
    }

    #[test]
    fn test_position_wraps() {
        let mut cadence = CadenceController::new(2).unwrap();
        assert_eq!(cadence.position(), 0);
        cadence.advance();
        assert_eq!(cadence.position(), 1);
        cadence.advance();
        assert_eq!(cadence.position(), 0);
        assert_eq!(cadence.interval(), 2);
    }
}
