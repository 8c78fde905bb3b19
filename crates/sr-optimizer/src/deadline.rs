//! Wall-clock deadlines checked at loop boundaries.

use std::time::{Duration, Instant};

use sr_types::{SrError, SrResult, Stage};

/// A cooperative deadline owned by one pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    stage: Stage,
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn start(stage: Stage, limit: Duration) -> Self {
        Self {
            stage,
            started: Instant::now(),
            limit,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.limit
    }

    /// `Err(Timeout)` once the limit has passed.
    pub fn check(&self) -> SrResult<()> {
        if self.expired() {
            Err(SrError::Timeout {
                stage: self.stage,
                limit_ms: self.limit.as_millis() as u64,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_expires_immediately() {
        let deadline = Deadline::start(Stage::Compile, Duration::ZERO);
        assert!(deadline.expired());
        match deadline.check() {
            Err(SrError::Timeout { stage, limit_ms }) => {
                assert_eq!(stage, Stage::Compile);
                assert_eq!(limit_ms, 0);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn generous_limit_does_not_expire() {
        let deadline = Deadline::start(Stage::Simplify, Duration::from_secs(60));
        assert!(!deadline.expired());
        assert!(deadline.check().is_ok());
    }
}
