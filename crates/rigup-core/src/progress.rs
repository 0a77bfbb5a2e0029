//! Phase-weighted progress estimation and non-blocking progress delivery.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Percentage and remaining-time estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub percent: u8,
    /// `None` until at least one phase has completed
    pub remaining: Option<Duration>,
}

/// Converts phase completions into a percentage and ETA.
///
/// The percentage never decreases and reaches 100 only once the last phase
/// completes. Remaining time is `elapsed / done * (100 - done)`.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    phases: Vec<(String, u32)>,
    total_weight: u32,
    completed: usize,
    last_percent: u8,
    started: Instant,
}

impl ProgressEstimator {
    /// Ordered phases with relative weights. Zero weights count as one.
    pub fn new(phases: &[(&str, u32)]) -> Self {
        let phases: Vec<(String, u32)> = phases
            .iter()
            .map(|(name, w)| (name.to_string(), (*w).max(1)))
            .collect();
        let total_weight = phases.iter().map(|(_, w)| *w).sum();
        Self {
            phases,
            total_weight,
            completed: 0,
            last_percent: 0,
            started: Instant::now(),
        }
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Percentage once `completed` phases are done. Pure.
    pub fn percent_for(&self, completed: usize) -> u8 {
        if self.phases.is_empty() || completed >= self.phases.len() {
            return 100;
        }
        let done: u32 = self.phases[..completed].iter().map(|(_, w)| *w).sum();
        let pct = (u64::from(done) * 100 / u64::from(self.total_weight)) as u8;
        pct.min(99)
    }

    /// Estimate for `completed` phases after `elapsed`. Pure.
    pub fn estimate(&self, completed: usize, elapsed: Duration) -> Estimate {
        let percent = self.percent_for(completed);
        let remaining = if completed == 0 || percent == 0 {
            None
        } else {
            let left = u32::from(100 - percent);
            Some(elapsed.mul_f64(f64::from(left) / f64::from(percent)))
        };
        Estimate { percent, remaining }
    }

    /// Mark `phase` (and everything before it) complete.
    ///
    /// Unknown names and already-completed phases leave progress unchanged.
    pub fn complete_phase(&mut self, phase: &str) -> Estimate {
        if let Some(idx) = self.phases.iter().position(|(name, _)| name == phase) {
            self.completed = self.completed.max(idx + 1);
        }
        self.current()
    }

    /// Mark every phase complete (terminal states).
    pub fn finish(&mut self) -> Estimate {
        self.completed = self.phases.len();
        self.current()
    }

    pub fn current(&mut self) -> Estimate {
        let mut est = self.estimate(self.completed, self.started.elapsed());
        est.percent = est.percent.max(self.last_percent);
        self.last_percent = est.percent;
        est
    }
}

/// One progress message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub phase: String,
    pub percent: u8,
    pub message: String,
    pub eta_secs: Option<u64>,
}

/// Sending half of a progress stream.
///
/// Sends never block: a full or closed channel drops the update, and a sink
/// without a channel ignores everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ProgressSink {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Bounded channel of `capacity` (at least 1).
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Returns whether the update was queued.
    pub fn send(&self, update: ProgressUpdate) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(u)) => {
                trace!(phase = %u.phase, "progress channel full, update dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ProgressEstimator {
        ProgressEstimator::new(&[("a", 1), ("b", 3), ("c", 1)])
    }

    #[test]
    fn test_percent_weighted_and_capped() {
        let e = estimator();
        assert_eq!(e.percent_for(0), 0);
        assert_eq!(e.percent_for(1), 20);
        assert_eq!(e.percent_for(2), 80);
        assert_eq!(e.percent_for(3), 100);
    }

    #[test]
    fn test_never_100_before_last_phase() {
        let e = ProgressEstimator::new(&[("big", 1000), ("tiny", 1)]);
        assert_eq!(e.percent_for(1), 99);
    }

    #[test]
    fn test_eta_none_before_first_phase() {
        assert_eq!(estimator().estimate(0, Duration::from_secs(10)).remaining, None);
    }

    #[test]
    fn test_eta_formula() {
        // 20% done in 10s: 40s remain
        let est = estimator().estimate(1, Duration::from_secs(10));
        assert_eq!(est.remaining, Some(Duration::from_secs(40)));
        assert_eq!(estimator().estimate(3, Duration::from_secs(10)).remaining, Some(Duration::ZERO));
    }

    #[test]
    fn test_complete_phase_is_monotone() {
        let mut e = estimator();
        assert_eq!(e.complete_phase("b").percent, 80);
        assert_eq!(e.complete_phase("a").percent, 80);
        assert_eq!(e.complete_phase("unknown").percent, 80);
        assert_eq!(e.finish().percent, 100);
    }

    #[tokio::test]
    async fn test_sink_drops_when_full() {
        let (sink, mut rx) = ProgressSink::channel(1);
        let update = |p| ProgressUpdate {
            session_id: "s".to_string(),
            phase: "planning".to_string(),
            percent: p,
            message: String::new(),
            eta_secs: None,
        };
        assert!(sink.send(update(1)));
        assert!(!sink.send(update(2)));
        assert_eq!(rx.recv().await.unwrap().percent, 1);
    }

    #[test]
    fn test_sink_without_consumer_never_blocks() {
        assert!(!ProgressSink::none().send(ProgressUpdate {
            session_id: "s".to_string(),
            phase: "p".to_string(),
            percent: 0,
            message: String::new(),
            eta_secs: None,
        }));

        let (sink, rx) = ProgressSink::channel(4);
        drop(rx);
        assert!(!sink.send(ProgressUpdate {
            session_id: "s".to_string(),
            phase: "p".to_string(),
            percent: 0,
            message: String::new(),
            eta_secs: None,
        }));
    }
}
