//! Provisional receipt (RPS) numbers.
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest value accepted by the `Numero` field of an RPS (15 digits).
pub const MAX_RPS_NUMBER: u64 = 999_999_999_999_999;

/// A provisional receipt number, unique per submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RpsNumber(u64);

impl RpsNumber {
    /// Wrap an explicit number, e.g. one read back from storage.
    ///
    /// Returns `None` for zero or values longer than 15 digits.
    pub fn new(value: u64) -> Option<Self> {
        (1..=MAX_RPS_NUMBER).contains(&value).then_some(Self(value))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// `Id` attribute of the signed declaration for this receipt.
    pub fn element_id(&self) -> String {
        format!("rps{}", self.0)
    }
}

impl fmt::Display for RpsNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of receipt numbers.
pub trait RpsNumberSource: Send + Sync {
    fn next_number(&self) -> RpsNumber;
}

/// Strictly increasing numbers seeded from the wall clock.
///
/// Each number is at least the current time in milliseconds and always
/// greater than the previous one handed out by this source, so rapid retries
/// never reuse a value even when the clock stalls or steps back.
#[derive(Debug, Default)]
pub struct MonotonicRpsNumbers {
    last: AtomicU64,
}

impl MonotonicRpsNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self, now_millis: u64) -> RpsNumber {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now_millis.max(current + 1).clamp(1, MAX_RPS_NUMBER);
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return RpsNumber(candidate),
                Err(actual) => current = actual,
            }
        }
    }
}

impl RpsNumberSource for MonotonicRpsNumbers {
    fn next_number(&self) -> RpsNumber {
        self.issue(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }
}

/// Random numbers drawn from the whole 15-digit range.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRpsNumbers;

impl RpsNumberSource for RandomRpsNumbers {
    fn next_number(&self) -> RpsNumber {
        RpsNumber(rand::thread_rng().gen_range(1..=MAX_RPS_NUMBER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_numbers_increase_when_clock_stalls() {
        let source = MonotonicRpsNumbers::new();
        let first = source.issue(1_700_000_000_000);
        let second = source.issue(1_700_000_000_000);
        let third = source.issue(1_699_999_999_000);
        assert_eq!(first.value(), 1_700_000_000_000);
        assert_eq!(second.value(), 1_700_000_000_001);
        assert_eq!(third.value(), 1_700_000_000_002);
    }

    #[test]
    fn monotonic_numbers_follow_clock_forward() {
        let source = MonotonicRpsNumbers::new();
        source.issue(1_000);
        assert_eq!(source.issue(5_000).value(), 5_000);
    }

    #[test]
    fn monotonic_numbers_are_unique_across_threads() {
        let source = std::sync::Arc::new(MonotonicRpsNumbers::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = source.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| source.next_number()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<RpsNumber> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn random_numbers_fit_the_schema() {
        let source = RandomRpsNumbers;
        for _ in 0..100 {
            let number = source.next_number().value();
            assert!((1..=MAX_RPS_NUMBER).contains(&number));
        }
    }

    #[test]
    fn element_id_prefixes_number() {
        let number = RpsNumber::new(1234).expect("valid");
        assert_eq!(number.element_id(), "rps1234");
        assert!(RpsNumber::new(0).is_none());
        assert!(RpsNumber::new(MAX_RPS_NUMBER + 1).is_none());
    }
}
