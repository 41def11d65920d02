//! Abstract wall-clock so store and manager logic can be tested without
//! real sleeps or racing against `Utc::now()`.

use chrono::{DateTime, Utc};

pub trait DateTimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl DateTimeProvider for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
#[derive(Clone)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl DateTimeProvider for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }

    #[test]
    fn fixed_clock_stays_fixed() {
        let t = Utc::now();
        let clock = FixedClock(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), clock.now());
    }
}
