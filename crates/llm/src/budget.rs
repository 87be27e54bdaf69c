//! Daily spend budget
//!
//! A process-wide estimated-USD counter with atomic updates. The counter
//! rolls over at UTC midnight; the clock is injectable so tests can drive
//! the rollover.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use langhook_config::GateBudgetSettings;

use crate::error::LlmError;
use crate::Result;

/// Time source for rollover decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Outcome of charging a cost
#[derive(Debug, Clone, Copy)]
pub struct BudgetStatus {
    /// Total estimated spend today, including this charge
    pub spent_usd: f64,
    /// This charge crossed the alert threshold for the first time today
    pub alert_crossed: bool,
    /// This charge crossed the cap for the first time today
    pub exhausted_crossed: bool,
}

/// Process-wide daily budget counter
///
/// Spend is tracked in integer micro-dollars so charges stay atomic.
pub struct Budget {
    limit_micros: u64,
    alert_micros: u64,
    spent_micros: AtomicU64,
    /// UTC day number the counters belong to
    day: AtomicI64,
    /// Day for which the threshold alert already fired, -1 when none
    alerted_day: AtomicI64,
    /// Day for which the exhaustion alert already fired, -1 when none
    exhausted_day: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl Budget {
    pub fn new(settings: &GateBudgetSettings, clock: Arc<dyn Clock>) -> Self {
        let limit_micros = to_micros(settings.daily_cost_limit_usd);
        let alert_micros = to_micros(settings.daily_cost_limit_usd * settings.cost_alert_threshold);
        let day = day_number(clock.now());

        Self {
            limit_micros,
            alert_micros,
            spent_micros: AtomicU64::new(0),
            day: AtomicI64::new(day),
            alerted_day: AtomicI64::new(-1),
            exhausted_day: AtomicI64::new(-1),
            clock,
        }
    }

    /// Fail with `budget-exhausted` when today's spend has reached the cap
    pub fn check(&self) -> Result<()> {
        self.rollover();
        if self.limit_micros > 0 && self.spent_micros.load(Ordering::Relaxed) >= self.limit_micros
        {
            return Err(LlmError::BudgetExhausted);
        }
        Ok(())
    }

    /// Record a charge and report threshold crossings
    pub fn charge(&self, cost_usd: f64) -> BudgetStatus {
        self.rollover();

        let charge = to_micros(cost_usd.max(0.0));
        let previous = self.spent_micros.fetch_add(charge, Ordering::Relaxed);
        let total = previous + charge;

        let today = self.day.load(Ordering::Relaxed);

        let alert_crossed = self.limit_micros > 0
            && total >= self.alert_micros
            && self
                .alerted_day
                .compare_exchange(-1, today, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok();

        let exhausted_crossed = self.limit_micros > 0
            && total >= self.limit_micros
            && self
                .exhausted_day
                .compare_exchange(-1, today, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok();

        BudgetStatus {
            spent_usd: total as f64 / 1_000_000.0,
            alert_crossed,
            exhausted_crossed,
        }
    }

    /// Estimated spend today in USD
    pub fn spent_today_usd(&self) -> f64 {
        self.rollover();
        self.spent_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Reset counters when the UTC day changed
    fn rollover(&self) {
        let today = day_number(self.clock.now());
        let stored = self.day.load(Ordering::Relaxed);
        if stored == today {
            return;
        }
        if self
            .day
            .compare_exchange(stored, today, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.spent_micros.store(0, Ordering::Relaxed);
            self.alerted_day.store(-1, Ordering::Relaxed);
            self.exhausted_day.store(-1, Ordering::Relaxed);
            tracing::info!("llm budget rolled over for a new UTC day");
        }
    }
}

fn to_micros(usd: f64) -> u64 {
    (usd * 1_000_000.0).round() as u64
}

fn day_number(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(86_400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn at(now: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(now),
            })
        }

        fn advance_to(&self, now: DateTime<Utc>) {
            *self.now.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn settings(limit: f64, threshold: f64) -> GateBudgetSettings {
        GateBudgetSettings {
            daily_cost_limit_usd: limit,
            cost_alert_threshold: threshold,
        }
    }

    #[test]
    fn test_cap_and_alerts() {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let budget = Budget::new(&settings(0.01, 0.8), clock);

        budget.check().unwrap();

        // below threshold: nothing fires
        let status = budget.charge(0.005);
        assert!(!status.alert_crossed);
        assert!(!status.exhausted_crossed);

        // crossing threshold fires the alert exactly once
        let status = budget.charge(0.004);
        assert!(status.alert_crossed);
        let status = budget.charge(0.0001);
        assert!(!status.alert_crossed);

        // crossing the cap
        let status = budget.charge(0.01);
        assert!(status.exhausted_crossed);
        assert!(matches!(budget.check(), Err(LlmError::BudgetExhausted)));
    }

    #[test]
    fn test_utc_rollover_resets() {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 0).unwrap());
        let budget = Budget::new(&settings(0.01, 0.8), Arc::clone(&clock) as Arc<dyn Clock>);

        budget.charge(0.02);
        assert!(budget.check().is_err());

        clock.advance_to(Utc.with_ymd_and_hms(2024, 6, 2, 0, 1, 0).unwrap());
        assert!(budget.check().is_ok());
        assert_eq!(budget.spent_today_usd(), 0.0);

        // alerts can fire again on the new day
        let status = budget.charge(0.02);
        assert!(status.alert_crossed);
        assert!(status.exhausted_crossed);
    }

    #[test]
    fn test_zero_limit_disables_cap() {
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let budget = Budget::new(&settings(0.0, 0.8), clock);

        let status = budget.charge(5.0);
        assert!(!status.alert_crossed);
        assert!(!status.exhausted_crossed);
        budget.check().unwrap();
    }
}
