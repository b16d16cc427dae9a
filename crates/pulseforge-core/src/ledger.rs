//! Per-user budget accounting.
//!
//! The ledger is the single source of truth for premium spend. It tracks
//! two rolling windows per user -- calendar day and calendar month,
//! evaluated in the user's timezone -- and offers an atomic, idempotent
//! `charge` keyed by pulse id: check and apply happen under one write
//! lock, never read-modify-write across it, and a replayed pulse id is a
//! no-op. The ledger refuses any charge that would breach a cap given the
//! value it last observed; concurrent admissions that raced a stale read
//! surface here as refusals, which are logged as alerts.
//!
//! Windows expire by clock, not by deletion: counters reset lazily when a
//! window boundary has passed at access time. Charge markers survive
//! window resets so a replay from a previous window still deduplicates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, NaiveDate};
use thiserror::Error;
use tracing::{debug, warn};

use pulseforge_types::TierPolicy;

use crate::clock::Clock;

/// Budget caps for one charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCaps {
    /// Daily cap in cents.
    pub daily_cents: u32,
    /// Monthly cap in cents.
    pub monthly_cents: u32,
}

impl From<TierPolicy> for WindowCaps {
    fn from(policy: TierPolicy) -> Self {
        Self {
            daily_cents: policy.daily_cents,
            monthly_cents: policy.monthly_cents,
        }
    }
}

/// Which window refused a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetWindowKind {
    Daily,
    Monthly,
}

/// Result of a charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The charge was applied to both windows.
    Applied,
    /// This pulse id was already charged; nothing changed.
    Duplicate,
    /// Applying the charge would breach a cap; nothing changed.
    CapExceeded {
        /// The window that refused.
        window: BudgetWindowKind,
    },
}

/// The ledger could not be reached.
#[derive(Error, Debug)]
#[error("ledger unavailable: {0}")]
pub struct LedgerError(pub String);

/// Spend observed for one user at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BudgetSnapshot {
    /// Cents spent in the current daily window.
    pub daily_used_cents: u32,
    /// Cents spent in the current monthly window.
    pub monthly_used_cents: u32,
}

/// Authoritative per-user spend accounting.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Current spend for a user; strongly consistent with the user's own
    /// writes.
    async fn read(&self, user_id: &str) -> Result<BudgetSnapshot, LedgerError>;

    /// Atomically charge `cents` against both windows, idempotent on
    /// `pulse_id`.
    async fn charge(
        &self,
        user_id: &str,
        cents: u32,
        pulse_id: &str,
        caps: &WindowCaps,
    ) -> Result<ChargeOutcome, LedgerError>;
}

// ── In-memory implementation ────────────────────────────────────────────

struct UserSpend {
    daily_cents: u32,
    monthly_cents: u32,
    day: NaiveDate,
    month: (i32, u32),
    charged_pulses: HashSet<String>,
}

impl UserSpend {
    fn new(today: NaiveDate) -> Self {
        Self {
            daily_cents: 0,
            monthly_cents: 0,
            day: today,
            month: (today.year(), today.month()),
            charged_pulses: HashSet::new(),
        }
    }

    fn maybe_reset(&mut self, today: NaiveDate) {
        if self.day != today {
            self.daily_cents = 0;
            self.day = today;
        }
        let month = (today.year(), today.month());
        if self.month != month {
            self.monthly_cents = 0;
            self.month = month;
        }
    }
}

/// An in-memory [`BudgetLedger`], used by tests and the single-process
/// runner. Window boundaries are evaluated against the injected clock in
/// each user's registered timezone (UTC when unregistered).
pub struct MemoryLedger {
    clock: Arc<dyn Clock>,
    spends: RwLock<HashMap<String, UserSpend>>,
    tz_offsets: RwLock<HashMap<String, i32>>,
}

impl MemoryLedger {
    /// An empty ledger over the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            spends: RwLock::new(HashMap::new()),
            tz_offsets: RwLock::new(HashMap::new()),
        }
    }

    /// Register a user's fixed UTC offset (minutes) for window resets.
    pub fn set_tz_offset(&self, user_id: &str, offset_minutes: i32) {
        self.tz_offsets
            .write()
            .expect("ledger tz lock poisoned")
            .insert(user_id.to_string(), offset_minutes);
    }

    fn local_date(&self, user_id: &str) -> NaiveDate {
        let offset_minutes = self
            .tz_offsets
            .read()
            .expect("ledger tz lock poisoned")
            .get(user_id)
            .copied()
            .unwrap_or(0);
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| {
            warn!(user_id, offset_minutes, "invalid tz offset, using UTC");
            FixedOffset::east_opt(0).expect("zero offset is valid")
        });
        self.clock.now().with_timezone(&offset).date_naive()
    }
}

#[async_trait]
impl BudgetLedger for MemoryLedger {
    async fn read(&self, user_id: &str) -> Result<BudgetSnapshot, LedgerError> {
        let today = self.local_date(user_id);
        let mut spends = self.spends.write().expect("ledger lock poisoned");
        let entry = spends
            .entry(user_id.to_string())
            .or_insert_with(|| UserSpend::new(today));
        entry.maybe_reset(today);
        Ok(BudgetSnapshot {
            daily_used_cents: entry.daily_cents,
            monthly_used_cents: entry.monthly_cents,
        })
    }

    async fn charge(
        &self,
        user_id: &str,
        cents: u32,
        pulse_id: &str,
        caps: &WindowCaps,
    ) -> Result<ChargeOutcome, LedgerError> {
        let today = self.local_date(user_id);
        let mut spends = self.spends.write().expect("ledger lock poisoned");
        let entry = spends
            .entry(user_id.to_string())
            .or_insert_with(|| UserSpend::new(today));
        entry.maybe_reset(today);

        if entry.charged_pulses.contains(pulse_id) {
            debug!(user_id, pulse_id, "duplicate charge suppressed");
            return Ok(ChargeOutcome::Duplicate);
        }

        if entry.daily_cents.saturating_add(cents) > caps.daily_cents {
            warn!(
                user_id,
                pulse_id,
                cents,
                daily_used = entry.daily_cents,
                daily_cap = caps.daily_cents,
                "charge refused: daily cap"
            );
            return Ok(ChargeOutcome::CapExceeded {
                window: BudgetWindowKind::Daily,
            });
        }
        if entry.monthly_cents.saturating_add(cents) > caps.monthly_cents {
            warn!(
                user_id,
                pulse_id,
                cents,
                monthly_used = entry.monthly_cents,
                monthly_cap = caps.monthly_cents,
                "charge refused: monthly cap"
            );
            return Ok(ChargeOutcome::CapExceeded {
                window: BudgetWindowKind::Monthly,
            });
        }

        entry.daily_cents += cents;
        entry.monthly_cents += cents;
        entry.charged_pulses.insert(pulse_id.to_string());
        Ok(ChargeOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    fn caps(daily: u32, monthly: u32) -> WindowCaps {
        WindowCaps {
            daily_cents: daily,
            monthly_cents: monthly,
        }
    }

    fn ledger_at(y: i32, mo: u32, d: u32, h: u32) -> (Arc<FixedClock>, MemoryLedger) {
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap(),
        ));
        let ledger = MemoryLedger::new(clock.clone());
        (clock, ledger)
    }

    #[tokio::test]
    async fn fresh_user_reads_zero() {
        let (_, ledger) = ledger_at(2025, 6, 15, 12);
        let snapshot = ledger.read("u-1").await.unwrap();
        assert_eq!(snapshot, BudgetSnapshot::default());
    }

    #[tokio::test]
    async fn charge_applies_to_both_windows() {
        let (_, ledger) = ledger_at(2025, 6, 15, 12);
        let outcome = ledger.charge("u-1", 2, "p-1", &caps(5, 8)).await.unwrap();
        assert_eq!(outcome, ChargeOutcome::Applied);

        let snapshot = ledger.read("u-1").await.unwrap();
        assert_eq!(snapshot.daily_used_cents, 2);
        assert_eq!(snapshot.monthly_used_cents, 2);
    }

    #[tokio::test]
    async fn repeated_pulse_id_does_not_double_count() {
        let (_, ledger) = ledger_at(2025, 6, 15, 12);
        ledger.charge("u-1", 2, "p-1", &caps(5, 8)).await.unwrap();
        let outcome = ledger.charge("u-1", 2, "p-1", &caps(5, 8)).await.unwrap();
        assert_eq!(outcome, ChargeOutcome::Duplicate);

        let snapshot = ledger.read("u-1").await.unwrap();
        assert_eq!(snapshot.daily_used_cents, 2);
        assert_eq!(snapshot.monthly_used_cents, 2);
    }

    #[tokio::test]
    async fn daily_cap_refuses_breaching_charge() {
        let (_, ledger) = ledger_at(2025, 6, 15, 12);
        ledger.charge("u-1", 4, "p-1", &caps(5, 100)).await.unwrap();
        let outcome = ledger.charge("u-1", 2, "p-2", &caps(5, 100)).await.unwrap();
        assert_eq!(
            outcome,
            ChargeOutcome::CapExceeded {
                window: BudgetWindowKind::Daily
            }
        );
        // A charge that fits exactly is allowed.
        let outcome = ledger.charge("u-1", 1, "p-3", &caps(5, 100)).await.unwrap();
        assert_eq!(outcome, ChargeOutcome::Applied);
        assert_eq!(ledger.read("u-1").await.unwrap().daily_used_cents, 5);
    }

    #[tokio::test]
    async fn monthly_cap_refuses_breaching_charge() {
        let (clock, ledger) = ledger_at(2025, 6, 15, 12);
        ledger.charge("u-1", 5, "p-1", &caps(5, 8)).await.unwrap();

        // Next day: daily resets, monthly carries.
        clock.advance(Duration::days(1));
        let outcome = ledger.charge("u-1", 4, "p-2", &caps(5, 8)).await.unwrap();
        assert_eq!(
            outcome,
            ChargeOutcome::CapExceeded {
                window: BudgetWindowKind::Monthly
            }
        );
        let snapshot = ledger.read("u-1").await.unwrap();
        assert_eq!(snapshot.daily_used_cents, 0);
        assert_eq!(snapshot.monthly_used_cents, 5);
    }

    #[tokio::test]
    async fn daily_window_resets_at_local_midnight() {
        let (clock, ledger) = ledger_at(2025, 6, 15, 23);
        ledger.charge("u-1", 3, "p-1", &caps(5, 100)).await.unwrap();

        clock.advance(Duration::hours(2));
        let snapshot = ledger.read("u-1").await.unwrap();
        assert_eq!(snapshot.daily_used_cents, 0);
        assert_eq!(snapshot.monthly_used_cents, 3);
    }

    #[tokio::test]
    async fn monthly_window_resets_on_month_boundary() {
        let (clock, ledger) = ledger_at(2025, 6, 30, 12);
        ledger.charge("u-1", 3, "p-1", &caps(5, 8)).await.unwrap();

        clock.advance(Duration::days(2));
        let snapshot = ledger.read("u-1").await.unwrap();
        assert_eq!(snapshot.monthly_used_cents, 0);
    }

    #[tokio::test]
    async fn timezone_offset_shifts_the_day_boundary() {
        // 23:30 UTC on June 15 is already June 16 at UTC+2.
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 15, 23, 30, 0).unwrap(),
        ));
        let ledger = MemoryLedger::new(clock.clone());
        ledger.set_tz_offset("u-east", 120);

        ledger
            .charge("u-east", 3, "p-1", &caps(5, 100))
            .await
            .unwrap();

        // 00:30 UTC June 16 is still June 16 locally: same daily window.
        clock.advance(Duration::hours(1));
        let snapshot = ledger.read("u-east").await.unwrap();
        assert_eq!(snapshot.daily_used_cents, 3);

        // But a UTC user charged at 23:30 resets an hour later.
        clock.set(Utc.with_ymd_and_hms(2025, 6, 15, 23, 30, 0).unwrap());
        ledger.charge("u-utc", 3, "p-2", &caps(5, 100)).await.unwrap();
        clock.advance(Duration::hours(1));
        assert_eq!(ledger.read("u-utc").await.unwrap().daily_used_cents, 0);
    }

    #[tokio::test]
    async fn replay_from_previous_window_still_deduplicates() {
        let (clock, ledger) = ledger_at(2025, 6, 15, 12);
        ledger.charge("u-1", 2, "p-1", &caps(5, 100)).await.unwrap();

        clock.advance(Duration::days(1));
        let outcome = ledger.charge("u-1", 2, "p-1", &caps(5, 100)).await.unwrap();
        assert_eq!(outcome, ChargeOutcome::Duplicate);
        assert_eq!(ledger.read("u-1").await.unwrap().daily_used_cents, 0);
    }

    // Budget safety property: concurrent charges never breach a cap.
    #[tokio::test]
    async fn concurrent_charges_never_breach_caps() {
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(MemoryLedger::new(clock));
        let caps = caps(10, 15);

        let mut handles = Vec::new();
        for worker in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let mut applied = 0u32;
                for i in 0..25 {
                    let pulse_id = format!("p-{worker}-{i}");
                    if let ChargeOutcome::Applied =
                        ledger.charge("u-1", 1, &pulse_id, &caps).await.unwrap()
                    {
                        applied += 1;
                    }
                }
                applied
            }));
        }

        let mut total_applied = 0;
        for handle in handles {
            total_applied += handle.await.unwrap();
        }

        let snapshot = ledger.read("u-1").await.unwrap();
        assert!(snapshot.daily_used_cents <= 10);
        assert!(snapshot.monthly_used_cents <= 15);
        // Applied charges and observed spend agree.
        assert_eq!(total_applied, snapshot.monthly_used_cents);
    }
}
