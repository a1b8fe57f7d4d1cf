//! Job entity module
//!
//! A Job binds a mapping to a schedule and to execution policy: priority,
//! timeout, retries and dependencies on other jobs. The scheduler computes
//! `next_execution_at` from the schedule; the runner enforces the policy.

use chrono::{DateTime, Datelike, Duration, Months, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::error::CoreError;
use crate::domain::value_objects::Priority;

/// Unit of a recurring schedule's interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

/// When and how often a job fires
///
/// The wire form is a tagged object (`{"type": "recurring", ...}`) matching
/// the schedule-expression interface. Cron expressions use the standard
/// five fields (`min hour day-of-month month day-of-week`) and are evaluated
/// in the configured timezone; an hour skipped by a spring-forward
/// transition does not fire, and an hour repeated by fall-back fires once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Never fires automatically
    Manual,
    /// Fires once when the job is activated, then behaves as manual
    Immediate,
    /// Fires once at the given instant (immediately if already past)
    Once { fire_at: DateTime<Utc> },
    /// Fires at `start + k * interval` for every integer `k >= 0`
    Recurring {
        start: DateTime<Utc>,
        interval_count: u32,
        interval_unit: IntervalUnit,
    },
    /// Five-field cron expression evaluated in `tz`
    Cron { expr: String, tz: String },
}

impl Schedule {
    /// Computes the next firing instant at or after `now`
    ///
    /// `last_fired` suppresses re-firing of one-shot schedules and forces
    /// recurring schedules strictly past the previous firing.
    ///
    /// # Arguments
    ///
    /// * `now` - The current instant
    /// * `last_fired` - The most recent firing, if any
    ///
    /// # Returns
    ///
    /// The next firing time, or `None` when the schedule will not fire again
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, CoreError> {
        match self {
            Schedule::Manual => Ok(None),
            Schedule::Immediate => Ok(if last_fired.is_none() { Some(now) } else { None }),
            Schedule::Once { fire_at } => Ok(if last_fired.is_some() {
                None
            } else {
                Some((*fire_at).max(now))
            }),
            Schedule::Recurring {
                start,
                interval_count,
                interval_unit,
            } => {
                if *interval_count == 0 {
                    return Err(CoreError::validation("recurring interval must be positive"));
                }
                let floor = match last_fired {
                    // Strictly after the last firing, never before now
                    Some(last) => now.max(last + Duration::milliseconds(1)),
                    None => now,
                };
                Ok(Some(next_recurring(*start, *interval_count, *interval_unit, floor)))
            }
            Schedule::Cron { expr, tz } => {
                let schedule = parse_cron(expr)?;
                let zone: Tz = tz
                    .parse()
                    .map_err(|_| CoreError::validation(format!("unknown timezone '{}'", tz)))?;
                let after = now.with_timezone(&zone);
                Ok(schedule
                    .after(&after)
                    .next()
                    .map(|t| t.with_timezone(&Utc)))
            }
        }
    }

    /// Validates the schedule definition without computing a firing time
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Schedule::Recurring { interval_count, .. } if *interval_count == 0 => {
                Err(CoreError::validation("recurring interval must be positive"))
            }
            Schedule::Cron { expr, tz } => {
                parse_cron(expr)?;
                tz.parse::<Tz>()
                    .map(|_| ())
                    .map_err(|_| CoreError::validation(format!("unknown timezone '{}'", tz)))
            }
            _ => Ok(()),
        }
    }
}

/// Parses a five-field cron expression
///
/// The `cron` crate wants a seconds field, so a literal `0` is prepended;
/// anything other than exactly five fields is rejected before that.
fn parse_cron(expr: &str) -> Result<cron::Schedule, CoreError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(CoreError::validation(format!(
            "cron expression must have 5 fields, got {}",
            fields
        )));
    }
    cron::Schedule::from_str(&format!("0 {}", expr))
        .map_err(|e| CoreError::validation(format!("invalid cron expression '{}': {}", expr, e)))
}

/// Smallest `start + k * interval >= floor` with `k >= 0`
fn next_recurring(
    start: DateTime<Utc>,
    count: u32,
    unit: IntervalUnit,
    floor: DateTime<Utc>,
) -> DateTime<Utc> {
    if floor <= start {
        return start;
    }
    match unit {
        IntervalUnit::Months => {
            // Calendar months have no fixed duration; step from an estimate.
            let approx_months =
                (floor.year() - start.year()) * 12 + floor.month() as i32 - start.month() as i32;
            let mut k = (approx_months / count as i32 - 1).max(0) as u32;
            loop {
                let candidate = start + Months::new(k * count);
                if candidate >= floor {
                    return candidate;
                }
                k += 1;
            }
        }
        _ => {
            let interval = match unit {
                IntervalUnit::Minutes => Duration::minutes(count as i64),
                IntervalUnit::Hours => Duration::hours(count as i64),
                IntervalUnit::Days => Duration::days(count as i64),
                IntervalUnit::Weeks => Duration::weeks(count as i64),
                IntervalUnit::Months => unreachable!(),
            };
            let elapsed_ms = (floor - start).num_milliseconds();
            let interval_ms = interval.num_milliseconds();
            let k = (elapsed_ms + interval_ms - 1) / interval_ms;
            start + Duration::milliseconds(k * interval_ms)
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Inactive,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Checks a transition against the job state machine
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Inactive, Scheduled)
                | (Scheduled, Running)
                | (Scheduled, Paused)
                | (Scheduled, Inactive)
                | (Running, Scheduled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Paused, Scheduled)
                | (Paused, Inactive)
                | (Failed, Scheduled)
                | (Completed, Scheduled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A scheduled unit of work executing one mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub mapping_id: Uuid,
    pub schedule: Schedule,
    pub priority: Priority,
    pub active: bool,
    pub status: JobStatus,
    /// Free-form execution parameters handed to each execution
    #[serde(default)]
    pub configuration: HashMap<String, serde_json::Value>,
    /// Wall-clock budget per execution; `None` means unlimited
    pub timeout_seconds: Option<u64>,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Jobs whose most recent terminal execution must be completed before
    /// this job is admitted
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, managed by the persistence gateway
    pub version: u64,
}

impl Job {
    /// Creates an inactive job with default retry policy
    pub fn new(name: impl Into<String>, mapping_id: Uuid, schedule: Schedule) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            mapping_id,
            schedule,
            priority: Priority::default(),
            active: false,
            status: JobStatus::Inactive,
            configuration: HashMap::new(),
            timeout_seconds: None,
            max_retries: 3,
            retry_delay_seconds: 60,
            tags: Vec::new(),
            dependencies: Vec::new(),
            next_execution_at: None,
            last_fired_at: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Recomputes `next_execution_at` from the schedule
    ///
    /// Inactive jobs never have a next execution. Called by the persistence
    /// gateway whenever the schedule or active flag changes, and by the
    /// scheduler after each firing.
    pub fn recompute_next_execution(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.next_execution_at = if self.active {
            self.schedule.next_fire(now, self.last_fired_at)?
        } else {
            None
        };
        Ok(())
    }

    /// True when the job is ready to be picked up by the scheduler's hot query
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.status == JobStatus::Scheduled
            && self.next_execution_at.is_some_and(|t| t <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_manual_never_fires() {
        let schedule = Schedule::Manual;
        assert_eq!(schedule.next_fire(Utc::now(), None).unwrap(), None);
    }

    #[test]
    fn test_immediate_fires_once() {
        let now = Utc::now();
        let schedule = Schedule::Immediate;
        assert_eq!(schedule.next_fire(now, None).unwrap(), Some(now));
        assert_eq!(schedule.next_fire(now, Some(now)).unwrap(), None);
    }

    #[test]
    fn test_once_in_past_fires_now() {
        let now = utc("2024-06-01T12:00:00Z");
        let schedule = Schedule::Once {
            fire_at: utc("2024-01-01T00:00:00Z"),
        };
        assert_eq!(schedule.next_fire(now, None).unwrap(), Some(now));
        assert_eq!(schedule.next_fire(now, Some(now)).unwrap(), None);
    }

    #[test]
    fn test_recurring_quarter_hour() {
        let schedule = Schedule::Recurring {
            start: utc("2024-01-01T00:00:00Z"),
            interval_count: 15,
            interval_unit: IntervalUnit::Minutes,
        };

        // Just before a boundary: next firing is the boundary itself.
        assert_eq!(
            schedule
                .next_fire(utc("2024-01-01T00:14:59Z"), None)
                .unwrap(),
            Some(utc("2024-01-01T00:15:00Z"))
        );
        // Exactly on a boundary: fires now.
        assert_eq!(
            schedule
                .next_fire(utc("2024-01-01T00:15:00Z"), None)
                .unwrap(),
            Some(utc("2024-01-01T00:15:00Z"))
        );
        // After firing at 00:15, the next slot is 00:30.
        assert_eq!(
            schedule
                .next_fire(
                    utc("2024-01-01T00:16:00Z"),
                    Some(utc("2024-01-01T00:15:00Z"))
                )
                .unwrap(),
            Some(utc("2024-01-01T00:30:00Z"))
        );
    }

    #[test]
    fn test_recurring_before_start_fires_at_start() {
        let schedule = Schedule::Recurring {
            start: utc("2030-01-01T00:00:00Z"),
            interval_count: 1,
            interval_unit: IntervalUnit::Hours,
        };
        assert_eq!(
            schedule.next_fire(utc("2024-01-01T00:00:00Z"), None).unwrap(),
            Some(utc("2030-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_recurring_monthly_uses_calendar_months() {
        let schedule = Schedule::Recurring {
            start: utc("2024-01-31T09:00:00Z"),
            interval_count: 1,
            interval_unit: IntervalUnit::Months,
        };
        let next = schedule
            .next_fire(utc("2024-02-01T00:00:00Z"), None)
            .unwrap()
            .unwrap();
        // Jan 31 + 1 month clamps to Feb 29 (2024 is a leap year).
        assert_eq!(next, utc("2024-02-29T09:00:00Z"));
    }

    #[test]
    fn test_cron_five_fields_required() {
        let bad = Schedule::Cron {
            expr: "* * * *".to_string(),
            tz: "UTC".to_string(),
        };
        assert!(bad.validate().is_err());

        let good = Schedule::Cron {
            expr: "30 9 * * 1-5".to_string(),
            tz: "Asia/Seoul".to_string(),
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_cron_next_in_timezone() {
        let schedule = Schedule::Cron {
            expr: "0 9 * * *".to_string(),
            tz: "Asia/Seoul".to_string(),
        };
        // 2024-06-01 23:30 UTC = 2024-06-02 08:30 KST; next 09:00 KST
        // is 2024-06-02 00:00 UTC.
        let next = schedule
            .next_fire(utc("2024-06-01T23:30:00Z"), None)
            .unwrap()
            .unwrap();
        assert_eq!(next, utc("2024-06-02T00:00:00Z"));
    }

    #[test]
    fn test_cron_spring_forward_skips_missing_hour() {
        // America/New_York jumps 02:00 -> 03:00 on 2024-03-10; 02:30 does
        // not exist that day, so the firing lands on the next day.
        let schedule = Schedule::Cron {
            expr: "30 2 * * *".to_string(),
            tz: "America/New_York".to_string(),
        };
        let next = schedule
            .next_fire(utc("2024-03-10T05:00:00Z"), None)
            .unwrap()
            .unwrap();
        let ny: Tz = "America/New_York".parse().unwrap();
        let local = next.with_timezone(&ny);
        assert_eq!(local.date_naive().to_string(), "2024-03-11");
    }

    #[test]
    fn test_status_machine() {
        use JobStatus::*;
        assert!(Inactive.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Failed));
        assert!(Paused.can_transition_to(Scheduled));
        assert!(!Inactive.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn test_recompute_clears_when_inactive() {
        let mut job = Job::new("nightly", Uuid::new_v4(), Schedule::Immediate);
        job.active = false;
        job.recompute_next_execution(Utc::now()).unwrap();
        assert!(job.next_execution_at.is_none());

        job.active = true;
        job.recompute_next_execution(Utc::now()).unwrap();
        assert!(job.next_execution_at.is_some());
    }

    proptest::proptest! {
        /// Every recurring firing lies on the grid `start + k * interval`
        /// with `k >= 0`, at or after `now`, and less than one interval away.
        #[test]
        fn prop_recurring_firings_on_grid(
            interval_minutes in 1u32..=10_000,
            now_offset_seconds in -100_000i64..1_000_000,
        ) {
            let start = utc("2024-01-01T00:00:00Z");
            let schedule = Schedule::Recurring {
                start,
                interval_count: interval_minutes,
                interval_unit: IntervalUnit::Minutes,
            };
            let now = start + Duration::seconds(now_offset_seconds);
            let next = schedule.next_fire(now, None).unwrap().unwrap();

            let interval_ms = interval_minutes as i64 * 60_000;
            let offset_ms = (next - start).num_milliseconds();
            proptest::prop_assert!(offset_ms >= 0);
            proptest::prop_assert_eq!(offset_ms % interval_ms, 0);
            proptest::prop_assert!(next >= now);
            proptest::prop_assert!((next - now).num_milliseconds() < interval_ms.max(1));
        }

        /// Advancing the clock by one interval advances the firing by one
        /// interval: `next(t + i) = next(t) + i` on the grid.
        #[test]
        fn prop_recurring_shift_invariance(
            interval_minutes in 1u32..=1_000,
            now_offset_seconds in 0i64..1_000_000,
        ) {
            let start = utc("2024-01-01T00:00:00Z");
            let schedule = Schedule::Recurring {
                start,
                interval_count: interval_minutes,
                interval_unit: IntervalUnit::Minutes,
            };
            let interval = Duration::minutes(interval_minutes as i64);
            let now = start + Duration::seconds(now_offset_seconds);

            let next = schedule.next_fire(now, None).unwrap().unwrap();
            let shifted = schedule.next_fire(now + interval, None).unwrap().unwrap();
            proptest::prop_assert_eq!(shifted, next + interval);
        }
    }

    #[test]
    fn test_is_due() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap();
        let mut job = Job::new(
            "quarter-hourly",
            Uuid::new_v4(),
            Schedule::Recurring {
                start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                interval_count: 15,
                interval_unit: IntervalUnit::Minutes,
            },
        );
        job.active = true;
        job.status = JobStatus::Scheduled;
        job.recompute_next_execution(now).unwrap();
        assert!(job.is_due(now));
        assert!(!job.is_due(now - Duration::minutes(1)));
    }
}
