//! Search windows for a rule run: date math, gaps and catch-up tuples

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::ExecutionTuple;

static DATE_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^now(?:[+-]\d+[smhdw])*$").expect("valid date math regex"));

static DATE_MATH_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([+-])(\d+)([smhdw])").expect("valid date math offset regex"));

/// Resolve a date math expression (`now`, `now-6m`, `now-1d+2h`) or an
/// RFC 3339 timestamp relative to `now`.
pub fn parse_date_math(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let expr = expr.trim();

    if DATE_MATH.is_match(expr) {
        let mut resolved = now;
        for caps in DATE_MATH_OFFSET.captures_iter(expr) {
            let amount: i64 = caps[2]
                .parse()
                .map_err(|_| Error::validation(format!("invalid date math amount in '{expr}'")))?;
            let offset = match &caps[3] {
                "s" => Duration::try_seconds(amount),
                "m" => Duration::try_minutes(amount),
                "h" => Duration::try_hours(amount),
                "d" => Duration::try_days(amount),
                _ => Duration::try_weeks(amount),
            };
            let shifted = offset.and_then(|offset| {
                if &caps[1] == "-" {
                    resolved.checked_sub_signed(offset)
                } else {
                    resolved.checked_add_signed(offset)
                }
            });
            resolved = shifted
                .ok_or_else(|| Error::validation(format!("date math out of range in '{expr}'")))?;
        }
        return Ok(resolved);
    }

    DateTime::parse_from_rfc3339(expr)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::validation(format!("cannot parse date math expression '{expr}'")))
}

/// Parse a rule interval such as `5m` or `1h`
pub fn parse_interval(interval: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(interval.trim())
        .map_err(|e| Error::validation(format!("invalid interval '{interval}': {e}")))?;
    Duration::from_std(std_duration)
        .map_err(|e| Error::validation(format!("interval '{interval}' out of range: {e}")))
}

/// Scheduling facts needed to compute the search windows of a run
#[derive(Debug, Clone)]
pub struct RangeRequest<'a> {
    /// Start of the previous run, if any
    pub previous_started_at: Option<DateTime<Utc>>,
    /// Start of the current run
    pub started_at: DateTime<Utc>,
    /// Window start expression
    pub from: &'a str,
    /// Window end expression
    pub to: &'a str,
    /// Rule interval expression
    pub interval: &'a str,
    /// Signal budget per tuple
    pub max_signals: u32,
    /// Maximum number of catch-up tuples
    pub max_gap_ratio: u32,
}

/// Windows to search in one run, plus the part of a gap left uncovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRangeTuples {
    /// Configured window first, followed by catch-up windows going back in time
    pub tuples: Vec<ExecutionTuple>,
    /// Time not covered by any tuple since the previous run
    pub remaining_gap: Duration,
}

impl RuleRangeTuples {
    /// Whether part of the time since the previous run will not be searched
    pub fn has_gap(&self) -> bool {
        self.remaining_gap > Duration::zero()
    }

    /// Earliest instant any tuple searches from
    pub fn earliest_from(&self) -> Option<DateTime<Utc>> {
        self.tuples.iter().map(|t| t.from).min()
    }
}

/// Time between runs that the configured lookback did not cover.
///
/// Negative when the windows of consecutive runs overlap.
pub fn gap_between_runs(
    previous_started_at: Option<DateTime<Utc>>,
    original_from: DateTime<Utc>,
    original_to: DateTime<Utc>,
) -> Duration {
    let Some(previous) = previous_started_at else {
        return Duration::zero();
    };
    let drift_tolerance = original_to - original_from;
    let current_duration = original_to - previous;
    current_duration - drift_tolerance
}

/// Number of interval-sized windows needed to cover `gap`, capped at `max_gap_ratio`
pub fn catchup_intervals(gap: Duration, interval: Duration, max_gap_ratio: u32) -> u32 {
    let gap_ms = gap.num_milliseconds();
    let interval_ms = interval.num_milliseconds();
    if gap_ms <= 0 || interval_ms <= 0 {
        return 0;
    }
    let ratio = gap_ms / interval_ms + i64::from(gap_ms % interval_ms != 0);
    u32::try_from(ratio).map_or(max_gap_ratio, |r| r.min(max_gap_ratio))
}

/// Compute the search windows for a run.
///
/// The first tuple is the configured `[from, to]` window. When the previous
/// run started long enough ago to leave a gap, catch-up tuples each shift the
/// window back by one interval. An unparsable interval disables catch-up.
pub fn rule_range_tuples(request: &RangeRequest<'_>) -> Result<RuleRangeTuples> {
    let original_from = parse_date_math(request.from, request.started_at)?;
    let original_to = parse_date_math(request.to, request.started_at)?;
    let first = ExecutionTuple::new(original_from, original_to, request.max_signals)?;

    let mut tuples = vec![first];

    let interval = match parse_interval(request.interval) {
        Ok(interval) => interval,
        Err(e) => {
            warn!(interval = request.interval, error = %e, "Skipping gap detection");
            return Ok(RuleRangeTuples {
                tuples,
                remaining_gap: Duration::zero(),
            });
        }
    };

    let gap = gap_between_runs(request.previous_started_at, original_from, original_to);
    let catchup = catchup_intervals(gap, interval, request.max_gap_ratio);

    let mut current = first;
    let mut shifts: i32 = 0;
    for _ in 0..catchup {
        let Some(shifted) = current.shifted_back(interval) else {
            warn!(interval = request.interval, "Catch-up window out of range");
            break;
        };
        current = shifted;
        tuples.push(current);
        shifts = shifts.saturating_add(1);
    }

    let remaining_gap = interval
        .checked_mul(shifts)
        .and_then(|covered| gap.checked_sub(&covered))
        .map_or(Duration::zero(), |uncovered| {
            std::cmp::max(uncovered, Duration::zero())
        });

    Ok(RuleRangeTuples {
        tuples,
        remaining_gap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[rstest]
    #[case("now", 0)]
    #[case("now-6m", -6 * 60)]
    #[case("now+30s", 30)]
    #[case("now-1d+2h", -22 * 3600)]
    #[case(" now-1w ", -7 * 24 * 3600)]
    fn test_parse_date_math(#[case] expr: &str, #[case] offset_secs: i64) {
        assert_eq!(
            parse_date_math(expr, now()).unwrap(),
            now() + Duration::seconds(offset_secs)
        );
    }

    #[test]
    fn test_parse_date_math_rfc3339() {
        let parsed = parse_date_math("2024-02-29T23:00:00+01:00", now()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 2, 29, 22, 0, 0).unwrap());
    }

    #[rstest]
    #[case("later")]
    #[case("now-6")]
    #[case("now-6y")]
    #[case("")]
    fn test_parse_date_math_rejects(#[case] expr: &str) {
        assert!(parse_date_math(expr, now()).is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_interval("1h").unwrap(), Duration::hours(1));
        assert!(parse_interval("soon").is_err());
    }

    fn request(previous: Option<DateTime<Utc>>) -> RangeRequest<'static> {
        RangeRequest {
            previous_started_at: previous,
            started_at: now(),
            from: "now-6m",
            to: "now",
            interval: "5m",
            max_signals: 100,
            max_gap_ratio: 4,
        }
    }

    #[test]
    fn test_first_run_has_single_tuple() {
        let range = rule_range_tuples(&request(None)).unwrap();
        assert_eq!(range.tuples.len(), 1);
        assert_eq!(range.tuples[0].from, now() - Duration::minutes(6));
        assert_eq!(range.tuples[0].to, now());
        assert!(!range.has_gap());
    }

    #[test]
    fn test_on_time_run_has_no_catchup() {
        let range = rule_range_tuples(&request(Some(now() - Duration::minutes(5)))).unwrap();
        assert_eq!(range.tuples.len(), 1);
        assert_eq!(range.remaining_gap, Duration::zero());
    }

    #[test]
    fn test_late_run_adds_catchup_tuples() {
        // 16 minutes since the previous run, 6 minutes covered: 10 minute gap
        let range = rule_range_tuples(&request(Some(now() - Duration::minutes(16)))).unwrap();

        assert_eq!(range.tuples.len(), 3);
        assert_eq!(range.tuples[1].to, now() - Duration::minutes(5));
        assert_eq!(range.tuples[2].to, now() - Duration::minutes(10));
        assert_eq!(range.tuples[2].from, now() - Duration::minutes(16));
        assert!(!range.has_gap());
        assert_eq!(range.earliest_from(), Some(now() - Duration::minutes(16)));
    }

    #[test]
    fn test_gap_beyond_ratio_is_reported() {
        // 60 minute gap, at most 4 x 5 minutes caught up
        let range = rule_range_tuples(&request(Some(now() - Duration::minutes(66)))).unwrap();
        assert_eq!(range.tuples.len(), 5);
        assert_eq!(range.remaining_gap, Duration::minutes(40));
        assert!(range.has_gap());
    }

    #[test]
    fn test_bad_interval_disables_catchup() {
        let mut req = request(Some(now() - Duration::hours(3)));
        req.interval = "every now and then";
        let range = rule_range_tuples(&req).unwrap();
        assert_eq!(range.tuples.len(), 1);
        assert!(!range.has_gap());
    }

    #[test]
    fn test_huge_interval_leaves_gap_uncovered() {
        let mut req = request(Some(now() - Duration::minutes(7)));
        req.interval = "300000years";
        let range = rule_range_tuples(&req).unwrap();
        assert_eq!(range.tuples.len(), 1);
        assert_eq!(range.remaining_gap, Duration::minutes(1));
        assert!(range.has_gap());
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let mut req = request(None);
        req.from = "now";
        req.to = "now-5m";
        assert!(matches!(rule_range_tuples(&req), Err(Error::Validation(_))));
    }

    proptest! {
        #[test]
        fn prop_tuples_are_well_formed(
            since_previous_secs in 0i64..86_400,
            lookback_secs in 0i64..7_200,
            interval_secs in 1i64..3_600,
            ratio in 0u32..8,
        ) {
            let from = format!("now-{lookback_secs}s");
            let interval = format!("{interval_secs}s");
            let req = RangeRequest {
                previous_started_at: Some(now() - Duration::seconds(since_previous_secs)),
                started_at: now(),
                from: &from,
                to: "now",
                interval: &interval,
                max_signals: 10,
                max_gap_ratio: ratio,
            };
            let range = rule_range_tuples(&req).unwrap();

            prop_assert!(range.tuples.len() <= 1 + ratio as usize);
            prop_assert!(range.remaining_gap >= Duration::zero());
            for pair in range.tuples.windows(2) {
                prop_assert_eq!(pair[0].to - pair[1].to, Duration::seconds(interval_secs));
            }
            for tuple in &range.tuples {
                prop_assert!(tuple.from <= tuple.to);
                prop_assert_eq!(tuple.max_signals, 10);
            }
        }
    }
}
