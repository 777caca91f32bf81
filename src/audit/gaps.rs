//! Gap detection over a source's arrival history.

use chrono::{DateTime, Utc};

use crate::model::SourceGap;

/// Multiplier applied to a known expected interval.
pub const GAP_TOLERANCE: f64 = 1.5;

/// How wide an inter-arrival interval must be to count as a gap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapPolicy {
    pub tolerance: f64,
    /// Threshold used when the source has no expected interval.
    pub default_threshold_ms: u64,
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            tolerance: GAP_TOLERANCE,
            default_threshold_ms: 3_600_000,
        }
    }
}

impl GapPolicy {
    pub fn with_default_threshold(default_threshold_ms: u64) -> Self {
        Self {
            default_threshold_ms,
            ..Self::default()
        }
    }

    pub fn threshold_ms(&self, expected_interval_ms: Option<u64>) -> u64 {
        match expected_interval_ms {
            Some(expected) if expected > 0 => (expected as f64 * self.tolerance).round() as u64,
            _ => self.default_threshold_ms,
        }
    }
}

/// Every interval between consecutive arrivals wider than `threshold_ms`.
///
/// `arrivals` must be sorted ascending. Only intervals bounded by two observed
/// events are reported; silence after the last arrival is not a gap yet.
pub fn detect_gaps(
    org_id: &str,
    source: &str,
    arrivals: &[DateTime<Utc>],
    threshold_ms: u64,
) -> Vec<SourceGap> {
    arrivals
        .windows(2)
        .filter_map(|pair| {
            let (start, end) = (pair[0], pair[1]);
            let duration_ms = (end - start).num_milliseconds().max(0) as u64;
            (duration_ms > threshold_ms).then(|| SourceGap {
                org_id: org_id.to_string(),
                source: source.to_string(),
                start,
                end,
                duration_ms,
                threshold_ms,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    #[test]
    fn threshold_scales_expected_interval() {
        let policy = GapPolicy::default();
        assert_eq!(policy.threshold_ms(Some(3_600_000)), 5_400_000);
        assert_eq!(policy.threshold_ms(None), 3_600_000);
        assert_eq!(policy.threshold_ms(Some(0)), 3_600_000);
    }

    #[test]
    fn reports_only_wide_intervals() {
        let arrivals = [
            t0(),
            t0() + Duration::minutes(30),
            t0() + Duration::hours(3),
            t0() + Duration::hours(3) + Duration::minutes(10),
        ];
        let gaps = detect_gaps("org", "poll:orders", &arrivals, 5_400_000);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start, t0() + Duration::minutes(30));
        assert_eq!(gaps[0].end, t0() + Duration::hours(3));
        assert_eq!(gaps[0].duration_ms, 9_000_000);
    }

    #[test]
    fn boundary_interval_is_not_a_gap() {
        let arrivals = [t0(), t0() + Duration::milliseconds(5_400_000)];
        assert!(detect_gaps("org", "s", &arrivals, 5_400_000).is_empty());
        assert!(detect_gaps("org", "s", &arrivals[..1], 1).is_empty());
    }
}
