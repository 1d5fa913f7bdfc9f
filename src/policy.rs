//! Attendance requirement math.

use crate::portal::models::{AttendanceStanding, CourseType, Outlook, SessionUnit};

/// Default fraction of sessions a student must attend. The portal rounds
/// 74.01% up to its 75% cut-off, so the math targets the unrounded value.
pub const DEFAULT_ATTENDANCE_THRESHOLD: f64 = 0.7401;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendancePolicy {
    threshold: f64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_ATTENDANCE_THRESHOLD,
        }
    }
}

impl AttendancePolicy {
    /// Returns `None` unless `0 < threshold < 1`.
    pub fn new(threshold: f64) -> Option<Self> {
        (threshold > 0.0 && threshold < 1.0).then_some(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compute the standing for one course.
    ///
    /// Lab rows count every lab twice (two slots per session), so attended and
    /// total are halved before the threshold math.
    pub fn standing(&self, attended: u32, total: u32, course_type: Option<&CourseType>) -> AttendanceStanding {
        let is_lab = course_type.is_some_and(CourseType::is_lab);
        let (attended, total, unit) = if is_lab {
            (attended / 2, total / 2, SessionUnit::Lab)
        } else {
            (attended, total, SessionUnit::Class)
        };

        let t = self.threshold;
        let needed = t * f64::from(total);
        let attended_f = f64::from(attended);

        let outlook = if attended_f < needed {
            let sessions = ((needed - attended_f) / (1.0 - t)).ceil();
            Outlook::MustAttend(sessions as u32)
        } else {
            let sessions = ((attended_f - needed) / t).floor();
            Outlook::CanMiss(sessions as u32)
        };

        AttendanceStanding {
            effective_attended: attended,
            effective_total: total,
            unit,
            outlook,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(AttendancePolicy::new(0.0).is_none());
        assert!(AttendancePolicy::new(1.0).is_none());
        assert!(AttendancePolicy::new(-0.2).is_none());
        assert!(AttendancePolicy::new(0.75).is_some());
    }

    #[test]
    fn test_lab_only_counts_are_halved() {
        let policy = AttendancePolicy::default();
        let standing = policy.standing(20, 40, Some(&CourseType::LabOnly));
        assert_eq!(standing.effective_attended, 10);
        assert_eq!(standing.effective_total, 20);
        assert_eq!(standing.unit, SessionUnit::Lab);
        // needed = 14.802; (14.802 - 10) / 0.2599 = 18.48 -> 19
        assert_eq!(standing.outlook, Outlook::MustAttend(19));
    }

    #[test]
    fn test_lab_halving_differs_from_raw_counts() {
        let policy = AttendancePolicy::default();
        let lab = policy.standing(20, 40, Some(&CourseType::LabOnly));
        let raw = policy.standing(20, 40, Some(&CourseType::TheoryOnly));
        assert_eq!(raw.effective_total, 40);
        assert_eq!(raw.unit, SessionUnit::Class);
        // needed = 29.604; (29.604 - 20) / 0.2599 = 36.95 -> 37
        assert_eq!(raw.outlook, Outlook::MustAttend(37));
        assert_ne!(lab.outlook, raw.outlook);
    }

    #[test]
    fn test_embedded_lab_is_halved() {
        let standing = AttendancePolicy::default().standing(31, 34, Some(&CourseType::EmbeddedLab));
        assert_eq!(standing.effective_attended, 15);
        assert_eq!(standing.effective_total, 17);
    }

    #[test]
    fn test_can_miss_when_above_threshold() {
        let standing = AttendancePolicy::default().standing(30, 36, Some(&CourseType::EmbeddedTheory));
        // needed = 26.6436; (30 - 26.6436) / 0.7401 = 4.53 -> 4
        assert_eq!(standing.outlook, Outlook::CanMiss(4));
    }

    #[test]
    fn test_exactly_at_requirement() {
        let policy = AttendancePolicy::new(0.75).unwrap();
        let standing = policy.standing(3, 4, None);
        assert_eq!(standing.outlook, Outlook::CanMiss(0));
    }

    #[test]
    fn test_no_classes_yet() {
        let standing = AttendancePolicy::default().standing(0, 0, None);
        assert_eq!(standing.outlook, Outlook::CanMiss(0));
    }

    #[test]
    fn test_configured_threshold_changes_outlook() {
        let strict = AttendancePolicy::new(0.8).unwrap();
        let standing = strict.standing(30, 36, None);
        // needed = 28.8; (30 - 28.8) / 0.8 = 1.5 -> 1
        assert_eq!(standing.outlook, Outlook::CanMiss(1));
    }
}
