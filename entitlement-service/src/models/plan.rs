//! Plan catalog.
//!
//! A closed lookup table: each plan defines its renewal price and quota
//! budget. Renewal logic branches on the enum, never on raw plan strings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    TutorTeachers,
    SchoolTeachers,
}

impl Plan {
    pub fn name(&self) -> &'static str {
        match self {
            Plan::TutorTeachers => "Tutor Teachers",
            Plan::SchoolTeachers => "School Teachers",
        }
    }

    /// Resolve a stored plan name; unknown names are a data error the
    /// caller must surface, not silently default.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Tutor Teachers" => Some(Plan::TutorTeachers),
            "School Teachers" => Some(Plan::SchoolTeachers),
            _ => None,
        }
    }

    /// Monthly renewal amount.
    pub fn amount(&self) -> Decimal {
        match self {
            Plan::TutorTeachers => Decimal::new(33000, 2),
            Plan::SchoolTeachers => Decimal::new(99000, 2),
        }
    }

    /// Quota units granted per billing period.
    pub fn quota(&self) -> i64 {
        match self {
            Plan::TutorTeachers => 1800,
            Plan::SchoolTeachers => 5400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        for plan in [Plan::TutorTeachers, Plan::SchoolTeachers] {
            assert_eq!(Plan::from_name(plan.name()), Some(plan));
        }
    }

    #[test]
    fn unknown_plan_name_is_none() {
        assert_eq!(Plan::from_name("Enterprise"), None);
        assert_eq!(Plan::from_name(""), None);
    }

    #[test]
    fn tutor_plan_pricing() {
        assert_eq!(Plan::TutorTeachers.amount(), Decimal::new(33000, 2));
        assert_eq!(Plan::TutorTeachers.quota(), 1800);
    }
}
