use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "schedule_type_enum")]
pub enum ScheduleType {
    #[sea_orm(string_value = "INTERVAL")]
    Interval,
    #[sea_orm(string_value = "CRON")]
    Cron,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "monitor_status_enum")]
pub enum MonitorStatus {
    #[sea_orm(string_value = "OK")]
    Ok,
    #[sea_orm(string_value = "LATE")]
    Late,
    #[sea_orm(string_value = "MISSED")]
    Missed,
    #[sea_orm(string_value = "FAILING")]
    Failing,
    #[sea_orm(string_value = "DISABLED")]
    Disabled,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "run_outcome_enum")]
pub enum RunOutcome {
    #[sea_orm(string_value = "STARTED")]
    Started,
    #[sea_orm(string_value = "SUCCESS")]
    Success,
    #[sea_orm(string_value = "FAIL")]
    Fail,
    #[sea_orm(string_value = "LATE")]
    Late,
    #[sea_orm(string_value = "MISSED")]
    Missed,
    #[sea_orm(string_value = "TIMEOUT")]
    Timeout,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "incident_kind_enum")]
pub enum IncidentKind {
    #[sea_orm(string_value = "FAIL")]
    Fail,
    #[sea_orm(string_value = "LATE")]
    Late,
    #[sea_orm(string_value = "MISSED")]
    Missed,
    #[sea_orm(string_value = "ANOMALY")]
    Anomaly,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[sea_orm(rs_type = "String", db_type = "Text", enum_name = "incident_status_enum")]
pub enum IncidentStatus {
    #[sea_orm(string_value = "OPEN")]
    Open,
    #[sea_orm(string_value = "ACKED")]
    Acked,
    #[sea_orm(string_value = "RESOLVED")]
    Resolved,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // JSON tokens match the stored string values, uppercase on both sides.
    #[test]
    fn enums_serialize_as_uppercase_tokens() {
        assert_eq!(
            serde_json::to_string(&ScheduleType::Interval).unwrap(),
            "\"INTERVAL\""
        );
        assert_eq!(
            serde_json::to_string(&IncidentStatus::Resolved).unwrap(),
            "\"RESOLVED\""
        );
        assert_eq!(
            serde_json::to_string(&MonitorStatus::Failing).unwrap(),
            "\"FAILING\""
        );
        assert_eq!(serde_json::to_string(&RunOutcome::Late).unwrap(), "\"LATE\"");
        assert_eq!(
            serde_json::to_string(&IncidentKind::Anomaly).unwrap(),
            "\"ANOMALY\""
        );
    }

    #[test]
    fn enums_deserialize_from_uppercase_tokens() {
        assert_eq!(
            serde_json::from_str::<ScheduleType>("\"INTERVAL\"").unwrap(),
            ScheduleType::Interval
        );
        assert_eq!(
            serde_json::from_str::<ScheduleType>("\"CRON\"").unwrap(),
            ScheduleType::Cron
        );
        assert_eq!(
            serde_json::from_str::<IncidentStatus>("\"ACKED\"").unwrap(),
            IncidentStatus::Acked
        );
        assert!(serde_json::from_str::<ScheduleType>("\"Interval\"").is_err());
    }
}
