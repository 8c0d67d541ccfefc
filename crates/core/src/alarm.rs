//! Alarm classification against per-station thresholds.

use crate::model::{AlarmStatus, ReconciledStation, StationThresholds};

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: AlarmStatus,
    pub message: String,
}

impl Classification {
    fn new(status: AlarmStatus, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

/// Classify a water level (cm). Both thresholds are needed; with either
/// one missing the status is `unknown`.
pub fn classify(level: f64, warning_level: Option<f64>, alarm_level: Option<f64>) -> Classification {
    let (Some(warning), Some(alarm)) = (warning_level, alarm_level) else {
        return Classification::new(AlarmStatus::Unknown, "Warning or alarm level not defined for this station");
    };

    if level >= alarm {
        Classification::new(AlarmStatus::Alarm, format!("Alarm level exceeded: {level} cm (alarm level {alarm} cm)"))
    } else if level >= warning {
        Classification::new(
            AlarmStatus::Warning,
            format!("Warning level exceeded: {level} cm (warning level {warning} cm)"),
        )
    } else {
        Classification::new(AlarmStatus::Normal, format!("Water level normal: {level} cm"))
    }
}

pub fn classify_reading(level: Option<f64>, warning_level: Option<f64>, alarm_level: Option<f64>) -> Classification {
    match level {
        Some(level) => classify(level, warning_level, alarm_level),
        None => Classification::new(AlarmStatus::Unknown, "No water level reading"),
    }
}

/// Fill the alarm fields of a station from its thresholds, if any are known.
pub fn annotate(station: &mut ReconciledStation, thresholds: Option<&StationThresholds>) {
    if let Some(t) = thresholds {
        station.warning_level = t.warning_level;
        station.alarm_level = t.alarm_level;
    }

    let Classification { status, message } =
        classify_reading(station.water_level, station.warning_level, station.alarm_level);
    station.alarm_status = status;
    station.alarm_message = message;
}
