// ── Sensor classification ──
//
// Pure functions of the advertised sensor name. Firmware names sensors
// after the physical module and header they sit on ("CO2 Sensor 2",
// "Humidity"), and that is all there is to go on.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Semantic measurement a sensor reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MeasurementType {
    Temperature,
    Humidity,
    Co2,
    Rpm,
    Voc,
    Nox,
}

impl MeasurementType {
    /// Base capability channel for slot 1.
    pub fn base_capability(self) -> &'static str {
        match self {
            Self::Temperature => "measure_temperature",
            Self::Humidity => "measure_humidity",
            Self::Co2 => "measure_co2",
            Self::Rpm => "measure_rpm",
            Self::Voc => "measure_voc",
            Self::Nox => "measure_nox",
        }
    }
}

// Checked in order. CO2 first: a CO2 module also reports its own
// temperature and humidity under names that mention both.
const KEYWORDS: &[(MeasurementType, &[&str])] = &[
    (MeasurementType::Co2, &["co2", "co₂", "carbon dioxide"]),
    (MeasurementType::Voc, &["voc"]),
    (MeasurementType::Nox, &["nox"]),
    (MeasurementType::Rpm, &["rpm", "tacho"]),
    (MeasurementType::Temperature, &["temperatur", "temp"]),
    (MeasurementType::Humidity, &["humidity", "rh"]),
];

// Whole-word matches only; these turn up inside unrelated words
// ("through", "attempts"). All other keywords match anywhere ("eCO2").
const WHOLE_WORD_ONLY: &[&str] = &["rh", "temp", "nox"];

/// Classify a sensor name into a measurement type.
pub fn detect_measurement_type(name: &str) -> Option<MeasurementType> {
    let lower = name.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords.iter().any(|kw| {
                if WHOLE_WORD_ONLY.contains(kw) {
                    words.contains(kw)
                } else {
                    lower.contains(kw)
                }
            })
        })
        .map(|(ty, _)| *ty)
}

/// Parse a trailing `sensor N` token. No match means slot 1.
pub fn extract_sensor_slot(name: &str) -> u8 {
    let lower = name.trim_end().to_lowercase();
    let Some(idx) = lower.rfind("sensor") else {
        return 1;
    };
    let tail = lower[idx + "sensor".len()..].trim_start();
    if tail.is_empty() || !tail.chars().all(|c| c.is_ascii_digit()) {
        return 1;
    }
    match tail.parse::<u8>() {
        Ok(slot) if slot >= 1 => slot,
        _ => 1,
    }
}

/// Capability channel for a measurement on a given slot.
///
/// Slot 1 (or unknown) maps to the base channel; later slots get a numbered
/// sub-channel so two headers with the same measurement never collide.
pub fn compute_capability_id(measurement: MeasurementType, slot: Option<u8>) -> String {
    let base = measurement.base_capability();
    match slot {
        Some(n) if n >= 2 => format!("{base}.{n}"),
        _ => base.to_string(),
    }
}
