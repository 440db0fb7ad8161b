//! Comma-separated rows handed to the reading logger.

use itertools::Itertools;

use crate::extract::{SpectrumInfo, XyzInfo};

/// Y below this value marks a reading as dark.
pub const MIN_ACCEPTABLE_Y: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavelengthRange {
    pub min: u16,
    pub max: u16,
    pub step: u16,
}

impl Default for WavelengthRange {
    fn default() -> Self {
        Self {
            min: 340,
            max: 1010,
            step: 5,
        }
    }
}

impl WavelengthRange {
    pub fn steps(&self) -> impl Iterator<Item = u16> {
        (self.min..=self.max).step_by(self.step.max(1) as usize)
    }
}

/// Acquisition parameters as they were sent to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcqSettings {
    pub integration_time: u16,
    pub frame_avg: u8,
    pub auto_exposure: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: u64,
    pub manual: bool,
    pub settings: AcqSettings,
    pub is_saturated: bool,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub spectrum: Vec<f32>,
}

const COLUMNS: [&str; 10] = [
    "TIMESTAMP",
    "MANUAL",
    "INT_TIME",
    "FRAME_AVG",
    "AE",
    "IS_SATURATED",
    "IS_DARK",
    "X",
    "Y",
    "Z",
];

/// Header for rows carrying a spectrum sampled over `range`.
pub fn header(range: &WavelengthRange) -> String {
    COLUMNS
        .iter()
        .map(|s| s.to_string())
        .chain(range.steps().map(|w| w.to_string()))
        .join(",")
}

/// Header for XYZ-only rows.
pub fn xyz_header() -> String {
    COLUMNS.join(",")
}

impl Record {
    /// Copies the decoded spectrum out of the return packet.
    pub fn from_spectrum(
        info: &SpectrumInfo<'_>,
        settings: AcqSettings,
        manual: bool,
        timestamp: u64,
    ) -> Self {
        Self {
            timestamp,
            manual,
            settings: AcqSettings {
                integration_time: info.integration_time,
                ..settings
            },
            is_saturated: info.is_saturated,
            x: info.x,
            y: info.y,
            z: info.z,
            spectrum: info.spectrum.to_vec(),
        }
    }

    pub fn from_xyz(info: &XyzInfo, settings: AcqSettings, manual: bool, timestamp: u64) -> Self {
        Self {
            timestamp,
            manual,
            settings: AcqSettings {
                integration_time: info.integration_time,
                ..settings
            },
            is_saturated: info.is_saturated,
            x: info.x,
            y: info.y,
            z: info.z,
            spectrum: Vec::new(),
        }
    }

    pub fn is_dark(&self) -> bool {
        self.y < MIN_ACCEPTABLE_Y
    }

    pub fn to_row(&self) -> String {
        let flag = |b: bool| String::from(if b { "1" } else { "0" });

        [
            self.timestamp.to_string(),
            flag(self.manual),
            self.settings.integration_time.to_string(),
            self.settings.frame_avg.to_string(),
            flag(self.settings.auto_exposure),
            flag(self.is_saturated),
            flag(self.is_dark()),
            self.x.to_string(),
            self.y.to_string(),
            self.z.to_string(),
        ]
        .into_iter()
        .chain(self.spectrum.iter().map(|v| v.to_string()))
        .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lists_wavelengths() {
        let range = WavelengthRange {
            min: 340,
            max: 350,
            step: 5,
        };

        assert_eq!(
            header(&range),
            "TIMESTAMP,MANUAL,INT_TIME,FRAME_AVG,AE,IS_SATURATED,IS_DARK,X,Y,Z,340,345,350"
        );
        assert_eq!(WavelengthRange::default().steps().count(), 135);
        assert_eq!(xyz_header(), "TIMESTAMP,MANUAL,INT_TIME,FRAME_AVG,AE,IS_SATURATED,IS_DARK,X,Y,Z");
    }

    #[test]
    fn xyz_row() {
        let info = XyzInfo {
            integration_time: 120,
            is_saturated: false,
            x: 10.5,
            y: 2.0,
            z: 7.25,
        };
        let settings = AcqSettings {
            integration_time: 32,
            frame_avg: 3,
            auto_exposure: true,
        };

        let record = Record::from_xyz(&info, settings, true, 1_700_000_000);

        assert!(record.is_dark());
        assert_eq!(record.to_row(), "1700000000,1,120,3,1,0,1,10.5,2,7.25");
    }
}
