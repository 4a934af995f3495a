//! The ten regional transmission system operators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One of the ten Japanese regional grid operators.
///
/// Ordered north to south, matching the area codes used in the
/// industry-standard report file names (`01` Hokkaido .. `10` Okinawa).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tso {
    Hepco,
    Tohoku,
    Tepco,
    Chubu,
    Hokuden,
    Kepco,
    Chugoku,
    Yonden,
    Kyuden,
    Okiden,
}

impl Tso {
    pub const ALL: [Tso; 10] = [
        Tso::Hepco,
        Tso::Tohoku,
        Tso::Tepco,
        Tso::Chubu,
        Tso::Hokuden,
        Tso::Kepco,
        Tso::Chugoku,
        Tso::Yonden,
        Tso::Kyuden,
        Tso::Okiden,
    ];

    /// Stable lowercase id, used in natural keys and on the command line.
    pub fn id(self) -> &'static str {
        match self {
            Tso::Hepco => "hepco",
            Tso::Tohoku => "tohoku",
            Tso::Tepco => "tepco",
            Tso::Chubu => "chubu",
            Tso::Hokuden => "hokuden",
            Tso::Kepco => "kepco",
            Tso::Chugoku => "chugoku",
            Tso::Yonden => "yonden",
            Tso::Kyuden => "kyuden",
            Tso::Okiden => "okiden",
        }
    }

    /// Two-digit area code from the standardized file names.
    pub fn area_code(self) -> &'static str {
        match self {
            Tso::Hepco => "01",
            Tso::Tohoku => "02",
            Tso::Tepco => "03",
            Tso::Chubu => "04",
            Tso::Hokuden => "05",
            Tso::Kepco => "06",
            Tso::Chugoku => "07",
            Tso::Yonden => "08",
            Tso::Kyuden => "09",
            Tso::Okiden => "10",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Tso::Hepco => "Hokkaido Electric Power Network",
            Tso::Tohoku => "Tohoku Electric Power Network",
            Tso::Tepco => "TEPCO Power Grid",
            Tso::Chubu => "Chubu Electric Power Grid",
            Tso::Hokuden => "Hokuriku Electric Power Transmission & Distribution",
            Tso::Kepco => "Kansai Transmission and Distribution",
            Tso::Chugoku => "Chugoku Electric Power Transmission & Distribution",
            Tso::Yonden => "Shikoku Electric Power Transmission & Distribution",
            Tso::Kyuden => "Kyushu Electric Power Transmission and Distribution",
            Tso::Okiden => "Okinawa Electric Power",
        }
    }
}

impl fmt::Display for Tso {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Tso {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Tso::ALL
            .into_iter()
            .find(|tso| tso.id() == wanted)
            .ok_or_else(|| Error::UnknownOperator(s.to_string()))
    }
}
