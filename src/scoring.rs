//! Overall connection rating.
//!
//! Each measured factor (download, upload, latency) is scored from 1 to 5
//! against fixed thresholds. The scores of the factors that are present are
//! averaged and the average is mapped to a qualitative label.

use std::fmt;

use serde::Serialize;

use crate::session::Session;

/// Qualitative rating of a completed run.
///
/// Variants are ordered from worst to best for correct derived Ord behavior,
/// with `Unknown` below everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RatingLabel {
    /// No phase produced a result
    Unknown,
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

impl RatingLabel {
    /// Returns the fixed human-readable description of this band.
    pub fn description(&self) -> &'static str {
        match self {
            RatingLabel::Excellent => {
                "Your connection is performing exceptionally well"
            }
            RatingLabel::VeryGood => "Your connection is performing very well",
            RatingLabel::Good => "Your connection is performing adequately",
            RatingLabel::Fair => "Your connection may have some limitations",
            RatingLabel::Poor => "Your connection may need improvement",
            RatingLabel::Unknown => "No test data available",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RatingLabel::Excellent => "Excellent",
            RatingLabel::VeryGood => "Very Good",
            RatingLabel::Good => "Good",
            RatingLabel::Fair => "Fair",
            RatingLabel::Poor => "Poor",
            RatingLabel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for RatingLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rating derived from one session's measurements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rating {
    pub label: RatingLabel,
    pub description: &'static str,
    /// Mean factor score, absent when no factor was measured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_score: Option<f64>,
}

impl Rating {
    fn from_label(label: RatingLabel, average_score: Option<f64>) -> Self {
        Self { label, description: label.description(), average_score }
    }
}

/// Thresholds for the download factor (Mbps, higher is better).
mod download_thresholds {
    pub const SCORE_5: f64 = 100.0;
    pub const SCORE_4: f64 = 25.0;
    pub const SCORE_3: f64 = 5.0;
    pub const SCORE_2: f64 = 1.0;
}

/// Thresholds for the upload factor (Mbps, higher is better).
mod upload_thresholds {
    pub const SCORE_5: f64 = 50.0;
    pub const SCORE_4: f64 = 10.0;
    pub const SCORE_3: f64 = 2.0;
    pub const SCORE_2: f64 = 0.5;
}

/// Thresholds for the latency factor (ms, lower is better).
mod latency_thresholds {
    pub const SCORE_5: f64 = 20.0;
    pub const SCORE_4: f64 = 50.0;
    pub const SCORE_3: f64 = 100.0;
    pub const SCORE_2: f64 = 200.0;
}

/// Minimum average score for each label.
mod band_thresholds {
    pub const EXCELLENT: f64 = 4.5;
    pub const VERY_GOOD: f64 = 3.5;
    pub const GOOD: f64 = 2.5;
    pub const FAIR: f64 = 1.5;
}

pub fn download_score(speed_mbps: f64) -> u8 {
    use download_thresholds::*;

    if speed_mbps >= SCORE_5 {
        5
    } else if speed_mbps >= SCORE_4 {
        4
    } else if speed_mbps >= SCORE_3 {
        3
    } else if speed_mbps >= SCORE_2 {
        2
    } else {
        1
    }
}

pub fn upload_score(speed_mbps: f64) -> u8 {
    use upload_thresholds::*;

    if speed_mbps >= SCORE_5 {
        5
    } else if speed_mbps >= SCORE_4 {
        4
    } else if speed_mbps >= SCORE_3 {
        3
    } else if speed_mbps >= SCORE_2 {
        2
    } else {
        1
    }
}

pub fn latency_score(avg_ms: f64) -> u8 {
    use latency_thresholds::*;

    if avg_ms <= SCORE_5 {
        5
    } else if avg_ms <= SCORE_4 {
        4
    } else if avg_ms <= SCORE_3 {
        3
    } else if avg_ms <= SCORE_2 {
        2
    } else {
        1
    }
}

fn label_for_average(average: f64) -> RatingLabel {
    use band_thresholds::*;

    if average >= EXCELLENT {
        RatingLabel::Excellent
    } else if average >= VERY_GOOD {
        RatingLabel::VeryGood
    } else if average >= GOOD {
        RatingLabel::Good
    } else if average >= FAIR {
        RatingLabel::Fair
    } else {
        RatingLabel::Poor
    }
}

/// Rate a connection from whichever measurements are present.
///
/// # Arguments
/// * `download_mbps` - Download speed, if the download phase succeeded
/// * `upload_mbps` - Upload speed, if the upload phase succeeded
/// * `latency_ms` - Average round-trip time, if the latency phase succeeded
///
/// # Example
/// ```
/// use netspeed::scoring::{rate, RatingLabel};
///
/// let rating = rate(Some(150.0), Some(60.0), Some(15.0));
/// assert_eq!(rating.label, RatingLabel::Excellent);
/// ```
pub fn rate(
    download_mbps: Option<f64>,
    upload_mbps: Option<f64>,
    latency_ms: Option<f64>,
) -> Rating {
    let scores: Vec<u8> = [
        download_mbps.map(download_score),
        upload_mbps.map(upload_score),
        latency_ms.map(latency_score),
    ]
    .into_iter()
    .flatten()
    .collect();

    if scores.is_empty() {
        return Rating::from_label(RatingLabel::Unknown, None);
    }

    let average = scores.iter().map(|s| f64::from(*s)).sum::<f64>()
        / scores.len() as f64;

    Rating::from_label(label_for_average(average), Some(average))
}

/// Rate the results held by a session.
pub fn rate_session(session: &Session) -> Rating {
    rate(
        session.download.as_ref().map(|d| d.speed_mbps),
        session.upload.as_ref().map(|u| u.speed_mbps),
        session.latency.as_ref().map(|l| l.avg_ms),
    )
}
