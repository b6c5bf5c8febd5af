use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One completed OHLCV bar. `time` is the unix-second start of the bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// `low <= min(open,close) <= max(open,close) <= high` and non-negative volume.
    pub fn is_consistent(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.low <= body_lo && body_hi <= self.high && self.volume >= 0.0
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn median_price(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// A supported candle period; every known string maps to one of the named
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Period {
    pub const ALL: [Period; 8] = [
        Period::M1,
        Period::M3,
        Period::M5,
        Period::M15,
        Period::M30,
        Period::H1,
        Period::H4,
        Period::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::M1 => "1m",
            Period::M3 => "3m",
            Period::M5 => "5m",
            Period::M15 => "15m",
            Period::M30 => "30m",
            Period::H1 => "1h",
            Period::H4 => "4h",
            Period::D1 => "1d",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Period::M1 => 1,
            Period::M3 => 3,
            Period::M5 => 5,
            Period::M15 => 15,
            Period::M30 => 30,
            Period::H1 => 60,
            Period::H4 => 240,
            Period::D1 => 1440,
        }
    }

    pub fn seconds(&self) -> i64 {
        self.minutes() * 60
    }

    /// Does the current minute-of-epoch fall on this period's boundary?
    pub fn divides(&self, minute_of_epoch: i64) -> bool {
        minute_of_epoch % self.minutes() == 0
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Period::M1),
            "3m" => Ok(Period::M3),
            "5m" => Ok(Period::M5),
            "15m" => Ok(Period::M15),
            "30m" => Ok(Period::M30),
            "1h" => Ok(Period::H1),
            "4h" => Ok(Period::H4),
            "1d" => Ok(Period::D1),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
