//! Indicator catalog (C1): pure functions mapping a candle window to an
//! aligned output series. Every `build` call is deterministic and never
//! panics on well-formed input; warm-up entries are represented explicitly
//! rather than skipped so callers can zip indicator series with candles
//! index-for-index.

use crate::domain::candle::Candle;
use crate::domain::errors::IndicatorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ta::indicators::{
    AverageTrueRange, BollingerBands as TaBollingerBands, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, OnBalanceVolume, RateOfChange, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::{DataItem, Next};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Macd,
    Ema,
    Sma,
    BollingerBands,
    Obv,
    Adx,
    Cci,
    Mfi,
    Stochastic,
    Atr,
    Roc,
    Ichimoku,
    ParabolicSar,
    PivotPointsHighLow,
    AwesomeOscillator,
    Candles,
}

/// Numeric option bag. Unknown keys are ignored; missing keys fall back to
/// each indicator's documented default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorOptions(pub HashMap<String, f64>);

impl IndicatorOptions {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.0
            .get(key)
            .map(|v| (*v).max(0.0) as usize)
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).copied().unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorDefinition {
    pub kind: IndicatorKind,
    pub options: IndicatorOptions,
}

impl IndicatorDefinition {
    pub fn new(kind: IndicatorKind) -> Self {
        Self {
            kind,
            options: IndicatorOptions::new(),
        }
    }

    pub fn with_options(kind: IndicatorKind, options: IndicatorOptions) -> Self {
        Self { kind, options }
    }
}

/// One aligned output value. `Undefined` is first-class rather than a
/// sentinel float so warm-up and "not enough future candles" (pivots) read
/// the same way to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndicatorValue {
    Undefined,
    Scalar(f64),
    Macd {
        macd: f64,
        signal: f64,
        histogram: f64,
    },
    Bands {
        upper: f64,
        middle: f64,
        lower: f64,
        width: f64,
    },
    Stoch {
        k: f64,
        d: f64,
    },
    Ichimoku {
        conversion: f64,
        base: f64,
        span_a: f64,
        span_b: f64,
    },
    Pivot {
        high: Option<f64>,
        low: Option<f64>,
    },
}

impl IndicatorValue {
    /// Builds a `Scalar`, collapsing a non-finite input to `Undefined` per
    /// §4.1 ("a numeric NaN produced by the formula is converted to the
    /// undefined sentinel").
    pub fn scalar(v: f64) -> Self {
        if v.is_finite() {
            IndicatorValue::Scalar(v)
        } else {
            IndicatorValue::Undefined
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            IndicatorValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, IndicatorValue::Undefined)
    }
}

pub type IndicatorSeries = Vec<IndicatorValue>;

pub trait IndicatorSeriesExt {
    fn last_defined(&self) -> Option<&IndicatorValue>;
    fn defined_iter(&self) -> Box<dyn Iterator<Item = &IndicatorValue> + '_>;
}

impl IndicatorSeriesExt for IndicatorSeries {
    fn last_defined(&self) -> Option<&IndicatorValue> {
        self.iter().rev().find(|v| v.is_defined())
    }

    fn defined_iter(&self) -> Box<dyn Iterator<Item = &IndicatorValue> + '_> {
        Box::new(self.iter().filter(|v| v.is_defined()))
    }
}

/// Sanitizes a candle into a `ta::DataItem`. Candles are expected to already
/// satisfy `Candle::is_consistent`; this guards the rare malformed input so
/// the catalog never panics on the happy path.
fn data_item(c: &Candle) -> DataItem {
    let high = c.high.max(c.open).max(c.close);
    let low = c.low.min(c.open).min(c.close);
    let volume = c.volume.max(0.0);
    DataItem::builder()
        .high(high)
        .low(low)
        .close(c.close)
        .open(c.open)
        .volume(volume)
        .build()
        .expect("sanitized candle always forms a valid data item")
}

fn undefined_prefix(len: usize, warmup: usize) -> usize {
    warmup.min(len)
}

pub mod catalog {
    use super::*;

    pub fn build(
        def: &IndicatorDefinition,
        candles: &[Candle],
    ) -> Result<IndicatorSeries, IndicatorError> {
        match def.kind {
            IndicatorKind::Candles => Ok(candles.iter().map(|c| IndicatorValue::scalar(c.close)).collect()),
            IndicatorKind::Sma => Ok(sma(candles, def.options.get_usize("length", 20))),
            IndicatorKind::Ema => Ok(ema(candles, def.options.get_usize("length", 20))),
            IndicatorKind::Rsi => Ok(rsi(candles, def.options.get_usize("length", 14))),
            IndicatorKind::Macd => Ok(macd(
                candles,
                def.options.get_usize("fast_length", 12),
                def.options.get_usize("slow_length", 26),
                def.options.get_usize("signal_length", 9),
            )),
            IndicatorKind::BollingerBands => Ok(bollinger_bands(
                candles,
                def.options.get_usize("length", 20),
                def.options.get_f64("stddev", 2.0),
            )),
            IndicatorKind::Atr => Ok(atr(candles, def.options.get_usize("length", 14))),
            IndicatorKind::Roc => Ok(roc(candles, def.options.get_usize("length", 9))),
            IndicatorKind::Obv => Ok(obv(candles)),
            IndicatorKind::Adx => Ok(adx(candles, def.options.get_usize("length", 14))),
            IndicatorKind::Cci => Ok(cci(candles, def.options.get_usize("length", 20))),
            IndicatorKind::Mfi => Ok(mfi(candles, def.options.get_usize("length", 14))),
            IndicatorKind::Stochastic => Ok(stochastic(
                candles,
                def.options.get_usize("k", 14),
                def.options.get_usize("d", 3),
            )),
            IndicatorKind::Ichimoku => Ok(ichimoku(
                candles,
                def.options.get_usize("conversionPeriod", 9),
                def.options.get_usize("basePeriod", 26),
                def.options.get_usize("spanPeriod", 52),
            )),
            IndicatorKind::ParabolicSar => Ok(parabolic_sar(
                candles,
                def.options.get_f64("step", 0.02),
                def.options.get_f64("max", 0.2),
            )),
            IndicatorKind::PivotPointsHighLow => Ok(pivot_points_high_low(
                candles,
                def.options.get_usize("left", 5),
                def.options.get_usize("right", 5),
            )),
            IndicatorKind::AwesomeOscillator => Ok(awesome_oscillator(candles)),
        }
    }
}

fn sma(candles: &[Candle], length: usize) -> IndicatorSeries {
    if length == 0 {
        return vec![IndicatorValue::Undefined; candles.len()];
    }
    let mut ind = match SimpleMovingAverage::new(length) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), length - 1);
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let v = ind.next(c.close);
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::scalar(v)
            }
        })
        .collect()
}

fn ema(candles: &[Candle], length: usize) -> IndicatorSeries {
    if length == 0 {
        return vec![IndicatorValue::Undefined; candles.len()];
    }
    let mut ind = match ExponentialMovingAverage::new(length) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), length - 1);
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let v = ind.next(c.close);
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::scalar(v)
            }
        })
        .collect()
}

fn rsi(candles: &[Candle], length: usize) -> IndicatorSeries {
    let mut ind = match RelativeStrengthIndex::new(length) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), length);
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let v = ind.next(c.close);
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::scalar(v)
            }
        })
        .collect()
}

fn macd(candles: &[Candle], fast: usize, slow: usize, signal: usize) -> IndicatorSeries {
    let mut ind = match MovingAverageConvergenceDivergence::new(fast, slow, signal) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), slow.max(fast) + signal - 2);
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let out = ind.next(c.close);
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::Macd {
                    macd: out.macd,
                    signal: out.signal,
                    histogram: out.histogram,
                }
            }
        })
        .collect()
}

fn bollinger_bands(candles: &[Candle], length: usize, stddev: f64) -> IndicatorSeries {
    let mut ind = match TaBollingerBands::new(length, stddev) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), length.saturating_sub(1));
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let out = ind.next(c.close);
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::Bands {
                    upper: out.upper,
                    middle: out.average,
                    lower: out.lower,
                    width: out.upper - out.lower,
                }
            }
        })
        .collect()
}

fn atr(candles: &[Candle], length: usize) -> IndicatorSeries {
    let mut ind = match AverageTrueRange::new(length) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), length);
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let v = ind.next(&data_item(c));
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::scalar(v)
            }
        })
        .collect()
}

fn roc(candles: &[Candle], length: usize) -> IndicatorSeries {
    let mut ind = match RateOfChange::new(length) {
        Ok(ind) => ind,
        Err(_) => return vec![IndicatorValue::Undefined; candles.len()],
    };
    let warmup = undefined_prefix(candles.len(), length);
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let v = ind.next(c.close);
            if i < warmup {
                IndicatorValue::Undefined
            } else {
                IndicatorValue::scalar(v)
            }
        })
        .collect()
}

fn obv(candles: &[Candle]) -> IndicatorSeries {
    let mut ind = OnBalanceVolume::new();
    candles
        .iter()
        .map(|c| IndicatorValue::scalar(ind.next(&data_item(c))))
        .collect()
}

/// Wilder's average directional index, hand-rolled: the `ta` crate does not
/// expose ADX directly.
fn adx(candles: &[Candle], length: usize) -> IndicatorSeries {
    let n = candles.len();
    if n == 0 || length == 0 {
        return vec![IndicatorValue::Undefined; n];
    }
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![0.0; n];
    for i in 1..n {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;
        plus_dm[i] = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        minus_dm[i] = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };
        let a = candles[i].high - candles[i].low;
        let b = (candles[i].high - candles[i - 1].close).abs();
        let c = (candles[i].low - candles[i - 1].close).abs();
        tr[i] = a.max(b).max(c);
    }

    let smooth = |values: &[f64]| -> Vec<f64> {
        let mut out = vec![0.0; n];
        if n <= length {
            return out;
        }
        let mut sum: f64 = values[1..=length].iter().sum();
        out[length] = sum;
        for i in (length + 1)..n {
            sum = sum - sum / length as f64 + values[i];
            out[i] = sum;
        }
        out
    };

    let smoothed_tr = smooth(&tr);
    let smoothed_plus = smooth(&plus_dm);
    let smoothed_minus = smooth(&minus_dm);

    let mut dx = vec![0.0; n];
    for i in length..n {
        if smoothed_tr[i] == 0.0 {
            continue;
        }
        let plus_di = 100.0 * smoothed_plus[i] / smoothed_tr[i];
        let minus_di = 100.0 * smoothed_minus[i] / smoothed_tr[i];
        let denom = plus_di + minus_di;
        dx[i] = if denom == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / denom
        };
    }

    let warmup = undefined_prefix(n, 2 * length);
    let mut out = vec![IndicatorValue::Undefined; n];
    if n > warmup {
        let adx_sum: f64 = dx[length..(2 * length).min(n)].iter().sum();
        let mut adx_val = adx_sum / length as f64;
        if 2 * length < n {
            out[2 * length] = IndicatorValue::scalar(adx_val);
            for i in (2 * length + 1)..n {
                adx_val = (adx_val * (length as f64 - 1.0) + dx[i]) / length as f64;
                out[i] = IndicatorValue::scalar(adx_val);
            }
        }
    }
    out
}

fn cci(candles: &[Candle], length: usize) -> IndicatorSeries {
    let n = candles.len();
    let warmup = undefined_prefix(n, length.saturating_sub(1));
    let typical: Vec<f64> = candles.iter().map(|c| c.typical_price()).collect();
    (0..n)
        .map(|i| {
            if i < warmup || length == 0 {
                return IndicatorValue::Undefined;
            }
            let window = &typical[(i + 1 - length)..=i];
            let mean = window.iter().sum::<f64>() / length as f64;
            let mean_dev = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / length as f64;
            if mean_dev == 0.0 {
                IndicatorValue::scalar(0.0)
            } else {
                IndicatorValue::scalar((typical[i] - mean) / (0.015 * mean_dev))
            }
        })
        .collect()
}

fn mfi(candles: &[Candle], length: usize) -> IndicatorSeries {
    let n = candles.len();
    let warmup = undefined_prefix(n, length);
    let typical: Vec<f64> = candles.iter().map(|c| c.typical_price()).collect();
    let raw_flow: Vec<f64> = candles
        .iter()
        .zip(typical.iter())
        .map(|(c, tp)| tp * c.volume)
        .collect();
    (0..n)
        .map(|i| {
            if i < warmup || i == 0 || length == 0 {
                return IndicatorValue::Undefined;
            }
            let start = i + 1 - length;
            let mut positive = 0.0;
            let mut negative = 0.0;
            for j in start.max(1)..=i {
                if typical[j] > typical[j - 1] {
                    positive += raw_flow[j];
                } else if typical[j] < typical[j - 1] {
                    negative += raw_flow[j];
                }
            }
            if negative == 0.0 {
                IndicatorValue::scalar(100.0)
            } else {
                let ratio = positive / negative;
                IndicatorValue::scalar(100.0 - 100.0 / (1.0 + ratio))
            }
        })
        .collect()
}

fn stochastic(candles: &[Candle], k_length: usize, d_length: usize) -> IndicatorSeries {
    let n = candles.len();
    if k_length == 0 {
        return vec![IndicatorValue::Undefined; n];
    }
    let mut k_values = vec![f64::NAN; n];
    for i in 0..n {
        if i + 1 < k_length {
            continue;
        }
        let window = &candles[(i + 1 - k_length)..=i];
        let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        k_values[i] = if range == 0.0 {
            50.0
        } else {
            100.0 * (candles[i].close - lowest) / range
        };
    }
    let warmup_k = k_length - 1;
    let warmup = undefined_prefix(n, warmup_k + d_length.saturating_sub(1));
    (0..n)
        .map(|i| {
            if i < warmup || d_length == 0 {
                return IndicatorValue::Undefined;
            }
            let start = (i + 1 - d_length).max(warmup_k);
            let window = &k_values[start..=i];
            let d = window.iter().sum::<f64>() / window.len() as f64;
            IndicatorValue::Stoch { k: k_values[i], d }
        })
        .collect()
}

/// Ichimoku without forward displacement: spans are reported at the candle
/// that produces them rather than shifted `basePeriod` bars ahead.
fn ichimoku(candles: &[Candle], conversion_period: usize, base_period: usize, span_period: usize) -> IndicatorSeries {
    let n = candles.len();
    let midpoint = |i: usize, period: usize| -> Option<f64> {
        if period == 0 || i + 1 < period {
            return None;
        }
        let window = &candles[(i + 1 - period)..=i];
        let hi = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lo = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        Some((hi + lo) / 2.0)
    };
    (0..n)
        .map(|i| {
            match (
                midpoint(i, conversion_period),
                midpoint(i, base_period),
                midpoint(i, span_period),
            ) {
                (Some(conversion), Some(base), Some(span_b)) => IndicatorValue::Ichimoku {
                    conversion,
                    base,
                    span_a: (conversion + base) / 2.0,
                    span_b,
                },
                _ => IndicatorValue::Undefined,
            }
        })
        .collect()
}

fn parabolic_sar(candles: &[Candle], step: f64, max: f64) -> IndicatorSeries {
    let n = candles.len();
    if n < 2 {
        return vec![IndicatorValue::Undefined; n];
    }
    let mut out = vec![IndicatorValue::Undefined; n];
    let mut rising = candles[1].close >= candles[0].close;
    let mut af = step;
    let mut ep = if rising { candles[0].high } else { candles[0].low };
    let mut sar = if rising { candles[0].low } else { candles[0].high };

    for i in 1..n {
        sar += af * (ep - sar);
        if rising {
            sar = sar.min(candles[i - 1].low).min(if i >= 2 { candles[i - 2].low } else { candles[i - 1].low });
        } else {
            sar = sar.max(candles[i - 1].high).max(if i >= 2 { candles[i - 2].high } else { candles[i - 1].high });
        }

        let reversed = if rising {
            candles[i].low < sar
        } else {
            candles[i].high > sar
        };

        if reversed {
            sar = ep;
            rising = !rising;
            af = step;
            ep = if rising { candles[i].high } else { candles[i].low };
        } else {
            let new_extreme = if rising { candles[i].high } else { candles[i].low };
            let improved = if rising { new_extreme > ep } else { new_extreme < ep };
            if improved {
                ep = new_extreme;
                af = (af + step).min(max);
            }
        }
        out[i] = IndicatorValue::scalar(sar);
    }
    out
}

fn pivot_points_high_low(candles: &[Candle], left: usize, right: usize) -> IndicatorSeries {
    let n = candles.len();
    (0..n)
        .map(|i| {
            if i < left || i + right >= n {
                return IndicatorValue::Undefined;
            }
            let window_high = &candles[(i - left)..=(i + right)];
            let is_high_pivot = window_high.iter().all(|c| c.high <= candles[i].high)
                && window_high
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != left)
                    .all(|(_, c)| c.high < candles[i].high);
            let is_low_pivot = window_high.iter().all(|c| c.low >= candles[i].low)
                && window_high
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != left)
                    .all(|(_, c)| c.low > candles[i].low);
            IndicatorValue::Pivot {
                high: is_high_pivot.then_some(candles[i].high),
                low: is_low_pivot.then_some(candles[i].low),
            }
        })
        .collect()
}

fn awesome_oscillator(candles: &[Candle]) -> IndicatorSeries {
    const FAST: usize = 5;
    const SLOW: usize = 34;
    let n = candles.len();
    let median: Vec<f64> = candles.iter().map(|c| c.median_price()).collect();
    let warmup = undefined_prefix(n, SLOW.saturating_sub(1));
    (0..n)
        .map(|i| {
            if i < warmup {
                return IndicatorValue::Undefined;
            }
            let fast_avg = median[(i + 1 - FAST)..=i].iter().sum::<f64>() / FAST as f64;
            let slow_avg = median[(i + 1 - SLOW)..=i].iter().sum::<f64>() / SLOW as f64;
            IndicatorValue::scalar(fast_avg - slow_avg)
        })
        .collect()
}
