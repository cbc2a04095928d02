//! Feature engine: turns a descriptor list into one numeric row at a cursor position.
//!
//! Indicator kinds read closes of the model's own resolution over `[idx - periods + 1, idx]`,
//! where `idx` is the cursor position for that resolution. The `WithCurrentPrice` variants
//! append the current price to that window. A store with fewer than `periods + 10` bars for
//! any descriptor yields `None`, as does any window that would reach before the first bar.

use std::collections::HashMap;

use crate::domain::{Bar, ModelId, Resolution};
use crate::error::{CoreError, CoreResult};
use crate::indicators::{last_critical_rsi, last_ema, rsi, rsi_bucket, stats, LinearFit, Macd};
use crate::series::TimeCursor;
use crate::store::MultiResolutionStore;

use super::descriptor::{FeatureDescriptor, FeatureKind};

/// RSI span of every RSI kind. The descriptor's periods only size the price window.
pub const RSI_PERIODS: usize = 14;

/// Bars scanned back by the sticky critical-RSI kinds.
pub const CRITICAL_RSI_LOOKBACK: usize = 270;

/// Extra bars required on top of each descriptor's periods.
pub const HISTORY_MARGIN: usize = 10;

/// Access to other models' predictions for the delegating feature kinds.
pub trait Delegate {
    /// Discounted future profit of model `id` at `cursor`, `None` while its own features
    /// lack history.
    fn predict_dfp(
        &self,
        id: ModelId,
        store: &MultiResolutionStore,
        price: f64,
        cursor: &TimeCursor,
    ) -> CoreResult<Option<f64>>;

    /// Horizon (in 1h periods) of model `id`.
    fn horizon(&self, id: ModelId) -> CoreResult<usize>;
}

/// Delegate for feature lists without delegating kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelegates;

impl Delegate for NoDelegates {
    fn predict_dfp(
        &self,
        id: ModelId,
        _store: &MultiResolutionStore,
        _price: f64,
        _cursor: &TimeCursor,
    ) -> CoreResult<Option<f64>> {
        Err(CoreError::not_found(format!("model {id}")))
    }

    fn horizon(&self, id: ModelId) -> CoreResult<usize> {
        Err(CoreError::not_found(format!("model {id}")))
    }
}

pub struct FeatureEngine<'a> {
    store: &'a MultiResolutionStore,
    delegate: &'a dyn Delegate,
}

impl<'a> FeatureEngine<'a> {
    pub fn new(store: &'a MultiResolutionStore, delegate: &'a dyn Delegate) -> Self {
        Self { store, delegate }
    }

    /// One value per descriptor, in order, or `None` when history is too short.
    pub fn evaluate(
        &self,
        descriptors: &[FeatureDescriptor],
        resolution: Resolution,
        price: f64,
        cursor: &TimeCursor,
    ) -> CoreResult<Option<Vec<f64>>> {
        if !(price.is_finite() && price > 0.0) {
            return Err(CoreError::invalid_argument(format!(
                "current price must be positive, got {price}"
            )));
        }
        let bars = self.store.bars(resolution)?;
        if descriptors
            .iter()
            .any(|d| bars.len() < d.periods + HISTORY_MARGIN)
        {
            return Ok(None);
        }
        let idx = cursor.get(resolution);
        if idx >= bars.len() {
            return Err(CoreError::invalid_argument(format!(
                "cursor {idx} is past the {} {resolution} bars",
                bars.len()
            )));
        }

        let mut window = Window::new(&bars, idx, price);
        let mut row = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let value = if descriptor.kind.is_delegating() {
                self.delegated(descriptor, price, cursor)?
            } else {
                window.value(descriptor)?
            };
            match value {
                Some(v) => row.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(row))
    }

    fn delegated(
        &self,
        descriptor: &FeatureDescriptor,
        price: f64,
        cursor: &TimeCursor,
    ) -> CoreResult<Option<f64>> {
        let Some(id) = descriptor.delegate_id() else {
            return Ok(None);
        };
        match descriptor.kind {
            FeatureKind::DelegatePrediction => {
                self.delegate.predict_dfp(id, self.store, price, cursor)
            }
            _ => self.oldest_target_change(id, price, cursor),
        }
    }

    /// How far the price has to move to reach what `id` predicted `horizon` hours ago.
    fn oldest_target_change(
        &self,
        id: ModelId,
        price: f64,
        cursor: &TimeCursor,
    ) -> CoreResult<Option<f64>> {
        let horizon = self.delegate.horizon(id)?;
        let hours = self.store.bars(Resolution::TRAINING)?;
        let now = cursor.get(Resolution::TRAINING);
        if now < horizon || now >= hours.len() {
            return Ok(None);
        }
        let target = hours[now - horizon].start;

        let mut past = TimeCursor::new();
        for resolution in Resolution::TRAINING.and_coarser() {
            past.locate(resolution, &self.store.bars(resolution)?, target);
        }
        let price_before = f64::from(hours[past.get(Resolution::TRAINING)].median);
        if price_before <= 0.0 {
            return Ok(None);
        }
        let Some(dfp) = self
            .delegate
            .predict_dfp(id, self.store, price_before, &past)?
        else {
            return Ok(None);
        };
        Ok(Some(price_before * dfp.exp() / price - 1.0))
    }
}

/// Price windows of one resolution at one cursor position, with per-periods MACD memos.
struct Window<'b> {
    bars: &'b [Bar],
    idx: usize,
    price: f64,
    macd: HashMap<usize, Option<Macd>>,
    macd_with_price: HashMap<usize, Option<Macd>>,
}

impl<'b> Window<'b> {
    fn new(bars: &'b [Bar], idx: usize, price: f64) -> Self {
        Self {
            bars,
            idx,
            price,
            macd: HashMap::new(),
            macd_with_price: HashMap::new(),
        }
    }

    /// Closes of `[end - periods + 1, end]`.
    fn closes(&self, periods: usize, end: usize) -> Option<Vec<f64>> {
        if end >= self.bars.len() || end + 1 < periods {
            return None;
        }
        Some(
            self.bars[end + 1 - periods..=end]
                .iter()
                .map(|b| f64::from(b.close))
                .collect(),
        )
    }

    fn closes_with_price(&self, periods: usize, end: usize) -> Option<Vec<f64>> {
        let mut prices = self.closes(periods, end)?;
        prices.push(self.price);
        Some(prices)
    }

    fn prices(&self, periods: usize, with_price: bool) -> Option<Vec<f64>> {
        if with_price {
            self.closes_with_price(periods, self.idx)
        } else {
            self.closes(periods, self.idx)
        }
    }

    fn macd_at(&self, periods: usize, end: Option<usize>) -> CoreResult<Option<Macd>> {
        match end.and_then(|e| self.closes(periods, e)) {
            Some(prices) => Macd::compute(&prices).map(Some),
            None => Ok(None),
        }
    }

    fn current_macd(&mut self, periods: usize, with_price: bool) -> CoreResult<Option<Macd>> {
        let memo = if with_price {
            &self.macd_with_price
        } else {
            &self.macd
        };
        if let Some(cached) = memo.get(&periods) {
            return Ok(*cached);
        }
        let computed = match self.prices(periods, with_price) {
            Some(prices) => Some(Macd::compute(&prices)?),
            None => None,
        };
        let memo = if with_price {
            &mut self.macd_with_price
        } else {
            &mut self.macd
        };
        memo.insert(periods, computed);
        Ok(computed)
    }

    fn previous_macd(&self, periods: usize) -> CoreResult<Option<Macd>> {
        self.macd_at(periods, self.idx.checked_sub(1))
    }

    fn within_margin(&self, prices: &[f64], margin: f64) -> CoreResult<bool> {
        Ok((stats::mean(prices)? / self.price - 1.0).abs() <= margin)
    }

    fn value(&mut self, d: &FeatureDescriptor) -> CoreResult<Option<f64>> {
        use FeatureKind as K;

        let p = d.periods;
        let with_price = matches!(
            d.kind,
            K::RsiWithCurrentPrice
                | K::RsiBucketWithCurrentPrice
                | K::LastCriticalRsiWithCurrentPrice
                | K::MacdSignalWithCurrentPrice
                | K::MacdHistWithCurrentPrice
                | K::MacdHistChangeWithCurrentPrice
        );

        let value = match d.kind {
            K::Rsi | K::RsiWithCurrentPrice => {
                let Some(prices) = self.prices(p, with_price) else {
                    return Ok(None);
                };
                rsi(&prices, RSI_PERIODS)?
            }
            K::RsiBucket | K::RsiBucketWithCurrentPrice => {
                let Some(prices) = self.prices(p, with_price) else {
                    return Ok(None);
                };
                f64::from(rsi_bucket(rsi(&prices, RSI_PERIODS)?))
            }
            K::LastCriticalRsi | K::LastCriticalRsiWithCurrentPrice => {
                let start = (self.idx + p).saturating_sub(CRITICAL_RSI_LOOKBACK).max(p);
                let mut critical = 0;
                for k in start..=self.idx {
                    let window = if with_price {
                        self.closes_with_price(p, k)
                    } else {
                        self.closes(p, k)
                    };
                    let Some(prices) = window else {
                        return Ok(None);
                    };
                    critical = last_critical_rsi(rsi_bucket(rsi(&prices, RSI_PERIODS)?), critical);
                }
                f64::from(critical)
            }
            K::MeanToStd | K::MeanToStdFloor => {
                let Some(prices) = self.prices(p, false) else {
                    return Ok(None);
                };
                let std = stats::std_dev(&prices)?;
                let z = if std == 0.0 {
                    0.0
                } else {
                    (self.price - stats::mean(&prices)?) / std
                };
                if d.kind == K::MeanToStdFloor {
                    z.floor()
                } else {
                    z
                }
            }
            K::LinearRegressionSlope | K::LinearRegressionSlopeSign => {
                let Some(prices) = self.prices(p, false) else {
                    return Ok(None);
                };
                let slope = LinearFit::fit(&prices)?.slope;
                match d.kind {
                    K::LinearRegressionSlope => slope,
                    _ if slope >= 0.0 => 1.0,
                    _ => -1.0,
                }
            }
            K::MarginSlope | K::MarginSlopeSign => {
                let Some(prices) = self.prices(p, false) else {
                    return Ok(None);
                };
                if self.within_margin(&prices, d.attribute(0))? {
                    0.0
                } else {
                    let slope = LinearFit::fit(&prices)?.slope;
                    match d.kind {
                        K::MarginSlope => slope,
                        _ if slope > 0.0 => 1.0,
                        _ => -1.0,
                    }
                }
            }
            K::MacdSignal | K::MacdSignalWithCurrentPrice => {
                let Some(m) = self.current_macd(p, with_price)? else {
                    return Ok(None);
                };
                m.signal
            }
            K::MacdHist | K::MacdHistWithCurrentPrice => {
                let Some(m) = self.current_macd(p, with_price)? else {
                    return Ok(None);
                };
                m.hist
            }
            K::Macd => {
                let Some(m) = self.current_macd(p, false)? else {
                    return Ok(None);
                };
                m.macd
            }
            K::MacdHistSign => {
                let Some(m) = self.current_macd(p, false)? else {
                    return Ok(None);
                };
                if m.hist >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            K::MacdHistChange
            | K::MacdHistChangeWithCurrentPrice
            | K::MacdHistCrossed
            | K::MacdHistDifference => {
                let (Some(cur), Some(prev)) =
                    (self.current_macd(p, with_price)?, self.previous_macd(p)?)
                else {
                    return Ok(None);
                };
                match d.kind {
                    K::MacdHistCrossed => match (cur.hist >= 0.0, prev.hist >= 0.0) {
                        (true, false) => 1.0,
                        (false, true) => -1.0,
                        _ => 0.0,
                    },
                    K::MacdHistDifference => cur.hist - prev.hist,
                    _ if prev.hist == 0.0 => 0.0,
                    _ => cur.hist / prev.hist - 1.0,
                }
            }
            K::MacdHistSlope => {
                let n = d.attribute(0) as usize;
                let mut hist = Vec::with_capacity(n);
                for k in (0..n).rev() {
                    let Some(m) = self.macd_at(p, self.idx.checked_sub(k))? else {
                        return Ok(None);
                    };
                    hist.push(m.hist);
                }
                LinearFit::fit(&hist)?.slope
            }
            K::SlopesEma => {
                let mut slopes = Vec::with_capacity(d.attributes.len());
                for &length in &d.attributes {
                    let Some(prices) = self.closes(length as usize, self.idx) else {
                        return Ok(None);
                    };
                    slopes.push(LinearFit::fit(&prices)?.slope);
                }
                last_ema(&slopes, slopes.len())?
            }
            K::AboveAverage => {
                let Some(prices) = self.prices(p, false) else {
                    return Ok(None);
                };
                if self.price >= stats::mean(&prices)? {
                    1.0
                } else {
                    0.0
                }
            }
            K::PercentMargin => {
                let Some(prices) = self.prices(p, false) else {
                    return Ok(None);
                };
                if self.within_margin(&prices, d.attribute(0))? {
                    1.0
                } else {
                    0.0
                }
            }
            K::DelegatePrediction | K::DelegatePredictionOfOldestTargetChange => {
                return Err(CoreError::invalid_state(format!(
                    "{} must be evaluated by the engine",
                    d.kind
                )))
            }
        };
        Ok(Some(value))
    }
}
