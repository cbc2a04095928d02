//! Feature descriptors: `Kind;periods;attr;attr...`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::ModelId;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    Rsi,
    RsiWithCurrentPrice,
    RsiBucket,
    RsiBucketWithCurrentPrice,
    LastCriticalRsi,
    LastCriticalRsiWithCurrentPrice,
    MeanToStd,
    MeanToStdFloor,
    LinearRegressionSlope,
    LinearRegressionSlopeSign,
    MarginSlope,
    MarginSlopeSign,
    MacdSignal,
    MacdSignalWithCurrentPrice,
    MacdHist,
    MacdHistWithCurrentPrice,
    MacdHistChange,
    MacdHistChangeWithCurrentPrice,
    MacdHistSlope,
    MacdHistSign,
    MacdHistCrossed,
    MacdHistDifference,
    Macd,
    SlopesEma,
    AboveAverage,
    PercentMargin,
    DelegatePrediction,
    DelegatePredictionOfOldestTargetChange,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 28] = [
        FeatureKind::Rsi,
        FeatureKind::RsiWithCurrentPrice,
        FeatureKind::RsiBucket,
        FeatureKind::RsiBucketWithCurrentPrice,
        FeatureKind::LastCriticalRsi,
        FeatureKind::LastCriticalRsiWithCurrentPrice,
        FeatureKind::MeanToStd,
        FeatureKind::MeanToStdFloor,
        FeatureKind::LinearRegressionSlope,
        FeatureKind::LinearRegressionSlopeSign,
        FeatureKind::MarginSlope,
        FeatureKind::MarginSlopeSign,
        FeatureKind::MacdSignal,
        FeatureKind::MacdSignalWithCurrentPrice,
        FeatureKind::MacdHist,
        FeatureKind::MacdHistWithCurrentPrice,
        FeatureKind::MacdHistChange,
        FeatureKind::MacdHistChangeWithCurrentPrice,
        FeatureKind::MacdHistSlope,
        FeatureKind::MacdHistSign,
        FeatureKind::MacdHistCrossed,
        FeatureKind::MacdHistDifference,
        FeatureKind::Macd,
        FeatureKind::SlopesEma,
        FeatureKind::AboveAverage,
        FeatureKind::PercentMargin,
        FeatureKind::DelegatePrediction,
        FeatureKind::DelegatePredictionOfOldestTargetChange,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Rsi => "Rsi",
            FeatureKind::RsiWithCurrentPrice => "RsiWithCurrentPrice",
            FeatureKind::RsiBucket => "RsiBucket",
            FeatureKind::RsiBucketWithCurrentPrice => "RsiBucketWithCurrentPrice",
            FeatureKind::LastCriticalRsi => "LastCriticalRsi",
            FeatureKind::LastCriticalRsiWithCurrentPrice => "LastCriticalRsiWithCurrentPrice",
            FeatureKind::MeanToStd => "MeanToStd",
            FeatureKind::MeanToStdFloor => "MeanToStdFloor",
            FeatureKind::LinearRegressionSlope => "LinearRegressionSlope",
            FeatureKind::LinearRegressionSlopeSign => "LinearRegressionSlopeSign",
            FeatureKind::MarginSlope => "MarginSlope",
            FeatureKind::MarginSlopeSign => "MarginSlopeSign",
            FeatureKind::MacdSignal => "MacdSignal",
            FeatureKind::MacdSignalWithCurrentPrice => "MacdSignalWithCurrentPrice",
            FeatureKind::MacdHist => "MacdHist",
            FeatureKind::MacdHistWithCurrentPrice => "MacdHistWithCurrentPrice",
            FeatureKind::MacdHistChange => "MacdHistChange",
            FeatureKind::MacdHistChangeWithCurrentPrice => "MacdHistChangeWithCurrentPrice",
            FeatureKind::MacdHistSlope => "MacdHistSlope",
            FeatureKind::MacdHistSign => "MacdHistSign",
            FeatureKind::MacdHistCrossed => "MacdHistCrossed",
            FeatureKind::MacdHistDifference => "MacdHistDifference",
            FeatureKind::Macd => "Macd",
            FeatureKind::SlopesEma => "SlopesEma",
            FeatureKind::AboveAverage => "AboveAverage",
            FeatureKind::PercentMargin => "PercentMargin",
            FeatureKind::DelegatePrediction => "DelegatePrediction",
            FeatureKind::DelegatePredictionOfOldestTargetChange => {
                "DelegatePredictionOfOldestTargetChange"
            }
        }
    }

    /// Attributes a descriptor of this kind must carry.
    pub fn required_attributes(self) -> usize {
        match self {
            FeatureKind::MarginSlope
            | FeatureKind::MarginSlopeSign
            | FeatureKind::PercentMargin
            | FeatureKind::MacdHistSlope
            | FeatureKind::SlopesEma
            | FeatureKind::DelegatePrediction
            | FeatureKind::DelegatePredictionOfOldestTargetChange => 1,
            _ => 0,
        }
    }

    /// Delegating kinds read another model instead of price history.
    pub fn is_delegating(self) -> bool {
        matches!(
            self,
            FeatureKind::DelegatePrediction | FeatureKind::DelegatePredictionOfOldestTargetChange
        )
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == needle)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown feature kind '{s}'")))
    }
}

/// One entry of a model's feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub kind: FeatureKind,
    /// Bars of history the feature looks back over.
    pub periods: usize,
    pub attributes: Vec<f64>,
}

impl FeatureDescriptor {
    pub fn new(kind: FeatureKind, periods: usize, attributes: Vec<f64>) -> Result<Self, CoreError> {
        if periods == 0 && !kind.is_delegating() {
            return Err(CoreError::invalid_argument(format!(
                "{kind} needs at least one period"
            )));
        }
        if attributes.len() < kind.required_attributes() {
            return Err(CoreError::invalid_argument(format!(
                "{kind} needs {} attribute(s), got {}",
                kind.required_attributes(),
                attributes.len()
            )));
        }
        if let Some(bad) = attributes.iter().find(|a| !a.is_finite()) {
            return Err(CoreError::invalid_argument(format!(
                "{kind} attribute {bad} is not a number"
            )));
        }
        if matches!(kind, FeatureKind::MacdHistSlope | FeatureKind::SlopesEma)
            && attributes.iter().any(|&a| a < 1.0)
        {
            return Err(CoreError::invalid_argument(format!(
                "{kind} lengths must be at least 1"
            )));
        }
        Ok(Self {
            kind,
            periods,
            attributes,
        })
    }

    pub fn attribute(&self, at: usize) -> f64 {
        self.attributes.get(at).copied().unwrap_or(0.0)
    }

    /// Model read by a delegating descriptor.
    pub fn delegate_id(&self) -> Option<ModelId> {
        self.kind
            .is_delegating()
            .then(|| ModelId(self.attribute(0) as u32))
    }
}

impl fmt::Display for FeatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.kind, self.periods)?;
        for a in &self.attributes {
            write!(f, ";{a}")?;
        }
        Ok(())
    }
}

impl FromStr for FeatureDescriptor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().split(';');
        let kind: FeatureKind = fields.next().unwrap_or_default().parse()?;
        let periods = fields
            .next()
            .ok_or_else(|| CoreError::invalid_argument(format!("descriptor '{s}' has no periods")))?
            .trim()
            .parse::<usize>()
            .map_err(|e| CoreError::invalid_argument(format!("descriptor '{s}': periods {e}")))?;
        let attributes = fields
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| {
                f.parse::<f64>().map_err(|e| {
                    CoreError::invalid_argument(format!("descriptor '{s}': attribute '{f}' {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(kind, periods, attributes)
    }
}
