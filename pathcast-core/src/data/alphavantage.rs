//! Alpha Vantage realtime FX feed.
//!
//! Serves daily bars (`FX_DAILY`) and 1/5/15/30 minute bars (`FX_INTRADAY`) as CSV, and
//! the spot rate (`CURRENCY_EXCHANGE_RATE`) as JSON. Handles rate limiting, retries with
//! exponential backoff and the circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::circuit_breaker::CircuitBreaker;
use super::csv_feed::parse_bars;
use super::provider::{retain_ascending, BarFeed, DataError};
use crate::domain::{Bar, Resolution};

const BASE_URL: &str = "https://www.alphavantage.co/query";

pub struct AlphaVantageFeed {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    api_key: String,
    from_symbol: String,
    to_symbol: String,
    max_retries: u32,
    base_delay: Duration,
}

impl AlphaVantageFeed {
    /// EUR/USD feed.
    pub fn new(api_key: impl Into<String>) -> Result<Self, DataError> {
        Self::for_pair(api_key, "EUR", "USD", Arc::new(CircuitBreaker::for_realtime_api()))
    }

    pub fn for_pair(
        api_key: impl Into<String>,
        from_symbol: &str,
        to_symbol: &str,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::NetworkUnreachable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            circuit_breaker,
            api_key: api_key.into(),
            from_symbol: from_symbol.to_string(),
            to_symbol: to_symbol.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Query string for a bar request, `None` for resolutions the API does not offer.
    fn bars_query(&self, resolution: Resolution) -> Option<String> {
        let pair = format!("from_symbol={}&to_symbol={}", self.from_symbol, self.to_symbol);
        let function = match resolution {
            Resolution::D1 => return Some(format!("function=FX_DAILY&{pair}&outputsize=full")),
            Resolution::M30 => "30min",
            Resolution::M15 => "15min",
            Resolution::M5 => "5min",
            Resolution::M1 => "1min",
            _ => return None,
        };
        Some(format!(
            "function=FX_INTRADAY&{pair}&interval={function}&outputsize=full"
        ))
    }

    fn url(&self, query: &str, datatype: &str) -> String {
        format!("{BASE_URL}?{query}&datatype={datatype}&apikey={}", self.api_key)
    }

    /// GET with retry and circuit breaker logic; returns the response body.
    fn get_with_retry(&self, url: &str) -> Result<String, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }
            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }
            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::NetworkUnreachable(format!("HTTP {status}")));
                continue;
            }

            let body = resp
                .text()
                .map_err(|e| DataError::ResponseFormatChanged(format!("unreadable body: {e}")))?;
            // The API reports throttling with a 200 and a JSON "Note".
            if body.trim_start().starts_with('{') && body.contains("\"Note\"") {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: 60,
                });
                continue;
            }
            self.circuit_breaker.record_success();
            return Ok(body);
        }

        Err(last_error.unwrap_or_else(|| DataError::NetworkUnreachable("max retries exceeded".into())))
    }
}

/// Newest-first API rows → ascending bars, without the still-forming last bar.
pub fn bars_from_response(body: &str, resolution: Resolution, now_ms: i64) -> Vec<Bar> {
    let mut bars = parse_bars(body, resolution, 0);
    bars.reverse();
    let mut bars = retain_ascending("alphavantage", bars);
    if bars.last().is_some_and(|b| b.end > now_ms) {
        bars.pop();
    }
    bars
}

/// Spot rate from a `CURRENCY_EXCHANGE_RATE` JSON body.
pub fn price_from_response(body: &str) -> Result<f64, DataError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("exchange rate JSON: {e}")))?;
    let raw = json
        .get("Realtime Currency Exchange Rate")
        .and_then(|v| v.get("5. Exchange Rate"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DataError::ResponseFormatChanged("no '5. Exchange Rate' in response".into())
        })?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| DataError::ResponseFormatChanged(format!("exchange rate '{raw}': {e}")))
}

impl BarFeed for AlphaVantageFeed {
    fn name(&self) -> &str {
        "alphavantage"
    }

    fn fetch(&self, resolution: Resolution) -> Result<Vec<Bar>, DataError> {
        let query = self
            .bars_query(resolution)
            .ok_or_else(|| DataError::Unsupported {
                source_name: self.name().to_string(),
                resolution,
            })?;
        let body = self.get_with_retry(&self.url(&query, "csv"))?;
        let bars = bars_from_response(&body, resolution, chrono::Utc::now().timestamp_millis());
        if bars.is_empty() {
            return Err(DataError::ResponseFormatChanged(format!(
                "no {resolution} bars in response"
            )));
        }
        Ok(bars)
    }

    fn fetch_current_price(&self) -> Result<f64, DataError> {
        let query = format!(
            "function=CURRENCY_EXCHANGE_RATE&from_currency={}&to_currency={}",
            self.from_symbol, self.to_symbol
        );
        let body = self.get_with_retry(&self.url(&query, "json"))?;
        price_from_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::csv_feed::parse_timestamp;

    #[test]
    fn csv_body_is_reversed_and_trimmed() {
        let body = "timestamp,open,high,low,close\n\
                    2020-01-02 00:02:00,1.3,1.3,1.3,1.3\n\
                    2020-01-02 00:01:00,1.2,1.2,1.2,1.2\n\
                    2020-01-02 00:00:00,1.1,1.1,1.1,1.1\n";
        let t0 = parse_timestamp("2020-01-02 00:00:00").unwrap();
        // the 00:02 bar is still forming
        let bars = bars_from_response(body, Resolution::M1, t0 + 150_000);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].start, t0);
        assert_eq!(bars[1].close, 1.2);
    }

    #[test]
    fn exchange_rate_json() {
        let body = r#"{"Realtime Currency Exchange Rate": {"1. From_Currency Code": "EUR", "5. Exchange Rate": "1.08650000"}}"#;
        assert!((price_from_response(body).unwrap() - 1.0865).abs() < 1e-12);
        assert!(matches!(
            price_from_response(r#"{"Error Message": "bad key"}"#),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn only_api_resolutions_are_served() {
        let feed = AlphaVantageFeed::new("demo").unwrap();
        assert!(feed.bars_query(Resolution::D1).unwrap().contains("FX_DAILY"));
        assert!(feed.bars_query(Resolution::M5).unwrap().contains("interval=5min"));
        assert!(feed.bars_query(Resolution::H1).is_none());
        assert!(matches!(
            feed.fetch(Resolution::H2),
            Err(DataError::Unsupported { .. })
        ));
    }
}
