//! Time-of-use electricity prices.

use serde::Deserialize;

/// One daily price band, `[start_hour, end_hour)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceBand {
    pub start_hour: f64,
    pub end_hour: f64,
    /// Buy price (currency/kWh).
    pub buy: f64,
}

impl PriceBand {
    fn contains(&self, hour: f64) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// Price table as configured.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceConfig {
    /// Bands checked in order; the first match wins.
    pub bands: Vec<PriceBand>,
    /// Buy price outside every band.
    pub off_peak_buy: f64,
    /// Sell price as a fraction of the buy price.
    pub sell_ratio: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        let band = |start_hour, end_hour, buy| PriceBand {
            start_hour,
            end_hour,
            buy,
        };
        Self {
            bands: vec![
                // peak
                band(9.0, 11.0, 1.2),
                band(15.0, 17.0, 1.2),
                // high
                band(8.0, 9.0, 1.0),
                band(17.0, 23.0, 1.0),
                // flat
                band(13.0, 15.0, 0.8),
                band(23.0, 24.0, 0.8),
            ],
            off_peak_buy: 0.5,
            sell_ratio: 0.8,
        }
    }
}

/// Immutable step function from simulation step to `(buy, sell)` prices.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSchedule {
    config: PriceConfig,
    dt_s: f64,
}

impl PriceSchedule {
    /// Binds a price table to a step duration.
    ///
    /// # Panics
    ///
    /// Panics if `dt_s` is not positive.
    pub fn new(config: PriceConfig, dt_s: f64) -> Self {
        assert!(dt_s > 0.0, "dt_s must be > 0");
        Self { config, dt_s }
    }

    /// `(buy, sell)` at a whole hour of day.
    pub fn price_at_hour(&self, hour: u32) -> (f64, f64) {
        let h = f64::from(hour % 24);
        let buy = self
            .config
            .bands
            .iter()
            .find(|b| b.contains(h))
            .map_or(self.config.off_peak_buy, |b| b.buy);
        (buy, buy * self.config.sell_ratio)
    }

    /// `(buy, sell)` at simulation step `time_index`.
    pub fn price(&self, time_index: usize) -> (f64, f64) {
        let hour = (time_index as f64 * self.dt_s / 3600.0).floor() as u64 % 24;
        self.price_at_hour(hour as u32)
    }
}

impl Default for PriceSchedule {
    fn default() -> Self {
        Self::new(PriceConfig::default(), 1.0)
    }
}
