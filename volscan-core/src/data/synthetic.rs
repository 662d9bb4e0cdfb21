//! Deterministic synthetic bars for demos and tests.
//!
//! The RNG is seeded from a blake3 hash of the symbol, so the same symbol and
//! date range always produce the same bars. Weekends are skipped.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::Bar;

/// Volume shape over the generated range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// Independent noisy volume every day.
    Noise,
    /// Tight volume for `quiet_days`, then `breakout_days` of rising volume
    /// ending on the last generated bar. Price barely moves, so the last
    /// close sits on its moving averages.
    Breakout {
        quiet_days: usize,
        breakout_days: usize,
    },
}

fn rng_for(symbol: &str) -> StdRng {
    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    StdRng::from_seed(seed)
}

fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

/// Generate bars for `symbol` on every weekday in `start..=end`.
pub fn generate_bars(symbol: &str, start: NaiveDate, end: NaiveDate, shape: Shape) -> Vec<Bar> {
    let mut rng = rng_for(symbol);
    let days = trading_days(start, end);
    let n = days.len();

    let (quiet_from, breakout_from) = match shape {
        Shape::Noise => (n, n),
        Shape::Breakout {
            quiet_days,
            breakout_days,
        } => {
            let b = n.saturating_sub(breakout_days);
            (b.saturating_sub(quiet_days), b)
        }
    };

    let base_volume: f64 = rng.gen_range(200_000.0..2_000_000.0);
    let mut price: f64 = rng.gen_range(5.0..80.0);
    let mut bars = Vec::with_capacity(n);

    for (i, date) in days.into_iter().enumerate() {
        let (daily_return, volume) = if i < quiet_from {
            (
                rng.gen_range(-0.03..0.03),
                base_volume * rng.gen_range(0.1..3.0),
            )
        } else if i < breakout_from {
            (
                rng.gen_range(-0.002..0.002),
                base_volume * rng.gen_range(0.95..1.05),
            )
        } else {
            let step = (i - breakout_from) as f64;
            (
                rng.gen_range(-0.002..0.002),
                base_volume * (3.5 + step * 0.5),
            )
        };

        let open = price;
        let close = price * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
        let volume = volume.round() as u64;

        bars.push(Bar {
            symbol: symbol.to_string(),
            date,
            open,
            high,
            low,
            close,
            volume,
            amount: volume as f64 * (open + close) / 2.0,
        });
        price = close;
    }
    bars
}
