//! Technical indicators over `f64` price slices.
//!
//! All smoothers are recursive and seeded with the first observation, so the
//! output has the same length as the input.

/// Exponentially weighted mean with smoothing factor `alpha`.
fn ewm(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Exponential moving average with span `period`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period.max(1) as f64 + 1.0);
    ewm(values, alpha)
}

/// Relative strength index with Wilder smoothing.
///
/// The first value, and any value where the average loss is zero, is 50.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if closes.is_empty() {
        return Vec::new();
    }

    let alpha = 1.0 / period.max(1) as f64;
    let (gains, losses): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|w| {
            let delta = w[1] - w[0];
            (delta.max(0.0), (-delta).max(0.0))
        })
        .unzip();

    let avg_gain = ewm(&gains, alpha);
    let avg_loss = ewm(&losses, alpha);

    let mut out = Vec::with_capacity(closes.len());
    out.push(50.0);
    for (g, l) in avg_gain.iter().zip(&avg_loss) {
        if *l == 0.0 || !l.is_finite() || !g.is_finite() {
            out.push(50.0);
        } else {
            let rs = g / l;
            out.push(100.0 - 100.0 / (1.0 + rs));
        }
    }
    out
}

/// Average true range with Wilder smoothing.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    let mut tr = Vec::with_capacity(n);
    for i in 0..n {
        let range = (highs[i] - lows[i]).abs();
        if i == 0 {
            tr.push(range);
        } else {
            let prev_close = closes[i - 1];
            tr.push(
                range
                    .max((highs[i] - prev_close).abs())
                    .max((lows[i] - prev_close).abs()),
            );
        }
    }
    ewm(&tr, 1.0 / period.max(1) as f64)
}

/// Simple mean of the last `n` values.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    Some(values[values.len() - n..].iter().sum::<f64>() / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn ema_is_seeded_with_first_value() {
        let out = ema(&[10.0, 11.0, 12.0], 3);
        // alpha = 0.5
        assert!(approx(out[0], 10.0));
        assert!(approx(out[1], 10.5));
        assert!(approx(out[2], 11.25));
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let out = ema(&[5.0; 20], 7);
        assert!(out.iter().all(|v| approx(*v, 5.0)));
    }

    #[test]
    fn rsi_mixed_moves() {
        // deltas: +2, -1 ; alpha = 0.5
        let out = rsi(&[10.0, 12.0, 11.0], 2);
        assert_eq!(out.len(), 3);
        assert!(approx(out[0], 50.0));
        // avg_loss is zero after the first delta
        assert!(approx(out[1], 50.0));
        // avg_gain = 0.5*0 + 0.5*2 = 1, avg_loss = 0.5*1 + 0.5*0 = 0.5, rs = 2
        assert!(approx(out[2], 100.0 - 100.0 / 3.0));
    }

    #[test]
    fn rsi_strong_downtrend_is_low() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 - i as f64 + if i % 5 == 0 { 0.5 } else { 0.0 }).collect();
        let out = rsi(&closes, 14);
        assert!(*out.last().unwrap() < 30.0);
    }

    #[test]
    fn atr_uses_true_range() {
        let highs = [11.0, 13.0];
        let lows = [9.0, 12.0];
        let closes = [10.0, 12.5];
        let out = atr(&highs, &lows, &closes, 2);
        // tr = [2, max(1, 3, 2)] = [2, 3]; alpha = 0.5
        assert!(approx(out[0], 2.0));
        assert!(approx(out[1], 2.5));
    }

    #[test]
    fn sma_requires_enough_values() {
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
    }
}
