//! Logistic-regression confirmation filter for entry signals.

use tracing::{debug, info};

/// Probability reported when the filter is enabled but untrained.
pub const UNTRAINED_PROBA: f64 = 0.60;

/// Samples required before [`MlSignalFilter::fit`] trains a model.
pub const MIN_TRAINING_SAMPLES: usize = 200;

const TRAINING_ITERATIONS: usize = 200;
const LEARNING_RATE: f64 = 0.5;

/// Fitted logistic regression.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    /// Feature weights.
    pub weights: Vec<f64>,
    /// Intercept.
    pub bias: f64,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl LogisticModel {
    /// Probability of the positive class.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        let z = self
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    /// Batch gradient descent on log-loss.
    pub fn train(x: &[Vec<f64>], y: &[bool]) -> Self {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        let mut model = Self {
            weights: vec![0.0; n_features],
            bias: 0.0,
        };
        let n = x.len().min(y.len()) as f64;
        if n == 0.0 {
            return model;
        }

        for _ in 0..TRAINING_ITERATIONS {
            let mut grad_w = vec![0.0; n_features];
            let mut grad_b = 0.0;
            for (row, &label) in x.iter().zip(y) {
                let err = model.predict_proba(row) - if label { 1.0 } else { 0.0 };
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }
            for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * g / n;
            }
            model.bias -= LEARNING_RATE * grad_b / n;
        }

        model
    }
}

/// Gate that confirms BUY signals with a probability threshold.
#[derive(Debug, Clone)]
pub struct MlSignalFilter {
    /// Whether the filter participates at all.
    pub enabled: bool,
    /// Minimum accepted probability.
    pub min_proba: f64,
    model: Option<LogisticModel>,
}

impl MlSignalFilter {
    /// Create an untrained filter.
    pub fn new(enabled: bool, min_proba: f64) -> Self {
        Self {
            enabled,
            min_proba,
            model: None,
        }
    }

    /// Install a previously fitted model.
    pub fn with_model(mut self, model: LogisticModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Whether a model has been fitted.
    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Fit on labelled feature rows. Ignored when disabled or with too few samples.
    pub fn fit(&mut self, x: &[Vec<f64>], y: &[bool]) {
        if !self.enabled {
            return;
        }
        if x.len() < MIN_TRAINING_SAMPLES || y.len() < MIN_TRAINING_SAMPLES {
            debug!(samples = x.len(), "Not enough samples to fit ML filter");
            return;
        }
        self.model = Some(LogisticModel::train(x, y));
        info!(samples = x.len(), "ML filter fitted");
    }

    /// Probability that the signal is worth taking.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        if !self.enabled {
            return 1.0;
        }
        match &self.model {
            Some(model) => model.predict_proba(features),
            None => UNTRAINED_PROBA,
        }
    }

    /// Whether the signal passes the threshold.
    pub fn allow(&self, features: &[f64]) -> bool {
        self.predict_proba(features) >= self.min_proba
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let x: Vec<Vec<f64>> = (0..n).map(|i| vec![if i % 2 == 0 { 1.0 } else { -1.0 }]).collect();
        let y: Vec<bool> = (0..n).map(|i| i % 2 == 0).collect();
        (x, y)
    }

    #[test]
    fn disabled_filter_allows_everything() {
        let filter = MlSignalFilter::new(false, 0.99);
        assert_eq!(filter.predict_proba(&[0.0]), 1.0);
        assert!(filter.allow(&[]));
    }

    #[test]
    fn untrained_filter_is_permissive_but_not_blind() {
        assert!(MlSignalFilter::new(true, 0.55).allow(&[0.0]));
        assert!(!MlSignalFilter::new(true, 0.65).allow(&[0.0]));
    }

    #[test]
    fn fit_requires_enough_samples() {
        let (x, y) = dataset(50);
        let mut filter = MlSignalFilter::new(true, 0.5);
        filter.fit(&x, &y);
        assert!(!filter.is_trained());
    }

    #[test]
    fn fit_learns_separable_feature() {
        let (x, y) = dataset(400);
        let mut filter = MlSignalFilter::new(true, 0.5);
        filter.fit(&x, &y);
        assert!(filter.is_trained());
        assert!(filter.predict_proba(&[1.0]) > 0.9);
        assert!(!filter.allow(&[-1.0]));
    }
}
