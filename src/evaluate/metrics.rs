// Binary classification metrics. Positive class is `Label::Cataract`.
//
// Hard predictions come from thresholding the positive-class probability at
// 0.5 (strictly greater is positive). ROC analysis works on the raw
// probabilities and is undefined unless both classes are present.

use ndarray::Array2;

use crate::dataloader::error::{PipelineError, Result};
use crate::dataloader::sample::Label;

pub const DECISION_THRESHOLD: f64 = 0.5;

/// 2x2 confusion matrix, rows are true class, columns predicted class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    pub tn: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tp: u64,
}

impl ConfusionMatrix {
    pub fn from_predictions(predictions: &[Label], targets: &[Label]) -> Self {
        let mut cm = ConfusionMatrix::default();
        for (&pred, &target) in predictions.iter().zip(targets.iter()) {
            match (target, pred) {
                (Label::Normal, Label::Normal) => cm.tn += 1,
                (Label::Normal, Label::Cataract) => cm.fp += 1,
                (Label::Cataract, Label::Normal) => cm.fn_ += 1,
                (Label::Cataract, Label::Cataract) => cm.tp += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> u64 {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn matrix(&self) -> [[u64; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }

    pub fn to_string_table(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("{:>8}", ""));
        for c in 0..2 {
            s.push_str(&format!("{:>8}", format!("Pred {c}")));
        }
        s.push('\n');
        for (r, row) in self.matrix().iter().enumerate() {
            s.push_str(&format!("{:>8}", format!("True {r}")));
            for value in row {
                s.push_str(&format!("{:>8}", value));
            }
            s.push('\n');
        }
        s
    }
}

pub fn threshold(probabilities: &[f64]) -> Vec<Label> {
    probabilities
        .iter()
        .map(|&p| if p > DECISION_THRESHOLD { Label::Cataract } else { Label::Normal })
        .collect()
}

/// Column 1 of a `(n, 2)` softmax output.
pub fn positive_probabilities(class_probabilities: &Array2<f32>) -> Vec<f64> {
    class_probabilities.column(Label::Cataract.index()).iter().map(|&p| p as f64).collect()
}

pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    ratio(cm.tp + cm.tn, cm.total())
}

/// TP / (TP + FP), 0 when nothing was predicted positive.
pub fn precision(cm: &ConfusionMatrix) -> f64 {
    ratio(cm.tp, cm.tp + cm.fp)
}

/// TP / (TP + FN), 0 when there are no positives.
pub fn recall(cm: &ConfusionMatrix) -> f64 {
    ratio(cm.tp, cm.tp + cm.fn_)
}

pub fn f1_score(cm: &ConfusionMatrix) -> f64 {
    let p = precision(cm);
    let r = recall(cm);
    if p + r == 0.0 {
        0.0
    } else {
        2.0 * p * r / (p + r)
    }
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Decreasing. The first entry is `f64::INFINITY` for the (0, 0) point.
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    /// Trapezoidal area under the curve.
    pub fn auc(&self) -> f64 {
        self.fpr
            .windows(2)
            .zip(self.tpr.windows(2))
            .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
            .sum()
    }
}

/// One point per distinct score, highest score first.
pub fn roc_curve(targets: &[Label], scores: &[f64]) -> Result<RocCurve> {
    if targets.len() != scores.len() {
        return Err(PipelineError::LengthMismatch {
            expected: targets.len(),
            actual: scores.len(),
        });
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(PipelineError::UndefinedMetric {
            metric: "roc_auc",
            reason: format!("score at index {i} is {}", scores[i]),
        });
    }

    let positives = targets.iter().filter(|&&t| t == Label::Cataract).count();
    let negatives = targets.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(PipelineError::UndefinedMetric {
            metric: "roc_auc",
            reason: format!(
                "only one class present in true labels ({positives} positive, {negatives} negative)"
            ),
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    let (mut tp, mut fp) = (0usize, 0usize);

    for (rank, &idx) in order.iter().enumerate() {
        match targets[idx] {
            Label::Cataract => tp += 1,
            Label::Normal => fp += 1,
        }
        let last_of_score = order
            .get(rank + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if last_of_score {
            fpr.push(fp as f64 / negatives as f64);
            tpr.push(tp as f64 / positives as f64);
            thresholds.push(scores[idx]);
        }
    }

    Ok(RocCurve { fpr, tpr, thresholds })
}

pub fn roc_auc(targets: &[Label], scores: &[f64]) -> Result<f64> {
    Ok(roc_curve(targets, scores)?.auc())
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    pub confusion: ConfusionMatrix,
    pub roc: RocCurve,
}

/// Threshold the probabilities, then compute every metric.
pub fn evaluate(targets: &[Label], probabilities: &[f64]) -> Result<Evaluation> {
    if targets.is_empty() {
        return Err(PipelineError::EmptyDataset("evaluation".to_string()));
    }
    let roc = roc_curve(targets, probabilities)?;
    let predictions = threshold(probabilities);
    let confusion = ConfusionMatrix::from_predictions(&predictions, targets);

    if confusion.tp + confusion.fp == 0 {
        tracing::warn!("no positive predictions, precision reported as 0");
    }

    Ok(Evaluation {
        accuracy: accuracy(&confusion),
        precision: precision(&confusion),
        recall: recall(&confusion),
        f1: f1_score(&confusion),
        roc_auc: roc.auc(),
        confusion,
        roc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataloader::sample::Label::{Cataract as C, Normal as N};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn perfect_separation() {
        let eval = evaluate(&[N, N, C, C], &[0.1, 0.4, 0.6, 0.9]).unwrap();
        assert!(close(eval.accuracy, 1.0));
        assert!(close(eval.roc_auc, 1.0));
        assert!(close(eval.precision, 1.0));
        assert!(close(eval.recall, 1.0));
        assert!(close(eval.f1, 1.0));
        assert_eq!(eval.confusion.matrix(), [[2, 0], [0, 2]]);
    }

    #[test]
    fn single_class_auc_is_undefined() {
        let err = roc_auc(&[C, C, C], &[0.2, 0.7, 0.9]).unwrap_err();
        assert!(matches!(err, PipelineError::UndefinedMetric { metric: "roc_auc", .. }));
        assert!(evaluate(&[N, N], &[0.3, 0.6]).is_err());
    }

    #[test]
    fn metrics_on_mixed_predictions() {
        // tp=2 fp=1 fn=1 tn=2
        let targets = [C, C, C, N, N, N];
        let probs = [0.9, 0.7, 0.2, 0.8, 0.3, 0.1];
        let eval = evaluate(&targets, &probs).unwrap();
        assert_eq!(eval.confusion, ConfusionMatrix { tn: 2, fp: 1, fn_: 1, tp: 2 });
        assert!(close(eval.accuracy, 4.0 / 6.0));
        assert!(close(eval.precision, 2.0 / 3.0));
        assert!(close(eval.recall, 2.0 / 3.0));
        assert!(close(eval.f1, 2.0 / 3.0));
        // 6 of 9 positive/negative pairs ranked correctly
        assert!(close(eval.roc_auc, 6.0 / 9.0));
    }

    #[test]
    fn auc_uses_probabilities_not_hard_predictions() {
        // All below threshold, yet perfectly ranked
        let eval = evaluate(&[N, C, N, C], &[0.1, 0.3, 0.2, 0.4]).unwrap();
        assert!(close(eval.accuracy, 0.5));
        assert!(close(eval.roc_auc, 1.0));
        assert!(close(eval.precision, 0.0));
    }

    #[test]
    fn ties_get_half_credit() {
        assert!(close(roc_auc(&[N, C], &[0.5, 0.5]).unwrap(), 0.5));
    }

    #[test]
    fn threshold_is_strict() {
        assert_eq!(threshold(&[0.5, 0.500001, 0.0]), vec![N, C, N]);
    }

    #[test]
    fn curve_starts_at_origin_and_ends_at_one() {
        let roc = roc_curve(&[N, C, N, C, C], &[0.1, 0.8, 0.35, 0.4, 0.9]).unwrap();
        assert_eq!((roc.fpr[0], roc.tpr[0]), (0.0, 0.0));
        assert_eq!((*roc.fpr.last().unwrap(), *roc.tpr.last().unwrap()), (1.0, 1.0));
        assert!(roc.thresholds[0].is_infinite());
        assert!(roc.thresholds.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn non_finite_probabilities_are_rejected() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = evaluate(&[N, C], &[bad, 0.7]).unwrap_err();
            assert!(
                matches!(err, PipelineError::UndefinedMetric { metric: "roc_auc", .. }),
                "{bad} gave {err}"
            );
            assert!(roc_auc(&[N, C, C], &[0.1, 0.9, bad]).is_err());
        }
    }

    #[test]
    fn length_mismatch_is_an_error() {
        assert!(matches!(
            roc_curve(&[N, C], &[0.1]),
            Err(PipelineError::LengthMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn positive_column_is_selected() {
        let probs = Array2::from_shape_vec((2, 2), vec![0.9f32, 0.1, 0.25, 0.75]).unwrap();
        assert_eq!(positive_probabilities(&probs), vec![0.1f32 as f64, 0.75]);
    }
}
