//! Ordered combination of evaluators.

use tracing::{debug, warn};

use super::{EvaluationReport, Evaluator};
use crate::task::EvalKind;

/// Evaluators of one task, run in order. The task score is the product of
/// their scores.
pub struct EvaluatorComb {
    evaluators: Vec<Box<dyn Evaluator>>,
}

impl EvaluatorComb {
    pub fn new(evaluators: Vec<Box<dyn Evaluator>>) -> Self {
        Self { evaluators }
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    /// Environments of the evaluators, in order.
    pub fn kinds(&self) -> Vec<EvalKind> {
        self.evaluators.iter().map(|e| e.kind()).collect()
    }

    /// Resets every evaluator in order. Returns whether all succeeded.
    pub async fn reset(&self) -> bool {
        let mut all_ok = true;
        for evaluator in &self.evaluators {
            if !evaluator.reset().await {
                warn!("Reset failed for {} evaluator", evaluator.kind());
                all_ok = false;
            }
        }
        all_ok
    }

    /// Runs every evaluator, even after one scores 0, and multiplies scores
    /// starting from 1.0.
    pub async fn evaluate(&self) -> EvaluationReport {
        let mut report = EvaluationReport::new();
        for evaluator in &self.evaluators {
            let partial = evaluator.evaluate().await;
            debug!("{} evaluator scored {}", evaluator.kind(), partial.score);
            report.merge(partial);
        }
        report
    }
}
