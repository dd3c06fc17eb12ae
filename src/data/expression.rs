//! Per-channel math applied to the moving average before it is stored.
//!
//! Expressions use `evalexpr` syntax with two variables: `x` is the time since the
//! channel's start, `y` the moving average. `y * 1000` converts volts to millivolts.

use crate::error::{AppResult, DaqError};
use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};

/// Math applied to a channel's moving average.
///
/// `x` is seconds since acquisition start and `y` the average.
#[derive(Debug, Clone)]
pub struct ChannelExpression {
    source: String,
    tree: Node,
}

impl ChannelExpression {
    /// Parse once; evaluation reuses the operator tree.
    ///
    /// The tree is also evaluated at `x = 1, y = 1`: some incomplete expressions
    /// (`y +`) build without complaint and only fail when evaluated.
    pub fn parse(source: &str) -> AppResult<Self> {
        let tree = build_operator_tree(source).map_err(|e| DaqError::Expression {
            expression: source.to_string(),
            message: e.to_string(),
        })?;
        let expression = Self {
            source: source.to_string(),
            tree,
        };
        expression.try_evaluate(1.0, 1.0)?;
        Ok(expression)
    }

    /// Expression as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `x` and `y` bound; any failure is an error.
    pub fn try_evaluate(&self, x: f64, y: f64) -> AppResult<f64> {
        let mut context = HashMapContext::new();
        let to_error = |e: evalexpr::EvalexprError| DaqError::Expression {
            expression: self.source.clone(),
            message: e.to_string(),
        };
        context
            .set_value("x".to_string(), Value::Float(x))
            .map_err(to_error)?;
        context
            .set_value("y".to_string(), Value::Float(y))
            .map_err(to_error)?;
        self.tree.eval_number_with_context(&context).map_err(to_error)
    }

    /// Evaluate, substituting `0.0` when the expression fails at runtime.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        match self.try_evaluate(x, y) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(expression = %self.source, error = %e, "Channel math failed");
                0.0
            }
        }
    }
}

impl PartialEq for ChannelExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
