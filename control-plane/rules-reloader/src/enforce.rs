//! Tenant label injection for PromQL expressions.

use promql_parser::label::{MatchOp, Matcher, Matchers};
use promql_parser::parser::{self, Expr, VectorSelector};
use thiserror::Error;

/// Label carrying the tenant identity on every series and rule.
pub const TENANT_LABEL: &str = "tenant";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnforceError {
    #[error("failed to parse expression: {0}")]
    Parse(String),
    #[error("unsupported expression node: {0}")]
    Unsupported(String),
    #[error("label {label} already constrained to {existing}, refusing to set {wanted}")]
    Conflict {
        label: String,
        existing: String,
        wanted: String,
    },
}

impl EnforceError {
    /// Failure reason used on the publish-failure counter.
    pub fn reason(&self) -> &'static str {
        match self {
            EnforceError::Parse(_) => "parse_expr",
            EnforceError::Unsupported(_) | EnforceError::Conflict { .. } => {
                "enforce_label"
            }
        }
    }
}

/// Rewrites every vector selector of an expression so it carries
/// `label="value"`.
#[derive(Clone, Debug)]
pub struct LabelEnforcer {
    label: String,
    value: String,
    error_on_replace: bool,
}

impl LabelEnforcer {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            error_on_replace: false,
        }
    }

    /// Fail instead of overwriting a matcher on the enforced label that
    /// selects something other than the enforced value.
    pub fn error_on_replace(mut self, yes: bool) -> Self {
        self.error_on_replace = yes;
        self
    }

    pub fn enforce(&self, expr: &str) -> Result<String, EnforceError> {
        let mut ast = parser::parse(expr).map_err(EnforceError::Parse)?;
        self.walk(&mut ast)?;
        Ok(ast.to_string())
    }

    fn walk(&self, expr: &mut Expr) -> Result<(), EnforceError> {
        match expr {
            Expr::Aggregate(agg) => {
                self.walk(&mut agg.expr)?;
                if let Some(param) = agg.param.as_mut() {
                    self.walk(param)?;
                }
                Ok(())
            }
            Expr::Unary(u) => self.walk(&mut u.expr),
            Expr::Binary(b) => {
                self.walk(&mut b.lhs)?;
                self.walk(&mut b.rhs)
            }
            Expr::Paren(p) => self.walk(&mut p.expr),
            Expr::Subquery(s) => self.walk(&mut s.expr),
            Expr::Call(call) => {
                for arg in call.args.args.iter_mut() {
                    self.walk(arg)?;
                }
                Ok(())
            }
            Expr::VectorSelector(vs) => self.apply(vs),
            Expr::MatrixSelector(ms) => self.apply(&mut ms.vs),
            Expr::NumberLiteral(_) | Expr::StringLiteral(_) => Ok(()),
            Expr::Extension(_) => {
                Err(EnforceError::Unsupported("extension".to_string()))
            }
        }
    }

    fn apply(&self, vs: &mut VectorSelector) -> Result<(), EnforceError> {
        let Matchers {
            matchers,
            or_matchers,
        } = &mut vs.matchers;
        if or_matchers.is_empty() {
            self.replace(matchers)
        } else {
            for branch in or_matchers.iter_mut() {
                self.replace(branch)?;
            }
            Ok(())
        }
    }

    fn replace(&self, matchers: &mut Vec<Matcher>) -> Result<(), EnforceError> {
        if self.error_on_replace {
            if let Some(existing) = matchers.iter().find(|m| {
                m.name == self.label
                    && !(matches!(m.op, MatchOp::Equal) && m.value == self.value)
            }) {
                return Err(EnforceError::Conflict {
                    label: self.label.clone(),
                    existing: existing.value.clone(),
                    wanted: self.value.clone(),
                });
            }
        }
        matchers.retain(|m| m.name != self.label);
        matchers.push(Matcher::new(
            MatchOp::Equal,
            &self.label,
            &self.value,
        ));
        Ok(())
    }
}

/// Inject `tenant="<tenant>"` into every selector of `expr`.
pub fn enforce_tenant(expr: &str, tenant: &str) -> Result<String, EnforceError> {
    LabelEnforcer::new(TENANT_LABEL, tenant).enforce(expr)
}
