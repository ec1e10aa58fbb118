//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ordered reductions over parameters drawn from several sets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Action combinators fold selected parameters into one derived parameter.
//!
//! Selectors are evaluated in declaration order and the fold is a left fold
//! in that same order. `Difference` and `Quotient` are not commutative, so
//! reordering their selectors changes the result.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{ParamId, ParamValue, Parameter, ParameterSet};
use crate::ArithmeticError;

/// Binary operator applied by a combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    /// `a + b`
    Sum,
    /// `a - b`
    Difference,
    /// `a * b`
    Product,
    /// `a / b`
    Quotient,
}

impl ActionKind {
    /// Whether operand order matters.
    pub fn is_order_sensitive(self) -> bool {
        matches!(self, ActionKind::Difference | ActionKind::Quotient)
    }
}

/// How many matches a selector contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// The first matching parameter across the input sets.
    #[default]
    First,
    /// Every matching parameter, in input-set order.
    All,
}

/// Reduction of selected parameters into a single named output.
#[derive(Debug, Clone)]
pub struct ActionCombinator {
    name: String,
    kind: ActionKind,
    selectors: Vec<ParamId>,
    scan: ScanMode,
}

impl ActionCombinator {
    /// Build a combinator. Order-sensitive kinds emit a warning so that
    /// configuration authors notice selector order matters.
    pub fn new(name: impl Into<String>, kind: ActionKind, selectors: Vec<ParamId>) -> Self {
        let name = name.into();
        if kind.is_order_sensitive() {
            warn!(
                action = %name,
                kind = %kind,
                "{kind} is not commutative; operands are folded in selector order"
            );
        }
        Self {
            name,
            kind,
            selectors,
            scan: ScanMode::First,
        }
    }

    /// Choose how many matches each selector contributes.
    pub fn with_scan(mut self, scan: ScanMode) -> Self {
        self.scan = scan;
        self
    }

    /// Name of the produced parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operator applied between operands.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Operand selectors in fold order.
    pub fn selectors(&self) -> &[ParamId] {
        &self.selectors
    }

    /// Evaluate the combinator over an ordered list of parameter sets.
    ///
    /// One collected value passes through unchanged and no match yields a
    /// null value. Arithmetic failures propagate.
    pub fn execute(&self, inputs: &[ParameterSet]) -> Result<Parameter, ArithmeticError> {
        let collected = self.collect(inputs);
        let mut operands = collected.into_iter();
        let Some(first) = operands.next() else {
            return Ok(Parameter::global(self.name.clone(), ParamValue::Null));
        };
        let unit = first.unit.clone();
        let mut acc = first.value.clone();
        for operand in operands {
            acc = self.apply(&acc, &operand.value)?;
        }
        let mut output = Parameter::global(self.name.clone(), acc);
        output.unit = unit;
        Ok(output)
    }

    fn collect<'a>(&self, inputs: &'a [ParameterSet]) -> Vec<&'a Parameter> {
        let mut collected = Vec::new();
        for selector in &self.selectors {
            let property = selector.property.as_deref();
            let mut matches = inputs
                .iter()
                .filter_map(|set| set.find(&selector.object, property));
            match self.scan {
                ScanMode::First => collected.extend(matches.next()),
                ScanMode::All => collected.extend(matches),
            }
        }
        collected
    }

    fn apply(&self, lhs: &ParamValue, rhs: &ParamValue) -> Result<ParamValue, ArithmeticError> {
        match (lhs, rhs) {
            (ParamValue::Int(a), ParamValue::Int(b)) => self.apply_int(*a, *b),
            (ParamValue::Complex(_), _) | (_, ParamValue::Complex(_)) => {
                let a = self.numeric(lhs)?;
                let b = self.numeric(rhs)?;
                self.apply_complex(a, b).map(ParamValue::Complex)
            }
            _ => {
                let a = self.numeric(lhs)?.re;
                let b = self.numeric(rhs)?.re;
                self.apply_real(a, b).map(ParamValue::Real)
            }
        }
    }

    fn numeric(&self, value: &ParamValue) -> Result<Complex64, ArithmeticError> {
        value.as_complex().ok_or_else(|| ArithmeticError::NonNumeric {
            action: self.name.clone(),
            value: value.to_string(),
        })
    }

    fn apply_int(&self, a: i64, b: i64) -> Result<ParamValue, ArithmeticError> {
        let result = match self.kind {
            ActionKind::Sum => a.checked_add(b),
            ActionKind::Difference => a.checked_sub(b),
            ActionKind::Product => a.checked_mul(b),
            ActionKind::Quotient => {
                if b == 0 {
                    return Err(self.division_by_zero());
                }
                return Ok(ParamValue::Real(a as f64 / b as f64));
            }
        };
        result
            .map(ParamValue::Int)
            .ok_or_else(|| ArithmeticError::Overflow {
                action: self.name.clone(),
            })
    }

    fn apply_real(&self, a: f64, b: f64) -> Result<f64, ArithmeticError> {
        Ok(match self.kind {
            ActionKind::Sum => a + b,
            ActionKind::Difference => a - b,
            ActionKind::Product => a * b,
            ActionKind::Quotient => {
                if b == 0.0 {
                    return Err(self.division_by_zero());
                }
                a / b
            }
        })
    }

    fn apply_complex(&self, a: Complex64, b: Complex64) -> Result<Complex64, ArithmeticError> {
        Ok(match self.kind {
            ActionKind::Sum => a + b,
            ActionKind::Difference => a - b,
            ActionKind::Product => a * b,
            ActionKind::Quotient => {
                if b.re == 0.0 && b.im == 0.0 {
                    return Err(self.division_by_zero());
                }
                a / b
            }
        })
    }

    fn division_by_zero(&self) -> ArithmeticError {
        ArithmeticError::DivisionByZero {
            action: self.name.clone(),
        }
    }
}
