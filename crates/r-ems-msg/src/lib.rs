//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Named-parameter data model, complex codec and action combinators."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Data model exchanged across bus boundaries.
//!
//! Parameters are addressed by `(object, property)` and grouped into
//! [`ParameterSet`]s, which travel through transactions inside a
//! [`TransactionEnvelope`].
#![warn(missing_docs)]

pub mod action;
pub mod codec;
pub mod types;

use thiserror::Error;

/// Raised when a parameter lookup misses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// No parameter is stored under the identity.
    #[error("parameter {id} not found")]
    Missing {
        /// Identity that was requested.
        id: ParamId,
    },
}

/// Raised when a wire literal cannot be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The literal was blank.
    #[error("empty value literal")]
    Empty,
    /// The literal matched neither the rectangular nor the polar form.
    #[error("malformed complex literal '{0}'")]
    Malformed(String),
}

/// Raised when a combinator cannot fold its operands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArithmeticError {
    /// A quotient met a zero divisor.
    #[error("division by zero in action '{action}'")]
    DivisionByZero {
        /// Action name.
        action: String,
    },
    /// An operand was text or null.
    #[error("action '{action}' cannot combine non-numeric value '{value}'")]
    NonNumeric {
        /// Action name.
        action: String,
        /// Rendered operand.
        value: String,
    },
    /// Integer arithmetic overflowed.
    #[error("integer overflow in action '{action}'")]
    Overflow {
        /// Action name.
        action: String,
    },
}

pub use action::{ActionCombinator, ActionKind, ScanMode};
pub use codec::{format_complex, parse_complex, render_value, split_value_unit};
pub use num_complex::Complex64;
pub use types::{ParamFormat, ParamId, ParamValue, Parameter, ParameterSet, TransactionEnvelope};
