//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Input/output translators and composite parameter expansion."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Translation applied at the bus boundary.
//!
//! A [`Translator`] rewrites what callers hand into a transaction and what
//! the bus hands back. Composite parameters, addressed to the virtual
//! `special` object, are expanded into concrete backend parameters after
//! translation.

use std::fmt;

use r_ems_common::config::TranslatorKind;
use r_ems_common::time::{format_timestamp, parse_timestamp};
use r_ems_msg::{Complex64, ParamValue, Parameter, ParameterSet, TransactionEnvelope};
use tracing::warn;

/// Virtual object carrying composite parameters.
pub const COMPOSITE_OBJECT: &str = "special";
pub const POSITIVE_SEQUENCE_VOLTAGE: &str = "positive_sequence_voltage";
pub const PHASE_VOLTAGES: [&str; 3] = ["voltage_A", "voltage_B", "voltage_C"];

pub const NEXT_TIME: &str = "next_time";
pub const VOLTAGE_REAL: &str = "voltage_real";
pub const VOLTAGE_IMAG: &str = "voltage_imag";
pub const LOAD_REAL: &str = "load_real";
pub const LOAD_IMAG: &str = "load_imag";
pub const SUMMED_POWER: &str = "summed_power";

/// Pre- and post-processing hook around a bus transaction.
pub trait Translator: Send + Sync + fmt::Debug {
    fn translate_inputs(&self, envelope: TransactionEnvelope) -> TransactionEnvelope {
        envelope
    }

    fn translate_outputs(&self, envelope: TransactionEnvelope) -> TransactionEnvelope {
        envelope
    }
}

/// Passes everything through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {}

/// Speaks the transmission-level aggregator's vocabulary.
///
/// Inputs carry a per-unit positive-sequence voltage as `voltage_real` and
/// `voltage_imag` globals plus an optional `next_time`. Outputs report the
/// `summed_power` global as `load_real`/`load_imag` in MW.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorTranslator {
    base_kv: f64,
}

impl AggregatorTranslator {
    pub fn new(base_kv: f64) -> Self {
        Self { base_kv }
    }

    pub fn base_kv(&self) -> f64 {
        self.base_kv
    }
}

impl Translator for AggregatorTranslator {
    fn translate_inputs(&self, envelope: TransactionEnvelope) -> TransactionEnvelope {
        let params = &envelope.parameters;
        let mut timestamp = envelope.timestamp;
        if let Some(next) = params.find(NEXT_TIME, None) {
            match parse_timestamp(&next.value.to_string()) {
                Some(ts) => timestamp = Some(ts),
                None => warn!(value = %next.value, "unparseable next_time ignored"),
            }
        }

        let mut translated = ParameterSet::new();
        let real = params.find(VOLTAGE_REAL, None).and_then(|p| p.value.as_real());
        let imag = params.find(VOLTAGE_IMAG, None).and_then(|p| p.value.as_real());
        match (real, imag) {
            (Some(real), Some(imag)) => {
                let scale = self.base_kv * 1000.0 / 3f64.sqrt();
                let voltage = Complex64::new(real, imag) * scale;
                translated.add(Parameter::new(
                    COMPOSITE_OBJECT,
                    Some(POSITIVE_SEQUENCE_VOLTAGE),
                    voltage,
                ));
            }
            _ => warn!("aggregator inputs lack voltage_real/voltage_imag; no voltage sent"),
        }
        TransactionEnvelope {
            parameters: translated,
            timestamp,
        }
    }

    fn translate_outputs(&self, envelope: TransactionEnvelope) -> TransactionEnvelope {
        let power = envelope
            .parameters
            .find(SUMMED_POWER, None)
            .and_then(|p| p.value.as_complex())
            .unwrap_or_default();
        let mut translated = ParameterSet::new();
        translated.add(Parameter::global(LOAD_REAL, power.re / 1e6));
        translated.add(Parameter::global(LOAD_IMAG, power.im / 1e6));
        if let Some(ts) = envelope.timestamp {
            translated.add(Parameter::global(
                NEXT_TIME,
                ParamValue::Text(format_timestamp(ts, None)),
            ));
        }
        TransactionEnvelope {
            parameters: translated,
            timestamp: envelope.timestamp,
        }
    }
}

/// Translator selected by configuration; `None` means identity.
pub fn translator_for(kind: Option<TranslatorKind>, base_kv: f64) -> Box<dyn Translator> {
    match kind {
        Some(TranslatorKind::Aggregator) => Box::new(AggregatorTranslator::new(base_kv)),
        Some(TranslatorKind::Identity) | None => Box::new(IdentityTranslator),
    }
}

/// Balanced three-phase voltages `(v, v·a², v·a)` with `a = e^{j·120°}`.
pub fn positive_sequence_to_phase(voltage: Complex64) -> [Complex64; 3] {
    let a = Complex64::from_polar(1.0, 120f64.to_radians());
    [voltage, voltage * a * a, voltage * a]
}

/// Replace composite parameters with the concrete parameters they stand for.
///
/// Unknown composite properties are dropped with a warning.
pub fn expand_composites(params: ParameterSet, composite_node: &str) -> ParameterSet {
    let mut expanded = ParameterSet::new();
    for param in params {
        if param.object != COMPOSITE_OBJECT {
            expanded.add(param);
            continue;
        }
        match (param.property.as_deref(), param.value.as_complex()) {
            (Some(POSITIVE_SEQUENCE_VOLTAGE), Some(voltage)) => {
                let phases = positive_sequence_to_phase(voltage);
                for (property, value) in PHASE_VOLTAGES.into_iter().zip(phases) {
                    let mut phase = Parameter::new(composite_node, Some(property), value);
                    phase.unit = param.unit.clone();
                    expanded.add(phase);
                }
            }
            _ => warn!(param = %param.id(), "unsupported composite parameter dropped"),
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < EPS * b.norm().max(1.0)
    }

    #[test]
    fn positive_sequence_rotates_by_120_degrees() {
        let v = Complex64::new(7200.0, 0.0);
        let [a, b, c] = positive_sequence_to_phase(v);
        assert!(close(a, v));
        assert!(close(b, Complex64::from_polar(7200.0, (-120f64).to_radians())));
        assert!(close(c, Complex64::from_polar(7200.0, 120f64.to_radians())));
        assert!((a + b + c).norm() < 1e-6);
    }

    #[test]
    fn composite_voltage_expands_onto_configured_node() {
        let mut params = ParameterSet::new();
        params.add(Parameter::new(
            COMPOSITE_OBJECT,
            Some(POSITIVE_SEQUENCE_VOLTAGE),
            Complex64::new(100.0, 0.0),
        ));
        params.add(Parameter::new(COMPOSITE_OBJECT, Some("frequency"), 60.0));
        params.add(Parameter::new("load_1", Some("constant_power_A"), 5.0));

        let expanded = expand_composites(params, "feeder_head");
        assert_eq!(expanded.len(), 4);
        assert!(!expanded.contains(COMPOSITE_OBJECT, Some("frequency")));
        assert!(expanded.contains("load_1", Some("constant_power_A")));
        for phase in PHASE_VOLTAGES {
            let value = expanded.get("feeder_head", Some(phase)).unwrap();
            assert!((value.value.as_complex().unwrap().norm() - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn aggregator_scales_voltage_and_reads_next_time() {
        let translator = AggregatorTranslator::new(138.0);
        let mut params = ParameterSet::new();
        params.add(Parameter::global(VOLTAGE_REAL, 1.0));
        params.add(Parameter::global(VOLTAGE_IMAG, 0.0));
        params.add(Parameter::global(NEXT_TIME, "2020-06-01 00:00:30"));
        let translated = translator.translate_inputs(TransactionEnvelope::new(params));

        assert_eq!(translated.timestamp, parse_timestamp("2020-06-01 00:00:30"));
        assert_eq!(translated.parameters.len(), 1);
        let voltage = translated
            .parameters
            .get(COMPOSITE_OBJECT, Some(POSITIVE_SEQUENCE_VOLTAGE))
            .unwrap()
            .value
            .as_complex()
            .unwrap();
        assert!((voltage.re - 138_000.0 / 3f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn aggregator_reports_power_in_megawatts() {
        let translator = AggregatorTranslator::new(138.0);
        let mut params = ParameterSet::new();
        params.add(Parameter::global(SUMMED_POWER, Complex64::new(2.5e6, -1.0e6)));
        let ts = parse_timestamp("2020-06-01 00:01:00").unwrap();
        let out = translator.translate_outputs(TransactionEnvelope::at(params, ts));

        assert_eq!(out.parameters.get(LOAD_REAL, None).unwrap().value, ParamValue::Real(2.5));
        assert_eq!(out.parameters.get(LOAD_IMAG, None).unwrap().value, ParamValue::Real(-1.0));
        assert_eq!(
            out.parameters.get(NEXT_TIME, None).unwrap().value,
            ParamValue::Text("2020-06-01 00:01:00".to_owned())
        );

        let empty = translator.translate_outputs(TransactionEnvelope::new(ParameterSet::new()));
        assert_eq!(empty.parameters.get(LOAD_REAL, None).unwrap().value, ParamValue::Real(0.0));
        assert!(!empty.parameters.contains(NEXT_TIME, None));
    }

    #[test]
    fn identity_is_default() {
        let translator = translator_for(None, 138.0);
        let mut params = ParameterSet::new();
        params.add(Parameter::global("x", 1.0));
        let out = translator.translate_inputs(TransactionEnvelope::new(params.clone()));
        assert_eq!(out.parameters, params);
    }
}
