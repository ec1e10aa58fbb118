//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Complex-value wire codec for the simulator control channel."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Textual encodings of complex quantities exchanged with the simulator.
//!
//! Rectangular values look like `+7199.56-4156.66j` (a trailing `i` is also
//! accepted). Polar values carry a magnitude and an angle in degrees and end
//! with `d`, e.g. `+7200+30d`.

use num_complex::Complex64;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ParamValue;
use crate::CodecError;

static NUMBER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?").expect("valid numeric token regex")
});

/// Render a complex number in rectangular `<re><sign><im>j` form.
pub fn format_complex(z: Complex64) -> String {
    let sign = if z.im.is_sign_negative() || z.im.is_nan() { "" } else { "+" };
    format!("{}{}{}j", z.re, sign, z.im)
}

/// Render a value as a bare wire literal. Parentheses are stripped.
pub fn render_value(value: &ParamValue) -> String {
    let rendered = match value {
        ParamValue::Null => String::new(),
        ParamValue::Int(v) => v.to_string(),
        ParamValue::Real(v) => v.to_string(),
        ParamValue::Complex(z) => format_complex(*z),
        ParamValue::Text(text) => text.clone(),
    };
    rendered.replace(['(', ')'], "")
}

/// Split a raw property response into its value token and optional unit.
pub fn split_value_unit(raw: &str) -> (&str, Option<&str>) {
    let trimmed = raw.trim();
    match trimmed.rsplit_once(' ') {
        Some((value, unit)) if !unit.is_empty() => (value.trim_end(), Some(unit)),
        _ => (trimmed, None),
    }
}

/// Parse either wire encoding into a complex number.
pub fn parse_complex(raw: &str) -> Result<Complex64, CodecError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }
    if let Some(body) = trimmed.strip_suffix('d') {
        return parse_polar_degrees(body, raw);
    }
    match trimmed.strip_suffix('i') {
        Some(body) => parse_rectangular(&format!("{body}j"), raw),
        None => parse_rectangular(trimmed, raw),
    }
}

fn parse_polar_degrees(body: &str, raw: &str) -> Result<Complex64, CodecError> {
    let tokens: Vec<&str> = NUMBER_TOKEN.find_iter(body).map(|m| m.as_str()).collect();
    let [magnitude, angle] = tokens.as_slice() else {
        return Err(CodecError::Malformed(raw.to_owned()));
    };
    let magnitude = parse_float(magnitude, raw)?;
    let angle = parse_float(angle, raw)?;
    Ok(Complex64::from_polar(magnitude, angle.to_radians()))
}

fn parse_rectangular(text: &str, raw: &str) -> Result<Complex64, CodecError> {
    let text = text.trim_start_matches('(').trim_end_matches(')');
    let Some(body) = text.strip_suffix(['j', 'J']) else {
        return Ok(Complex64::new(parse_float(text, raw)?, 0.0));
    };
    let bytes = body.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&i| matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E'));
    match split {
        Some(index) => Ok(Complex64::new(
            parse_float(&body[..index], raw)?,
            parse_imaginary(&body[index..], raw)?,
        )),
        None => Ok(Complex64::new(0.0, parse_imaginary(body, raw)?)),
    }
}

fn parse_imaginary(text: &str, raw: &str) -> Result<f64, CodecError> {
    match text {
        "" | "+" => Ok(1.0),
        "-" => Ok(-1.0),
        other => parse_float(other, raw),
    }
}

fn parse_float(text: &str, raw: &str) -> Result<f64, CodecError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| CodecError::Malformed(raw.to_owned()))
}
