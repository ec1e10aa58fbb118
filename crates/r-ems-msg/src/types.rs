//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Addressed parameter values and parameter sets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use num_complex::Complex64;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::codec::{format_complex, parse_complex};
use crate::LookupError;

/// Declared wire format of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParamFormat {
    /// Floating point scalar.
    Real,
    /// Integer scalar.
    Int,
    /// Free text.
    #[serde(rename = "string")]
    #[strum(serialize = "string")]
    Text,
    /// Complex quantity.
    Complex,
}

/// Value carried by a [`Parameter`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamValue {
    /// No value (unmatched selector, missing sample).
    #[default]
    Null,
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Real(f64),
    /// Complex quantity.
    Complex(Complex64),
    /// Free text passed through verbatim.
    Text(String),
}

impl ParamValue {
    /// Zero in the widest numeric representation.
    pub fn zero() -> Self {
        ParamValue::Complex(Complex64::new(0.0, 0.0))
    }

    /// Whether the value is [`ParamValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Promote numeric values to a complex number.
    pub fn as_complex(&self) -> Option<Complex64> {
        match self {
            ParamValue::Int(v) => Some(Complex64::new(*v as f64, 0.0)),
            ParamValue::Real(v) => Some(Complex64::new(*v, 0.0)),
            ParamValue::Complex(v) => Some(*v),
            ParamValue::Null | ParamValue::Text(_) => None,
        }
    }

    /// Real part of a numeric value.
    pub fn as_real(&self) -> Option<f64> {
        self.as_complex().map(|z| z.re)
    }

    /// Format implied by the value variant.
    pub fn format(&self) -> Option<ParamFormat> {
        match self {
            ParamValue::Null => None,
            ParamValue::Int(_) => Some(ParamFormat::Int),
            ParamValue::Real(_) => Some(ParamFormat::Real),
            ParamValue::Complex(_) => Some(ParamFormat::Complex),
            ParamValue::Text(_) => Some(ParamFormat::Text),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => f.write_str("null"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Real(v) => write!(f, "{v}"),
            ParamValue::Complex(z) => f.write_str(&format_complex(*z)),
            ParamValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Real(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<Complex64> for ParamValue {
    fn from(value: Complex64) -> Self {
        ParamValue::Complex(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Null => serializer.serialize_none(),
            ParamValue::Int(v) => serializer.serialize_i64(*v),
            ParamValue::Real(v) => serializer.serialize_f64(*v),
            ParamValue::Complex(z) => serializer.serialize_str(&format_complex(*z)),
            ParamValue::Text(text) => serializer.serialize_str(text),
        }
    }
}

struct ParamValueVisitor;

impl<'de> Visitor<'de> for ParamValueVisitor {
    type Value = ParamValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, a complex literal, a [re, im] pair, a string or null")
    }

    fn visit_unit<E: de::Error>(self) -> Result<ParamValue, E> {
        Ok(ParamValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<ParamValue, E> {
        Ok(ParamValue::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<ParamValue, E> {
        Ok(ParamValue::Int(i64::from(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ParamValue, E> {
        Ok(ParamValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ParamValue, E> {
        Ok(i64::try_from(v).map_or(ParamValue::Real(v as f64), ParamValue::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<ParamValue, E> {
        Ok(ParamValue::Real(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ParamValue, E> {
        let trimmed = v.trim();
        let looks_complex = trimmed.ends_with(|c: char| matches!(c, 'j' | 'i' | 'd' | ')'));
        if looks_complex {
            if let Ok(z) = parse_complex(trimmed) {
                return Ok(ParamValue::Complex(z));
            }
        }
        Ok(ParamValue::Text(v.to_owned()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ParamValue, A::Error> {
        let re: f64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let im: f64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(3, &self));
        }
        Ok(ParamValue::Complex(Complex64::new(re, im)))
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ParamValueVisitor)
    }
}

/// Address of a parameter: an object and an optional property.
///
/// A `None` property addresses a global value such as `summed_power`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamId {
    /// Object name.
    pub object: String,
    /// Property name, absent for globals.
    #[serde(default)]
    pub property: Option<String>,
}

impl ParamId {
    /// Build an identity from borrowed parts.
    pub fn new(object: impl Into<String>, property: Option<&str>) -> Self {
        Self {
            object: object.into(),
            property: property.map(str::to_owned),
        }
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}", self.object, property),
            None => f.write_str(&self.object),
        }
    }
}

/// A single addressable quantity.
///
/// Equality and hashing consider only `(object, property)`; two parameters
/// with the same address but different values are an update of one another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Object name.
    pub object: String,
    /// Property name, absent for globals.
    #[serde(default)]
    pub property: Option<String>,
    /// Current value.
    #[serde(default)]
    pub value: ParamValue,
    /// Optional unit label appended on the wire.
    #[serde(default)]
    pub unit: Option<String>,
    /// Optional declared format.
    #[serde(default)]
    pub format: Option<ParamFormat>,
    /// Backing file for replayed parameters.
    #[serde(default)]
    pub source_file: Option<PathBuf>,
}

impl Parameter {
    /// Create a parameter addressing `object.property`.
    pub fn new(
        object: impl Into<String>,
        property: Option<&str>,
        value: impl Into<ParamValue>,
    ) -> Self {
        let value = value.into();
        Self {
            object: object.into(),
            property: property.map(str::to_owned),
            format: value.format(),
            value,
            unit: None,
            source_file: None,
        }
    }

    /// Create a global (property-less) parameter.
    pub fn global(object: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self::new(object, None, value)
    }

    /// Create a request template with no value.
    pub fn request(object: impl Into<String>, property: Option<&str>) -> Self {
        Self::new(object, property, ParamValue::Null)
    }

    /// Attach a unit label.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attach a backing file.
    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    /// Replace the value, keeping the declared format in sync.
    pub fn set_value(&mut self, value: impl Into<ParamValue>) {
        let value = value.into();
        if let Some(format) = value.format() {
            self.format = Some(format);
        }
        self.value = value;
    }

    /// Address of this parameter.
    pub fn id(&self) -> ParamId {
        ParamId {
            object: self.object.clone(),
            property: self.property.clone(),
        }
    }

    /// Whether this parameter lives at `object.property`.
    pub fn matches(&self, object: &str, property: Option<&str>) -> bool {
        self.object == object && self.property.as_deref() == property
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object && self.property == other.property
    }
}

impl Eq for Parameter {}

impl Hash for Parameter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object.hash(state);
        self.property.hash(state);
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{}.{}={}", self.object, property, self.value)?,
            None => write!(f, "{}={}", self.object, self.value)?,
        }
        if let Some(unit) = &self.unit {
            write!(f, " {unit}")?;
        }
        Ok(())
    }
}

/// Two-level store: object name, then property name, then parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    objects: IndexMap<String, IndexMap<Option<String>, Parameter>>,
}

impl ParameterSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by identity, returning the replaced parameter.
    pub fn add(&mut self, param: Parameter) -> Option<Parameter> {
        self.objects
            .entry(param.object.clone())
            .or_default()
            .insert(param.property.clone(), param)
    }

    /// Look up a parameter, failing if it is absent.
    pub fn get(&self, object: &str, property: Option<&str>) -> Result<&Parameter, LookupError> {
        self.find(object, property).ok_or_else(|| LookupError::Missing {
            id: ParamId::new(object, property),
        })
    }

    /// Look up a parameter if present.
    pub fn find(&self, object: &str, property: Option<&str>) -> Option<&Parameter> {
        let key = property.map(str::to_owned);
        self.objects.get(object).and_then(|props| props.get(&key))
    }

    /// Mutable lookup.
    pub fn find_mut(&mut self, object: &str, property: Option<&str>) -> Option<&mut Parameter> {
        let key = property.map(str::to_owned);
        self.objects
            .get_mut(object)
            .and_then(|props| props.get_mut(&key))
    }

    /// Remove a parameter, dropping the object entry once it is empty.
    pub fn remove(&mut self, object: &str, property: Option<&str>) -> Option<Parameter> {
        let key = property.map(str::to_owned);
        let props = self.objects.get_mut(object)?;
        let removed = props.shift_remove(&key);
        if props.is_empty() {
            self.objects.shift_remove(object);
        }
        removed
    }

    /// Whether `object.property` is present.
    pub fn contains(&self, object: &str, property: Option<&str>) -> bool {
        self.find(object, property).is_some()
    }

    /// Iterate every stored parameter. Re-iterating the same snapshot yields
    /// the same order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> + '_ {
        self.objects.values().flat_map(|props| props.values())
    }

    /// Mutable iteration over every stored parameter.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> + '_ {
        self.objects.values_mut().flat_map(|props| props.values_mut())
    }

    /// Number of stored parameters.
    pub fn len(&self) -> usize {
        self.objects.values().map(IndexMap::len).sum()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Upsert every parameter of `other` into `self`, or replace `self`
    /// outright when `overwrite` is set.
    pub fn merge(&mut self, other: ParameterSet, overwrite: bool) {
        if overwrite {
            *self = other;
        } else {
            self.extend(other);
        }
    }

    /// Combine a template with caller supplied parameters without touching
    /// the template.
    pub fn merged(&self, extra: Option<&ParameterSet>, overwrite: bool) -> ParameterSet {
        match (extra, overwrite) {
            (Some(extra), true) => extra.clone(),
            (None, true) => ParameterSet::new(),
            (Some(extra), false) => {
                let mut combined = self.clone();
                combined.extend(extra.iter().cloned());
                combined
            }
            (None, false) => self.clone(),
        }
    }

    /// Copy of the set with every value replaced by zero.
    pub fn zeroed(&self) -> ParameterSet {
        let mut copy = self.clone();
        for param in copy.iter_mut() {
            param.set_value(ParamValue::zero());
        }
        copy
    }
}

impl Extend<Parameter> for ParameterSet {
    fn extend<T: IntoIterator<Item = Parameter>>(&mut self, iter: T) {
        for param in iter {
            self.add(param);
        }
    }
}

impl FromIterator<Parameter> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = Parameter>>(iter: T) -> Self {
        let mut set = ParameterSet::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for ParameterSet {
    type Item = Parameter;
    type IntoIter = Box<dyn Iterator<Item = Parameter>>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(
            self.objects
                .into_values()
                .flat_map(|props| props.into_values()),
        )
    }
}

/// Unit of exchange into and out of a bus transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionEnvelope {
    /// Carried parameters.
    pub parameters: ParameterSet,
    /// Simulated instant the parameters belong to, if known.
    pub timestamp: Option<NaiveDateTime>,
}

impl TransactionEnvelope {
    /// Envelope without a timestamp.
    pub fn new(parameters: ParameterSet) -> Self {
        Self {
            parameters,
            timestamp: None,
        }
    }

    /// Envelope stamped with a simulated instant.
    pub fn at(parameters: ParameterSet, timestamp: NaiveDateTime) -> Self {
        Self {
            parameters,
            timestamp: Some(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_upserts_by_identity() {
        let mut set = ParameterSet::new();
        assert!(set.add(Parameter::new("house", Some("power"), 5_i64)).is_none());
        let previous = set.add(Parameter::new("house", Some("power"), 9_i64));
        assert_eq!(previous.map(|p| p.value), Some(ParamValue::Int(5)));
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get("house", Some("power")).unwrap().value,
            ParamValue::Int(9)
        );
    }

    #[test]
    fn get_reports_missing_identity() {
        let set = ParameterSet::new();
        let err = set.get("house", None).unwrap_err();
        assert_eq!(err.to_string(), "parameter house not found");
    }

    #[test]
    fn equality_ignores_values() {
        let a = Parameter::new("node", Some("voltage_A"), 1.0);
        let b = Parameter::new("node", Some("voltage_A"), 2.0).with_unit("V");
        let c = Parameter::global("node", 1.0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn iteration_is_restartable() {
        let set: ParameterSet = [
            Parameter::new("a", Some("x"), 1_i64),
            Parameter::new("a", Some("y"), 2_i64),
            Parameter::global("b", 3_i64),
        ]
        .into_iter()
        .collect();
        let first: Vec<_> = set.iter().map(Parameter::id).collect();
        let second: Vec<_> = set.iter().map(Parameter::id).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn merged_leaves_template_untouched() {
        let template: ParameterSet = [Parameter::request("meter", Some("power"))]
            .into_iter()
            .collect();
        let extra: ParameterSet = [Parameter::request("meter", Some("voltage"))]
            .into_iter()
            .collect();

        let appended = template.merged(Some(&extra), false);
        assert_eq!(appended.len(), 2);
        assert_eq!(template.len(), 1);

        let replaced = template.merged(Some(&extra), true);
        assert_eq!(replaced.len(), 1);
        assert!(replaced.contains("meter", Some("voltage")));
        assert!(template.merged(None, true).is_empty());
    }

    #[test]
    fn remove_prunes_empty_objects() {
        let mut set = ParameterSet::new();
        set.add(Parameter::new("a", Some("x"), 1_i64));
        assert!(set.remove("a", Some("x")).is_some());
        assert!(set.is_empty());
        assert!(set.remove("a", Some("x")).is_none());
    }

    #[test]
    fn zeroed_replaces_every_value() {
        let set: ParameterSet = [
            Parameter::new("a", Some("x"), 4.0),
            Parameter::new("b", Some("y"), "text"),
        ]
        .into_iter()
        .collect();
        assert!(set.zeroed().iter().all(|p| p.value == ParamValue::zero()));
    }

    #[test]
    fn values_deserialize_from_config_literals() {
        let values: Vec<ParamValue> =
            serde_json::from_str(r#"[null, 3, 2.5, "1+2j", [1.0, -1.0], "on"]"#).unwrap();
        assert_eq!(values[0], ParamValue::Null);
        assert_eq!(values[1], ParamValue::Int(3));
        assert_eq!(values[2], ParamValue::Real(2.5));
        assert_eq!(values[3], ParamValue::Complex(Complex64::new(1.0, 2.0)));
        assert_eq!(values[4], ParamValue::Complex(Complex64::new(1.0, -1.0)));
        assert_eq!(values[5], ParamValue::Text("on".into()));
    }
}
