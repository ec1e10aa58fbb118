//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Request paths and response decoding for the simulator control protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Wire shapes of the simulator's HTTP control interface.
//!
//! Every operation is a `GET` whose path carries the command:
//!
//! | operation | path |
//! |---|---|
//! | set property | `/<object>[/<property>]=<value>[ <unit>]` |
//! | get property | `/<object>/<property>` |
//! | read clock | `/xml/clock` |
//! | pause at | `/control/pauseat=<timestamp>[ <tz>]` |
//! | resume | `/control/resume` |
//! | shutdown | `/control/shutdown` |
//!
//! Property reads answer either with an XML fragment holding a `<value>`
//! element or with a bare `value[ unit]` line.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use r_ems_common::time::format_timestamp;
use regex::Regex;

/// Characters never escaped in any request path.
const PATH_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Escape set for pause requests.
const PAUSE_SAFE: &AsciiSet = &PATH_SAFE.remove(b':').remove(b'=');

/// Escape set for property requests; `+` survives so complex literals do.
const PROPERTY_SAFE: &AsciiSet = &PAUSE_SAFE.remove(b'+');

pub const CLOCK_PATH: &str = "/xml/clock";
pub const RESUME_PATH: &str = "/control/resume";
pub const SHUTDOWN_PATH: &str = "/control/shutdown";
pub const PAUSE_AT_KEY: &str = "pauseat=";

static VALUE_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<value>(.*?)</value>").expect("valid value element regex"));

/// Timestamp as the simulator expects it, with the zone label appended.
pub fn time_string(ts: NaiveDateTime, timezone: Option<&str>) -> String {
    format_timestamp(ts, timezone)
}

/// `object[/property][=value][ unit]`, escaped.
pub fn object_path(
    object: &str,
    property: Option<&str>,
    value: Option<&str>,
    unit: Option<&str>,
) -> String {
    let mut raw = format!("/{object}");
    if let Some(property) = property {
        raw.push('/');
        raw.push_str(property);
    }
    if let Some(value) = value {
        raw.push('=');
        raw.push_str(value);
    }
    if let Some(unit) = unit {
        raw.push(' ');
        raw.push_str(unit);
    }
    utf8_percent_encode(&raw, PROPERTY_SAFE).to_string()
}

pub fn set_path(object: &str, property: Option<&str>, value: &str, unit: Option<&str>) -> String {
    object_path(object, property, Some(value), unit)
}

pub fn get_path(object: &str, property: Option<&str>) -> String {
    object_path(object, property, None, None)
}

pub fn pause_at_path(ts: NaiveDateTime, timezone: Option<&str>) -> String {
    let raw = format!("/control/{PAUSE_AT_KEY}{}", time_string(ts, timezone));
    utf8_percent_encode(&raw, PAUSE_SAFE).to_string()
}

/// Global switch toggled right after the simulator becomes ready.
pub fn verbose_path(enabled: bool) -> String {
    set_path("xml/verbose", None, flag(enabled), None)
}

pub fn quiet_path(enabled: bool) -> String {
    set_path("xml/quiet", None, flag(enabled), None)
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Pull the property text out of a response body in either shape.
pub fn extract_value(body: &str) -> String {
    match VALUE_ELEMENT.captures(body).and_then(|caps| caps.get(1)) {
        Some(value) => unescape_xml(value.as_str().trim()),
        None if body.trim_start().starts_with('<') => String::new(),
        None => body.trim().to_owned(),
    }
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
