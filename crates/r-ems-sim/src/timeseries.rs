//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Time-indexed value series with step-hold lookup."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use chrono::NaiveDateTime;
use r_ems_msg::ParamValue;

/// Ordered samples answering "value in force at time t" queries.
///
/// A lookup returns the sample with the latest timestamp not after the
/// query. Queries before the first sample have no answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    samples: Vec<(NaiveDateTime, ParamValue)>,
}

impl TimeSeries {
    /// Build a series. Samples are sorted by time; for equal timestamps the
    /// one listed last wins.
    pub fn from_samples(mut samples: Vec<(NaiveDateTime, ParamValue)>) -> Self {
        samples.sort_by_key(|(ts, _)| *ts);
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.samples.first().map(|(ts, _)| *ts)
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.samples.last().map(|(ts, _)| *ts)
    }

    pub fn value_at(&self, ts: NaiveDateTime) -> Option<&ParamValue> {
        let idx = self.samples.partition_point(|(sample, _)| *sample <= ts);
        idx.checked_sub(1).map(|i| &self.samples[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NaiveDateTime, ParamValue)> {
        self.samples.iter()
    }
}
