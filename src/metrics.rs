//! Optional, aggregated metrics collected while a sampler runs.
//!
//! Every [`SampleResult`] produced by a user is sent to the parent
//! [`SamplerAttack`](../struct.SamplerAttack.html) as a [`SampleMetric`] and merged into
//! [`SampleMetrics`]. When the attack finishes the metrics are returned from
//! [`SamplerAttack::execute`](../struct.SamplerAttack.html#method.execute), and unless
//! disabled with `--no-print-metrics` they are displayed as tables:
//!
//! ```text
//!  === PER FILE METRICS ===
//!  ------------------------------------------------------------------------------
//!  Name                     |    # samples |        # fails |  sample/s |  fail/s
//!  ------------------------------------------------------------------------------
//!  order-001.xml            |          312 |          0 (0%) |     10.40 |    0.00
//! ```
//!
//! Metrics also include a timeline: completed samples grouped into buckets of
//! `--timeline-granularity` milliseconds by their end time, each bucket holding the
//! average response time and the average number of active users.

use chrono::prelude::*;
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::executor::SampleResult;
use crate::util;

/// A completed sample sent from a user to the parent.
#[derive(Debug, Clone)]
pub struct SampleMetric {
    /// How many users were running samples when this one completed, itself included.
    pub active_users: usize,
    /// The completed sample.
    pub result: SampleResult,
}

/// Aggregated samples for one request body file, or for all files together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAggregate {
    /// How many samples received a `200` response.
    pub success_count: usize,
    /// How many samples failed, with any other response or an exception.
    pub fail_count: usize,
    /// Total milliseconds spent in all exchanges.
    pub total_time: u64,
    /// Fastest exchange, in milliseconds.
    pub min_time: u64,
    /// Slowest exchange, in milliseconds.
    pub max_time: u64,
    /// How many times each response code was recorded.
    pub status_code_counts: BTreeMap<String, usize>,
}
impl SampleAggregate {
    /// Record one sample.
    pub fn record(&mut self, result: &SampleResult) {
        if self.count() == 0 || result.elapsed < self.min_time {
            self.min_time = result.elapsed;
        }
        if result.elapsed > self.max_time {
            self.max_time = result.elapsed;
        }
        self.total_time += result.elapsed;
        if result.success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
        *self
            .status_code_counts
            .entry(result.response_code.clone())
            .or_insert(0) += 1;
    }

    /// Merge another aggregate into this one.
    pub fn merge(&mut self, other: &SampleAggregate) {
        if other.count() == 0 {
            return;
        }
        if self.count() == 0 || other.min_time < self.min_time {
            self.min_time = other.min_time;
        }
        self.max_time = self.max_time.max(other.max_time);
        self.total_time += other.total_time;
        self.success_count += other.success_count;
        self.fail_count += other.fail_count;
        for (code, count) in &other.status_code_counts {
            *self.status_code_counts.entry(code.clone()).or_insert(0) += count;
        }
    }

    /// Total samples recorded.
    pub fn count(&self) -> usize {
        self.success_count + self.fail_count
    }

    /// Average exchange time, in milliseconds.
    pub fn average_time(&self) -> f32 {
        match self.count() {
            0 => 0.0,
            count => self.total_time as f32 / count as f32,
        }
    }
}

/// Samples that completed within one timeline bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// How many samples completed in this bucket.
    pub samples: usize,
    /// Total milliseconds spent in their exchanges.
    pub total_time: u64,
    /// Sum of the active users seen as each sample completed.
    pub total_active_users: usize,
}
impl TimelineBucket {
    /// Average response time within the bucket, in milliseconds.
    pub fn average_response_time(&self) -> f32 {
        match self.samples {
            0 => 0.0,
            samples => self.total_time as f32 / samples as f32,
        }
    }

    /// Average number of active users within the bucket.
    pub fn average_active_users(&self) -> f32 {
        match self.samples {
            0 => 0.0,
            samples => self.total_active_users as f32 / samples as f32,
        }
    }
}

/// All metrics collected while a sampler runs.
#[derive(Clone, Debug, Default)]
pub struct SampleMetrics {
    /// When the attack started.
    pub started: Option<DateTime<Local>>,
    /// How many seconds the attack ran.
    pub duration: usize,
    /// How many users were launched.
    pub users: usize,
    /// Width of each timeline bucket, in milliseconds.
    pub granularity: usize,
    /// Aggregated samples keyed by request body file name.
    pub files: BTreeMap<String, SampleAggregate>,
    /// Exception messages and how many times each occurred.
    pub errors: BTreeMap<String, usize>,
    /// Timeline buckets keyed by the bucket start, in milliseconds since the Unix epoch.
    pub timeline: BTreeMap<i64, TimelineBucket>,
}
impl SampleMetrics {
    pub fn new(granularity: usize) -> Self {
        SampleMetrics {
            granularity: granularity.max(1),
            ..Default::default()
        }
    }

    /// The start of the timeline bucket a sample ending at `end_time` belongs to.
    pub fn bucket(&self, end_time: i64) -> i64 {
        let granularity = self.granularity.max(1) as i64;
        end_time - end_time.rem_euclid(granularity)
    }

    /// Merge one completed sample into the metrics.
    pub fn record(&mut self, metric: &SampleMetric) {
        let result = &metric.result;
        self.files
            .entry(result.file_name.clone())
            .or_default()
            .record(result);

        if result.exception {
            *self
                .errors
                .entry(result.response_message.clone())
                .or_insert(0) += 1;
        }

        let bucket = self.timeline.entry(self.bucket(result.end_time)).or_default();
        bucket.samples += 1;
        bucket.total_time += result.elapsed;
        bucket.total_active_users += metric.active_users;
    }

    /// All files aggregated together.
    pub fn aggregate(&self) -> SampleAggregate {
        let mut aggregate = SampleAggregate::default();
        for file in self.files.values() {
            aggregate.merge(file);
        }
        aggregate
    }

    /// Total samples recorded.
    pub fn samples(&self) -> usize {
        self.files.values().map(|file| file.count()).sum()
    }

    fn fmt_samples(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "\n === PER FILE METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>12} | {:>14} | {:>9} | {:>7}",
            "Name", "# samples", "# fails", "sample/s", "fail/s"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (file_name, file) in &self.files {
            self.fmt_sample_row(fmt, &util::truncate_string(file_name, 24), file)?;
        }
        if self.files.len() > 1 {
            writeln!(
                fmt,
                " -------------------------+--------------+----------------+-----------+--------"
            )?;
            self.fmt_sample_row(fmt, "Aggregated", &self.aggregate())?;
        }

        Ok(())
    }

    fn fmt_sample_row(
        &self,
        fmt: &mut fmt::Formatter<'_>,
        name: &str,
        aggregate: &SampleAggregate,
    ) -> fmt::Result {
        let total_count = aggregate.count();
        let fail_percent = if aggregate.fail_count > 0 {
            aggregate.fail_count as f32 / total_count as f32 * 100.0
        } else {
            0.0
        };
        // Compress 100.0 and 0.0 to 100 and 0 respectively to save width.
        let fails = if fail_percent as usize == 100 || fail_percent as usize == 0 {
            format!(
                "{} ({}%)",
                aggregate.fail_count.to_formatted_string(&Locale::en),
                fail_percent as usize
            )
        } else {
            format!(
                "{} ({:.1}%)",
                aggregate.fail_count.to_formatted_string(&Locale::en),
                fail_percent
            )
        };
        let (samples_per_second, fails_per_second) =
            per_second_calculations(self.duration, total_count, aggregate.fail_count);
        writeln!(
            fmt,
            " {:<24} | {:>12} | {:>14} | {:>9.2} | {:>7.2}",
            name,
            total_count.to_formatted_string(&Locale::en),
            fails,
            samples_per_second,
            fails_per_second,
        )
    }

    fn fmt_response_times(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>10} |",
            "Name", "Avg (ms)", "Min", "Max"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (file_name, file) in &self.files {
            writeln!(
                fmt,
                " {:<24} | {:>11.2} | {:>10} | {:>10} |",
                util::truncate_string(file_name, 24),
                file.average_time(),
                format_number(file.min_time),
                format_number(file.max_time),
            )?;
        }
        if self.files.len() > 1 {
            let aggregate = self.aggregate();
            writeln!(
                fmt,
                " -------------------------+-------------+------------+------------+"
            )?;
            writeln!(
                fmt,
                " {:<24} | {:>11.2} | {:>10} | {:>10} |",
                "Aggregated",
                aggregate.average_time(),
                format_number(aggregate.min_time),
                format_number(aggregate.max_time),
            )?;
        }

        Ok(())
    }

    fn fmt_status_codes(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<24} | {:>51} ", "Name", "Status codes")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (file_name, file) in &self.files {
            writeln!(
                fmt,
                " {:<24} | {:>51}",
                util::truncate_string(file_name, 24),
                prepare_status_codes(&file.status_code_counts),
            )?;
        }
        writeln!(
            fmt,
            " -------------------------+----------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>51} ",
            "Aggregated",
            prepare_status_codes(&self.aggregate().status_code_counts)
        )?;

        Ok(())
    }

    fn fmt_timeline(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "\n === TIMELINE ({} ms buckets) ===\n ------------------------------------------------------------------------------",
            format_number(self.granularity as u64)
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>12} | {:>16} | {:>16}",
            "Bucket", "# samples", "Avg time (ms)", "Avg users"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (start, bucket) in &self.timeline {
            let label = match Local.timestamp_millis_opt(*start).single() {
                Some(start) => start.format("%H:%M:%S%.3f").to_string(),
                None => start.to_string(),
            };
            writeln!(
                fmt,
                " {:<24} | {:>12} | {:>16.2} | {:>16.2}",
                label,
                bucket.samples.to_formatted_string(&Locale::en),
                bucket.average_response_time(),
                bucket.average_active_users(),
            )?;
        }

        Ok(())
    }

    fn fmt_errors(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === ERRORS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<11} | Error", "Count")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        // Display the most common error first.
        for (occurrences, error) in self
            .errors
            .iter()
            .map(|(error, occurrences)| (*occurrences, error))
            .sorted()
            .rev()
        {
            writeln!(fmt, " {:<12}  {}", format_number(occurrences as u64), error)?;
        }
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;

        Ok(())
    }
}

impl Serialize for SampleMetrics {
    // Can't be derived because of the started field.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("SampleMetrics", 7)?;
        // Convert started field to a unix timestamp.
        let timestamp = self.started.map(|started| started.timestamp()).unwrap_or(0);
        s.serialize_field("started", &timestamp)?;
        s.serialize_field("duration", &self.duration)?;
        s.serialize_field("users", &self.users)?;
        s.serialize_field("granularity", &self.granularity)?;
        s.serialize_field("files", &self.files)?;
        s.serialize_field("errors", &self.errors)?;
        s.serialize_field("timeline", &self.timeline)?;
        s.end()
    }
}

/// Implement format trait to allow displaying metrics.
impl fmt::Display for SampleMetrics {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        // Nothing to display if no samples completed.
        if self.files.is_empty() {
            return writeln!(fmt, "\n === NO SAMPLES COMPLETED ===");
        }
        self.fmt_samples(fmt)?;
        self.fmt_response_times(fmt)?;
        self.fmt_status_codes(fmt)?;
        self.fmt_timeline(fmt)?;
        self.fmt_errors(fmt)
    }
}

/// Format large number in locale appropriate style.
pub(crate) fn format_number(number: u64) -> String {
    number.to_formatted_string(&Locale::en)
}

// Helper to calculate samples and fails per second.
fn per_second_calculations(duration: usize, total: usize, fail: usize) -> (f32, f32) {
    if duration == 0 {
        (0.0, 0.0)
    } else {
        (total as f32 / duration as f32, fail as f32 / duration as f32)
    }
}

// Format status codes as "2,000 [200], 15 [404]", most common first.
fn prepare_status_codes(status_code_counts: &BTreeMap<String, usize>) -> String {
    status_code_counts
        .iter()
        .sorted_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)))
        .map(|(code, count)| format!("{} [{}]", count.to_formatted_string(&Locale::en), code))
        .join(", ")
}
