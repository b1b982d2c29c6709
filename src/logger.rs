//! Optional sample log.
//!
//! The sampler itself never persists samples. When the `--sample-log` run-time option (or
//! [`SamplerDefault::SampleLog`](../config/enum.SamplerDefault.html#variant.SampleLog)) is
//! set, the [`SamplerAttack`](../struct.SamplerAttack.html) launches a logger task and every
//! user sends each completed [`SampleResult`] to it through an unbounded
//! [`flume`](https://docs.rs/flume) channel. The logger writes through Tokio's
//! asynchronous [`BufWriter`](https://docs.rs/tokio/*/tokio/io/struct.BufWriter.html) so
//! users never block on disk io.
//!
//! The format is configured with `--sample-format`:
//!  - `csv` (default): one comma separated row per sample, after a header row
//!  - `json`: one JSON object per line
//!  - `raw`: the Rust debug representation of each sample
//!  - `pretty`: the pretty-printed Rust debug representation of each sample
//!
//! A csv sample log looks like:
//! ```text
//! label,file_name,file_index,start_time,end_time,elapsed,success,response_code,response_message,exception,data_type,response_body
//! user 1 - order-017.xml,order-017.xml,17,1700000000123,1700000000150,27,true,200,OK,false,text,accepted
//! ```

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::config::SamplerConfiguration;
use crate::executor::SampleResult;
use crate::SamplerError;

/// Optional join handle for the logger task, if enabled.
pub(crate) type SampleLoggerJoinHandle =
    Option<tokio::task::JoinHandle<Result<(), SamplerError>>>;
/// Optional sender used by all users to send samples to the logger task, if enabled.
/// Sending `None` tells the logger to flush and exit.
pub(crate) type SampleLoggerTx = Option<flume::Sender<Option<SampleResult>>>;

/// Supported sample log formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleLogFormat {
    Csv,
    Json,
    Raw,
    Pretty,
}
/// Allow `--sample-format` from the command line using text variations.
impl FromStr for SampleLogFormat {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let formats = RegexSet::new([
            r"(?i)^csv$",
            r"(?i)^(json|jsn)$",
            r"(?i)^raw$",
            r"(?i)^(pretty|pr)$",
        ])
        .expect("failed to compile SampleLogFormat RegexSet");
        let matches = formats.matches(s);
        if matches.matched(0) {
            Ok(SampleLogFormat::Csv)
        } else if matches.matched(1) {
            Ok(SampleLogFormat::Json)
        } else if matches.matched(2) {
            Ok(SampleLogFormat::Raw)
        } else if matches.matched(3) {
            Ok(SampleLogFormat::Pretty)
        } else {
            Err(SamplerError::InvalidOption {
                option: format!("SampleLogFormat::{:?}", s),
                value: s.to_string(),
                detail: "Invalid format, expected: csv, json, raw or pretty".to_string(),
            })
        }
    }
}

/// Formats a message for the sample log.
pub(crate) trait SampleLogFormatter {
    fn format_message(&self, format: &SampleLogFormat) -> String;
}

impl SampleLogFormatter for SampleResult {
    fn format_message(&self, format: &SampleLogFormat) -> String {
        match format {
            SampleLogFormat::Csv => [
                csv_field(&self.label),
                csv_field(&self.file_name),
                self.file_index.to_string(),
                self.start_time.to_string(),
                self.end_time.to_string(),
                self.elapsed.to_string(),
                self.success.to_string(),
                csv_field(&self.response_code),
                csv_field(&self.response_message),
                self.exception.to_string(),
                csv_field(&self.data_type),
                csv_field(&self.response_body),
            ]
            .join(","),
            SampleLogFormat::Json => json!(self).to_string(),
            SampleLogFormat::Raw => format!("{:?}", self),
            SampleLogFormat::Pretty => format!("{:#?}", self),
        }
    }
}

/// Header row written to the top of csv sample logs.
pub(crate) fn csv_header() -> &'static str {
    "label,file_name,file_index,start_time,end_time,elapsed,success,response_code,response_message,exception,data_type,response_body"
}

// Quote a field if it holds a separator, quote or line break, doubling embedded quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl SamplerConfiguration {
    /// Create the sample log and launch the logger task, if a sample log is configured.
    ///
    /// The file is created before returning, so a sample log that can't be written fails
    /// before any users launch.
    pub(crate) async fn setup_sample_logger(
        &self,
    ) -> Result<(SampleLoggerJoinHandle, SampleLoggerTx), SamplerError> {
        if self.sample_log.is_empty() {
            return Ok((None, None));
        }

        let file = match File::create(&self.sample_log).await {
            Ok(file) => file,
            Err(e) => {
                error!("failed to create sample_log {}: {}", &self.sample_log, e);
                return Err(e.into());
            }
        };
        let (logger_tx, logger_rx) = flume::unbounded();
        let configuration = self.clone();
        let logger_handle =
            tokio::spawn(async move { configuration.logger_main(file, logger_rx).await });
        Ok((Some(logger_handle), Some(logger_tx)))
    }

    /// Logger task, writes samples to the sample log until told to exit.
    pub(crate) async fn logger_main(
        self: SamplerConfiguration,
        file: File,
        receiver: flume::Receiver<Option<SampleResult>>,
    ) -> Result<(), SamplerError> {
        let format = self.sample_format.clone().unwrap_or(SampleLogFormat::Csv);

        // Response bodies make samples large, allocate a generous (8M) buffer.
        let mut sample_log = BufWriter::with_capacity(8 * 1024 * 1024, file);
        info!("writing samples to sample_log: {}", &self.sample_log);

        if format == SampleLogFormat::Csv {
            sample_log
                .write_all(format!("{}\n", csv_header()).as_bytes())
                .await?;
        }

        // Loop waiting for and writing samples from users.
        while let Ok(message) = receiver.recv_async().await {
            match message {
                Some(sample) => {
                    let formatted = sample.format_message(&format);
                    if let Err(e) = sample_log
                        .write_all(format!("{}\n", formatted).as_bytes())
                        .await
                    {
                        warn!("failed to write to {}: {}", &self.sample_log, e);
                    }
                }
                // Empty message means it's time to exit.
                None => break,
            }
        }

        info!("flushing sample_log: {}", &self.sample_log);
        sample_log.flush().await?;

        Ok(())
    }
}
