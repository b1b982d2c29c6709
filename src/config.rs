//! Functions and structures related to configuring a sampler.
//!
//! The sampler can be configured at run time by passing in the options and flags defined
//! by the [`SamplerConfiguration`] structure.
//!
//! It can be configured programmatically with [`SamplerDefaultType::set_default`].

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::executor::SampleTarget;
use crate::logger::SampleLogFormat;
use crate::util;
use crate::{SamplerAttack, SamplerError};

/// Scheme used when none is configured.
pub const DEFAULT_PROTOCOL: &str = "http";
/// Host and port used when none is configured.
pub const DEFAULT_ADDRESS: &str = "localhost:80";
/// Path used when none is configured.
pub const DEFAULT_PATH: &str = "/testServlet";
/// Width of each timeline bucket when none is configured, in milliseconds.
pub const DEFAULT_TIMELINE_GRANULARITY: usize = 1_000;

/// Runtime options available when launching the sampler.
///
/// Custom defaults can be programmatically set for most of these options using
/// [`SamplerDefaultType::set_default`].
///
/// Help is generated for all of these options by passing a `-h` flag. The help is derived
/// from the below structure by [`gumdrop`](https://docs.rs/gumdrop/).
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"POSTs randomly selected request body files from a directory to a target,
recording the latency and outcome of every request.

The following runtime options are available:"#
)]
pub struct SamplerConfiguration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V", help = "Prints version information\n\nTarget:")]
    pub version: bool,

    /// Sets the target scheme (default: http)
    #[options(no_short, meta = "PROTOCOL")]
    pub protocol: String,
    /// Sets the target host:port (default: localhost:80)
    #[options(short = "a", meta = "HOST:PORT")]
    pub address: String,
    /// Sets the target path (default: /testServlet)
    #[options(short = "p", meta = "PATH")]
    pub path: String,
    /// Sets the directory of request body files
    #[options(short = "i", meta = "DIR")]
    pub input_dir: String,
    /// Allows one file to be used by concurrent requests
    #[options(
        no_short,
        help = "Allows one file to be used by concurrent requests\n\nLoad:"
    )]
    pub no_queue: bool,

    /// Sets concurrent users (default: number of CPUs)
    #[options(short = "u")]
    pub users: Option<usize>,
    /// Stops after (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "t", meta = "TIME")]
    pub run_time: String,
    /// Sets how many samples each user runs then exits
    #[options(no_short)]
    pub iterations: usize,
    /// Sets per-request timeout, in seconds (default: none)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<String>,
    /// Gives up selecting a file after this many attempts (default: never)
    #[options(
        no_short,
        meta = "VALUE",
        help = "Gives up selecting a file after this many attempts (default: never)\n\nLogging:"
    )]
    pub max_select_attempts: usize,

    /// Enables the sampler log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub sampler_log: String,
    /// Increases sampler log level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(
        count,
        short = "v",
        help = "Increases verbosity (-v, -vv, etc)\n\nSamples:"
    )]
    pub verbose: u8,

    /// Sets sample log file name
    #[options(short = "S", meta = "NAME")]
    pub sample_log: String,
    /// Sets sample log format (csv, json, raw, pretty)
    #[options(no_short, meta = "FORMAT")]
    pub sample_format: Option<SampleLogFormat>,
    /// Doesn't display metrics at end of run
    #[options(no_short)]
    pub no_print_metrics: bool,
    /// Sets timeline bucket width, in milliseconds (default: 1000)
    #[options(no_short, meta = "MS")]
    pub timeline_granularity: Option<usize>,
}

impl SamplerConfiguration {
    /// Whether a file may only be used by one in-flight sample at a time.
    pub fn use_queue(&self) -> bool {
        !self.no_queue
    }

    /// The input directory holding request body files.
    pub fn input_dir(&self) -> &Path {
        Path::new(&self.input_dir)
    }

    /// The configured target, falling back to the built-in defaults for any part not set.
    pub fn target(&self) -> SampleTarget {
        SampleTarget::new(
            non_empty_or(&self.protocol, DEFAULT_PROTOCOL),
            non_empty_or(&self.address, DEFAULT_ADDRESS),
            non_empty_or(&self.path, DEFAULT_PATH),
        )
    }

    /// The per-request timeout, if configured.
    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        util::get_float_from_string(self.timeout.clone())
            .filter(|timeout| *timeout > 0.0)
            .map(std::time::Duration::from_secs_f32)
    }

    /// The width of each timeline bucket, in milliseconds.
    pub fn timeline_granularity(&self) -> usize {
        self.timeline_granularity
            .filter(|granularity| *granularity > 0)
            .unwrap_or(DEFAULT_TIMELINE_GRANULARITY)
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// Optional default values for sampler run-time options.
#[derive(Clone, Debug, Default)]
pub(crate) struct SamplerDefaults {
    /// An optional default target scheme.
    pub protocol: Option<String>,
    /// An optional default target host:port.
    pub address: Option<String>,
    /// An optional default target path.
    pub path: Option<String>,
    /// An optional default input directory.
    pub input_dir: Option<String>,
    /// An optional default for sharing files between concurrent requests.
    pub no_queue: Option<bool>,
    /// An optional default number of users.
    pub users: Option<usize>,
    /// An optional default number of seconds to run.
    pub run_time: Option<usize>,
    /// An optional default number of samples per user.
    pub iterations: Option<usize>,
    /// An optional default per-request timeout, in seconds.
    pub timeout: Option<String>,
    /// An optional default bound on file selection attempts.
    pub max_select_attempts: Option<usize>,
    /// An optional default for the sampler log file name.
    pub sampler_log: Option<String>,
    /// An optional default log level.
    pub log_level: Option<u8>,
    /// An optional default value for quiet level.
    pub quiet: Option<u8>,
    /// An optional default value for verbosity level.
    pub verbose: Option<u8>,
    /// An optional default for the sample log file name.
    pub sample_log: Option<String>,
    /// An optional default for the sample log file format.
    pub sample_format: Option<SampleLogFormat>,
    /// An optional default for not displaying metrics.
    pub no_print_metrics: Option<bool>,
    /// An optional default timeline bucket width.
    pub timeline_granularity: Option<usize>,
}

/// Defines all [`SamplerConfiguration`] options that can be programmatically configured
/// with a custom default.
#[derive(Debug)]
pub enum SamplerDefault {
    /// An optional default target scheme.
    Protocol,
    /// An optional default target host:port.
    Address,
    /// An optional default target path.
    Path,
    /// An optional default input directory.
    InputDir,
    /// An optional default for sharing files between concurrent requests.
    NoQueue,
    /// An optional default number of users.
    Users,
    /// An optional default number of seconds to run.
    RunTime,
    /// An optional default number of samples per user.
    Iterations,
    /// An optional default per-request timeout, in seconds.
    Timeout,
    /// An optional default bound on file selection attempts.
    MaxSelectAttempts,
    /// An optional default for the sampler log file name.
    SamplerLog,
    /// An optional default log level.
    LogLevel,
    /// An optional default value for quiet level.
    Quiet,
    /// An optional default value for verbosity level.
    Verbose,
    /// An optional default for the sample log file name.
    SampleLog,
    /// An optional default for the sample log file format.
    SampleFormat,
    /// An optional default for not displaying metrics.
    NoPrintMetrics,
    /// An optional default timeline bucket width, in milliseconds.
    TimelineGranularity,
}

/// Most run-time options can be programmatically configured with custom defaults.
///
/// A value passed on the command line always wins over a custom default, and a custom
/// default wins over the built-in default.
///
/// # Example
/// ```rust
/// use post_sampler::prelude::*;
///
/// fn main() -> Result<(), SamplerError> {
///     SamplerAttack::initialize()?
///         .set_default(SamplerDefault::Address, "loadtest.local:8080")?
///         .set_default(SamplerDefault::Users, 20)?
///         .set_default(SamplerDefault::NoQueue, true)?;
///
///     Ok(())
/// }
/// ```
///
/// The following options take a borrowed string slice ([`&str`]):
///  - [`SamplerDefault::Protocol`]
///  - [`SamplerDefault::Address`]
///  - [`SamplerDefault::Path`]
///  - [`SamplerDefault::InputDir`]
///  - [`SamplerDefault::Timeout`]
///  - [`SamplerDefault::SamplerLog`]
///  - [`SamplerDefault::SampleLog`]
///
/// The following options take a [`usize`]:
///  - [`SamplerDefault::Users`]
///  - [`SamplerDefault::RunTime`]
///  - [`SamplerDefault::Iterations`]
///  - [`SamplerDefault::MaxSelectAttempts`]
///  - [`SamplerDefault::LogLevel`]
///  - [`SamplerDefault::Quiet`]
///  - [`SamplerDefault::Verbose`]
///  - [`SamplerDefault::TimelineGranularity`]
///
/// The following flags take a [`bool`]:
///  - [`SamplerDefault::NoQueue`]
///  - [`SamplerDefault::NoPrintMetrics`]
///
/// [`SamplerDefault::SampleFormat`] takes a [`SampleLogFormat`].
pub trait SamplerDefaultType<T> {
    /// Sets a [`SamplerDefault`] to the provided value.
    fn set_default(self, key: SamplerDefault, value: T) -> Result<Box<Self>, SamplerError>;
}
impl SamplerDefaultType<&str> for SamplerAttack {
    fn set_default(mut self, key: SamplerDefault, value: &str) -> Result<Box<Self>, SamplerError> {
        match key {
            SamplerDefault::Protocol => self.defaults.protocol = Some(value.to_string()),
            SamplerDefault::Address => self.defaults.address = Some(value.to_string()),
            SamplerDefault::Path => self.defaults.path = Some(value.to_string()),
            SamplerDefault::InputDir => self.defaults.input_dir = Some(value.to_string()),
            SamplerDefault::Timeout => self.defaults.timeout = Some(value.to_string()),
            SamplerDefault::SamplerLog => self.defaults.sampler_log = Some(value.to_string()),
            SamplerDefault::SampleLog => self.defaults.sample_log = Some(value.to_string()),
            _ => return Err(wrong_type(&key, value, "&str")),
        }
        Ok(Box::new(self))
    }
}
impl SamplerDefaultType<usize> for SamplerAttack {
    fn set_default(mut self, key: SamplerDefault, value: usize) -> Result<Box<Self>, SamplerError> {
        match key {
            SamplerDefault::Users => self.defaults.users = Some(value),
            SamplerDefault::RunTime => self.defaults.run_time = Some(value),
            SamplerDefault::Iterations => self.defaults.iterations = Some(value),
            SamplerDefault::MaxSelectAttempts => self.defaults.max_select_attempts = Some(value),
            SamplerDefault::LogLevel => self.defaults.log_level = Some(value as u8),
            SamplerDefault::Quiet => self.defaults.quiet = Some(value as u8),
            SamplerDefault::Verbose => self.defaults.verbose = Some(value as u8),
            SamplerDefault::TimelineGranularity => {
                self.defaults.timeline_granularity = Some(value)
            }
            _ => return Err(wrong_type(&key, value, "usize")),
        }
        Ok(Box::new(self))
    }
}
impl SamplerDefaultType<bool> for SamplerAttack {
    fn set_default(mut self, key: SamplerDefault, value: bool) -> Result<Box<Self>, SamplerError> {
        match key {
            SamplerDefault::NoQueue => self.defaults.no_queue = Some(value),
            SamplerDefault::NoPrintMetrics => self.defaults.no_print_metrics = Some(value),
            _ => return Err(wrong_type(&key, value, "bool")),
        }
        Ok(Box::new(self))
    }
}
impl SamplerDefaultType<SampleLogFormat> for SamplerAttack {
    fn set_default(
        mut self,
        key: SamplerDefault,
        value: SampleLogFormat,
    ) -> Result<Box<Self>, SamplerError> {
        match key {
            SamplerDefault::SampleFormat => self.defaults.sample_format = Some(value),
            _ => return Err(wrong_type(&key, value, "SampleLogFormat")),
        }
        Ok(Box::new(self))
    }
}

// Build a helpful and explicit error for a default set with the wrong value type.
fn wrong_type<T: fmt::Debug>(key: &SamplerDefault, value: T, received: &str) -> SamplerError {
    SamplerError::InvalidOption {
        option: format!("SamplerDefault::{:?}", key),
        value: format!("{:?}", value),
        detail: format!(
            "set_default(SamplerDefault::{:?}, {:?}) received unsupported {} value",
            key, value, received
        ),
    }
}

/// One candidate source for a configuration value, in order of precedence.
pub(crate) struct SamplerValue<'a, T> {
    /// The candidate value, if any.
    pub(crate) value: Option<T>,
    /// Skip this candidate even if it holds a value.
    pub(crate) filter: bool,
    /// Logged at info level when this candidate is selected, unless empty.
    pub(crate) message: &'a str,
}

/// Select the first unfiltered value from a list of candidates.
pub(crate) fn select_value<T: fmt::Debug>(values: Vec<SamplerValue<T>>) -> Option<T> {
    for candidate in values {
        if candidate.filter {
            continue;
        }
        if let Some(v) = candidate.value {
            if !candidate.message.is_empty() {
                info!("{} = {:?}", candidate.message, v)
            }
            return Some(v);
        }
    }
    None
}

// Precedence for string options: the command line if set, then the custom default.
fn select_string(cli: &str, default: &Option<String>, message: &str) -> Option<String> {
    select_value(vec![
        SamplerValue {
            value: Some(cli.to_string()),
            filter: cli.is_empty(),
            message,
        },
        SamplerValue {
            value: default.clone(),
            filter: default.is_none(),
            message,
        },
    ])
}

// Precedence for flags: set on the command line, then the custom default.
fn select_flag(cli: bool, default: Option<bool>, message: &str) -> bool {
    select_value(vec![
        SamplerValue {
            value: Some(cli),
            filter: !cli,
            message,
        },
        SamplerValue {
            value: default,
            filter: default.is_none(),
            message,
        },
    ])
    .unwrap_or(false)
}

// Precedence for counters where zero means unset.
fn select_count<T: Copy + Default + PartialEq + fmt::Debug>(
    cli: T,
    default: Option<T>,
    message: &str,
) -> T {
    select_value(vec![
        SamplerValue {
            value: Some(cli),
            filter: cli == T::default(),
            message,
        },
        SamplerValue {
            value: default,
            filter: default.is_none(),
            message,
        },
    ])
    .unwrap_or_default()
}

impl SamplerConfiguration {
    /// Implement precedence rules for all [`SamplerConfiguration`] values.
    pub(crate) fn configure(&mut self, defaults: &SamplerDefaults) {
        // Logging is configured first so the remaining choices can be logged.
        self.quiet = select_count(self.quiet, defaults.quiet, "");
        self.verbose = select_count(self.verbose, defaults.verbose, "");
        self.log_level = select_count(self.log_level, defaults.log_level, "");
        self.sampler_log =
            select_string(&self.sampler_log, &defaults.sampler_log, "").unwrap_or_default();
        self.initialize_sampler_logger();

        self.protocol = select_string(&self.protocol, &defaults.protocol, "protocol")
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());
        self.address = select_string(&self.address, &defaults.address, "address")
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        self.path = select_string(&self.path, &defaults.path, "path")
            .unwrap_or_else(|| DEFAULT_PATH.to_string());
        self.input_dir =
            select_string(&self.input_dir, &defaults.input_dir, "input_dir").unwrap_or_default();
        self.no_queue = select_flag(self.no_queue, defaults.no_queue, "no_queue");

        // Determine how many CPUs are available.
        let default_users = match std::thread::available_parallelism() {
            Ok(ap) => Some(ap.get()),
            Err(e) => {
                // Default to 1 user if unable to detect number of CPUs.
                info!("failed to detect available_parallelism: {}", e);
                Some(1)
            }
        };
        self.users = select_value(vec![
            SamplerValue {
                value: self.users,
                filter: self.users.is_none(),
                message: "users",
            },
            SamplerValue {
                value: defaults.users,
                filter: defaults.users.is_none(),
                message: "users",
            },
            SamplerValue {
                value: default_users,
                filter: false,
                message: "users defaulted to number of CPUs",
            },
        ]);

        let run_time = util::parse_timespan(&self.run_time);
        self.run_time = select_value(vec![
            SamplerValue {
                value: Some(run_time),
                filter: run_time == 0,
                message: "run_time",
            },
            SamplerValue {
                value: defaults.run_time,
                filter: defaults.run_time.is_none(),
                message: "run_time",
            },
        ])
        .map_or_else(|| "0".to_string(), |v| v.to_string());

        self.iterations = select_count(self.iterations, defaults.iterations, "iterations");
        self.max_select_attempts = select_count(
            self.max_select_attempts,
            defaults.max_select_attempts,
            "max_select_attempts",
        );

        // Kept as given, so validate() can reject a value that isn't a number.
        self.timeout = select_value(vec![
            SamplerValue {
                value: self.timeout.clone(),
                filter: self.timeout.is_none(),
                message: "timeout",
            },
            SamplerValue {
                value: defaults.timeout.clone(),
                filter: defaults.timeout.is_none(),
                message: "timeout",
            },
        ]);

        self.sample_log =
            select_string(&self.sample_log, &defaults.sample_log, "sample_log").unwrap_or_default();
        self.sample_format = select_value(vec![
            SamplerValue {
                value: self.sample_format.clone(),
                filter: self.sample_format.is_none(),
                message: "sample_format",
            },
            SamplerValue {
                value: defaults.sample_format.clone(),
                filter: defaults.sample_format.is_none(),
                message: "sample_format",
            },
            // Only default the format when a sample log is enabled.
            SamplerValue {
                value: Some(SampleLogFormat::Csv),
                filter: self.sample_log.is_empty(),
                message: "",
            },
        ]);

        self.no_print_metrics = select_flag(
            self.no_print_metrics,
            defaults.no_print_metrics,
            "no_print_metrics",
        );
        self.timeline_granularity = select_value(vec![
            SamplerValue {
                value: self.timeline_granularity,
                filter: self.timeline_granularity.is_none(),
                message: "timeline_granularity",
            },
            SamplerValue {
                value: defaults.timeline_granularity,
                filter: defaults.timeline_granularity.is_none(),
                message: "timeline_granularity",
            },
        ]);
    }

    /// Validate configured [`SamplerConfiguration`] values.
    pub(crate) fn validate(&self) -> Result<(), SamplerError> {
        // Can't set both --verbose and --quiet.
        if self.verbose > 0 && self.quiet > 0 {
            return Err(SamplerError::InvalidOption {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set with `configuration.quiet`."
                    .to_string(),
            });
        }

        if self.input_dir.is_empty() {
            return Err(SamplerError::InvalidOption {
                option: "`configuration.input_dir`".to_string(),
                value: "".to_string(),
                detail: "An input directory must be defined via the --input-dir option or SamplerDefault::InputDir.".to_string(),
            });
        }

        // The parts of the target must combine into a valid URL.
        let target = self.target();
        if let Err(e) = target.url() {
            return Err(SamplerError::InvalidOption {
                option: "`configuration.address`".to_string(),
                value: format!("{}://{}{}", target.protocol, target.address, target.path),
                detail: format!("Target does not form a valid URL: {}.", e),
            });
        }

        // If set, timeout must be a number of seconds greater than zero.
        if let Some(timeout) = self.timeout.as_ref() {
            match util::get_float_from_string(Some(timeout.to_string())) {
                Some(t) if t > 0.0 => (),
                Some(_) => {
                    return Err(SamplerError::InvalidOption {
                        option: "`configuration.timeout`".to_string(),
                        value: timeout.to_string(),
                        detail: "`configuration.timeout` must be greater than 0.".to_string(),
                    });
                }
                None => {
                    return Err(SamplerError::InvalidOption {
                        option: "`configuration.timeout`".to_string(),
                        value: timeout.to_string(),
                        detail: "`configuration.timeout` must be a number of seconds."
                            .to_string(),
                    });
                }
            }
        }

        if let Some(users) = self.users {
            if users == 0 {
                return Err(SamplerError::InvalidOption {
                    option: "`configuration.users`".to_string(),
                    value: users.to_string(),
                    detail: "`configuration.users` must be set to at least 1.".to_string(),
                });
            }
        }

        if let Some(granularity) = self.timeline_granularity {
            if granularity == 0 {
                return Err(SamplerError::InvalidOption {
                    option: "`configuration.timeline_granularity`".to_string(),
                    value: granularity.to_string(),
                    detail: "`configuration.timeline_granularity` must be at least 1."
                        .to_string(),
                });
            }
        }

        // Without an end condition users would run until interrupted with ctrl-c.
        if util::parse_timespan(&self.run_time) == 0 && self.iterations == 0 {
            info!("neither run_time nor iterations set, running until canceled");
        }

        Ok(())
    }

    /// Initialize the logger which writes to standard out and optionally to a log file.
    pub(crate) fn initialize_sampler_logger(&self) {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let sampler_log: Option<PathBuf> = if !self.sampler_log.is_empty() {
            Some(PathBuf::from(&self.sampler_log))
        } else {
            None
        };

        let mut loggers: Vec<Box<dyn SharedLogger>> =
            vec![SimpleLogger::new(debug_level, Config::default())];
        if let Some(log_to_file) = sampler_log.as_ref() {
            match std::fs::File::create(log_to_file) {
                Ok(file) => loggers.push(WriteLogger::new(log_level, Config::default(), file)),
                Err(e) => eprintln!(
                    "failed to create log file {}: {}",
                    log_to_file.display(),
                    e
                ),
            }
        }

        // Only the first initialization succeeds, later attempts (as in tests) are ignored.
        match CombinedLogger::init(loggers) {
            Ok(_) => (),
            Err(e) => {
                info!("failed to initialize CombinedLogger: {}", e);
            }
        }

        if let Some(log_to_file) = sampler_log {
            info!("Writing to log file: {}", log_to_file.display());
        }
        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_defaults() {
        let sampler_attack = SamplerAttack::initialize_with_config(SamplerConfiguration::default())
            .unwrap()
            .set_default(SamplerDefault::Protocol, "https")
            .unwrap()
            .set_default(SamplerDefault::Address, "example.com:8443")
            .unwrap()
            .set_default(SamplerDefault::Path, "/upload")
            .unwrap()
            .set_default(SamplerDefault::InputDir, "/tmp/bodies")
            .unwrap()
            .set_default(SamplerDefault::NoQueue, true)
            .unwrap()
            .set_default(SamplerDefault::Users, 12)
            .unwrap()
            .set_default(SamplerDefault::RunTime, 30)
            .unwrap()
            .set_default(SamplerDefault::Iterations, 5)
            .unwrap()
            .set_default(SamplerDefault::Timeout, "2.5")
            .unwrap()
            .set_default(SamplerDefault::MaxSelectAttempts, 100)
            .unwrap()
            .set_default(SamplerDefault::SampleLog, "samples.csv")
            .unwrap()
            .set_default(SamplerDefault::SampleFormat, SampleLogFormat::Json)
            .unwrap()
            .set_default(SamplerDefault::NoPrintMetrics, true)
            .unwrap()
            .set_default(SamplerDefault::TimelineGranularity, 250)
            .unwrap();

        let defaults = &sampler_attack.defaults;
        assert_eq!(defaults.protocol, Some("https".to_string()));
        assert_eq!(defaults.address, Some("example.com:8443".to_string()));
        assert_eq!(defaults.path, Some("/upload".to_string()));
        assert_eq!(defaults.input_dir, Some("/tmp/bodies".to_string()));
        assert_eq!(defaults.no_queue, Some(true));
        assert_eq!(defaults.users, Some(12));
        assert_eq!(defaults.run_time, Some(30));
        assert_eq!(defaults.iterations, Some(5));
        assert_eq!(defaults.timeout, Some("2.5".to_string()));
        assert_eq!(defaults.max_select_attempts, Some(100));
        assert_eq!(defaults.sample_log, Some("samples.csv".to_string()));
        assert_eq!(defaults.sample_format, Some(SampleLogFormat::Json));
        assert_eq!(defaults.no_print_metrics, Some(true));
        assert_eq!(defaults.timeline_granularity, Some(250));
    }

    #[test]
    fn set_default_wrong_type() {
        let sampler_attack =
            SamplerAttack::initialize_with_config(SamplerConfiguration::default()).unwrap();
        match sampler_attack.set_default(SamplerDefault::Users, "ten") {
            Err(SamplerError::InvalidOption { option, .. }) => {
                assert_eq!(option, "SamplerDefault::Users")
            }
            _ => panic!("expected an InvalidOption error"),
        }
    }

    #[test]
    fn command_line_wins() {
        let mut configuration = SamplerConfiguration::parse_args_default(&[
            "--address",
            "cli.local:9000",
            "--input-dir",
            "/srv/bodies",
            "--users",
            "3",
        ])
        .unwrap();
        let defaults = SamplerDefaults {
            address: Some("default.local:80".to_string()),
            path: Some("/from-default".to_string()),
            users: Some(50),
            no_queue: Some(true),
            ..Default::default()
        };
        configuration.configure(&defaults);

        assert_eq!(configuration.protocol, DEFAULT_PROTOCOL);
        assert_eq!(configuration.address, "cli.local:9000");
        assert_eq!(configuration.path, "/from-default");
        assert_eq!(configuration.input_dir, "/srv/bodies");
        assert_eq!(configuration.users, Some(3));
        assert!(!configuration.use_queue());
        // No sample log, so no sample format.
        assert!(configuration.sample_format.is_none());
        assert!(configuration.validate().is_ok());
    }

    #[test]
    fn built_in_defaults() {
        let configuration = SamplerConfiguration::parse_args_default::<&str>(&[]).unwrap();
        assert!(configuration.use_queue());
        let target = configuration.target();
        assert_eq!(target.protocol, "http");
        assert_eq!(target.address, "localhost:80");
        assert_eq!(target.path, "/testServlet");
        assert_eq!(configuration.timeline_granularity(), DEFAULT_TIMELINE_GRANULARITY);
        assert!(configuration.request_timeout().is_none());
    }

    #[test]
    fn timeout_must_be_a_number() {
        let mut configuration =
            SamplerConfiguration::parse_args_default(&["--input-dir", "bodies", "--timeout", "abc"])
                .unwrap();
        configuration.configure(&SamplerDefaults::default());
        assert_eq!(configuration.timeout, Some("abc".to_string()));
        match configuration.validate() {
            Err(SamplerError::InvalidOption { option, value, .. }) => {
                assert_eq!(option, "`configuration.timeout`");
                assert_eq!(value, "abc");
            }
            _ => panic!("expected an InvalidOption error"),
        }

        // A custom default is checked the same way.
        let mut configuration =
            SamplerConfiguration::parse_args_default(&["--input-dir", "bodies"]).unwrap();
        let defaults = SamplerDefaults {
            timeout: Some("2s".to_string()),
            ..Default::default()
        };
        configuration.configure(&defaults);
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn validation() {
        let mut configuration =
            SamplerConfiguration::parse_args_default(&["--input-dir", "bodies"]).unwrap();
        assert!(configuration.validate().is_ok());

        configuration.verbose = 1;
        configuration.quiet = 1;
        assert!(configuration.validate().is_err());
        configuration.quiet = 0;

        configuration.timeout = Some("0".to_string());
        assert!(configuration.validate().is_err());
        configuration.timeout = Some("1.5".to_string());
        assert!(configuration.validate().is_ok());
        assert_eq!(
            configuration.request_timeout(),
            Some(std::time::Duration::from_millis(1500))
        );

        configuration.address = "bad host".to_string();
        assert!(configuration.validate().is_err());
        configuration.address = "".to_string();

        configuration.users = Some(0);
        assert!(configuration.validate().is_err());
        configuration.users = None;

        configuration.input_dir = "".to_string();
        assert!(configuration.validate().is_err());
    }
}
