//! # post-sampler
//!
//! A load sampler that repeatedly selects a pre-built request body from a directory,
//! POSTs it to a target, and records the latency and outcome of every exchange.
//!
//! The sampling unit is the [`PostSampler`](./sampler/struct.PostSampler.html), built from
//! two parts:
//!  - a [`FileSelector`](./selector/struct.FileSelector.html), which picks a random file
//!    from the input directory and, while the queue is enabled, guarantees that no two
//!    in-flight samples use the same file;
//!  - a [`SampleExecutor`](./executor/struct.SampleExecutor.html), which POSTs the file
//!    and records a [`SampleResult`](./executor/struct.SampleResult.html) whatever happens.
//!
//! A [`SamplerAttack`] runs any number of concurrent users, each looping over
//! [`PostSampler::run_sample`](./sampler/struct.PostSampler.html#method.run_sample),
//! collects [`SampleMetrics`](./metrics/struct.SampleMetrics.html) and optionally writes
//! every sample to a sample log.
//!
//! ## Running a sampler
//!
//! The bundled `post-sampler` binary is configured entirely from the command line:
//!
//! ```bash
//! $ post-sampler --address localhost:8080 --path /orders --input-dir ./bodies \
//!     --users 8 --run-time 30s --sample-log samples.csv
//! ```
//!
//! The same sampler can be embedded in an application, with custom defaults that the
//! command line can still override:
//!
//! ```rust,no_run
//! use post_sampler::prelude::*;
//!
//! fn main() -> Result<(), SamplerError> {
//!     let metrics = SamplerAttack::initialize()?
//!         .set_default(SamplerDefault::Address, "localhost:8080")?
//!         .set_default(SamplerDefault::InputDir, "./bodies")?
//!         .set_default(SamplerDefault::Users, 8)?
//!         .execute()?;
//!
//!     println!("completed {} samples", metrics.samples());
//!
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod executor;
pub mod logger;
pub mod metrics;
pub mod prelude;
pub mod sampler;
pub mod selector;
mod user;
pub mod util;

use chrono::prelude::*;
use gumdrop::Options;
use lazy_static::lazy_static;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, RwLock};
use std::{fmt, io, time};
use tokio::runtime::Runtime;

use crate::config::{SamplerConfiguration, SamplerDefaults};
use crate::logger::SampleLoggerTx;
use crate::metrics::{SampleMetric, SampleMetrics};
use crate::sampler::{AbortHandler, PostSampler};
use crate::selector::FileSelector;
use crate::user::UserCommand;

// Set when ctrl-c is caught, telling all users to finish their current sample and exit.
lazy_static! {
    static ref CANCELED: Arc<RwLock<bool>> = Arc::new(RwLock::new(false));
}

/// An enumeration of all errors a [`SamplerAttack`] or [`PostSampler`] can return.
#[derive(Debug)]
pub enum SamplerError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a [`tokio::task::JoinError`](https://docs.rs/tokio/*/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// The input directory doesn't exist, can't be read, or holds no files. Nothing can be
    /// sampled until it is fixed.
    FatalConfiguration {
        /// The configured input directory.
        directory: String,
        /// An explanation of the error.
        detail: String,
    },
    /// Every file remained in flight for the configured number of selection attempts.
    NoFileAvailable {
        /// How many times a file was drawn.
        attempts: usize,
        /// An explanation of the error.
        detail: String,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that was set.
        option: String,
        /// The invalid value that was set.
        value: String,
        /// An explanation of the error.
        detail: String,
    },
}
/// Implement a helper to provide a text description of all possible types of errors.
impl SamplerError {
    fn describe(&self) -> &str {
        match *self {
            SamplerError::Io(_) => "io::Error",
            SamplerError::Reqwest(_) => "reqwest::Error",
            SamplerError::TokioJoin(_) => "tokio::task::JoinError",
            SamplerError::FatalConfiguration { .. } => "unusable input directory",
            SamplerError::NoFileAvailable { .. } => "no file available",
            SamplerError::InvalidOption { .. } => "invalid option or value specified",
        }
    }
}

/// Implement format trait to allow displaying errors.
impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SamplerError::Io(ref source) => {
                write!(f, "SamplerError: {} ({})", self.describe(), source)
            }
            SamplerError::Reqwest(ref source) => {
                write!(f, "SamplerError: {} ({})", self.describe(), source)
            }
            SamplerError::TokioJoin(ref source) => {
                write!(f, "SamplerError: {} ({})", self.describe(), source)
            }
            SamplerError::FatalConfiguration {
                ref directory,
                ref detail,
            } => write!(
                f,
                "SamplerError: {} {:?} ({})",
                self.describe(),
                directory,
                detail
            ),
            SamplerError::NoFileAvailable { ref detail, .. } => {
                write!(f, "SamplerError: {} ({})", self.describe(), detail)
            }
            SamplerError::InvalidOption { ref detail, .. } => {
                write!(f, "SamplerError: {} ({})", self.describe(), detail)
            }
        }
    }
}

// Define the lower level source of this error, if any.
impl std::error::Error for SamplerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            SamplerError::Io(ref source) => Some(source),
            SamplerError::Reqwest(ref source) => Some(source),
            SamplerError::TokioJoin(ref source) => Some(source),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for SamplerError {
    fn from(err: reqwest::Error) -> SamplerError {
        SamplerError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for SamplerError {
    fn from(err: io::Error) -> SamplerError {
        SamplerError::Io(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for SamplerError {
    fn from(err: tokio::task::JoinError) -> SamplerError {
        SamplerError::TokioJoin(err)
    }
}

/// Global internal state for a sampler run.
pub struct SamplerAttack {
    /// Optional default values for run-time options.
    pub(crate) defaults: SamplerDefaults,
    /// Configuration object holding options set when launching the sampler.
    configuration: SamplerConfiguration,
    /// How long (in seconds) the sampler should run, 0 to run until done or canceled.
    run_time: usize,
    /// Optional handler replacing the default, which exits when the input directory
    /// becomes unusable while running.
    abort_handler: Option<AbortHandler>,
    /// All samples merged together.
    metrics: SampleMetrics,
}
impl SamplerAttack {
    /// Load configuration from the command line and initialize a [`SamplerAttack`].
    ///
    /// # Example
    /// ```rust
    /// use post_sampler::prelude::*;
    ///
    /// let mut sampler_attack = SamplerAttack::initialize();
    /// ```
    pub fn initialize() -> Result<SamplerAttack, SamplerError> {
        SamplerAttack::initialize_with_config(SamplerConfiguration::parse_args_default_or_exit())
    }

    /// Initialize a [`SamplerAttack`] with an already loaded configuration.
    ///
    /// # Example
    /// ```rust
    /// use post_sampler::prelude::*;
    /// use gumdrop::Options;
    ///
    /// let configuration = SamplerConfiguration::parse_args_default(&["--input-dir", "bodies"])
    ///     .expect("invalid options");
    /// let mut sampler_attack = SamplerAttack::initialize_with_config(configuration);
    /// ```
    pub fn initialize_with_config(
        configuration: SamplerConfiguration,
    ) -> Result<SamplerAttack, SamplerError> {
        Ok(SamplerAttack {
            defaults: SamplerDefaults::default(),
            configuration,
            run_time: 0,
            abort_handler: None,
            metrics: SampleMetrics::default(),
        })
    }

    /// Replace the handler invoked if the input directory becomes unusable while users are
    /// running. By default the process exits.
    pub fn set_abort_handler(mut self, handler: AbortHandler) -> Self {
        self.abort_handler = Some(handler);
        self
    }

    /// Execute the configured sampler, returning the collected metrics.
    ///
    /// Blocks until every user has exited: when the run time expires, when each user has
    /// completed its iterations, or when ctrl-c is caught.
    ///
    /// # Example
    /// ```rust,no_run
    /// use post_sampler::prelude::*;
    ///
    /// fn main() -> Result<(), SamplerError> {
    ///     let _sampler_metrics = SamplerAttack::initialize()?
    ///         .set_default(SamplerDefault::InputDir, "./bodies")?
    ///         .execute()?;
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn execute(mut self) -> Result<SampleMetrics, SamplerError> {
        // If version flag is set, display package name and version and exit.
        if self.configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        self.configuration.configure(&self.defaults);
        self.configuration.validate()?;
        self.run_time = util::parse_timespan(&self.configuration.run_time);

        // Fail before launching any users if there is nothing to sample.
        let file_count = FileSelector::validate_directory(self.configuration.input_dir())?;
        info!(
            "input_dir {} holds {} files",
            self.configuration.input_dir().display(),
            file_count
        );

        let rt = Runtime::new()?;
        self = rt.block_on(self.start_attack())?;

        Ok(self.metrics)
    }

    // Launch users, collect their samples until it's time to stop, then shut down cleanly.
    async fn start_attack(mut self) -> Result<SamplerAttack, SamplerError> {
        util::setup_ctrlc_handler();

        let mut sampler = PostSampler::new(&self.configuration)?;
        if let Some(handler) = self.abort_handler.clone() {
            sampler = sampler.set_abort_handler(handler);
        }

        // The logger is only launched if a sample log is configured.
        let (logger_handle, logger_tx) = self.configuration.setup_sample_logger().await?;

        let (metrics_tx, metrics_rx): (
            flume::Sender<SampleMetric>,
            flume::Receiver<SampleMetric>,
        ) = flume::unbounded();
        let running_users = Arc::new(AtomicUsize::new(0));

        self.metrics = SampleMetrics::new(self.configuration.timeline_granularity());
        self.metrics.started = Some(Local::now());
        let started = time::Instant::now();

        let users = self.configuration.users.unwrap_or(1);
        let mut user_channels = Vec::with_capacity(users);
        let mut user_handles = Vec::with_capacity(users);
        for user_number in 1..=users {
            // Create a per-user channel allowing the parent to tell the user to exit.
            let (parent_sender, user_receiver) = flume::unbounded();
            user_channels.push(parent_sender);
            user_handles.push(tokio::spawn(user::user_main(
                user_number,
                sampler.clone(),
                self.configuration.iterations,
                running_users.clone(),
                metrics_tx.clone(),
                user_receiver,
            )));
            self.metrics.users += 1;
        }
        info!("launched {} users...", self.metrics.users);

        let mut drift_timer = tokio::time::Instant::now();
        loop {
            self.receive_metrics(&metrics_rx, &logger_tx);

            if user_handles.iter().all(|handle| handle.is_finished()) {
                info!("all users exited");
                break;
            }
            if util::timer_expired(started, self.run_time) {
                info!("stopping after {} seconds...", self.run_time);
                break;
            }
            if util::canceled() {
                break;
            }

            drift_timer = util::sleep_minus_drift(
                time::Duration::from_millis(100),
                drift_timer,
            )
            .await;
        }

        for (index, send_to_user) in user_channels.iter().enumerate() {
            match send_to_user.send(UserCommand::Exit) {
                Ok(_) => debug!("telling user {} to exit", index + 1),
                // The user already exited.
                Err(e) => trace!("failed to tell user {} to exit: {}", index + 1, e),
            }
        }
        info!("waiting for users to exit");

        // Users finish the sample they are running before exiting.
        let mut user_error = None;
        for exited in futures::future::join_all(user_handles).await {
            if let Err(e) = exited? {
                if user_error.is_none() {
                    user_error = Some(e);
                }
            }
        }
        debug!("all users exited");

        // Collect the final samples sent by users.
        self.receive_metrics(&metrics_rx, &logger_tx);
        self.metrics.duration = started.elapsed().as_secs() as usize;

        // If the logger is enabled, tell it to flush and exit.
        if let Some(logger_tx) = logger_tx {
            if let Err(e) = logger_tx.send(None) {
                warn!("unexpected error telling logger to exit: {}", e);
            }
        }
        if let Some(logger_handle) = logger_handle {
            logger_handle.await??;
        }

        if let Some(e) = user_error {
            return Err(e);
        }

        if !self.configuration.no_print_metrics {
            println!("{}", self.metrics);
        }

        Ok(self)
    }

    // Merge all samples received so far, forwarding them to the sample log if enabled.
    fn receive_metrics(
        &mut self,
        metrics_rx: &flume::Receiver<SampleMetric>,
        logger_tx: &SampleLoggerTx,
    ) -> usize {
        let mut received = 0;
        while let Ok(metric) = metrics_rx.try_recv() {
            if let Some(logger) = logger_tx.as_ref() {
                if let Err(e) = logger.send(Some(metric.result.clone())) {
                    warn!("failed to send sample to logger: {}", e);
                }
            }
            self.metrics.record(&metric);
            received += 1;
        }
        if received > 0 {
            trace!("received {} samples", received);
        }
        received
    }
}
