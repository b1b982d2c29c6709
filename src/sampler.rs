//! The sampling unit: select a file, POST it, release the file.
//!
//! A [`PostSampler`] is configured once and then asked to [`run_sample`] any number of
//! times, concurrently, from any number of workers. Clones share one
//! [`FileSelector`](../selector/struct.FileSelector.html), so while the queue is enabled
//! no two in-flight samples from the same sampler (or its clones) use the same file.
//!
//! [`run_sample`]: struct.PostSampler.html#method.run_sample
//!
//! # Example
//! ```rust,no_run
//! use post_sampler::prelude::*;
//! use gumdrop::Options;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SamplerError> {
//!     let configuration = SamplerConfiguration::parse_args_default(&[
//!         "--address", "localhost:8080",
//!         "--path", "/orders",
//!         "--input-dir", "./bodies",
//!     ])
//!     .expect("invalid options");
//!
//!     let sampler = PostSampler::new(&configuration)?;
//!     let sample = sampler.run_sample("worker 1").await?;
//!     println!("{}: {} in {} ms", sample.label, sample.response_code, sample.elapsed);
//!
//!     Ok(())
//! }
//! ```

use reqwest::Client;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SamplerConfiguration;
use crate::executor::{SampleExecutor, SampleResult};
use crate::selector::FileSelector;
use crate::SamplerError;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Invoked when the input directory is missing or empty.
///
/// The default handler logs the error and exits the process, as there is nothing left to
/// sample. A handler that returns lets [`PostSampler::run_sample`] return the error instead.
pub type AbortHandler = Arc<dyn Fn(&SamplerError) + Send + Sync>;

fn exit_process(error: &SamplerError) {
    error!("{}, exiting", error);
    std::process::exit(1);
}

/// Selects request body files and POSTs them to the configured target.
#[derive(Clone)]
pub struct PostSampler {
    input_dir: PathBuf,
    use_queue: bool,
    selector: FileSelector,
    executor: SampleExecutor,
    abort_handler: AbortHandler,
}

impl PostSampler {
    /// Build a sampler from a configuration, with its own in-flight set.
    pub fn new(configuration: &SamplerConfiguration) -> Result<PostSampler, SamplerError> {
        let mut builder = Client::builder().user_agent(APP_USER_AGENT);
        if let Some(timeout) = configuration.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(PostSampler {
            input_dir: configuration.input_dir().to_path_buf(),
            use_queue: configuration.use_queue(),
            selector: FileSelector::new().set_max_attempts(configuration.max_select_attempts),
            executor: SampleExecutor::new(client, configuration.target()),
            abort_handler: Arc::new(exit_process),
        })
    }

    /// Replace the file selector, for example to share one in-flight set between samplers
    /// reading the same directory.
    pub fn set_selector(mut self, selector: FileSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the handler invoked when the input directory is missing or empty.
    ///
    /// # Example
    /// ```rust
    /// use post_sampler::prelude::*;
    /// use std::sync::Arc;
    ///
    /// fn quiet_sampler(configuration: &SamplerConfiguration) -> Result<PostSampler, SamplerError> {
    ///     // Return the error to the caller instead of exiting.
    ///     Ok(PostSampler::new(configuration)?
    ///         .set_abort_handler(Arc::new(|e: &SamplerError| eprintln!("not sampling: {}", e))))
    /// }
    /// ```
    pub fn set_abort_handler(mut self, handler: AbortHandler) -> Self {
        self.abort_handler = handler;
        self
    }

    pub fn selector(&self) -> &FileSelector {
        &self.selector
    }

    pub fn executor(&self) -> &SampleExecutor {
        &self.executor
    }

    /// Run one sample: select a file, POST it, and release it.
    ///
    /// Failed exchanges are returned as unsuccessful [`SampleResult`]s. The only errors
    /// are configuration problems: a missing or empty input directory (after the abort
    /// handler has run), or exhausting `max_select_attempts`.
    pub async fn run_sample(&self, label: &str) -> Result<SampleResult, SamplerError> {
        let claimed = match self.selector.claim(&self.input_dir, self.use_queue).await {
            Ok(claimed) => claimed,
            Err(e) => {
                if let SamplerError::FatalConfiguration { .. } = e {
                    (self.abort_handler)(&e);
                }
                return Err(e);
            }
        };
        trace!("{}: selected {}", label, claimed.file().path().display());

        let result = self.executor.execute(claimed.file(), label).await;

        // Release only once the result is complete.
        drop(claimed);
        Ok(result)
    }
}

impl fmt::Debug for PostSampler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PostSampler")
            .field("input_dir", &self.input_dir)
            .field("use_queue", &self.use_queue)
            .field("selector", &self.selector)
            .field("executor", &self.executor)
            .finish()
    }
}
