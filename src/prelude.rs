pub use crate::config::{SamplerConfiguration, SamplerDefault, SamplerDefaultType};
pub use crate::executor::{SampleExecutor, SampleResult, SampleTarget};
pub use crate::logger::SampleLogFormat;
pub use crate::metrics::{SampleAggregate, SampleMetrics, TimelineBucket};
pub use crate::sampler::{AbortHandler, PostSampler};
pub use crate::selector::{FileSelector, InFlightFile, RequestBodyFile};
pub use crate::{SamplerAttack, SamplerError};
