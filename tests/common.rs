use gumdrop::Options;
use httpmock::MockServer;
use std::io::{self, BufRead};
use std::path::Path;
use tempfile::TempDir;

use post_sampler::config::SamplerConfiguration;
use post_sampler::metrics::SampleMetrics;
use post_sampler::SamplerAttack;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --address <mock-server>
///  --input-dir <input_dir>
///  --users 1
///  --iterations 1 (unless --run-time is set)
///  --no-print-metrics
pub fn build_configuration(
    server: &MockServer,
    input_dir: &Path,
    custom: Vec<&str>,
) -> SamplerConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare these here no matter what, so their lifetime is sufficient when needed.
    let server_address = server.address().to_string();
    let input_dir = input_dir.display().to_string();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--address") {
        configuration.extend_from_slice(&["--address", &server_address]);
    }

    if !configuration.contains(&"--input-dir") {
        configuration.extend_from_slice(&["--input-dir", &input_dir]);
    }

    // Default to testing with 1 user if not otherwise configured.
    if !configuration.contains(&"--users") {
        configuration.extend_from_slice(&["--users", "1"]);
    }

    // Default to one sample per user, unless running for a length of time.
    if !configuration.contains(&"--iterations") && !configuration.contains(&"--run-time") {
        configuration.extend_from_slice(&["--iterations", "1"]);
    }

    configuration.push("--no-print-metrics");

    // Parse these options to generate a SamplerConfiguration.
    SamplerConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Create a temporary input directory holding the named request bodies.
pub fn build_input_dir(files: &[(&str, &str)]) -> TempDir {
    let input_dir = tempfile::tempdir().expect("failed to create input directory");
    for (name, contents) in files {
        std::fs::write(input_dir.path().join(name), contents)
            .expect("failed to write request body");
    }
    input_dir
}

/// Run the sampler, returning the SampleMetrics.
#[allow(dead_code)]
pub fn run_attack(configuration: SamplerConfiguration) -> SampleMetrics {
    SamplerAttack::initialize_with_config(configuration)
        .unwrap()
        .execute()
        .unwrap()
}

/// Helper to count the number of lines in a test artifact.
#[allow(dead_code)]
pub fn file_length(file_name: &Path) -> usize {
    if let Ok(file) = std::fs::File::open(file_name) {
        io::BufReader::new(file).lines().count()
    } else {
        0
    }
}
