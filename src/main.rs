use post_sampler::prelude::*;

fn main() {
    // Logging is initialized while configuring, so errors before that go to stderr.
    let metrics = match SamplerAttack::initialize().and_then(|attack| attack.execute()) {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let aggregate = metrics.aggregate();
    if aggregate.fail_count > 0 {
        log::warn!("{} of {} samples failed", aggregate.fail_count, aggregate.count());
    }
}
