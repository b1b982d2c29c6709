use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::metrics::SampleMetric;
use crate::sampler::PostSampler;
use crate::util;
use crate::SamplerError;

/// Commands sent from the parent to running users.
#[derive(Debug, Clone)]
pub(crate) enum UserCommand {
    /// Finish the current sample and exit.
    Exit,
}

/// A single user: runs samples in a loop until told to stop, sending each completed
/// sample to the parent.
pub(crate) async fn user_main(
    user_number: usize,
    sampler: PostSampler,
    iterations: usize,
    running_users: Arc<AtomicUsize>,
    channel_to_parent: flume::Sender<SampleMetric>,
    user_receiver: flume::Receiver<UserCommand>,
) -> Result<(), SamplerError> {
    info!("launching user {}...", user_number);
    running_users.fetch_add(1, Ordering::SeqCst);

    let label = format!("user {}", user_number);
    let mut completed = 0;
    let exited = loop {
        if received_exit(&user_receiver) || util::canceled() {
            break Ok(());
        }

        match sampler.run_sample(&label).await {
            Ok(result) => {
                let metric = SampleMetric {
                    active_users: running_users.load(Ordering::SeqCst),
                    result,
                };
                // The parent only goes away after all users have exited.
                if let Err(e) = channel_to_parent.send(metric) {
                    warn!("user {} failed to send sample to parent: {}", user_number, e);
                }
                completed += 1;
            }
            // Every file stayed in flight, try again without counting an iteration.
            Err(e @ SamplerError::NoFileAvailable { .. }) => {
                warn!("user {}: {}", user_number, e);
                tokio::task::yield_now().await;
                continue;
            }
            Err(e) => {
                error!("user {}: {}", user_number, e);
                break Err(e);
            }
        }

        if iterations > 0 && completed >= iterations {
            debug!("user {} completed {} iterations", user_number, completed);
            break Ok(());
        }
    };

    running_users.fetch_sub(1, Ordering::SeqCst);
    info!("exiting user {}...", user_number);
    exited
}

// Determine if the parent has sent a UserCommand::Exit message.
fn received_exit(user_receiver: &flume::Receiver<UserCommand>) -> bool {
    while let Ok(command) = user_receiver.try_recv() {
        match command {
            UserCommand::Exit => return true,
        }
    }
    false
}
