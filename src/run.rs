//! Wiring of the change source, the signal listener and the controller.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crate::{
    config::Config,
    controller::{Finished, ProcessController, RunRequests},
    error::{Error, Result},
    filter::{IgnoreFilter, PathFilter},
    logging::Logger,
    signal::{self, SignalSource},
    watcher::{Canceller, ChangeSource},
};

/// Watch `config.root` and run `config.cmd` on every batch of changes until
/// SIGINT or SIGTERM arrives.
///
/// Must be called before the process starts any other thread, see
/// [`signal::block_termination`].
pub fn run(config: Config, log: Logger) -> Result<()> {
    let filter = IgnoreFilter::new(&config.ignores)?;
    run_with_filter(config, Arc::new(filter), log)
}

/// Like [`run`], with a caller-supplied path filter in place of `config.ignores`.
pub fn run_with_filter(config: Config, filter: Arc<dyn PathFilter>, log: Logger) -> Result<()> {
    let mask = signal::block_termination()?;

    let controller = ProcessController::new(config.cmd.clone(), log.scoped("watchrun::controller"))
        .on_busy_update(config.on_busy_update)
        .exit_watch(config.exit_watch);
    let runs = controller.run_requests();
    let kills = controller.kill_requests();

    let cancel = Canceller::new();
    let mut changes = ChangeSource::new(
        &config.root,
        cancel.clone(),
        filter,
        log.scoped("watchrun::watcher"),
    )?;

    let signals = SignalSource::spawn(
        mask,
        cancel.clone(),
        kills,
        log.scoped("watchrun::signal"),
    )?;

    let controlling = spawn_controller(controller, cancel)?;

    if config.run_initially {
        log.debug(format_args!("running once before any change"));
        // a refusal means the controller already stopped, the join below reports why
        let _ = runs.request();
    }

    forward(&mut changes, &runs, config.debounce, &log);
    drop(changes);

    let outcome = controlling
        .join()
        .map_err(|_| Error::Panicked("controller"))?;
    signals.stop()?;
    outcome
}

fn spawn_controller(
    controller: ProcessController,
    cancel: Canceller,
) -> Result<JoinHandle<Result<()>>> {
    let handle = thread::Builder::new()
        .name("controller".into())
        .spawn(move || {
            let outcome = controller.run();
            // nobody is left to run anything for
            cancel.cancel();
            outcome
        })?;
    Ok(handle)
}

/// Turn every debounced batch of changes into one run request.
///
/// Returns when the change source is cancelled or the controller has finished.
fn forward(
    changes: &mut ChangeSource,
    runs: &RunRequests,
    quiet: std::time::Duration,
    log: &Logger,
) {
    while let Some(batch) = changes.next_batch(quiet) {
        match batch.as_slice() {
            [path] => log.info(format_args!("change detected: {}", path)),
            [first, rest @ ..] => log.info(format_args!(
                "change detected: {} and {} more",
                first,
                rest.len()
            )),
            [] => continue,
        }

        if let Err(Finished) = runs.request() {
            log.debug(format_args!("controller finished, no longer forwarding changes"));
            break;
        }
    }
}
