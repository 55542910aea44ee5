//! Termination signal handling.
//!
//! SIGINT and SIGTERM are masked in every thread and picked up synchronously
//! by a dedicated listener thread with sigwait(3). The mask is inherited by
//! threads at creation, so [`block_termination`] has to run before any other
//! thread is started.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use nix::{
    sys::signal::{kill, SigSet, Signal},
    unistd::Pid,
};

use crate::{
    controller::{Finished, KillRequests},
    error::{Error, Result},
    logging::Logger,
    watcher::Canceller,
};

/// Mask SIGINT and SIGTERM for the calling thread and every thread it starts.
pub fn block_termination() -> Result<SigSet> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block()?;
    Ok(mask)
}

/// Turns termination signals into a change-source cancellation and escalating
/// kill requests.
#[derive(Debug)]
struct Relay {
    changes: Canceller,
    kills: KillRequests,
    received: usize,
}

impl Relay {
    fn new(changes: Canceller, kills: KillRequests) -> Self {
        Self {
            changes,
            kills,
            received: 0,
        }
    }

    fn forward(&mut self) -> std::result::Result<(), Finished> {
        self.received += 1;
        if self.received == 1 {
            self.changes.cancel();
        }

        self.kills.request()
    }
}

pub struct SignalSource {
    stopping: Arc<AtomicBool>,
    listener: JoinHandle<()>,
    log: Logger,
}

impl SignalSource {
    /// Start listening for the signals in `mask`, as returned by [`block_termination`].
    pub fn spawn(mask: SigSet, changes: Canceller, kills: KillRequests, log: Logger) -> Result<Self> {
        let stopping = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stopping);
        let listener_log = log.clone();

        let listener = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                let log = listener_log;
                let mut relay = Relay::new(changes, kills);

                loop {
                    let signal = match mask.wait() {
                        Ok(signal) => signal,
                        Err(err) => {
                            log.error(format_args!("unable to wait for signals: {}", err));
                            break;
                        }
                    };

                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    if relay.received == 0 {
                        log.info(format_args!("received {:?}, shutting down", signal));
                    } else {
                        log.info(format_args!(
                            "received {:?} again, killing the command",
                            signal
                        ));
                    }

                    if relay.forward().is_err() {
                        log.debug(format_args!("controller already finished"));
                        break;
                    }
                }
            })?;

        Ok(Self {
            stopping,
            listener,
            log,
        })
    }

    /// Stop listening and wait for the listener thread to end.
    ///
    /// The listener is parked in sigwait(3), so it is woken with a SIGTERM
    /// of our own, which it consumes and drops.
    pub fn stop(self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        kill(Pid::this(), Signal::SIGTERM).map_err(Error::Signal)?;
        self.listener
            .join()
            .map_err(|_| Error::Panicked("signal listener"))?;
        self.log.debug(format_args!("stopped listening for signals"));
        Ok(())
    }
}

impl std::fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSource")
            .field("stopping", &self.stopping.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ProcessController, Transition};
    use std::time::Duration;

    #[test]
    fn first_signal_cancels_changes_and_shuts_down() {
        let mut controller = ProcessController::new(vec!["true".into()], Logger::discard());
        let transitions = controller.subscribe();
        let mut relay = Relay::new(Canceller::new(), controller.kill_requests());
        let changes = relay.changes.clone();

        let running = thread::spawn(move || controller.run());

        assert!(!changes.is_cancelled());
        relay.forward().unwrap();
        assert!(changes.is_cancelled());

        assert_eq!(
            transitions.recv_timeout(Duration::from_secs(5)).unwrap(),
            Transition::Finished
        );
        running.join().unwrap().unwrap();

        // nothing left to escalate to
        assert_eq!(relay.forward(), Err(Finished));
        assert_eq!(relay.received, 2);
    }
}
