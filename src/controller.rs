//! The process controller: owner of the single managed-process slot.
//!
//! A [`ProcessController`] is driven by two request lines. [`RunRequests`]
//! start the command when nothing is running; [`KillRequests`] shut the
//! controller down, terminating the running command first. The first kill
//! request sends SIGTERM to the command's process group, every later one
//! SIGKILL. Exits are detected by a dedicated reaper thread (or by polling,
//! see [`ExitWatch`]) and reported back on the same inbox, so the control
//! loop only ever blocks in one place.
//!
//! Both request lines are rendezvous channels: a request is handed to the
//! loop or not at all, nothing queues up behind a running command unless
//! [`OnBusyUpdate::Queue`] asks for it.

use std::{
    fmt, io,
    process::ExitStatus,
    str::FromStr,
    sync::mpsc::{channel, sync_channel, Receiver, RecvTimeoutError, Sender, SyncSender},
    thread::{self, JoinHandle},
    time::Duration,
};

use nix::{errno::Errno, sys::signal::Signal, unistd::Pid};

use crate::{
    error::{Error, Result},
    logging::Logger,
    process::{self, Child, Launcher, SystemLauncher},
};


/// What to do with a run request that arrives while the command is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnBusyUpdate {
    /// Drop it. The running command is left alone and not restarted.
    DoNothing,
    /// Remember it, and start the command once more after it exits.
    /// Any number of requests during one run collapse into one restart.
    Queue,
}

impl Default for OnBusyUpdate {
    fn default() -> Self {
        Self::DoNothing
    }
}

impl FromStr for OnBusyUpdate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "do-nothing" => Ok(Self::DoNothing),
            "queue" => Ok(Self::Queue),
            other => Err(format!("unknown on-busy-update policy: {}", other)),
        }
    }
}

/// How the controller learns that the command exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitWatch {
    /// A reaper thread blocks in wait(2) and reports the exit as a message.
    Blocking,
    /// Check with a non-blocking wait every interval while the command runs.
    Poll(Duration),
}

impl Default for ExitWatch {
    fn default() -> Self {
        Self::Blocking
    }
}

/// Observable state of a controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub has_active_process: bool,
    /// Never goes back to `false` once set.
    pub shutdown_requested: bool,
}

/// Lifecycle events reported to subscribers, in the order they happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Spawned { pid: u32 },
    /// A run request was dropped because the command is running.
    Ignored,
    /// A run request was kept for after the running command exits.
    Queued,
    Signalled { target: Pid, signal: Signal },
    Exited { pid: u32, status: ExitStatus },
    Finished,
}

/// Returned by request lines once the controller loop has ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Finished;

impl fmt::Display for Finished {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("process controller has finished")
    }
}

impl std::error::Error for Finished {}

#[derive(Debug)]
enum Message {
    Run,
    Kill,
    Exited,
}

/// Sending half of the run request line.
#[derive(Clone, Debug)]
pub struct RunRequests(SyncSender<Message>);

impl RunRequests {
    /// Ask for the command to run. Returns once the controller has taken the request.
    pub fn request(&self) -> std::result::Result<(), Finished> {
        self.0.send(Message::Run).map_err(|_| Finished)
    }
}

/// Sending half of the kill request line.
#[derive(Clone, Debug)]
pub struct KillRequests(SyncSender<Message>);

impl KillRequests {
    /// Ask for shutdown, escalating on repeated calls.
    pub fn request(&self) -> std::result::Result<(), Finished> {
        self.0.send(Message::Kill).map_err(|_| Finished)
    }
}

enum Reaper<C> {
    Thread(JoinHandle<io::Result<ExitStatus>>),
    Poll { child: C, interval: Duration },
}

struct ManagedProcess<C> {
    pid: u32,
    pgid: Pid,
    reaper: Reaper<C>,
}

pub struct ProcessController<L: Launcher = SystemLauncher> {
    cmd: Vec<String>,
    launcher: L,
    on_busy_update: OnBusyUpdate,
    exit_watch: ExitWatch,
    inbox: Receiver<Message>,
    sender: SyncSender<Message>,
    process: Option<ManagedProcess<L::Child>>,
    shutdown_requested: bool,
    pending_run: bool,
    subscribers: Vec<Sender<Transition>>,
    log: Logger,
}

impl ProcessController<SystemLauncher> {
    pub fn new(cmd: Vec<String>, log: Logger) -> Self {
        Self::with_launcher(cmd, SystemLauncher, log)
    }
}

impl<L: Launcher> ProcessController<L> {
    pub fn with_launcher(cmd: Vec<String>, launcher: L, log: Logger) -> Self {
        let (sender, inbox) = sync_channel(0);
        Self {
            cmd,
            launcher,
            on_busy_update: OnBusyUpdate::default(),
            exit_watch: ExitWatch::default(),
            inbox,
            sender,
            process: None,
            shutdown_requested: false,
            pending_run: false,
            subscribers: Vec::new(),
            log,
        }
    }

    pub fn on_busy_update(mut self, policy: OnBusyUpdate) -> Self {
        self.on_busy_update = policy;
        self
    }

    pub fn exit_watch(mut self, watch: ExitWatch) -> Self {
        self.exit_watch = watch;
        self
    }

    pub fn run_requests(&self) -> RunRequests {
        RunRequests(self.sender.clone())
    }

    pub fn kill_requests(&self) -> KillRequests {
        KillRequests(self.sender.clone())
    }

    /// Receive every [`Transition`] from now on.
    pub fn subscribe(&mut self) -> Receiver<Transition> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> ControllerState {
        ControllerState {
            has_active_process: self.process.is_some(),
            shutdown_requested: self.shutdown_requested,
        }
    }

    /// Run the control loop until shutdown.
    ///
    /// Returns once a kill request has been received and no process is left
    /// to reap. Spawn and wait failures end the loop early with an error.
    pub fn run(mut self) -> Result<()> {
        let outcome = self.drive();
        self.log.debug(format_args!("finished in {:?}", self.state()));
        self.notify(Transition::Finished);
        outcome
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            self.log.trace(format_args!("{:?}", self.state()));

            let poll_interval = match &self.process {
                None if self.shutdown_requested => return Ok(()),
                None if self.pending_run => {
                    self.pending_run = false;
                    self.spawn()?;
                    continue;
                }
                None => None,
                Some(ManagedProcess {
                    reaper: Reaper::Thread(_),
                    ..
                }) => None,
                Some(ManagedProcess {
                    reaper: Reaper::Poll { interval, .. },
                    ..
                }) => Some(*interval),
            };

            let message = match poll_interval {
                None => self.inbox.recv().ok(),
                Some(interval) => match self.inbox.recv_timeout(interval) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => {
                        self.poll_exit()?;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                },
            };

            // we hold a sender ourselves, so the inbox can't disconnect
            let message = match message {
                Some(message) => message,
                None => return Ok(()),
            };

            match (message, self.process.is_some()) {
                (Message::Run, false) => self.spawn()?,
                (Message::Run, true) => self.busy(),
                (Message::Kill, false) => {
                    self.log.debug(format_args!("shutdown requested while idle"));
                    self.shutdown_requested = true;
                }
                (Message::Kill, true) => self.escalate(),
                (Message::Exited, _) => self.collect()?,
            }
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let child = self.launcher.launch(&self.cmd).map_err(|source| Error::Spawn {
            cmd: self.cmd.clone(),
            source,
        })?;

        let pid = child.id();
        let pgid = process::group_of(pid);
        self.log
            .info(format_args!("running {:?} (pid {})", self.cmd.join(" "), pid));

        let reaper = match self.exit_watch {
            ExitWatch::Blocking => match self.watch_exit(child) {
                Ok(handle) => Reaper::Thread(handle),
                Err(err) => {
                    // without a reaper nothing would ever notice the exit
                    let _ = self
                        .launcher
                        .send_signal(process::whole_group(pgid), Signal::SIGKILL);
                    return Err(Error::Wait(err));
                }
            },
            ExitWatch::Poll(interval) => Reaper::Poll { child, interval },
        };

        self.process = Some(ManagedProcess { pid, pgid, reaper });
        self.notify(Transition::Spawned { pid });
        Ok(())
    }

    fn watch_exit(&self, mut child: L::Child) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
        let inbox = self.sender.clone();
        thread::Builder::new()
            .name(format!("reaper-{}", child.id()))
            .spawn(move || {
                let status = child.wait();
                // the loop is always listening while a process is active
                let _ = inbox.send(Message::Exited);
                status
            })
    }

    fn busy(&mut self) {
        match self.on_busy_update {
            OnBusyUpdate::DoNothing => {
                self.log
                    .debug(format_args!("command still running, dropping run request"));
                self.notify(Transition::Ignored);
            }
            OnBusyUpdate::Queue => {
                self.log
                    .debug(format_args!("command still running, will run again after it exits"));
                self.pending_run = true;
                self.notify(Transition::Queued);
            }
        }
    }

    fn escalate(&mut self) {
        let pgid = match &self.process {
            Some(process) => process.pgid,
            None => return,
        };

        let signal = if self.shutdown_requested {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };
        self.shutdown_requested = true;

        // With a reaper thread the leader may already be reaped, its Exited
        // still waiting on the inbox. The group is then either empty (ESRCH)
        // or holds stragglers that should get the signal anyway; a pgid is
        // not reused while any member is alive.
        let target = process::whole_group(pgid);
        match self.launcher.send_signal(target, signal) {
            Ok(()) => self
                .log
                .info(format_args!("sent {:?} to process group {}", signal, pgid)),
            Err(err) if err.raw_os_error() == Some(Errno::ESRCH as i32) => self.log.debug(
                format_args!("process group {} already gone, {:?} not sent", pgid, signal),
            ),
            Err(err) => self.log.warn(format_args!(
                "couldn't send {:?} to process group {}: {}",
                signal, pgid, err
            )),
        }

        self.notify(Transition::Signalled { target, signal });
    }

    fn collect(&mut self) -> Result<()> {
        match self.process.take() {
            Some(ManagedProcess {
                pid,
                reaper: Reaper::Thread(handle),
                ..
            }) => {
                let status = handle
                    .join()
                    .map_err(|_| Error::Panicked("reaper"))?
                    .map_err(Error::Wait)?;
                self.reaped(pid, status);
            }
            other => self.process = other,
        }

        Ok(())
    }

    fn poll_exit(&mut self) -> Result<()> {
        let exited = match &mut self.process {
            Some(ManagedProcess {
                pid,
                reaper: Reaper::Poll { child, .. },
                ..
            }) => child
                .try_wait()
                .map_err(Error::Wait)?
                .map(|status| (*pid, status)),
            _ => None,
        };

        if let Some((pid, status)) = exited {
            self.process = None;
            self.reaped(pid, status);
        }

        Ok(())
    }

    fn reaped(&mut self, pid: u32, status: ExitStatus) {
        self.log
            .info(format_args!("command {} (pid {})", process::describe(status), pid));

        if self.shutdown_requested && self.pending_run {
            self.log
                .debug(format_args!("shutting down, dropping queued run"));
            self.pending_run = false;
        }

        self.notify(Transition::Exited { pid, status });
    }

    fn notify(&mut self, transition: Transition) {
        self.subscribers.retain(|tx| tx.send(transition).is_ok());
    }
}
