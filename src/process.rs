#![allow(unsafe_code)]

//! Starting and signalling the managed command.
//!
//! The controller only talks to processes through the [`Launcher`] and
//! [`Child`] traits; [`SystemLauncher`] is the real implementation.

use std::{
    convert::TryFrom,
    io,
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{self, Command, ExitStatus},
};

use nix::{
    sys::signal::{kill, SigSet, Signal},
    unistd::Pid,
};

/// A started process the controller can wait on.
pub trait Child: Send + 'static {
    fn id(&self) -> u32;

    /// Block until the process exits, then reap it.
    fn wait(&mut self) -> io::Result<ExitStatus>;

    /// Reap the process if it has exited, without blocking.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

impl Child for process::Child {
    fn id(&self) -> u32 {
        process::Child::id(self)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        process::Child::wait(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        process::Child::try_wait(self)
    }
}

pub trait Launcher: Send {
    type Child: Child;

    /// Start `cmd` as the leader of a new process group.
    fn launch(&mut self, cmd: &[String]) -> io::Result<Self::Child>;

    /// Deliver `signal` to `target`, with kill(2) semantics for negative pids.
    fn send_signal(&mut self, target: Pid, signal: Signal) -> io::Result<()>;
}

/// Spawns real processes, each in a process group of its own.
///
/// The command's stdin, stdout and stderr are inherited as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    type Child = process::Child;

    fn launch(&mut self, cmd: &[String]) -> io::Result<Self::Child> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "command is empty"))?;

        let mut command = Command::new(program);
        command.args(args).process_group(0);

        // watchrun blocks SIGINT and SIGTERM to receive them synchronously,
        // and exec(3) would pass that mask on to the command.
        unsafe {
            command.pre_exec(|| SigSet::empty().thread_set_mask().map_err(from_nix_error));
        }

        command.spawn()
    }

    fn send_signal(&mut self, target: Pid, signal: Signal) -> io::Result<()> {
        kill(target, signal).map_err(from_nix_error)
    }
}

/// Process group id for a child: its own pid, as set up by [`Launcher::launch`].
#[allow(clippy::cast_possible_wrap)]
pub fn group_of(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}

/// Signal target reaching every process in a group.
pub fn whole_group(pgid: Pid) -> Pid {
    Pid::from_raw(-pgid.as_raw())
}

/// Short human description of how a process ended.
pub fn describe(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with status {}", code),
        (None, Some(signal)) => match Signal::try_from(signal) {
            Ok(signal) => format!("was killed by {:?}", signal),
            Err(_) => format!("was killed by signal {}", signal),
        },
        (None, None) => "ended".into(),
    }
}

pub(crate) fn from_nix_error(err: nix::Error) -> io::Error {
    match err {
        nix::Error::Sys(errno) => io::Error::from_raw_os_error(errno as i32),
        nix::Error::InvalidPath => io::Error::new(io::ErrorKind::InvalidInput, err),
        _ => io::Error::new(io::ErrorKind::Other, err),
    }
}
