use std::{error::Error as StdError, fmt, io};

pub type Result<T> = ::std::result::Result<T, Error>;

pub enum Error {
    /// The command could not be started. Fatal: a broken argv won't start later either.
    Spawn { cmd: Vec<String>, source: io::Error },
    /// Waiting on the managed process failed, so its handle is unusable.
    Wait(io::Error),
    /// The filesystem watch backend could not be created.
    Watch(notify::Error),
    /// Termination signals could not be masked or received.
    Signal(nix::Error),
    Glob(globset::Error),
    Io(io::Error),
    /// An internal thread died without reporting back.
    Panicked(&'static str),
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Spawn { source, .. } => Some(source),
            Error::Wait(err) | Error::Io(err) => Some(err),
            Error::Watch(err) => Some(err),
            Error::Signal(err) => Some(err),
            Error::Glob(err) => Some(err),
            Error::Panicked(_) => None,
        }
    }
}

impl From<globset::Error> for Error {
    fn from(err: globset::Error) -> Self {
        Error::Glob(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        match err {
            notify::Error::Io(err) => Error::Io(err),
            other => Error::Watch(other),
        }
    }
}

impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Error::Signal(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} error: {}",
            match self {
                Error::Spawn { .. } => "Spawn",
                Error::Wait(_) => "Wait",
                Error::Watch(_) => "Watch",
                Error::Signal(_) => "Signal",
                Error::Glob(_) => "Globset",
                Error::Io(_) => "I/O",
                Error::Panicked(_) => "Thread",
            },
            match self {
                Error::Spawn { cmd, source } => {
                    format!("couldn't start {:?}: {}", cmd.join(" "), source)
                }
                Error::Wait(err) => format!("lost track of the running command: {}", err),
                Error::Watch(err) => err.to_string(),
                Error::Signal(err) => err.to_string(),
                Error::Glob(err) => err.to_string(),
                Error::Io(err) => err.to_string(),
                Error::Panicked(name) => format!("{} thread panicked", name),
            }
        )
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
