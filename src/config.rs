//! Configuration for watchrun.
//!
//! The [`Config`] struct is not constructable, use [`ConfigBuilder`].
//!
//! # Examples
//!
//! ```
//! # use watchrun::config::ConfigBuilder;
//! ConfigBuilder::default()
//!     .cmd(vec!["cargo".into(), "test".into()])
//!     .build()
//!     .expect("mission failed");
//! ```

use std::{path::PathBuf, time::Duration};

use crate::controller::{ExitWatch, OnBusyUpdate};
use crate::filter::DEFAULT_IGNORES;

/// Arguments to the watcher
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
#[builder(build_fn(validate = "Self::validate"))]
#[non_exhaustive]
pub struct Config {
    /// Command to execute in popen3 format (first program, rest arguments).
    pub cmd: Vec<String>,
    /// Root of the tree to watch.
    #[builder(default = "PathBuf::from(\".\")")]
    pub root: PathBuf,
    /// Globs for paths to leave unwatched. See [`IgnoreFilter`][crate::filter::IgnoreFilter].
    #[builder(default = "default_ignores()")]
    pub ignores: Vec<String>,
    /// What to do with changes while the command is running.
    #[builder(default)]
    pub on_busy_update: OnBusyUpdate,
    /// How exits of the command are noticed.
    #[builder(default)]
    pub exit_watch: ExitWatch,
    /// Changes closer together than this trigger a single run.
    #[builder(default = "Duration::from_millis(100)")]
    pub debounce: Duration,
    /// Run the command right after starting instead of waiting for a change.
    #[builder(default)]
    pub run_initially: bool,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.cmd.as_ref().map_or(true, Vec::is_empty) {
            return Err("cmd must not be empty".into());
        }

        if let Some(ExitWatch::Poll(interval)) = self.exit_watch {
            if interval == Duration::from_secs(0) {
                return Err("exit poll interval must not be zero".into());
            }
        }

        Ok(())
    }
}

fn default_ignores() -> Vec<String> {
    DEFAULT_IGNORES.iter().map(|s| (*s).to_string()).collect()
}
