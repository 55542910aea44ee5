//! Watchrun: the library
//!
//! Re-runs a command whenever files under a directory change. The binary is
//! a thin shell around [`run`]; the pieces it wires together are usable on
//! their own:
//!
//! - [`controller::ProcessController`] owns the command's lifecycle: at most
//!   one instance at a time, in its own process group, with SIGTERM then
//!   SIGKILL on shutdown.
//! - [`watcher::ChangeSource`] yields changed paths until cancelled.
//! - [`signal`] turns SIGINT/SIGTERM into cancellation and kill requests.

#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::default_trait_access,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

#[cfg(not(unix))]
compile_error!("watchrun relies on process groups and sigwait, and only supports unix");

#[macro_use]
extern crate clap;
#[macro_use]
extern crate derive_builder;

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod logging;
pub mod process;
pub mod run;
pub mod signal;
pub mod watcher;

pub use run::run;
