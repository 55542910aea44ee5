use std::{env, ffi::OsString, path::PathBuf, time::Duration};

use clap::{App, AppSettings, Arg, Error, ErrorKind};

use crate::config::{Config, ConfigBuilder};
use crate::controller::{ExitWatch, OnBusyUpdate};
use crate::filter::DEFAULT_IGNORES;

#[derive(Debug)]
pub struct Args {
    pub config: Config,
    /// Number of `-v` flags given.
    pub verbosity: u64,
}

pub fn get_args() -> Args {
    get_args_from(env::args_os()).unwrap_or_else(|e| e.exit())
}

pub fn get_args_from<I, T>(from: I) -> clap::Result<Args>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = App::new("watchrun")
        .version(crate_version!())
        .about("Re-run a command when files in a directory tree change")
        .setting(AppSettings::TrailingVarArg)
        .arg(Arg::with_name("command")
                 .help("Command to run, with its arguments")
                 .multiple(true)
                 .required(true))
        .arg(Arg::with_name("verbose")
                 .help("Print diagnostics to stderr, repeat for more")
                 .short("v")
                 .long("verbose")
                 .multiple(true))
        .arg(Arg::with_name("path")
                 .help("Directory to watch [default: .]")
                 .short("w")
                 .long("watch")
                 .takes_value(true)
                 .value_name("path"))
        .arg(Arg::with_name("ignore")
                 .help("Leave paths matching the pattern unwatched")
                 .short("i")
                 .long("ignore")
                 .number_of_values(1)
                 .multiple(true)
                 .takes_value(true)
                 .value_name("pattern"))
        .arg(Arg::with_name("no-default-ignore")
                 .help("Skip the built-in ignores (.git, _build)")
                 .long("no-default-ignore"))
        .arg(Arg::with_name("on-busy-update")
                 .help("What to do with changes while the command is still running")
                 .long("on-busy-update")
                 .takes_value(true)
                 .possible_values(&["do-nothing", "queue"])
                 .value_name("policy"))
        .arg(Arg::with_name("poll-exit")
                 .help("Poll for the command's exit every N ms instead of waiting on it")
                 .long("poll-exit")
                 .takes_value(true)
                 .value_name("milliseconds"))
        .arg(Arg::with_name("debounce")
                 .help("Coalesce changes arriving within N ms into one run, defaults to 100ms")
                 .short("d")
                 .long("debounce")
                 .takes_value(true)
                 .value_name("milliseconds"))
        .arg(Arg::with_name("run-initially")
                 .help("Run the command once at startup, before any change")
                 .long("run-initially"))
        .get_matches_from_safe(from)?;

    let cmd = values_t!(args.values_of("command"), String)?;

    let mut ignores = vec![];
    if !args.is_present("no-default-ignore") {
        ignores.extend(DEFAULT_IGNORES.iter().map(|s| (*s).to_string()));
    }
    if args.is_present("ignore") {
        ignores.extend(values_t!(args.values_of("ignore"), String)?);
    }

    let mut builder = ConfigBuilder::default();
    builder
        .cmd(cmd)
        .ignores(ignores)
        .run_initially(args.is_present("run-initially"));

    if let Some(path) = args.value_of_os("path") {
        builder.root(PathBuf::from(path));
    }

    if args.is_present("on-busy-update") {
        builder.on_busy_update(value_t!(args.value_of("on-busy-update"), OnBusyUpdate)?);
    }

    if args.is_present("poll-exit") {
        let interval = value_t!(args.value_of("poll-exit"), u64)?;
        builder.exit_watch(ExitWatch::Poll(Duration::from_millis(interval)));
    }

    if args.is_present("debounce") {
        let debounce = value_t!(args.value_of("debounce"), u64)?;
        builder.debounce(Duration::from_millis(debounce));
    }

    let config = builder
        .build()
        .map_err(|msg| Error::with_description(&msg, ErrorKind::ValueValidation))?;

    Ok(Args {
        config,
        verbosity: args.occurrences_of("verbose"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> clap::Result<Args> {
        get_args_from(argv.iter().copied())
    }

    #[test]
    fn command_takes_the_trailing_arguments() {
        let args = parse(&["watchrun", "-vv", "--", "cargo", "test", "--lib"]).unwrap();

        assert_eq!(args.config.cmd, vec!["cargo", "test", "--lib"]);
        assert_eq!(args.verbosity, 2);
    }

    #[test]
    fn flags_after_the_command_belong_to_it() {
        let args = parse(&["watchrun", "make", "-j4", "-v"]).unwrap();

        assert_eq!(args.config.cmd, vec!["make", "-j4", "-v"]);
        assert_eq!(args.verbosity, 0);
    }

    #[test]
    fn defaults_keep_the_core_behaviour() {
        let args = parse(&["watchrun", "make"]).unwrap();

        assert_eq!(args.config.root, PathBuf::from("."));
        assert_eq!(args.config.ignores, vec![".git", "_build"]);
        assert_eq!(args.config.on_busy_update, OnBusyUpdate::DoNothing);
        assert_eq!(args.config.exit_watch, ExitWatch::Blocking);
        assert_eq!(args.config.debounce, Duration::from_millis(100));
        assert!(!args.config.run_initially);
    }

    #[test]
    fn ignores_add_to_the_defaults() {
        let args = parse(&["watchrun", "-i", "*.log", "-i", "target", "make"]).unwrap();
        assert_eq!(args.config.ignores, vec![".git", "_build", "*.log", "target"]);

        let args = parse(&["watchrun", "--no-default-ignore", "-i", "tmp", "make"]).unwrap();
        assert_eq!(args.config.ignores, vec!["tmp"]);
    }

    #[test]
    fn tuning_flags_reach_the_config() {
        let args = parse(&[
            "watchrun",
            "-w",
            "/srv/app",
            "--on-busy-update",
            "queue",
            "--poll-exit",
            "5",
            "-d",
            "250",
            "--run-initially",
            "make",
        ])
        .unwrap();

        assert_eq!(args.config.root, PathBuf::from("/srv/app"));
        assert_eq!(args.config.on_busy_update, OnBusyUpdate::Queue);
        assert_eq!(
            args.config.exit_watch,
            ExitWatch::Poll(Duration::from_millis(5))
        );
        assert_eq!(args.config.debounce, Duration::from_millis(250));
        assert!(args.config.run_initially);
    }

    #[test]
    fn command_is_required() {
        let err = parse(&["watchrun", "-v"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn zero_poll_interval_is_refused() {
        let err = parse(&["watchrun", "--poll-exit", "0", "make"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueValidation);
    }

    #[test]
    fn unknown_policy_is_refused() {
        let err = parse(&["watchrun", "--on-busy-update", "restart", "make"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidValue);
    }
}
