use std::process;

use watchrun::{cli, logging::Logger, run};

fn main() {
    let args = cli::get_args();
    let log = Logger::stderr(args.verbosity);

    if let Err(err) = run(args.config, log.clone()) {
        log.error(format_args!("{}", err));
        log.flush();
        process::exit(1);
    }
}
