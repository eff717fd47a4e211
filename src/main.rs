use std::process::ExitCode;

use brushstack::{cli, logger};
use clap::Parser;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    logger::set_echo(args.verbose);

    // Session log (overwrites the previous one) unless the settings turn it off.
    let log_to_file = args.render_settings().map(|s| s.log_to_file).unwrap_or(true);
    if log_to_file {
        logger::init();
    }

    cli::run(args)
}
