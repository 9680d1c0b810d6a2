use std::process;

use clap::Parser as ClapParser;
use setl2::{RunCli, SUCCESS_EXIT, init_logging, run_program};

fn main() {
    let cli = RunCli::parse();
    init_logging(cli.common.verbose);

    if let Err(err) = run_program(&cli, Box::new(std::io::stdout())) {
        eprintln!("setl2: {err}");
        process::exit(err.exit_code());
    }
    process::exit(SUCCESS_EXIT);
}
