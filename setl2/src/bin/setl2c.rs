use std::process;

use clap::Parser as ClapParser;
use setl2::{CompileCli, SUCCESS_EXIT, compile_files, init_logging};

fn main() {
    let cli = CompileCli::parse();
    init_logging(cli.common.verbose);

    match compile_files(&cli.common, &cli.files, Box::new(std::io::stdout())) {
        Ok(units) => {
            log::info!("{} unit(s) compiled", units.len());
            process::exit(SUCCESS_EXIT);
        }
        Err(err) => {
            eprintln!("setl2c: {err}");
            process::exit(err.exit_code());
        }
    }
}
