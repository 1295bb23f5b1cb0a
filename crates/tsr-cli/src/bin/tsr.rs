use clap::Parser;

use tsr_cli::{trace, Cli, Driver};

fn main() {
    let cli = Cli::parse();
    trace::init(cli.verbose);
    let driver = Driver::new();
    std::process::exit(driver.dispatch(cli.command));
}
