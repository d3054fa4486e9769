use clap::Parser;
use pake::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.run() {
        e.print();
        std::process::exit(1);
    }
}
