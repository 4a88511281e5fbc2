use clap::Parser;

mod cli;
mod coords;
mod nav;
mod segy;
mod survey;
mod tools;

fn main() {
    std::process::exit(cli::main(cli::Args::parse()));
}
