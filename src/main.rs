use clap::Parser;

mod cli;
mod error;
mod filters;
mod grid;
mod io;
mod keogram;
mod render;
mod tec;
mod tools;

const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");
const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
const PROGRAM_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

fn main() {
    let args = cli::Args::parse();

    let default_level = match args.quiet {
        true => "warn",
        false => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    std::process::exit(cli::main(args));
}
