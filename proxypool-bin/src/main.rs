extern crate proxypool_lib as proxypool;

use clap::Parser;
use proxypool::TokioRuntime;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, value_name = "DIRECTORY")]
    directory: Option<PathBuf>,

    #[clap(
        short,
        long,
        value_parser,
        value_name = "FILE",
        default_value = "config.yaml"
    )]
    config: PathBuf,

    /// Validate the config and exit
    #[clap(short, long, action)]
    test: bool,

    #[clap(short, long, value_parser, value_name = "FILE")]
    log_file: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let cwd = match &cli.directory {
        Some(d) => d.clone(),
        None => match std::env::current_dir() {
            Ok(d) => d,
            Err(e) => proxypool::print_and_exit!("failed to get current dir: {e}"),
        },
    };
    let file = cwd.join(&cli.config).to_string_lossy().to_string();

    if !Path::new(&file).exists() {
        proxypool::print_and_exit!("config file not found: {file}");
    }

    let cwd = cwd.to_string_lossy().to_string();

    if cli.test {
        match proxypool::test_config(proxypool::Config::File(file.clone()), Some(cwd)) {
            Ok(config) => {
                println!(
                    "config file {file} is valid, {} providers",
                    config.providers.len()
                );
                std::process::exit(0);
            }
            Err(e) => proxypool::print_and_exit!("config file {file} is invalid: {e}"),
        }
    }

    if let Err(e) = proxypool::start_scaffold(proxypool::Options {
        config: proxypool::Config::File(file),
        cwd: Some(cwd),
        rt: Some(TokioRuntime::MultiThread),
        log_file: cli.log_file,
    }) {
        proxypool::print_and_exit!("{e}");
    }
}
