use anyhow::Result;
use console::style;
use kubeup::{Config, Kubeup};
use std::process::exit;

pub fn main() {
    if let Err(e) = run() {
        eprintln!(
            "{}{}{} {}",
            style("[").white().dim(),
            style("ERROR").red(),
            style("]").white().dim(),
            e.chain()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(": ")
        );
        exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments and an optional config file
    let config = Config::load()?;
    Kubeup::start(config)
}
