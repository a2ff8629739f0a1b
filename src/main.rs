//! TDAD CLI entry point.

use clap::Parser;

use tdad::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = tdad::cli::run(cli).await {
        tdad::cli::handle_error(err, json);
    }
}
