//! tfbridge CLI — bridge deploy-time values into embedded Terraform stacks.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "tfbridge",
    version,
    about = "Synthesize CloudFormation-style stacks that embed a Terraform stack and share deploy-time values with it"
)]
struct Cli {
    #[command(subcommand)]
    command: tfbridge::cli::Commands,
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = tfbridge::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
