use clap::Parser;
use queue_steward_cli::{run_cli, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        // The subscriber may not be installed yet when configuration fails
        eprintln!("queue-steward: {}", e);
        std::process::exit(e.exit_code());
    }
}
