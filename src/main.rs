// src/main.rs

use wavedag::engine::RunOutcome;
use wavedag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("wavedag error: {err:?}");
        std::process::exit(RunOutcome::Failure.exit_code());
    }

    let outcome = match run(args).await {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("wavedag error: {err}");
            RunOutcome::from(&err)
        }
    };
    std::process::exit(outcome.exit_code());
}
