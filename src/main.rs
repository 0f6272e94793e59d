use anyhow::Result;
use tracing::{error, info};

use adaptive_crawler::cli;
use adaptive_crawler::utils::{default_log_file, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();

    // Verbose runs keep a log file even when none is given
    let log_file = args.log_file.clone().or_else(|| args.verbose.then(default_log_file));
    init_logging(args.verbose, log_file)?;
    info!("Starting adaptive crawler v{}", env!("CARGO_PKG_VERSION"));

    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
