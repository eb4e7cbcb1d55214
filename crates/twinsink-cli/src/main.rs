//! 🚀 twinsink-cli — the front door, the bouncer, the maitre d' of twinsink.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up
//! logging, and then lets the real code do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🎛️ Race a row-insert path against a streaming-append path with the same messages.
#[derive(Debug, Parser)]
#[command(name = "twinsink", version, about)]
struct Cli {
    /// 🔧 TOML config file. Without one, `TWINSINK_*` env vars and defaults are used.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    if let Some(path) = &cli.config {
        let exists = path.try_exists().context(format!(
            "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
             pwd/cwd may not be what you think; an absolute path removes the guesswork. \
             Was checking here: '{}'",
            path.display()
        ))?;
        if !exists {
            error!(
                "💀 Configuration file '{}' does not exist. Double check the path.",
                path.display()
            );
            std::process::exit(1);
        }
    }

    let app_config = twinsink::app_config::load_config(cli.config.as_deref()).context(
        "💀 In twinsink-cli, main, we couldn't load the configuration. Take a look at the file \
         and the TWINSINK_* environment, and make sure you didn't forget something obvious",
    )?;

    match twinsink::run(app_config).await {
        Ok(report) => {
            info!("🏆 final comparison:\n{}", report);
            Ok(())
        }
        Err(err) => {
            error!("💀 the race was called off: {}", err);
            let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
            for (depth, cause) in causes.iter().enumerate() {
                error!("   ↳ [{}] {}", depth + 1, cause);
            }
            if causes.iter().any(|cause| looks_unreachable(cause)) {
                error!(
                    "📡 at least one sink never answered the phone. Is something listening \
                     behind [row_insert.BigQuery] url or [streaming_append.Http] url?"
                );
            }
            std::process::exit(1);
        }
    }
}

/// 📡 Transport failures that mean "nobody is there", not "somebody said no".
fn looks_unreachable(cause: &str) -> bool {
    let cause = cause.to_ascii_lowercase();
    ["connection refused", "tcp connect error", "dns error", "error sending request"]
        .iter()
        .any(|needle| cause.contains(needle))
}
