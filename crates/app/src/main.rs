use casket::cli::op::{Op, OpContext};
use casket::cli::{Args, Parser};
use casket::state::AppState;

/// Log level when no initialized config says otherwise. Logs go to stderr,
///  so anything chattier than warnings would bury command output.
const FALLBACK_LOG_LEVEL: tracing::Level = tracing::Level::WARN;

async fn run(args: Args) -> anyhow::Result<String> {
    let ctx = OpContext::new(args.config_path, args.realm).with_ticket(args.ticket);
    let output = args.command.execute(&ctx).await?;
    Ok(output.to_string())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let guards = match AppState::load(args.config_path.clone()) {
        Ok(state) => service::init_logging(
            state.config.log_level().unwrap_or(FALLBACK_LOG_LEVEL),
            state.config.log_dir.as_deref(),
        ),
        Err(_) => service::init_logging(FALLBACK_LOG_LEVEL, None),
    };

    let code = match run(args).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // flush buffered log lines before exiting
    drop(guards);
    std::process::exit(code);
}
