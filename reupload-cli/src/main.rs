mod cli;
mod commands;
mod error;
mod output;

use crate::{
    cli::{Args, Commands, OutputFormat},
    commands::CommandExecutor,
    error::Result,
    output::OutputManager,
};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use reupload::config::AppConfig;
use reupload::logging::{LoggingHandle, init_logging};
use reupload::services::ServiceContainer;
use std::io::IsTerminal;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let output_format = args.output;

    if let Err(e) = run(args).await {
        match output_format {
            OutputFormat::Json => {
                let error_json = serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                });
                println!("{}", error_json);
            }
            _ => {
                error!("Application error: {}", e);
                #[cfg(feature = "colored-output")]
                {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                }
                #[cfg(not(feature = "colored-output"))]
                {
                    eprintln!("Error: {}", e);
                }
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if let Commands::Completions { shell } = args.command {
        use clap::CommandFactory;
        use clap_complete::generate;

        let mut cmd = Args::command();
        let bin_name = cmd.get_name().to_string();
        generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }

    if let Commands::Config = args.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let _logging = setup_logging(&args, &config)?;

    let colored = !args.no_color && std::io::stdout().is_terminal();
    let output = OutputManager::new(colored, args.output);

    let container = ServiceContainer::new(config).await?;
    container.initialize().await?;
    let executor = CommandExecutor::new(container, output, args.output, args.quiet);

    let result = match args.command {
        Commands::Run(run_args) => executor.run(run_args).await,
        Commands::Destinations => executor.destinations().await,
        Commands::History {
            destination,
            since_hours,
            successes,
            limit,
        } => executor.history(destination, since_hours, successes, limit).await,
        Commands::Stats { destination } => executor.stats(destination).await,
        Commands::Tasks { status } => executor.tasks(status).await,
        Commands::Task { id } => executor.task(&id).await,
        Commands::ClearHistory { yes } => executor.clear_history(yes).await,
        Commands::Config | Commands::Completions { .. } => Ok(()),
    };

    executor.shutdown().await?;
    result
}

fn setup_logging(args: &Args, config: &AppConfig) -> Result<LoggingHandle> {
    let filter = if args.quiet {
        "error".to_string()
    } else if args.verbose {
        "reupload=debug,sqlx=warn".to_string()
    } else {
        config.log_filter.clone()
    };
    Ok(init_logging(&filter, config.log_dir.as_deref(), config.log_json)?)
}
