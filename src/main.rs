use coral_client::cli::Cli;
use coral_client::config::Config;
use coral_client::error::AppError;
use coral_client::telemetry::{init_telemetry, TelemetryConfig};
use coral_client::{RedisClient, TcpDriver};
use std::process::ExitCode;
use tracing::debug;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String, AppError> {
    init_telemetry(TelemetryConfig {
        log_level: cli.log_level().to_string(),
        ..TelemetryConfig::default()
    })?;

    let config = Config::from_sources(cli)?;
    debug!("Using {:?}", config);

    let mut client = RedisClient::new(TcpDriver::new());
    config.configure(&mut client)?;

    Ok(cli.command.execute(&mut client)?)
}
