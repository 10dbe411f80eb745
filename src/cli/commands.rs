use crate::cli::args::{Args, Command, ConfigCommand};
use crate::core::display::{Display, HighCharTable};
use crate::core::keymap::KeyMapper;
use crate::core::relay::Relay;
use crate::core::telnet::TelnetEngine;
use crate::domain::config::{RelayConfig, TelnetMode};
use crate::domain::error::{RelayError, RelayResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::connection::{ConnectionManager, SystemConnector, TargetSpec};
use crate::infrastructure::console::{console_input, ConsoleWriter, TerminalGuard};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::tee::open_tee;
use std::io::{BufWriter, Write};
use tracing::info;

/// Execute CLI command
pub async fn execute_command(args: Args) -> RelayResult<()> {
    let config_manager = match &args.config {
        Some(path) => ConfigManager::with_file(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = config_manager.load_config()?;
    args.relay.apply(&mut config);

    setup_logging(&config, &args)?;

    match args.command {
        Some(Command::Config(config_args)) => {
            execute_config_command(config_args.command, &config, &config_manager)
        }
        None => {
            let target = args.target.ok_or_else(|| RelayError::Config {
                message: "No target given, expected /dev/ttyX or host:port".to_string(),
            })?;
            run_relay(&target, config).await
        }
    }
}

/// Connect the console to `target` until the user quits.
pub async fn run_relay(target: &str, config: RelayConfig) -> RelayResult<()> {
    let target: TargetSpec = target.parse()?;
    let table = config
        .display
        .encoding
        .as_deref()
        .map(HighCharTable::from_name)
        .transpose()?;
    let tee = match &config.display.tee_file {
        Some(path) => Some(Box::new(open_tee(path)?) as Box<dyn Write>),
        None => None,
    };

    let telnet = match config.telnet.mode {
        TelnetMode::Off => None,
        mode => {
            let terminal_type = config
                .telnet
                .terminal_type
                .clone()
                .unwrap_or_else(TelnetEngine::terminal_type_from_env);
            Some(TelnetEngine::new(mode == TelnetMode::Binary, Some(terminal_type)))
        }
    };

    // Save the console settings before anything touches its flags.
    let guard = TerminalGuard::acquire()?;
    let console = console_input()?;
    let display = Display::new(BufWriter::new(ConsoleWriter::stdout()?))
        .with_timestamps(config.display.timestamps)
        .with_hex(config.display.hex)
        .with_table(table)
        .with_tee(tee);

    info!("relaying {} with telnet {:?}", target, config.telnet.mode);
    let connections = ConnectionManager::new(
        SystemConnector::new(config.serial.clone()),
        target,
        &config.connection,
    );
    let mut relay = Relay::new(console, display, guard, connections)
        .with_keys(KeyMapper::new(&config.keys))
        .with_telnet(telnet, config.telnet.naws);

    relay.run().await
}

fn execute_config_command(
    command: ConfigCommand,
    config: &RelayConfig,
    config_manager: &ConfigManager,
) -> RelayResult<()> {
    match command {
        ConfigCommand::Show => {
            let content = toml::to_string_pretty(config).map_err(|e| RelayError::Config {
                message: format!("Failed to serialize config: {}", e),
            })?;
            print!("{}", content);
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            match file {
                Some(path) => {
                    config_manager.load_config_from_path(&path)?;
                    println!("Configuration file '{}' is valid", path.display());
                }
                None => {
                    config_manager.load_config()?;
                    println!("Current configuration is valid");
                }
            }
            Ok(())
        }
        ConfigCommand::Init { output, global } => {
            let written = if global {
                config_manager.init_global_config()?
            } else {
                let dir = match output {
                    Some(dir) => dir,
                    None => std::env::current_dir().map_err(|e| RelayError::Config {
                        message: format!("Failed to get current directory: {}", e),
                    })?,
                };
                config_manager.init_project_config(&dir)?
            };
            println!("Configuration initialized at '{}'", written.display());
            Ok(())
        }
    }
}

fn setup_logging(config: &RelayConfig, args: &Args) -> RelayResult<()> {
    let level = if args.verbose {
        "debug"
    } else {
        config.global.log_level.as_str()
    };
    let log_file = args.log_file.as_ref().or(config.global.log_file.as_ref());

    init_logging(level, log_file.map(|path| path.as_path()))
}
