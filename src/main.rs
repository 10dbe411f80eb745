// ttyrelay - Serial and TCP console relay
use std::process::ExitCode;

use clap::Parser;
use ttyrelay::cli::{execute_command, Args};

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ttyrelay: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // The terminal is restored by the time an error comes back.
    match runtime.block_on(execute_command(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ttyrelay: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
