use clap::Parser;
use weft_bin::{
    cli::{Cli, Command},
    commands,
};
use weft_log::LogConfig;

fn main() {
    let cli = Cli::parse();

    let _log = weft_log::init(LogConfig {
        log_file_path: cli.log_file.clone(),
    })
    .unwrap_or_else(|e| {
        eprintln!("Error: Failed to initialize logging: {e}");
        std::process::exit(1);
    });

    let result = match cli.command {
        Command::Serve(args) => commands::serve::handle(args),
        Command::Bootstrap(args) => commands::bootstrap::handle(args),
    };

    if let Err(e) = result {
        eprintln!("Command failed: {e:#}");
        std::process::exit(1);
    }
}
