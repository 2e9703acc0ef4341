use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "weft", version, about)]
pub struct Cli {
    /// Write logs here instead of the default data directory.
    #[arg(long, global = true, env = "WEFT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a module in a hosting process and reload its styles on change.
    Serve(ServeArgs),
    /// Print the bootstrap page a module would be started from.
    Bootstrap(BootstrapArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Directory containing `module.toml`.
    pub module: PathBuf,

    /// Command that runs the hosting process.
    #[arg(long, env = "WEFT_HOST")]
    pub host: String,

    /// Extra arguments passed to the hosting process.
    #[arg(long = "host-arg")]
    pub host_args: Vec<String>,

    /// Runtime configuration file; embedded defaults otherwise.
    #[arg(long, env = "WEFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pause between stylesheet checks.
    #[arg(long, default_value_t = 500)]
    pub refresh_ms: u64,
}

#[derive(Debug, Args)]
pub struct BootstrapArgs {
    /// Directory containing `module.toml`.
    pub module: PathBuf,

    /// URL prefix the page is rendered for.
    #[arg(long, default_value = "/0/")]
    pub module_base: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve() {
        let cli = Cli::parse_from([
            "weft",
            "serve",
            "app",
            "--host",
            "node",
            "--host-arg",
            "host.js",
            "--refresh-ms",
            "100",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.module, PathBuf::from("app"));
        assert_eq!(args.host, "node");
        assert_eq!(args.host_args, ["host.js"]);
        assert_eq!(args.refresh_ms, 100);
    }

    #[test]
    fn bootstrap_defaults_to_first_prefix() {
        let cli = Cli::parse_from(["weft", "bootstrap", "app"]);
        let Command::Bootstrap(args) = cli.command else {
            panic!("expected bootstrap");
        };
        assert_eq!(args.module_base, "/0/");
    }
}
