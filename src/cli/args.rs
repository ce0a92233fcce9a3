use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dashcast")]
#[command(version)]
#[command(
    about = "Keep a dashboard on an idle cast device while letting other apps take over"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Dashboard URL to display
    #[arg(long, env = "DASHBOARD_URL", global = true)]
    pub(crate) dashboard_url: Option<String>,

    /// Friendly name, id or alias of the cast device (first device found when empty)
    #[arg(long = "device", env = "DISPLAY_NAME", global = true)]
    pub(crate) device: Option<String>,

    /// Treat the device as active regardless of its input/standby reports
    #[arg(
        long,
        env = "IGNORE_CEC",
        global = true,
        value_parser = FalseyValueParser::new()
    )]
    pub(crate) ignore_input_signal: bool,

    /// Log debug output (RUST_LOG overrides)
    #[arg(short = 'v', long = "show-debug", global = true)]
    pub(crate) show_debug: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Keep the dashboard on the device until interrupted (default)
    Run,
    /// List cast devices on the local network
    List,
    /// Print the device's current status and the launch decision for it
    Status,
    /// Send a single dashboard launch command and exit
    Launch,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
