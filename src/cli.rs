use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "waypaste",
    version,
    about = "Set the clipboard contents of Wayland applications"
)]
pub struct Cli {
    /// File to copy from (`-` for standard input)
    #[arg(default_value = "/dev/stdin")]
    pub source: PathBuf,

    /// Be louder
    #[arg(short, long)]
    pub verbose: bool,

    /// Detach into the background once the clipboard is claimed
    #[arg(short, long)]
    pub background: bool,

    /// Consecutive cancel events that mean another client took the clipboard
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub cancel_threshold: u32,
}
