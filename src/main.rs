mod cli;
mod copy;
mod daemon;
mod selection;
mod server;
mod source;
mod wayland;

use clap::Parser;
use cli::Cli;
use copy::CopyError;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = copy::run(cli) {
        tracing::debug!(error = ?e, "copy failed");
        eprint!("{}", diagnostic(&e));
        std::process::exit(1);
    }
}

/// Text printed to stderr for a fatal error.
fn diagnostic(e: &CopyError) -> String {
    match e {
        CopyError::Session(session) if session.is_configuration() => format!(
            "waypaste: {e}\nwaypaste: set WAYLAND_DISPLAY to the compositor's socket name\n"
        ),
        _ => format!("waypaste: {e}\n"),
    }
}
