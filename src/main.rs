use clap::Parser;
use tracing_subscriber::EnvFilter;

use ledgr::cli::{self, Cli, Commands};
use ledgr::settings::SyncOverrides;

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Sync {
            dir,
            sender,
            subject,
            since,
            last,
        } => cli::sync::run(SyncOverrides {
            dir,
            sender,
            subject,
            since,
            last,
        }),
        Commands::List { from, to } => cli::list::run(from, to),
        Commands::Categorize { id, category } => cli::categorize::run(id, &category),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
