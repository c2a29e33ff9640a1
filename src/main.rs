use anyhow::Result;
use clap::Parser;
use debi::commands::{self, Options};
use std::path::PathBuf;
use std::process::ExitCode;

/// debi - Debian package installer
///
/// Install, reinstall and remove local .deb files through apt, checking
/// each package before it reaches the system.
///
/// Examples:
///   debi install ./foo_1.0_amd64.deb ./bar_2.1_all.deb
///   debi remove ./foo_1.0_amd64.deb
#[derive(Parser, Debug)]
#[command(author, version = env!("DEBI_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (also via DEBI_CONFIG)
    #[arg(long, env = "DEBI_CONFIG", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Accept this architecture instead of asking dpkg (repeatable)
    #[arg(long = "arch", value_name = "ARCH", global = true)]
    architectures: Vec<String>,

    /// Refuse packages without a valid signature
    #[arg(long, global = true)]
    require_signature: bool,

    /// Do not ask for confirmation
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    /// Print events and results as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install package files in order
    Install(FilesArgs),

    /// Install an already installed version again
    Reinstall(FileArgs),

    /// Remove the package a file installs
    Remove(FileArgs),

    /// Check package files without installing them
    Inspect(FilesArgs),
}

#[derive(clap::Args, Debug)]
pub struct FilesArgs {
    /// Package files (.deb)
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct FileArgs {
    /// Package file (.deb)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            config: self.config.clone(),
            architectures: self.architectures.clone(),
            require_signature: self.require_signature,
            yes: self.yes,
            json: self.json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let options = cli.options();
    let runtime = debi::runtime::RealRuntime;

    let succeeded = match &cli.command {
        Commands::Install(args) => commands::install(runtime, &args.files, &options).await?,
        Commands::Reinstall(args) => commands::reinstall(runtime, &args.file, &options).await?,
        Commands::Remove(args) => commands::remove(runtime, &args.file, &options).await?,
        Commands::Inspect(args) => commands::inspect(runtime, &args.files, &options).await?,
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
