use std::io;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;
use npkg_core::{Asset, Config, ErrorKind, Mirror, ServiceError, StorageLocation};

#[derive(Parser)]
#[command(name = "npkg", version, about = "Local npm package mirror and asset cache")]
struct NpkgCli {
    /// Storage root override (default: NPKG_STORAGE_PATH or ~/.npkg/storage)
    #[arg(long, global = true)]
    storage_path: Option<PathBuf>,

    /// Registry endpoint override (default: NPKG_REGISTRY_URL or the npm registry)
    #[arg(long, global = true)]
    registry_url: Option<String>,

    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[arg(long, global = true)]
    trace: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: NpkgCommand,
}

#[derive(Subcommand)]
enum NpkgCommand {
    /// Resolve a package's metadata from the upstream registry
    Info {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Download and install a package version into the mirror
    Install {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Remove a package and all of its installed versions
    Remove { name: String },
    /// Search the upstream registry by name fragment
    Search { fragment: String },
    /// List installed packages
    List {
        #[arg(long, default_value_t = 0)]
        skip: u64,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Show one package's summary and installed versions
    Detail { name: String },
    /// List component files inside one installed version
    Components { name: String, version: String },
    /// Print a file (or list a directory) from inside the storage root
    Asset { path: String },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = NpkgCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let config = build_config(&cli)?;
    let mirror = Mirror::open(&config)?;

    if let Err(err) = run(&mirror, &cli.command) {
        let code = err
            .downcast_ref::<ServiceError>()
            .map_or(2, exit_code);
        if !cli.quiet {
            eprintln!("error: {err}");
        }
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("npkg_core={level},npkg_domain={level},npkg_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_config(cli: &NpkgCli) -> Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(path) = &cli.storage_path {
        config.storage = StorageLocation {
            path: path.clone(),
            source: "--storage-path",
        };
    }
    if let Some(url) = &cli.registry_url {
        config.registry = npkg_core::RegistryEndpoint::parse(url, "--registry-url")?;
    }
    Ok(config)
}

fn run(mirror: &Mirror, command: &NpkgCommand) -> Result<()> {
    match command {
        NpkgCommand::Info { name, version } => emit(&mirror.info(name, version.as_deref())?),
        NpkgCommand::Install { name, version } => emit(&mirror.install(name, version.as_deref())?),
        NpkgCommand::Remove { name } => emit(&mirror.remove(name)?),
        NpkgCommand::Search { fragment } => emit(&mirror.search(fragment)?),
        NpkgCommand::List { skip, limit } => emit(&mirror.list(*skip, *limit)?),
        NpkgCommand::Detail { name } => emit(&mirror.package_detail(name)?),
        NpkgCommand::Components { name, version } => {
            emit(&mirror.package_version_detail(name, version)?)
        }
        NpkgCommand::Asset { path } => match mirror.read_asset(path)? {
            Asset::Directory { entries, .. } => emit(&entries),
            Asset::File { mut file, .. } => {
                let mut stdout = io::stdout().lock();
                io::copy(&mut file, &mut stdout)?;
                Ok(())
            }
        },
    }
}

fn emit<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(err: &ServiceError) -> i32 {
    match err.kind() {
        ErrorKind::InvalidInput | ErrorKind::NotFound => 1,
        ErrorKind::Transport | ErrorKind::Storage | ErrorKind::Internal => 2,
    }
}
