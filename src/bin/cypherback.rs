use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use zeroize::Zeroize;

use cypherback::backend::Backend;
use cypherback::tools::tty;
use cypherback::{config, process_path, restore, BackupSet, FileBackend, Keyring, S3Backend};

#[derive(Parser)]
#[command(name = "cypherback", version, about = "Encrypted, deduplicating backups")]
struct Cli {
    /// Local object store directory (default: ~/.cypherback). Ignored when
    /// S3_ENDPOINT is set in the environment.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Keyring management
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
    /// Create a new backup run, or append to the backup set TAG
    Backup {
        tag: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List the contents of backup set TAG
    List { tag: String },
    /// Restore backup set TAG
    Restore {
        tag: String,
        /// Directory the restored tree is rooted under
        #[arg(long, default_value = ".")]
        target: PathBuf,
    },
}

#[derive(Subcommand)]
enum SecretsCommand {
    /// Generate, wrap and store a new keyring
    Generate,
}

fn open_backend(store: Option<PathBuf>) -> anyhow::Result<Box<dyn Backend>> {
    if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
        let access = std::env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY is not set")?;
        let secret = std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY is not set")?;
        let bucket =
            std::env::var("S3_BUCKET").unwrap_or_else(|_| "cypherback-default".to_string());
        return Ok(Box::new(S3Backend::new(access, secret, endpoint, bucket)));
    }

    let root = match store {
        Some(root) => root,
        None => config::ensure_config_dir()?,
    };
    Ok(Box::new(FileBackend::new(root)))
}

fn load_keyring(backend: &dyn Backend) -> anyhow::Result<Keyring> {
    let blob = backend.read_secrets()?;
    let mut passphrase = tty::read_password("Enter passphrase: ")?;
    let keyring = Keyring::unwrap(&blob, &passphrase);
    passphrase.zeroize();
    Ok(keyring?)
}

fn secrets_generate(backend: &dyn Backend) -> anyhow::Result<()> {
    let mut passphrase =
        tty::read_password_confirm("Enter passphrase: ", "Repeat passphrase: ")?;
    let keyring = Keyring::generate()?;
    let blob = keyring.wrap(&passphrase);
    passphrase.zeroize();
    backend.write_secrets(&keyring.hex_id()?, &blob?)?;
    println!("generated keyring {}", keyring.hex_id()?);
    Ok(())
}

fn backup(backend: &dyn Backend, tag: &str, paths: &[PathBuf]) -> anyhow::Result<()> {
    let keyring = load_keyring(backend)?;
    let mut set = BackupSet::ensure(&keyring, backend, tag)?;

    set.start_backup()?;
    let mut failed = false;
    for path in paths {
        if let Err(err) = process_path(&mut set, path) {
            log::error!("{err}");
            failed = true;
        }
    }
    set.end_backup()?;
    set.write(backend)?;

    if failed {
        bail!("backup of {tag} completed with errors");
    }
    Ok(())
}

fn list(backend: &dyn Backend, tag: &str) -> anyhow::Result<()> {
    let keyring = load_keyring(backend)?;
    let set = BackupSet::ensure(&keyring, backend, tag)?;
    for record in set.records() {
        println!("{}", describe(record));
    }
    Ok(())
}

fn describe(record: &cypherback::Record) -> String {
    use cypherback::Record::*;
    match record {
        Start { timestamp, length } => format!("run started at {timestamp} ({length} bytes)"),
        End { .. } => "run end".to_string(),
        HardLink { name, target } => format!("h {name} -> {target}"),
        Directory { info } => format!("d {}", info.name),
        RegularFile { info, size, chunks } => {
            format!("f {} ({size} bytes, {} chunks)", info.name, chunks.len())
        }
        Fifo { info } => format!("p {}", info.name),
        Symlink { info, target } => format!("l {} -> {target}", info.name),
        CharDevice { info, rdev } => format!("c {} ({rdev:#x})", info.name),
        BlockDevice { info, rdev } => format!("b {} ({rdev:#x})", info.name),
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let backend = open_backend(cli.store.clone())?;

    match &cli.command {
        Command::Secrets {
            command: SecretsCommand::Generate,
        } => secrets_generate(backend.as_ref()),
        Command::Backup { tag, paths } => backup(backend.as_ref(), tag, paths),
        Command::List { tag } => list(backend.as_ref(), tag),
        Command::Restore { tag, target } => {
            let keyring = load_keyring(backend.as_ref())?;
            let set = BackupSet::ensure(&keyring, backend.as_ref(), tag)?;
            restore(&set, backend.as_ref(), target)?;
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
