use std::{path::PathBuf, rc::Rc};

use clap::{Parser, Subcommand};

use keepsake::{
    cli::CommonArgs,
    destination::{BackupDestination, RunTimestamp},
    keepsake_error,
    pipeline::Orchestrator,
    utils::{security::disable_core_dumps, SystemRunner},
    Result,
};

#[derive(Parser)]
#[command(
    name = "fetch",
    version,
    author,
    about = "List or download backup artifacts from the configured destination.",
    long_about = r#"List or download backup artifacts from the configured destination.

Artifacts stay GPG encrypted; decrypt them with the recipient's private key.

Examples:
  # List every vault backup
  fetch list vaultwarden

  # Download one artifact
  fetch get vaultwarden/20240101-020000/vaultwarden-backup.kdbx.gpg ./restore.kdbx.gpg"#
)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored keys of a collection (dav, vaultwarden, test).
    List { collection: String },
    /// Download one object.
    Get { key: String, output: PathBuf },
}

fn main() -> Result<()> {
    env_logger::builder().format_timestamp(None).init();
    disable_core_dumps();

    let args = Args::parse();
    let workspace = args.common.workspace();

    let mut orchestrator = Orchestrator::new(Rc::new(SystemRunner), workspace.clone());
    orchestrator.load_config(
        &args.common.key_management_file(),
        &args.common.config_file(),
    )?;
    let config = orchestrator.config().ok_or_else(|| {
        keepsake_error!(InvalidParameter {
            description: "configuration not loaded".to_string(),
        })
    })?;

    let mut destination = BackupDestination::from_config(
        &config.dst,
        workspace.conf_dir(),
        workspace.backup_dir().to_path_buf(),
        RunTimestamp::now(),
    )?;

    match &args.command {
        Command::List { collection } => {
            for key in destination.list_backups(collection)? {
                println!("{key}");
            }
        }
        Command::Get { key, output } => destination.download_file(key, output)?,
    }
    Ok(())
}
