use std::rc::Rc;

use clap::Parser;
use log::info;

use keepsake::{
    cli::CommonArgs,
    pipeline::Orchestrator,
    utils::{security::disable_core_dumps, SystemRunner},
    Result,
};

#[derive(Parser)]
#[command(
    name = "backup",
    version,
    author,
    about = "Back up a secrets source to object storage, encrypted to a GPG recipient.",
    long_about = r#"Back up a secrets source to object storage, encrypted to a GPG recipient.

The key-management file names the operator key and the sealed KMS credential
that unlock the encrypted configuration document. The configuration selects
the source (dav, vaultwarden, test), the destination and the recipient key.

Examples:
  # Use sops.yaml and keepsake.yaml from ./.mnt
  backup

  # Keep the key-management file elsewhere
  backup -k /run/secrets/sops.yaml -f /etc/keepsake/keepsake.yaml"#
)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    env_logger::builder().format_timestamp(None).init();
    disable_core_dumps();

    let args = Args::parse();

    let mut orchestrator = Orchestrator::new(Rc::new(SystemRunner), args.common.workspace());
    orchestrator.load_config(
        &args.common.key_management_file(),
        &args.common.config_file(),
    )?;
    let report = orchestrator.backup()?;

    for key in &report.uploaded {
        info!("{key}");
    }
    Ok(())
}
