use std::{
    io::{self, Read},
    path::PathBuf,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::Parser;
use zeroize::Zeroizing;

use keepsake::{
    keepsake_error,
    utils::{fs::write_private_file, security::disable_core_dumps, UmaskGuard},
    OperatorKey, Result, ResultExt,
};

#[derive(Parser)]
#[command(
    name = "seal-secret",
    version,
    author,
    about = "Generate an operator key or seal a secret with it.",
    long_about = r#"Generate an operator key or seal a secret with it.

The sealed token goes into the key-management file (gcp_svc_key). By default
the secret read from stdin is base64 encoded before sealing, which is the form
the KMS credential is expected in.

Tokens are AES-256-GCM (nonce, ciphertext and tag, URL-safe base64). Fernet
tokens made by older tooling are not accepted: seal the secret again with
this tool and replace gcp_svc_key.

Examples:
  # Create a new operator key
  seal-secret --generate operator.key

  # Seal a service account key
  seal-secret -k operator.key < service-account.json"#
)]
struct Args {
    /// Write a freshly generated operator key to this path.
    #[arg(short = 'g', long = "generate", conflicts_with = "key_file")]
    generate: Option<PathBuf>,

    /// Operator key used to seal stdin.
    #[arg(short = 'k', long = "key-file", required_unless_present = "generate")]
    key_file: Option<PathBuf>,

    /// Seal stdin as is instead of base64 encoding it first.
    #[arg(long = "raw", default_value_t = false)]
    raw: bool,
}

fn main() -> Result<()> {
    env_logger::builder().format_timestamp(None).init();
    disable_core_dumps();

    let args = Args::parse();

    if let Some(path) = &args.generate {
        let key = OperatorKey::generate();
        let _umask = UmaskGuard::private();
        let line = Zeroizing::new(format!("{}\n", key.encode().as_str()));
        write_private_file(path, line.as_bytes())?;
        eprintln!("Wrote operator key to {}", path.display());
        return Ok(());
    }

    let key_file = args.key_file.as_ref().ok_or_else(|| {
        keepsake_error!(InvalidParameter {
            description: "--key-file is required to seal a secret".to_string(),
        })
    })?;
    let key = OperatorKey::load(key_file)?;

    let mut secret = Zeroizing::new(Vec::new());
    io::stdin()
        .read_to_end(&mut secret)
        .context("Reading secret from stdin failed".to_string())?;
    if secret.is_empty() {
        return Err(keepsake_error!(InvalidParameter {
            description: "no secret on stdin".to_string(),
        }));
    }

    let plaintext = if args.raw {
        secret
    } else {
        Zeroizing::new(STANDARD.encode(&*secret).into_bytes())
    };
    println!("{}", key.seal(&plaintext)?);
    Ok(())
}
