//! File encryption to a single recipient through `gpg`, with a private
//! keyring.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error, info};

use crate::{
    keepsake_error,
    utils::{
        fs::{create_private_dir, write_private_file},
        Invocation, ToolOutput, ToolRunner,
    },
    Result,
};

pub const GPG_PROGRAM: &str = "gpg";

/// Encrypts files to one recipient. The recipient key is imported into a
/// keyring of our own at construction and trusted unconditionally.
pub struct FileEncryptor<'a> {
    runner: &'a dyn ToolRunner,
    homedir: PathBuf,
    fingerprint: String,
}

impl std::fmt::Debug for FileEncryptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEncryptor")
            .field("homedir", &self.homedir)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl<'a> FileEncryptor<'a> {
    /// Imports `public_key` (armored or binary) into the keyring at `homedir`.
    pub fn new(runner: &'a dyn ToolRunner, homedir: PathBuf, public_key: &[u8]) -> Result<Self> {
        create_private_dir(&homedir)?;
        let key_file = homedir.join("recipient.asc");
        write_private_file(&key_file, public_key)?;

        let invocation = Invocation::new(
            GPG_PROGRAM,
            [
                "--homedir".to_string(),
                homedir.display().to_string(),
                "--batch".to_string(),
                "--with-colons".to_string(),
                "--import-options".to_string(),
                "import-show".to_string(),
                "--import".to_string(),
                key_file.display().to_string(),
            ],
        );
        let output = runner.run(&invocation);
        let _ = fs::remove_file(&key_file);
        let output = check("import recipient key", output?)?;

        let fingerprint = parse_fingerprint(&output.stdout_text()).ok_or_else(|| {
            keepsake_error!(EncryptionError {
                description: format!(
                    "gpg imported no key: {}",
                    output.stderr_text()
                ),
            })
        })?;
        info!("Encrypting backups to {fingerprint}");

        Ok(Self {
            runner,
            homedir,
            fingerprint,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypts `path` to `path.gpg`, replacing any previous output.
    pub fn encrypt_file(&self, path: &Path) -> Result<PathBuf> {
        let mut target = path.as_os_str().to_owned();
        target.push(".gpg");
        let target = PathBuf::from(target);
        debug!("Encrypting {} to {}", path.display(), target.display());

        let invocation = Invocation::new(
            GPG_PROGRAM,
            [
                "--homedir".to_string(),
                self.homedir.display().to_string(),
                "--batch".to_string(),
                "--yes".to_string(),
                "--trust-model".to_string(),
                "always".to_string(),
                "--recipient".to_string(),
                self.fingerprint.clone(),
                "--output".to_string(),
                target.display().to_string(),
                "--encrypt".to_string(),
                path.display().to_string(),
            ],
        );
        let result = self
            .runner
            .run(&invocation)
            .and_then(|output| check(&format!("encrypt {}", path.display()), output));
        if let Err(e) = result {
            let _ = fs::remove_file(&target);
            return Err(e);
        }
        Ok(target)
    }

    /// Encrypts every regular, non-hidden file directly under `dir` that is
    /// not already encrypted. Returns the encrypted paths in name order.
    pub fn encrypt_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut encrypted = Vec::new();
        for path in crate::utils::fs::list_files(dir)? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || name.ends_with(".gpg") {
                continue;
            }
            encrypted.push(self.encrypt_file(&path)?);
        }
        Ok(encrypted)
    }
}

fn check(action: &str, output: ToolOutput) -> Result<ToolOutput> {
    if output.success() {
        return Ok(output);
    }
    let msg = format!(
        "gpg failed to {action} ({}): {}",
        output.status_text(),
        output.stderr_text()
    );
    error!("{msg}");
    Err(keepsake_error!(EncryptionError { description: msg }))
}

/// First `fpr` record of `gpg --with-colons` output.
fn parse_fingerprint(colons: &str) -> Option<String> {
    colons
        .lines()
        .filter(|line| line.starts_with("fpr:"))
        .find_map(|line| line.split(':').nth(9))
        .filter(|fpr| !fpr.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        utils::process::testing::{failed, ok, ok_with, ScriptedRunner},
        KeepsakeError,
    };

    pub(crate) const IMPORT_OUTPUT: &str = "\
pub:-:4096:1:0123456789ABCDEF:1700000000:::-:::scESC::::::23::0:
fpr:::::::::AAAABBBBCCCCDDDDEEEEFFFF0123456789ABCDEF:
uid:-::::1700000000::HASH::Backup <backup@example.com>::::::::::0:
sub:-:4096:1:FEDCBA9876543210:1700000000::::::e::::::23:
fpr:::::::::11112222333344445555666677778888FEDCBA98:
";

    /// Answers imports with [`IMPORT_OUTPUT`] and performs "encryption" by
    /// copying the input to the `--output` path.
    pub(crate) fn fake_gpg() -> ScriptedRunner {
        ScriptedRunner::new(|invocation| {
            if invocation.args.iter().any(|a| a == "--import") {
                return Ok(ok_with(IMPORT_OUTPUT));
            }
            let arg_after = |flag: &str| {
                let pos = invocation.args.iter().position(|a| a == flag).unwrap();
                invocation.args[pos + 1].clone()
            };
            let input = invocation.args.last().unwrap();
            let mut data = b"ENCRYPTED:".to_vec();
            data.extend(fs::read(input).unwrap());
            fs::write(arg_after("--output"), data).unwrap();
            Ok(ok())
        })
    }

    #[test]
    fn test_parse_fingerprint_takes_primary_key() {
        assert_eq!(
            parse_fingerprint(IMPORT_OUTPUT).as_deref(),
            Some("AAAABBBBCCCCDDDDEEEEFFFF0123456789ABCDEF")
        );
        assert_eq!(parse_fingerprint("gpg: no valid OpenPGP data found.\n"), None);
    }

    #[test]
    fn test_import_and_encrypt() {
        let dir = tempdir().unwrap();
        let runner = fake_gpg();
        let encryptor =
            FileEncryptor::new(&runner, dir.path().join("gnupg"), b"-----BEGIN PGP").unwrap();
        assert_eq!(encryptor.fingerprint(), "AAAABBBBCCCCDDDDEEEEFFFF0123456789ABCDEF");
        assert!(!dir.path().join("gnupg/recipient.asc").exists());

        let input = dir.path().join("backup.json");
        fs::write(&input, b"{}").unwrap();
        let out = encryptor.encrypt_file(&input).unwrap();
        assert_eq!(out, dir.path().join("backup.json.gpg"));
        assert_eq!(fs::read(&out).unwrap(), b"ENCRYPTED:{}");

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("--trust-model always --recipient AAAABBBBCCCCDDDDEEEEFFFF0123456789ABCDEF"));
    }

    #[test]
    fn test_encrypt_dir_skips_hidden_and_encrypted() {
        let dir = tempdir().unwrap();
        let runner = fake_gpg();
        let encryptor = FileEncryptor::new(&runner, dir.path().join(".gnupg"), b"key").unwrap();
        let backup = dir.path().join("backup");
        fs::create_dir(&backup).unwrap();
        for name in ["contacts.zip", ".hidden", "old.zip.gpg"] {
            fs::write(backup.join(name), b"x").unwrap();
        }
        fs::create_dir(backup.join("contacts")).unwrap();

        let encrypted = encryptor.encrypt_dir(&backup).unwrap();
        assert_eq!(encrypted, vec![backup.join("contacts.zip.gpg")]);
    }

    #[test]
    fn test_import_failure_is_encryption_error() {
        let dir = tempdir().unwrap();
        let runner = ScriptedRunner::queued(vec![failed(2, "gpg: no valid OpenPGP data found.")]);
        let err = FileEncryptor::new(&runner, dir.path().join("gnupg"), b"junk").unwrap_err();
        assert!(matches!(err, KeepsakeError::EncryptionError { .. }));
        assert!(format!("{err}").contains("no valid OpenPGP data found"));
    }

    #[test]
    fn test_encrypt_failure_removes_partial_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("vault.zip");
        fs::write(&input, b"x").unwrap();
        let partial = dir.path().join("vault.zip.gpg");
        let partial_clone = partial.clone();
        let runner = ScriptedRunner::new(move |invocation| {
            if invocation.args.iter().any(|a| a == "--import") {
                return Ok(ok_with(IMPORT_OUTPUT));
            }
            fs::write(&partial_clone, b"half").unwrap();
            Ok(failed(2, "gpg: public key decryption failed: Unusable public key"))
        });
        let encryptor = FileEncryptor::new(&runner, dir.path().join("gnupg"), b"key").unwrap();

        let err = encryptor.encrypt_file(&input).unwrap_err();
        assert!(format!("{err}").contains("Unusable public key"));
        assert!(!partial.exists());
    }
}
