use std::{
    fs::{self, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::Path,
};

use keepass::{
    db::{Entry as KdbxEntry, Group as KdbxGroup, Value},
    Database, DatabaseKey,
};

use super::{Entry, GroupId, PasswordTree};
use crate::{config::ExposeSecret, keepsake_error, Result, ResultExt};

/// Writes `tree` as a KDBX 4 database protected by `password`. A partially
/// written file is removed on failure.
pub fn write_database(tree: &PasswordTree, password: &str, target: &Path) -> Result<()> {
    let mut db = Database::new(Default::default());
    db.root = to_kdbx_group(tree, PasswordTree::ROOT);
    db.meta.database_name = Some("Vaultwarden backup".to_string());

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(target)
        .context(format!("Creating {} failed", target.display()))?;

    let saved = db.save(&mut file, DatabaseKey::new().with_password(password));
    drop(file);
    if let Err(e) = saved {
        let _ = fs::remove_file(target);
        return Err(keepsake_error!(ConversionError {
            description: format!("Failed to write {}: {e}", target.display()),
        }));
    }
    Ok(())
}

fn to_kdbx_group(tree: &PasswordTree, id: GroupId) -> KdbxGroup {
    let group = tree.group(id);
    let mut out = KdbxGroup::new(&group.name);
    for child in &group.children {
        out.add_child(to_kdbx_group(tree, *child));
    }
    for entry in &group.entries {
        out.add_child(to_kdbx_entry(entry));
    }
    out
}

fn to_kdbx_entry(entry: &Entry) -> KdbxEntry {
    let mut out = KdbxEntry::new();
    out.fields
        .insert("Title".to_string(), Value::Unprotected(entry.title.clone()));
    out.fields.insert(
        "UserName".to_string(),
        Value::Unprotected(entry.username.clone()),
    );
    out.fields.insert(
        "Password".to_string(),
        Value::Protected(entry.password.expose_secret().as_bytes().into()),
    );
    if let Some(url) = &entry.url {
        out.fields
            .insert("URL".to_string(), Value::Unprotected(url.clone()));
    }
    if let Some(notes) = &entry.notes {
        out.fields
            .insert("Notes".to_string(), Value::Unprotected(notes.clone()));
    }
    out
}
