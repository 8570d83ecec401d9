//! Rebuilds a hierarchical password database from the flat folder and item
//! lists a vault exports.
//!
//! Folder names are `/`-separated paths. Every path is walked from the root
//! and missing groups are created exactly once; items are then placed into
//! the group of their folder. The whole tree is validated before anything is
//! written to disk.

mod kdbx;

use std::{collections::HashMap, path::Path};

use log::{debug, info};
use serde::Deserialize;

use crate::{
    config::{ExposeSecret, SecretString},
    keepsake_error, Result,
};

pub use kdbx::write_database;

/// Name of the database file produced for a vault backup.
pub const DATABASE_FILE_NAME: &str = "vaultwarden-backup.kdbx";

/// One entry of `bw list folders`. The pseudo-folder for unfiled items has a
/// null id.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VaultFolder {
    pub id: Option<String>,
    pub name: String,
}

/// The subset of a `bw list items` entry carried into the database.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultItem {
    #[serde(rename = "folderId", default)]
    pub folder_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub login: Option<VaultLogin>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultLogin {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub uris: Option<Vec<VaultUri>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VaultUri {
    #[serde(default)]
    pub uri: Option<String>,
}

pub type GroupId = usize;

#[derive(Debug, Clone)]
pub struct Entry {
    pub title: String,
    pub username: String,
    pub password: SecretString,
    pub notes: Option<String>,
    pub url: Option<String>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
            && self.notes == other.notes
            && self.url == other.url
    }
}

impl Entry {
    fn from_item(item: &VaultItem) -> Self {
        let login = item.login.as_ref();
        Self {
            title: item.name.clone(),
            username: login
                .and_then(|l| l.username.clone())
                .unwrap_or_default(),
            password: login
                .and_then(|l| l.password.clone())
                .unwrap_or_else(|| SecretString::from("")),
            notes: item.notes.clone().filter(|n| !n.is_empty()),
            url: login
                .and_then(|l| l.uris.as_ref())
                .and_then(|uris| uris.iter().find_map(|u| u.uri.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    /// Names of the ancestors below the root, ending with this group's name.
    /// Empty for the root.
    pub path: Vec<String>,
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    pub entries: Vec<Entry>,
}

/// An arena of groups rooted at index 0, indexed by full path.
#[derive(Debug, Clone, PartialEq)]
pub struct PasswordTree {
    groups: Vec<Group>,
    by_path: HashMap<Vec<String>, GroupId>,
}

impl Default for PasswordTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordTree {
    pub const ROOT: GroupId = 0;

    pub fn new() -> Self {
        let root = Group {
            name: "Root".to_string(),
            path: Vec::new(),
            parent: None,
            children: Vec::new(),
            entries: Vec::new(),
        };
        Self {
            groups: vec![root],
            by_path: HashMap::from([(Vec::new(), Self::ROOT)]),
        }
    }

    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id]
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn find(&self, path: &[String]) -> Option<GroupId> {
        self.by_path.get(path).copied()
    }

    pub fn entry_count(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    /// Returns the group at `folder_path`, creating each missing ancestor.
    /// Calling it again with the same path returns the same group.
    pub fn ensure_path(&mut self, folder_path: &str) -> GroupId {
        let mut current = Self::ROOT;
        let mut path = Vec::new();
        for segment in split_path(folder_path) {
            path.push(segment.to_string());
            current = match self.by_path.get(&path) {
                Some(&existing) => existing,
                None => {
                    let id = self.groups.len();
                    self.groups.push(Group {
                        name: segment.to_string(),
                        path: path.clone(),
                        parent: Some(current),
                        children: Vec::new(),
                        entries: Vec::new(),
                    });
                    self.groups[current].children.push(id);
                    self.by_path.insert(path.clone(), id);
                    id
                }
            };
        }
        current
    }

    /// Adds `entry` to an existing group.
    pub fn add_entry(&mut self, group: GroupId, entry: Entry) -> Result<()> {
        let Some(target) = self.groups.get_mut(group) else {
            return Err(keepsake_error!(ConversionError {
                description: format!("Group {group} does not exist"),
            }));
        };
        target.entries.push(entry);
        Ok(())
    }
}

fn split_path(folder_path: &str) -> impl Iterator<Item = &str> {
    folder_path.split('/').filter(|segment| !segment.is_empty())
}

/// Builds the group tree from `folders` and places every item. Fails without
/// side effects if an item references a folder that does not exist.
pub fn build_tree(folders: &[VaultFolder], items: &[VaultItem]) -> Result<PasswordTree> {
    let mut tree = PasswordTree::new();
    let mut folder_paths: HashMap<Option<&str>, &str> = HashMap::new();
    for folder in folders {
        tree.ensure_path(&folder.name);
        folder_paths.insert(folder.id.as_deref(), folder.name.as_str());
    }

    for item in items {
        let folder_name = folder_paths
            .get(&item.folder_id.as_deref())
            .ok_or_else(|| {
                keepsake_error!(ConversionError {
                    description: format!(
                        "Item '{}' references unknown folder {}",
                        item.name,
                        item.folder_id.as_deref().unwrap_or("<none>")
                    ),
                })
            })?;
        let path: Vec<String> = split_path(folder_name).map(str::to_string).collect();
        let group = tree.find(&path).ok_or_else(|| {
            keepsake_error!(ConversionError {
                description: format!(
                    "Group for folder '{folder_name}' of item '{}' was not created",
                    item.name
                ),
            })
        })?;
        tree.add_entry(group, Entry::from_item(item))?;
    }

    debug!(
        "Built password tree with {} groups and {} entries",
        tree.groups().len() - 1,
        tree.entry_count()
    );
    Ok(tree)
}

/// Converts the vault export and writes it as a KDBX 4 database at `target`,
/// protected with `password`. Nothing is written if the export is
/// inconsistent.
pub fn convert(
    folders: &[VaultFolder],
    items: &[VaultItem],
    password: &str,
    target: &Path,
) -> Result<PasswordTree> {
    let tree = build_tree(folders, items)?;
    write_database(&tree, password, target)?;
    info!(
        "Wrote {} entries to {}",
        tree.entry_count(),
        target.display()
    );
    Ok(tree)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::KeepsakeError;

    pub(crate) fn folder(id: Option<&str>, name: &str) -> VaultFolder {
        VaultFolder {
            id: id.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub(crate) fn item(folder_id: Option<&str>, name: &str, user: Option<&str>, pw: &str) -> VaultItem {
        VaultItem {
            folder_id: folder_id.map(str::to_string),
            name: name.to_string(),
            login: Some(VaultLogin {
                username: user.map(str::to_string),
                password: Some(SecretString::from(pw)),
                uris: None,
            }),
            notes: None,
        }
    }

    fn path(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_nested_folder_receives_item() {
        let folders = vec![
            folder(Some("f1"), "Personal"),
            folder(Some("f2"), "Personal/Banking"),
        ];
        let items = vec![item(Some("f2"), "Bank", Some("alice"), "p1")];

        let tree = build_tree(&folders, &items).unwrap();

        let personal = tree.find(&path(&["Personal"])).unwrap();
        let banking = tree.find(&path(&["Personal", "Banking"])).unwrap();
        assert_eq!(tree.group(personal).parent, Some(PasswordTree::ROOT));
        assert_eq!(tree.group(banking).parent, Some(personal));
        assert_eq!(tree.group(PasswordTree::ROOT).children, vec![personal]);
        assert_eq!(tree.group(personal).children, vec![banking]);

        let entries = &tree.group(banking).entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Bank");
        assert_eq!(entries[0].username, "alice");
        assert_eq!(entries[0].password.expose_secret(), "p1");
        assert!(tree.group(personal).entries.is_empty());
    }

    #[test]
    fn test_rebuild_is_identical() {
        let folders = vec![
            folder(Some("f2"), "Personal/Banking"),
            folder(Some("f1"), "Personal"),
            folder(Some("f3"), "Work"),
        ];
        let items = vec![
            item(Some("f2"), "Bank", Some("alice"), "p1"),
            item(Some("f3"), "VPN", None, "p2"),
        ];
        let first = build_tree(&folders, &items).unwrap();
        let second = build_tree(&folders, &items).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.groups().len(), 4);
    }

    #[test]
    fn test_ensure_path_is_idempotent() {
        let mut tree = PasswordTree::new();
        let a = tree.ensure_path("A/B/C");
        let b = tree.ensure_path("A/B/C");
        let parent = tree.ensure_path("A/B");
        assert_eq!(a, b);
        assert_eq!(tree.group(a).parent, Some(parent));
        assert_eq!(tree.groups().len(), 4);
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let mut tree = PasswordTree::new();
        let id = tree.ensure_path("/Personal//Banking/");
        assert_eq!(tree.group(id).path, path(&["Personal", "Banking"]));
    }

    #[test]
    fn test_unknown_folder_is_conversion_error() {
        let folders = vec![folder(Some("f1"), "Personal")];
        let items = vec![item(Some("f9"), "Orphan", Some("bob"), "x")];
        let err = build_tree(&folders, &items).unwrap_err();
        assert!(matches!(err, KeepsakeError::ConversionError { .. }));
        assert!(format!("{err}").contains("references unknown folder f9"));
    }

    #[test]
    fn test_unfiled_items_use_null_folder() {
        let folders = vec![folder(None, "No Folder")];
        let items = vec![item(None, "Loose", None, "p")];
        let tree = build_tree(&folders, &items).unwrap();
        let group = tree.find(&path(&["No Folder"])).unwrap();
        assert_eq!(tree.group(group).entries[0].username, "");

        let err = build_tree(&[], &items).unwrap_err();
        assert!(format!("{err}").contains("unknown folder <none>"));
    }

    #[test]
    fn test_parse_bw_json() {
        let folders: Vec<VaultFolder> = serde_json::from_str(
            r#"[{"object":"folder","id":"f1","name":"Personal"},{"object":"folder","id":null,"name":"No Folder"}]"#,
        )
        .unwrap();
        let items: Vec<VaultItem> = serde_json::from_str(
            r#"[{"object":"item","id":"i1","folderId":"f1","type":1,"name":"Mail",
                 "notes":"recovery codes in safe",
                 "login":{"username":null,"password":"s3cret","totp":null,
                          "uris":[{"match":null,"uri":"https://mail.example.com"}]}},
                {"object":"item","id":"i2","folderId":null,"type":2,"name":"Note","notes":"text"}]"#,
        )
        .unwrap();
        assert_eq!(folders[1].id, None);

        let tree = build_tree(&folders, &items).unwrap();
        let personal = tree.find(&path(&["Personal"])).unwrap();
        let mail = &tree.group(personal).entries[0];
        assert_eq!(mail.username, "");
        assert_eq!(mail.password.expose_secret(), "s3cret");
        assert_eq!(mail.url.as_deref(), Some("https://mail.example.com"));
        assert_eq!(mail.notes.as_deref(), Some("recovery codes in safe"));

        let unfiled = tree.find(&path(&["No Folder"])).unwrap();
        assert_eq!(tree.group(unfiled).entries[0].password.expose_secret(), "");
    }

    #[test]
    fn test_add_entry_requires_existing_group() {
        let mut tree = PasswordTree::new();
        let entry = Entry::from_item(&item(None, "x", None, "y"));
        assert!(tree.add_entry(7, entry).is_err());
    }
}
