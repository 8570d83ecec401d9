use std::{fmt::Write as _, fs, path::PathBuf};

use log::{info, warn};

use super::{backup_failed, run_checked};
use crate::{
    config::{DavConfig, ExposeSecret},
    utils::{fs::write_private_file, Invocation, StdinFeed, ToolRunner},
    Result,
};

pub const VDIRSYNCER_CONFIG_FILE: &str = "vdirsyncer.ini";
const VDIRSYNCER_PROGRAM: &str = "vdirsyncer";

/// Mirrors a CardDAV address book and a CalDAV calendar into
/// `backup_dir/contacts` and `backup_dir/calendars` with vdirsyncer.
pub struct DavSource {
    config: DavConfig,
    work_dir: PathBuf,
    backup_dir: PathBuf,
}

struct Pair<'a> {
    name: &'a str,
    storage_type: &'a str,
    file_ext: &'a str,
    url: &'a str,
    username: &'a str,
    password: &'a str,
}

impl DavSource {
    pub fn new(config: DavConfig, work_dir: PathBuf, backup_dir: PathBuf) -> Self {
        Self {
            config,
            work_dir,
            backup_dir,
        }
    }

    pub fn backup_dir(&self) -> &PathBuf {
        &self.backup_dir
    }

    fn pairs(&self) -> [Pair<'_>; 2] {
        [
            Pair {
                name: "contacts",
                storage_type: "carddav",
                file_ext: ".vcf",
                url: &self.config.carddav_url,
                username: &self.config.carddav_username,
                password: self.config.carddav_password.expose_secret(),
            },
            Pair {
                name: "calendars",
                storage_type: "caldav",
                file_ext: ".ics",
                url: &self.config.caldav_url,
                username: &self.config.caldav_username,
                password: self.config.caldav_password.expose_secret(),
            },
        ]
    }

    /// Renders the vdirsyncer configuration. Every value is a JSON string, as
    /// vdirsyncer expects.
    fn render_config(&self) -> Result<String> {
        let mut out = String::new();
        let status_path = format!("{}/", self.work_dir.join("status").display());
        let _ = writeln!(out, "[general]\nstatus_path = {}", quote(&status_path)?);

        for pair in self.pairs() {
            let local_path = format!("{}/", self.backup_dir.join(pair.name).display());
            let _ = write!(
                out,
                "\n[pair {name}]\na = {local}\nb = {remote}\ncollections = [\"from b\"]\nconflict_resolution = \"b wins\"\n",
                name = pair.name,
                local = quote(&format!("{}_local", pair.name))?,
                remote = quote(&format!("{}_remote", pair.name))?,
            );
            let _ = write!(
                out,
                "\n[storage {name}_local]\ntype = \"filesystem\"\npath = {path}\nfileext = {ext}\n",
                name = pair.name,
                path = quote(&local_path)?,
                ext = quote(pair.file_ext)?,
            );
            let _ = write!(
                out,
                "\n[storage {name}_remote]\ntype = {kind}\nurl = {url}\nusername = {user}\npassword = {password}\n",
                name = pair.name,
                kind = quote(pair.storage_type)?,
                url = quote(pair.url)?,
                user = quote(pair.username)?,
                password = quote(pair.password)?,
            );
        }
        Ok(out)
    }

    fn write_config(&self) -> Result<PathBuf> {
        let path = self.work_dir.join(VDIRSYNCER_CONFIG_FILE);
        let rendered = zeroize::Zeroizing::new(self.render_config()?);
        write_private_file(&path, rendered.as_bytes())
            .map_err(backup_failed(format!("Writing {}", path.display())))?;
        for pair in self.pairs() {
            let dir = self.backup_dir.join(pair.name);
            fs::create_dir_all(&dir).map_err(backup_failed(format!("Creating {}", dir.display())))?;
        }
        Ok(path)
    }

    pub fn create_backup(&self, runner: &dyn ToolRunner) -> Result<()> {
        let config_path = self.write_config()?;
        let env_path = config_path.display().to_string();

        let discover = Invocation::new(VDIRSYNCER_PROGRAM, ["discover"])
            .env("VDIRSYNCER_CONFIG", env_path.clone())
            .stdin(StdinFeed::Repeat("y\n"));
        match runner.run(&discover) {
            Ok(output) if output.success() => info!("vdirsyncer discover finished"),
            Ok(output) => warn!(
                "vdirsyncer discover failed with {}, continuing with sync: {}",
                output.status_text(),
                output.stderr_text()
            ),
            Err(e) => warn!("vdirsyncer discover could not run, continuing with sync: {e}"),
        }

        let sync = Invocation::new(VDIRSYNCER_PROGRAM, ["sync"]).env("VDIRSYNCER_CONFIG", env_path);
        run_checked(runner, &sync, "Synchronizing DAV collections")?;
        info!("vdirsyncer sync finished");
        Ok(())
    }
}

fn quote(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}
