//! Config command - write the annotated example linkreply.toml

use anyhow::{Context, Result, bail};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::args::{ConfigArgs, ConfigCommands};
use crate::config::AppConfig;

pub async fn execute(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Init { path, force } => {
            write_example_config(&path, force)?;
            tracing::info!(path = %path.display(), "Wrote example config");
            println!("Wrote example config to {}", path.display());
            println!("Replies stay in dry-run until general.dry_run is set to false.");
            println!("Any key can be overridden as LINKREPLY__<SECTION>__<KEY>,");
            println!("e.g. LINKREPLY__GENERAL__LINK_PAGE_URL=https://lnk.example/me");
            Ok(())
        }
    }
}

/// Write `AppConfig::example_toml()` to `path`. An existing file is kept
/// unless `force` is set.
fn write_example_config(path: &Path, force: bool) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => bail!(
            "{} already exists; pass --force to replace it",
            path.display()
        ),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open {}", path.display()));
        }
    };

    file.write_all(AppConfig::example_toml().as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}
