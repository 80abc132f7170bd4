use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::prelude::*;

/// Print a pair of template environment blocks (one posix, one nt, the
/// host's family first) for the user to append to their configuration
/// and adjust.
pub fn env_block(name: &str) {
    print!("{}", render_env_block(name, cfg!(windows)));
}

fn render_env_block(name: &str, windows_first: bool) -> String {
    let posix = format!(
        "[env.{name}.posix]\n\
         os_name = posix\n\
         platform_python_implementation = CPython\n\
         python_version = 3.12\n\
         python_full_version = 3.12.0\n\
         implementation_name = cpython\n\
         sys_platform = linux\n\
         platform_machine = x86_64\n\
         whl.tag.interpreter = (cp312|py3)$\n\
         whl.tag.abi = (cp312|abi3|none)$\n\
         whl.tag.platform = (manylinux.*_x86_64|any)$\n",
        name = name
    );
    let nt = format!(
        "[env.{name}.nt]\n\
         os_name = nt\n\
         platform_python_implementation = CPython\n\
         python_version = 3.12\n\
         python_full_version = 3.12.0\n\
         implementation_name = cpython\n\
         sys_platform = win32\n\
         platform_machine = AMD64\n\
         whl.tag.interpreter = (cp312|py3)$\n\
         whl.tag.abi = (cp312|abi3|none)$\n\
         whl.tag.platform = (win_amd64|win32|any)$\n",
        name = name
    );
    if windows_first {
        format!("{}\n{}", nt, posix)
    } else {
        format!("{}\n{}", posix, nt)
    }
}

/// Print a `[requirements]` block derived from the `*.dist-info`
/// directories of an installed site-packages tree, sorted by name.
pub fn requirements_block(mode: &str, site_packages: &Path) -> Result<()> {
    print!("{}", render_requirements_block(mode, site_packages)?);
    Ok(())
}

fn render_requirements_block(mode: &str, site_packages: &Path) -> Result<String> {
    let mut installed: BTreeMap<String, Version> = BTreeMap::new();
    for entry in std::fs::read_dir(site_packages)
        .with_context(|| format!("listing {}", site_packages.display()))?
    {
        let entry = entry?;
        let dirname = entry.file_name().to_string_lossy().into_owned();
        if !dirname.ends_with(".dist-info") || !entry.path().is_dir() {
            continue;
        }
        let metadata_path = entry.path().join("METADATA");
        let bytes = match std::fs::read(&metadata_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("skipping {}: {}", dirname, err);
                continue;
            }
        };
        match DistMetadata::try_from(bytes.as_slice()) {
            Ok(metadata) => {
                installed.insert(metadata.name.canonical().to_owned(), metadata.version);
            }
            Err(err) => warn!("skipping {}: {:#}", dirname, err),
        }
    }

    let mut block = String::from("[requirements]\n");
    for (name, version) in installed {
        // writing to a String can't fail
        let _ = writeln!(block, "{} = {}{}", name, mode, version);
    }
    Ok(block)
}
