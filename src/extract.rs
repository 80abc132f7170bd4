use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::prelude::*;

/// Everything of interest found inside one distribution archive.
#[derive(Debug, Default)]
pub struct ArchiveMetadata {
    core: Option<DistMetadata>,
    raw_core: Option<Vec<u8>>,
    core_depth: usize,
    requires_txt: Vec<Requirement>,
    seen_requires_txt: bool,
}

enum MemberKind {
    /// Wheel `*.dist-info/METADATA` or sdist `PKG-INFO`.
    Core,
    /// Legacy `*.egg-info/requires.txt`.
    RequiresTxt,
}

fn classify_member(member_name: &str) -> Option<MemberKind> {
    let path = member_name.trim_end_matches('/');
    let (parent, basename) = match path.rsplit_once('/') {
        Some((parent, basename)) => (parent, basename),
        None => ("", path),
    };
    match basename {
        "METADATA" if parent.ends_with(".dist-info") => Some(MemberKind::Core),
        "PKG-INFO" => Some(MemberKind::Core),
        "requires.txt" if parent.ends_with(".egg-info") || parent.ends_with("EGG-INFO") => {
            Some(MemberKind::RequiresTxt)
        }
        _ => None,
    }
}

impl ArchiveMetadata {
    /// False when the archive exposed nothing we could read dependencies
    /// from.
    pub fn readable(&self) -> bool {
        self.core.is_some() || self.seen_requires_txt
    }

    pub fn core(&self) -> Option<&DistMetadata> {
        self.core.as_ref()
    }

    /// The declared dependencies, or None when the archive had no
    /// readable metadata at all. Old sdists without Requires-Dist fall
    /// back to their requires.txt. Relevance to the configured
    /// environments is the traversal engine's call, so the list comes
    /// back unfiltered.
    pub fn dependencies(&self) -> Option<Vec<Requirement>> {
        if !self.readable() {
            return None;
        }
        let declared: &[Requirement] = match &self.core {
            Some(core) if !core.requires_dist.is_empty() => &core.requires_dist,
            _ => &self.requires_txt,
        };
        Some(declared.to_vec())
    }

    fn consume(&mut self, member_name: &str, reader: &mut dyn Read) -> Result<()> {
        let kind = match classify_member(member_name) {
            Some(kind) => kind,
            None => return Ok(()),
        };
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .with_context(|| format!("reading member {:?}", member_name))?;

        match kind {
            MemberKind::Core => {
                // a top-level PKG-INFO beats the copies nested inside
                // egg-info or vendored trees
                let depth = member_name.matches('/').count();
                if self.core.is_none() || depth < self.core_depth {
                    let parsed: DistMetadata = bytes.as_slice().try_into()?;
                    self.core = Some(parsed);
                    self.raw_core = Some(bytes);
                    self.core_depth = depth;
                }
            }
            MemberKind::RequiresTxt => {
                self.requires_txt = parse_requires_txt(std::str::from_utf8(&bytes)?);
                self.seen_requires_txt = true;
            }
        }
        Ok(())
    }
}

/// Open the archive at `filepath`, scan its members for metadata, and
/// mirror the raw canonical metadata bytes to `<filepath>.metadata` so
/// the server can hand them out without reopening the archive. Members
/// that fail to parse are logged and skipped.
pub fn extract(filepath: &Path) -> Result<ArchiveMetadata> {
    let filename = filepath
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut scan = ArchiveMetadata::default();

    if filename.ends_with(".whl") || filename.ends_with(".zip") {
        let file = File::open(filepath)
            .with_context(|| format!("opening {}", filepath.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("reading zip archive {}", filepath.display()))?;
        for index in 0..archive.len() {
            let mut member = archive
                .by_index(index)
                .with_context(|| format!("reading zip member #{}", index))?;
            let member_name = member.name().to_owned();
            if let Err(err) = scan.consume(&member_name, &mut member) {
                warn!(
                    "failed parsing member {} of {}: {:#}",
                    member_name, filename, err
                );
            }
        }
    } else if filename.ends_with(".tar.gz") {
        let file = File::open(filepath)
            .with_context(|| format!("opening {}", filepath.display()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for entry in archive
            .entries()
            .with_context(|| format!("reading tar archive {}", filepath.display()))?
        {
            let mut entry = entry?;
            let member_name = entry.path()?.to_string_lossy().into_owned();
            if let Err(err) = scan.consume(&member_name, &mut entry) {
                warn!(
                    "failed parsing member {} of {}: {:#}",
                    member_name, filename, err
                );
            }
        }
    } else {
        bail!("unexpected distribution file {}", filepath.display());
    }

    if let Some(raw) = &scan.raw_core {
        std::fs::write(metadata_sidecar(filepath), raw)
            .with_context(|| format!("writing metadata sidecar for {}", filename))?;
    }

    Ok(scan)
}

pub fn metadata_sidecar(filepath: &Path) -> PathBuf {
    let mut path = filepath.as_os_str().to_owned();
    path.push(".metadata");
    PathBuf::from(path)
}

/// pkg_resources requires.txt: bare requirement lines, with `[extra]`,
/// `[:marker]`, or `[extra:marker]` headers scoping everything below
/// them.
fn parse_requires_txt(text: &str) -> Vec<Requirement> {
    let mut requirements = Vec::new();
    let mut extra: Option<String> = None;
    let mut marker: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let (extra_part, marker_part) = match header.split_once(':') {
                Some((extra, marker)) => (extra.trim(), Some(marker.trim())),
                None => (header.trim(), None),
            };
            extra = (!extra_part.is_empty()).then(|| extra_part.to_owned());
            marker = marker_part
                .filter(|m| !m.is_empty())
                .map(|m| m.to_owned());
            continue;
        }

        let mut clauses = Vec::new();
        if let Some(marker) = &marker {
            clauses.push(format!("({})", marker));
        }
        if let Some(extra) = &extra {
            clauses.push(format!("extra == \"{}\"", extra));
        }
        let text = if clauses.is_empty() {
            line.to_owned()
        } else {
            format!("{}; {}", line, clauses.join(" and "))
        };
        match Requirement::parse(&text) {
            Ok(requirement) => requirements.push(requirement),
            Err(err) => warn!("ignoring requires.txt line {:?}: {:#}", line, err),
        }
    }
    requirements
}

#[cfg(test)]
mod test {
    use super::*;
    use indoc::indoc;
    use std::io::Write;

    const METADATA: &str = indoc! {r#"
        Metadata-Version: 2.1
        Name: foo
        Version: 1.1
        Requires-Dist: bar (>=2.0)
        Requires-Dist: winfoo ; sys_platform == "win32"
        Requires-Dist: socksdep ; extra == "socks"
        Provides-Extra: socks
    "#};

    fn write_wheel(dir: &Path, name: &str, metadata: &str) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("foo/__init__.py", options).unwrap();
        zip.write_all(b"# hi\n").unwrap();
        zip.start_file("foo-1.1.dist-info/METADATA", options).unwrap();
        zip.write_all(metadata.as_bytes()).unwrap();
        zip.finish().unwrap();
        path
    }

    fn write_sdist(dir: &Path, name: &str, members: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (member_name, content) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, member_name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_wheel_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(dir.path(), "foo-1.1-py3-none-any.whl", METADATA);

        let scan = extract(&path).unwrap();
        assert!(scan.readable());
        assert_eq!(scan.core().unwrap().name.canonical(), "foo");

        // raw metadata mirrored next to the archive
        let sidecar = metadata_sidecar(&path);
        assert_eq!(
            std::fs::read_to_string(sidecar).unwrap(),
            METADATA
        );
    }

    #[test]
    fn test_dependencies_come_back_as_declared() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wheel(dir.path(), "foo-1.1-py3-none-any.whl", METADATA);

        let deps = extract(&path).unwrap().dependencies().unwrap();
        let rendered: Vec<String> = deps.iter().map(|d| d.canonical()).collect();
        assert_eq!(
            rendered,
            vec![
                "bar>=2.0",
                r#"winfoo; sys_platform == "win32""#,
                r#"socksdep; extra == "socks""#,
            ]
        );
    }

    #[test]
    fn test_sdist_pkg_info_prefers_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let nested = indoc! {"
            Metadata-Version: 2.1
            Name: wrong
            Version: 0.0
        "};
        let top = indoc! {"
            Metadata-Version: 2.1
            Name: foo
            Version: 1.0
            Requires-Dist: bar
        "};
        let path = write_sdist(
            dir.path(),
            "foo-1.0.tar.gz",
            &[
                ("foo-1.0/foo.egg-info/PKG-INFO", nested),
                ("foo-1.0/PKG-INFO", top),
            ],
        );

        let scan = extract(&path).unwrap();
        assert_eq!(scan.core().unwrap().name.canonical(), "foo");
        assert_eq!(scan.core().unwrap().requires_dist.len(), 1);
    }

    #[test]
    fn test_requires_txt_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_info = indoc! {"
            Metadata-Version: 1.0
            Name: old-pkg
            Version: 0.5
        "};
        let requires = indoc! {r#"
            plaindep>=1.0

            [socks]
            socksdep

            [:sys_platform == "win32"]
            windep
        "#};
        let path = write_sdist(
            dir.path(),
            "old-pkg-0.5.tar.gz",
            &[
                ("old-pkg-0.5/PKG-INFO", pkg_info),
                ("old-pkg-0.5/old_pkg.egg-info/requires.txt", requires),
            ],
        );

        // PKG-INFO has no Requires-Dist, so requires.txt supplies the
        // dependency list, with section headers turned into markers
        let deps = extract(&path).unwrap().dependencies().unwrap();
        let rendered: Vec<String> = deps.iter().map(|d| d.canonical()).collect();
        assert_eq!(
            rendered,
            vec![
                "plaindep>=1.0",
                r#"socksdep; extra == "socks""#,
                r#"windep; sys_platform == "win32""#,
            ]
        );
    }

    #[test]
    fn test_archive_without_metadata_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sdist(
            dir.path(),
            "bare-0.1.tar.gz",
            &[("bare-0.1/setup.py", "from setuptools import setup\n")],
        );

        let scan = extract(&path).unwrap();
        assert!(!scan.readable());
        assert!(scan.dependencies().is_none());
        assert!(!metadata_sidecar(&path).exists());
    }

    #[test]
    fn test_unknown_archive_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo-1.0.tar.bz2");
        std::fs::write(&path, b"whatever").unwrap();
        assert!(extract(&path).is_err());
    }

    #[test]
    fn test_requires_txt_parsing() {
        let parsed = parse_requires_txt(indoc! {r#"
            basic
            pinned==1.2

            [extra1]
            extradep

            [extra2:python_version < "3.8"]
            oldextradep

            not a requirement line
        "#});

        let rendered: Vec<String> = parsed.iter().map(|r| r.canonical()).collect();
        assert_eq!(
            rendered,
            vec![
                "basic",
                "pinned==1.2",
                r#"extradep; extra == "extra1""#,
                r#"oldextradep; python_version < "3.8" and extra == "extra2""#,
            ]
        );
    }
}
