use crate::prelude::*;

use super::rfc822ish::Rfc822ish;

/// The slice of core metadata the mirror cares about: enough to walk
/// dependencies and report what a release needs.
#[derive(Debug, Clone)]
pub struct DistMetadata {
    pub name: PackageName,
    pub version: Version,
    pub requires_dist: Vec<Requirement>,
    pub provides_extra: Vec<Extra>,
    pub requires_python: Option<String>,
}

impl TryFrom<&[u8]> for DistMetadata {
    type Error = anyhow::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        // Mangled encodings definitely exist somewhere in 20 years of
        // uploads; lossy conversion is as good as it gets.
        let text = String::from_utf8_lossy(value);
        let mut parsed = Rfc822ish::parse(&text)?;

        static NEXT_MAJOR_VERSION: Lazy<Version> = Lazy::new(|| "3".parse().unwrap());

        // Core metadata says consumers MUST reject a major version they
        // don't know; minor revisions are compatible by definition.
        let metadata_version: Version = parsed.take("Metadata-Version")?.parse()?;
        if metadata_version >= *NEXT_MAJOR_VERSION {
            bail!("unsupported Metadata-Version {}", metadata_version);
        }

        let name: PackageName = parsed.take("Name")?.parse()?;
        let version: Version = parsed.take("Version")?.parse()?;

        let mut requires_dist = Vec::new();
        for line in parsed.take_all("Requires-Dist") {
            match Requirement::parse(&line) {
                Ok(requirement) => requires_dist.push(requirement),
                // old uploads contain lines the current grammar rejects
                Err(err) => warn!("ignoring Requires-Dist {:?}: {:#}", line, err),
            }
        }

        let mut provides_extra = Vec::new();
        for line in parsed.take_all("Provides-Extra") {
            match line.parse() {
                Ok(extra) => provides_extra.push(extra),
                Err(err) => warn!("ignoring Provides-Extra {:?}: {:#}", line, err),
            }
        }

        Ok(DistMetadata {
            name,
            version,
            requires_dist,
            provides_extra,
            requires_python: parsed.maybe_take("Requires-Python")?,
        })
    }
}
