use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::DepotError;
use crate::prelude::*;
use crate::select::FileRecord;

const PREFERRED_HASH_ALG: &str = "sha256";

/// Downloads files and guarantees the on-disk invariant: a path either
/// does not exist, or holds bytes matching the index-declared digest,
/// with a `<name>.hash` sidecar and the upload timestamp stamped on.
pub struct Fetcher {
    agent: ureq::Agent,
    // paths verified this run, so a re-run doesn't re-hash
    verified: RefCell<HashSet<PathBuf>>,
}

impl Fetcher {
    pub fn new(agent: ureq::Agent) -> Fetcher {
        Fetcher {
            agent,
            verified: RefCell::new(HashSet::new()),
        }
    }

    /// Ensure `target` holds exactly the advertised bytes. A verified
    /// copy already on disk costs no network traffic; it only gets its
    /// sidecar refreshed and its timestamp re-stamped.
    pub fn materialize(&self, record: &FileRecord, target: &Path) -> Result<()> {
        let expected = preferred_hash(record)?;
        let parent = target
            .parent()
            .ok_or_else(|| anyhow!("target path {} has no parent", target.display()))?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;

        if self.verified.borrow().contains(target) {
            return Ok(());
        }
        if target.exists() && expected.matches_file(target)? {
            write_hash_sidecar(target, &expected)?;
            stamp_upload_time(target, record);
            self.verified.borrow_mut().insert(target.to_owned());
            return Ok(());
        }

        print!("\t{}... ", record.url);
        let _ = io::stdout().flush();
        let response = crate::net::call_with_retry(
            self.agent.request_url("GET", &record.url),
        )
        .with_context(|| format!("downloading {}", record.url))?;

        // stream through the digest into a sibling temp file, and only
        // move it over the target once the digest checks out
        let temp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temp file in {}", parent.display()))?;
        let mut writer = expected.writer(temp)?;
        io::copy(&mut response.into_reader(), &mut writer)
            .with_context(|| format!("writing {}", target.display()))?;
        let (temp, actual) = writer.finish();
        println!("done");

        if actual != expected.digest {
            // drop the temp file and whatever stale copy the target held
            let _ = std::fs::remove_file(target);
            return Err(DepotError::DigestMismatch {
                filename: record.filename.clone(),
                expected: expected.hex(),
                actual: data_encoding::HEXLOWER.encode(&actual),
            }
            .into());
        }

        temp.persist(target)
            .with_context(|| format!("moving download into {}", target.display()))?;
        write_hash_sidecar(target, &expected)?;
        stamp_upload_time(target, record);
        self.verified.borrow_mut().insert(target.to_owned());
        Ok(())
    }
}

/// sha256 when the index offers it, else the first algorithm offered.
fn preferred_hash(record: &FileRecord) -> Result<ArtifactHash> {
    let (algorithm, hex) = match record.hashes.get_key_value(PREFERRED_HASH_ALG) {
        Some((algorithm, hex)) => (algorithm, hex),
        None => record
            .hashes
            .iter()
            .next()
            .ok_or_else(|| anyhow!("index offers no digest for {}", record.filename))?,
    };
    ArtifactHash::from_hex(algorithm, hex)
        .with_context(|| format!("bad {} digest for {}", algorithm, record.filename))
}

pub fn hash_sidecar(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_owned();
    path.push(".hash");
    PathBuf::from(path)
}

// The sidecar is exactly `<alg>=<hex>`, no trailing newline.
fn write_hash_sidecar(target: &Path, hash: &ArtifactHash) -> Result<()> {
    std::fs::write(hash_sidecar(target), hash.to_string())
        .with_context(|| format!("writing hash sidecar for {}", target.display()))
}

/// Set atime and mtime to the index's upload-time, when it has one.
fn stamp_upload_time(target: &Path, record: &FileRecord) {
    let raw = match &record.upload_time {
        Some(raw) => raw,
        None => return,
    };
    let parsed = match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(
                "unparseable upload-time {:?} for {}: {}",
                raw, record.filename, err
            );
            return;
        }
    };
    let stamp =
        filetime::FileTime::from_unix_time(parsed.timestamp(), parsed.timestamp_subsec_nanos());
    if let Err(err) = filetime::set_file_times(target, stamp, stamp) {
        warn!("could not stamp {}: {}", target.display(), err);
    }
}
