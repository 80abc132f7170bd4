use crate::prelude::*;
use std::io::{Read, Write};
use std::path::Path;

/// An index-declared digest: algorithm name plus raw digest bytes.
/// Renders as `<alg>=<hex>`, the format of the on-disk sidecar files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHash {
    pub algorithm: String,
    pub digest: Vec<u8>,
}

fn digest_algorithm(name: &str) -> Result<&'static ring::digest::Algorithm> {
    Ok(match name {
        "sha256" => &ring::digest::SHA256,
        "sha384" => &ring::digest::SHA384,
        "sha512" => &ring::digest::SHA512,
        other => bail!("unsupported hash algorithm {:?}", other),
    })
}

impl ArtifactHash {
    pub fn from_hex(algorithm: &str, hex: &str) -> Result<ArtifactHash> {
        Ok(ArtifactHash {
            algorithm: algorithm.to_owned(),
            digest: data_encoding::HEXLOWER_PERMISSIVE.decode(hex.as_bytes())?,
        })
    }

    pub fn hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.digest)
    }

    /// Digest the file at `path` and compare against the expected value.
    pub fn matches_file(&self, path: &Path) -> Result<bool> {
        let mut context = ring::digest::Context::new(digest_algorithm(&self.algorithm)?);
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("opening {} for hashing", path.display()))?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            context.update(&buf[..n]);
        }
        Ok(context.finish().as_ref() == self.digest.as_slice())
    }

    /// Wrap a writer so the bytes passing through get digested with this
    /// hash's algorithm.
    pub fn writer<W: Write>(&self, inner: W) -> Result<HashingWriter<W>> {
        Ok(HashingWriter {
            inner,
            context: ring::digest::Context::new(digest_algorithm(&self.algorithm)?),
        })
    }
}

impl Display for ArtifactHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.algorithm, self.hex())
    }
}

pub struct HashingWriter<W: Write> {
    inner: W,
    context: ring::digest::Context,
}

impl<W: Write> HashingWriter<W> {
    /// Unwrap, returning the inner writer and the computed digest bytes.
    pub fn finish(self) -> (W, Vec<u8>) {
        (self.inner, self.context.finish().as_ref().to_vec())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.context.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
