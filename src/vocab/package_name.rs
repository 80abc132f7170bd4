use crate::prelude::*;

/// A distribution name as it appeared in the wild, plus its canonical
/// form. Equality and hashing only look at the canonical form, so
/// `Foo_Bar` and `foo-bar` collide the way the index expects them to.
#[derive(Debug, Clone)]
pub struct PackageName {
    given: String,
    canonical: String,
}

impl PackageName {
    pub fn as_given(&self) -> &str {
        &self.given
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

/// PEP 503 normalization: lowercase, runs of `-`, `_`, `.` collapsed to a
/// single `-`. Idempotent.
pub fn canonicalize(name: &str) -> String {
    static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_.]+").unwrap());
    SEPARATOR_RUNS.replace_all(name, "-").to_lowercase()
}

impl TryFrom<&str> for PackageName {
    type Error = anyhow::Error;

    fn try_from(given: &str) -> Result<Self, Self::Error> {
        // https://packaging.python.org/specifications/core-metadata/#name
        static NAME_VALIDATE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i-u)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").unwrap()
        });

        if !NAME_VALIDATE.is_match(given) {
            bail!("invalid package name {:?}", given);
        }
        Ok(PackageName {
            given: given.to_owned(),
            canonical: canonicalize(given),
        })
    }
}

try_from_str_boilerplate!(PackageName);

impl Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.given)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for PackageName {}

impl std::hash::Hash for PackageName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}
