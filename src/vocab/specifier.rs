use crate::prelude::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompareOp {
    LessThanEqual,
    StrictlyLessThan,
    NotEqual,
    Equal,
    GreaterThanEqual,
    StrictlyGreaterThan,
    Compatible,
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CompareOp::*;
        write!(
            f,
            "{}",
            match self {
                LessThanEqual => "<=",
                StrictlyLessThan => "<",
                NotEqual => "!=",
                Equal => "==",
                GreaterThanEqual => ">=",
                StrictlyGreaterThan => ">",
                Compatible => "~=",
            }
        )
    }
}

impl TryFrom<&str> for CompareOp {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        use CompareOp::*;
        Ok(match value {
            "==" => Equal,
            "!=" => NotEqual,
            "<=" => LessThanEqual,
            "<" => StrictlyLessThan,
            ">=" => GreaterThanEqual,
            ">" => StrictlyGreaterThan,
            "~=" => Compatible,
            "===" => bail!("'===' is not supported"),
            _ => bail!("unrecognized operator {:?}", value),
        })
    }
}

try_from_str_boilerplate!(CompareOp);

/// One version predicate. The right-hand side stays a string because
/// `==` and `!=` admit wildcards (`== 1.1.*`) that are not versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub op: CompareOp,
    pub value: String,
}

impl Display for Specifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.op, self.value)
    }
}

impl Specifier {
    /// Whether this predicate itself names a pre-release; that is what
    /// lets pre-release candidates into the set at all.
    pub fn names_prerelease(&self) -> bool {
        let bare = self.value.strip_suffix(".*").unwrap_or(&self.value);
        bare.parse::<Version>()
            .map(|v| v.is_prerelease())
            .unwrap_or(false)
    }

    pub fn satisfied_by(&self, version: &Version) -> Result<bool> {
        use CompareOp::*;

        let (bare, wildcard) = match self.value.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (&self.value[..], false),
        };
        let rhs: Version = bare
            .try_into()
            .with_context(|| format!("bad version in specifier {:?}", self.to_string()))?;

        if wildcard {
            return match self.op {
                Equal => Ok(release_prefix_matches(version, &rhs)),
                NotEqual => Ok(!release_prefix_matches(version, &rhs)),
                _ => bail!("wildcard is only valid with == and !=, not {}", self.op),
            };
        }

        Ok(match self.op {
            Equal => version == &rhs,
            NotEqual => version != &rhs,
            LessThanEqual => version <= &rhs,
            GreaterThanEqual => version >= &rhs,
            // "The exclusive ordered comparison <V MUST NOT allow a
            // pre-release of the specified version unless the specified
            // version is itself a pre-release."
            StrictlyLessThan => {
                version < &rhs
                    && !(version.is_prerelease()
                        && !rhs.is_prerelease()
                        && same_release(version, &rhs))
            }
            // ">V MUST NOT allow a post-release or local version of the
            // given version unless V itself is a post release."
            StrictlyGreaterThan => {
                version > &rhs
                    && !(same_release(version, &rhs)
                        && rhs.0.post.is_none()
                        && (version.0.post.is_some() || !version.0.local.is_empty()))
            }
            // ~= X.Y.Z is >= X.Y.Z plus == X.Y.*
            Compatible => {
                if rhs.0.release.len() < 2 {
                    bail!("~= requires a version with at least two segments");
                }
                let mut prefix = rhs.clone();
                prefix.0.release.pop();
                version >= &rhs && release_prefix_matches(version, &prefix)
            }
        })
    }
}

/// Wildcard match: same epoch, and the release numbers agree over the
/// pattern's segments (missing candidate segments count as zero).
fn release_prefix_matches(version: &Version, pattern: &Version) -> bool {
    version.0.epoch == pattern.0.epoch
        && pattern
            .0
            .release
            .iter()
            .enumerate()
            .all(|(i, n)| version.0.release.get(i).copied().unwrap_or(0) == *n)
}

fn same_release(a: &Version, b: &Version) -> bool {
    if a.0.epoch != b.0.epoch {
        return false;
    }
    let len = a.0.release.len().max(b.0.release.len());
    (0..len).all(|i| {
        a.0.release.get(i).copied().unwrap_or(0) == b.0.release.get(i).copied().unwrap_or(0)
    })
}

/// A conjunction of predicates, as written after a requirement name or in
/// a Requires-Python field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Specifiers(pub Vec<Specifier>);

impl Specifiers {
    /// Conjunction over all predicates, with the index's default
    /// pre-release policy: a pre-release version is only ever contained
    /// when some predicate in the set names a pre-release itself. An
    /// empty set contains every final release.
    pub fn contains(&self, version: &Version) -> Result<bool> {
        if version.is_prerelease() && !self.0.iter().any(|s| s.names_prerelease()) {
            return Ok(false);
        }
        for specifier in &self.0 {
            if !specifier.satisfied_by(version)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Canonical rendering: predicates sorted and comma-joined, so equal sets
/// written in different orders render the same.
impl Display for Specifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut rendered: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        rendered.sort_unstable();
        write!(f, "{}", rendered.join(","))
    }
}

impl TryFrom<&str> for Specifiers {
    type Error = anyhow::Error;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        super::requirement::parse_specifiers(input)
            .with_context(|| format!("failed to parse version specifiers {:?}", input))
    }
}

try_from_str_boilerplate!(Specifiers);
