use crate::prelude::*;

// PEP 685 gives extras the same normalization rule as package names, so
// just reuse the machinery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Extra(PackageName);

impl Extra {
    pub fn as_given(&self) -> &str {
        self.0.as_given()
    }

    pub fn canonical(&self) -> &str {
        self.0.canonical()
    }
}

impl TryFrom<&str> for Extra {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Ok(Extra(s.try_into()?))
    }
}

try_from_str_boilerplate!(Extra);

impl Display for Extra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_given())
    }
}
