mod artifact_hash;
mod artifact_name;
mod core_metadata;
mod extra;
mod package_name;
mod requirement;
mod rfc822ish;
mod specifier;
mod version;

// All of this is also re-exported from crate::prelude::*

pub use self::artifact_hash::{ArtifactHash, HashingWriter};
pub use self::artifact_name::{
    repair_sdist_name, SdistFormat, SdistName, WheelName, WheelTag,
};
pub use self::core_metadata::DistMetadata;
pub use self::extra::Extra;
pub use self::package_name::{canonicalize, PackageName};
pub use self::requirement::{marker, Requirement};
pub use self::specifier::{CompareOp, Specifier, Specifiers};
pub use self::version::Version;
