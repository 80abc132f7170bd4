pub use std::collections::{HashMap, HashSet};
pub use std::fmt::Display;

pub use anyhow::{anyhow, bail, Context, Result};
pub use once_cell::sync::Lazy;
pub use regex::Regex;
pub use tracing::{debug, info, warn};
pub use url::Url;

pub use crate::try_from_str_boilerplate;
pub use crate::vocab::*;
