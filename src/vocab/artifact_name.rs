use crate::prelude::*;

/// One expanded `(interpreter, abi, platform)` compatibility triple from
/// a wheel filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTag {
    pub interpreter: String,
    pub abi: String,
    pub platform: String,
}

// https://packaging.python.org/specifications/binary-distribution-format/#file-name-convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelName {
    pub distribution: PackageName,
    pub version: Version,
    pub build: Option<String>,
    pub py_tags: Vec<String>,
    pub abi_tags: Vec<String>,
    pub arch_tags: Vec<String>,
}

impl WheelName {
    /// Cross product of the compressed tag sets, in filename order.
    pub fn expanded_tags(&self) -> Vec<WheelTag> {
        let mut tags = Vec::new();
        for py in &self.py_tags {
            for abi in &self.abi_tags {
                for arch in &self.arch_tags {
                    tags.push(WheelTag {
                        interpreter: py.clone(),
                        abi: abi.clone(),
                        platform: arch.clone(),
                    });
                }
            }
        }
        tags
    }
}

impl TryFrom<&str> for WheelName {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        static VALID_CHARS: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.+!-]+$").unwrap());

        if !VALID_CHARS.is_match(value) {
            bail!("invalid characters in wheel name {:?}", value);
        }
        let stem = value
            .strip_suffix(".whl")
            .ok_or_else(|| anyhow!("expected {:?} to end in .whl", value))?;

        // name-version[-build]-py-abi-platform; the name has its dashes
        // escaped to underscores, so the piece count is fixed
        let mut pieces: Vec<&str> = stem.split('-').collect();
        let build = match pieces.len() {
            6 => {
                let tag = pieces.remove(2);
                if tag.is_empty() {
                    bail!("empty build tag in {:?}", value);
                }
                Some(tag.to_owned())
            }
            5 => None,
            _ => bail!("can't parse wheel name {:?}", value),
        };

        Ok(WheelName {
            distribution: pieces[0].try_into()?,
            version: pieces[1].try_into()?,
            build,
            py_tags: pieces[2].split('.').map(String::from).collect(),
            abi_tags: pieces[3].split('.').map(String::from).collect(),
            arch_tags: pieces[4].split('.').map(String::from).collect(),
        })
    }
}

try_from_str_boilerplate!(WheelName);

impl Display for WheelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}{}-{}-{}-{}.whl",
            self.distribution.as_given(),
            self.version,
            match &self.build {
                Some(build) => format!("-{}", build),
                None => String::new(),
            },
            self.py_tags.join("."),
            self.abi_tags.join("."),
            self.arch_tags.join("."),
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SdistFormat {
    Zip,
    TarGz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdistName {
    pub distribution: PackageName,
    pub version: Version,
    pub format: SdistFormat,
}

impl TryFrom<&str> for SdistName {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        static SDIST_NAME: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(.*)-([^-]*)\.(zip|tar\.gz)$").unwrap());

        match SDIST_NAME.captures(value) {
            None => bail!("invalid sdist name {:?}", value),
            Some(captures) => Ok(SdistName {
                distribution: captures.get(1).unwrap().as_str().parse()?,
                version: captures.get(2).unwrap().as_str().parse()?,
                format: match captures.get(3).unwrap().as_str() {
                    "zip" => SdistFormat::Zip,
                    "tar.gz" => SdistFormat::TarGz,
                    _ => unreachable!(),
                },
            }),
        }
    }
}

try_from_str_boilerplate!(SdistName);

impl Display for SdistName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}.{}",
            self.distribution.as_given(),
            self.version,
            match self.format {
                SdistFormat::Zip => "zip",
                SdistFormat::TarGz => "tar.gz",
            }
        )
    }
}

/// Legacy sdists carry dashes inside the version segment
/// ("selenium-2.0-dev-9429.tar.gz"); rewrite the tail so it parses as a
/// single version ("selenium-2.0.dev9429.tar.gz"). Well-formed names come
/// through untouched, so the rewrite is idempotent.
pub fn repair_sdist_name(filename: &str) -> String {
    static DASHED_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"-[0-9].*-").unwrap());

    match DASHED_VERSION.find(filename) {
        Some(m) => {
            let head = &filename[..m.start() + 1];
            let tail = filename[m.start() + 1..]
                .replace("-dev-", ".dev")
                .replace('-', ".");
            format!("{}{}", head, tail)
        }
        None => filename.to_owned(),
    }
}
