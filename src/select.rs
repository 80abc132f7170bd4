use std::collections::BTreeMap;

use crate::env::TargetEnv;
use crate::index::{ProjectFile, ProjectPage};
use crate::prelude::*;

/// A file entry that survived parsing, enriched with everything the
/// environment filter and the downloader need.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub filename: String,
    pub url: Url,
    pub version: Version,
    /// Expanded compatibility tags; None for sdists.
    pub tags: Option<Vec<WheelTag>>,
    pub requires_python: Option<String>,
    pub hashes: BTreeMap<String, String>,
    pub upload_time: Option<String>,
}

impl FileRecord {
    pub fn is_wheel(&self) -> bool {
        self.tags.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SelectOptions {
    pub mirror_all_versions: bool,
    pub mirror_all_wheels: bool,
    pub package_type_regex: String,
}

impl Default for SelectOptions {
    fn default() -> Self {
        SelectOptions {
            mirror_all_versions: false,
            mirror_all_wheels: false,
            package_type_regex: r"(whl|zip|tar\.gz)".to_owned(),
        }
    }
}

/// Reduces a project's file listing to the files worth downloading for
/// the configured environments: extension gate, filename parse, version
/// sort, specifier filter, environment filter, then the per-version and
/// version-breadth reductions.
pub struct Selector {
    pythons: Vec<Version>,
    platforms: Vec<Regex>,
    extension_re: Regex,
    mirror_all_versions: bool,
    mirror_all_wheels: bool,
}

impl Selector {
    pub fn new(envs: &[TargetEnv], options: &SelectOptions) -> Result<Selector> {
        let pythons = envs
            .iter()
            .map(|env| {
                env.python_version().parse().with_context(|| {
                    format!("bad python version in environment {:?}", env.name)
                })
            })
            .collect::<Result<Vec<Version>>>()?;
        let platforms = envs.iter().map(|env| env.platform_regex().clone()).collect();
        let extension_re = Regex::new(&format!(r"\.{}$", options.package_type_regex))
            .context("bad package type regex")?;
        Ok(Selector {
            pythons,
            platforms,
            extension_re,
            mirror_all_versions: options.mirror_all_versions,
            mirror_all_wheels: options.mirror_all_wheels,
        })
    }

    /// Run the selection pipeline for one requirement. The result is
    /// version-descending; empty means nothing matched, and the caller
    /// decides how bad that is.
    pub fn select(
        &self,
        requirement: &Requirement,
        top_level: bool,
        page: &ProjectPage,
    ) -> Result<Vec<FileRecord>> {
        let mut records = self.parse_files(page);
        if records.is_empty() {
            info!("{}: no usable files in index listing", requirement);
            return Ok(Vec::new());
        }

        records.sort_by(|a, b| b.version.cmp(&a.version));

        let mut satisfying = Vec::new();
        for record in records {
            if requirement.specifiers.contains(&record.version)? {
                satisfying.push(record);
            }
        }
        if satisfying.is_empty() {
            info!("{}: no version matches the specifier", requirement);
            return Ok(Vec::new());
        }

        // a file's requires-python must admit the python of every
        // configured environment, not just the one it ends up serving
        let compatible: Vec<FileRecord> = satisfying
            .into_iter()
            .filter(|record| self.admitted_by_requires_python(record))
            .collect();

        let mut selected = if self.mirror_all_wheels {
            let pythons: Vec<&Version> = self.pythons.iter().collect();
            let platforms: Vec<&Regex> = self.platforms.iter().collect();
            compatible
                .into_iter()
                .filter(|record| self.tags_match(record, &pythons, &platforms))
                .collect()
        } else {
            let mut selected = Vec::new();
            for (_, group) in group_by_version(compatible) {
                selected.extend(self.best_for_version(&group));
            }
            selected.sort_by(|a, b| b.version.cmp(&a.version));
            selected
        };
        if selected.is_empty() {
            info!("{}: no file matches any environment", requirement);
            return Ok(Vec::new());
        }

        // keep the whole version range only for top-level requirements
        // when every version was asked for
        if !(top_level && self.mirror_all_versions) {
            let latest = selected[0].version.clone();
            selected.retain(|record| record.version == latest);
        }
        Ok(selected)
    }

    /// Stages 1-2: extension gate, filename parse (with the legacy sdist
    /// name repair), yanked filter, URL resolution. Unparseable files are
    /// old artifacts the index no longer admits; they are dropped without
    /// fuss.
    fn parse_files(&self, page: &ProjectPage) -> Vec<FileRecord> {
        let mut records = Vec::new();
        for file in &page.files {
            if !self.extension_re.is_match(&file.filename) {
                continue;
            }
            if file.yanked.yanked {
                continue;
            }
            let (version, tags) = if file.filename.ends_with(".whl") {
                match file.filename.parse::<WheelName>() {
                    Ok(wheel) => (wheel.version.clone(), Some(wheel.expanded_tags())),
                    Err(err) => {
                        debug!("dropping {}: {:#}", file.filename, err);
                        continue;
                    }
                }
            } else {
                match repair_sdist_name(&file.filename).parse::<SdistName>() {
                    Ok(sdist) => (sdist.version, None),
                    Err(err) => {
                        debug!("dropping {}: {:#}", file.filename, err);
                        continue;
                    }
                }
            };
            let url = match page.base_url.join(&file.url) {
                Ok(url) => url,
                Err(err) => {
                    warn!("dropping {}: bad URL {:?}: {}", file.filename, file.url, err);
                    continue;
                }
            };
            records.push(FileRecord {
                filename: file.filename.clone(),
                url,
                version,
                tags,
                requires_python: file.requires_python.clone(),
                hashes: file.hashes.clone(),
                upload_time: file.upload_time.clone(),
            });
        }
        records
    }

    /// The requires-python gate: the file's specifier (after the legacy
    /// repairs) must contain the python of every configured environment.
    /// A specifier that is malformed even after repair drops the file.
    fn admitted_by_requires_python(&self, record: &FileRecord) -> bool {
        let raw = match record.requires_python.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => raw,
            None => return true,
        };
        let specs = match repaired_requires_python(raw) {
            Ok(specs) => specs,
            Err(err) => {
                warn!("ignoring {}: {:#}", record.filename, err);
                return false;
            }
        };
        for python in &self.pythons {
            match specs.contains(python) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    warn!("ignoring {}: {:#}", record.filename, err);
                    return false;
                }
            }
        }
        true
    }

    /// The wheel-tag filter against a python/platform subset: at least
    /// one tag must carry a cp/py interpreter whose version floor admits
    /// some python in the subset, and a platform that is `any` or
    /// matches some platform filter in the subset. Sdists have no tags
    /// and pass.
    fn tags_match(&self, record: &FileRecord, pythons: &[&Version], platforms: &[&Regex]) -> bool {
        let tags = match &record.tags {
            Some(tags) => tags,
            None => return true,
        };
        for tag in tags {
            let (interpreter, version) = parse_interpreter(&tag.interpreter);
            if interpreter != "cp" && interpreter != "py" {
                continue;
            }
            let version = match version {
                Some(version) => version,
                None => {
                    warn!(
                        "unexpected interpreter tag {} in {}",
                        tag.interpreter, record.filename
                    );
                    continue;
                }
            };
            // cp38 advertises CPython 3.8 or newer; a bare 3 admits
            // everything
            if version != "3"
                && !pythons.iter().any(|python| python_at_least(python, &version))
            {
                continue;
            }
            if tag.platform == "any" {
                return true;
            }
            if platforms.iter().any(|regex| regex.is_match(&tag.platform)) {
                return true;
            }
        }
        false
    }

    /// Stage 6 without mirror-all-wheels: per (python, platform) cell of
    /// the environment grid, keep the first matching sdist and the
    /// best-scoring matching wheel, deduplicating by (filename, url).
    fn best_for_version(&self, group: &[FileRecord]) -> Vec<FileRecord> {
        let mut wheels: Vec<&FileRecord> = group.iter().filter(|f| f.is_wheel()).collect();
        let sdists: Vec<&FileRecord> = group.iter().filter(|f| !f.is_wheel()).collect();
        wheels.sort_by(|a, b| wheel_score(b).cmp(&wheel_score(a)));

        let mut selected: Vec<FileRecord> = Vec::new();
        for python in &self.pythons {
            for platform in &self.platforms {
                for pool in [&sdists, &wheels] {
                    let found = pool
                        .iter()
                        .find(|record| self.tags_match(record, &[python], &[platform]));
                    if let Some(found) = found {
                        let duplicate = selected
                            .iter()
                            .any(|s| s.filename == found.filename && s.url == found.url);
                        if !duplicate {
                            selected.push((*found).clone());
                        }
                    }
                }
            }
        }
        selected
    }
}

/// Groups a version-descending record list into per-version runs,
/// preserving order.
fn group_by_version(records: Vec<FileRecord>) -> Vec<(Version, Vec<FileRecord>)> {
    let mut groups: Vec<(Version, Vec<FileRecord>)> = Vec::new();
    for record in records {
        match groups.last_mut() {
            Some((version, group)) if *version == record.version => group.push(record),
            _ => groups.push((record.version.clone(), vec![record])),
        }
    }
    groups
}

/// Split a wheel interpreter tag ("cp311", "py3") into its name and
/// optional `<major>` or `<major>.<minor>` version.
pub fn parse_interpreter(tag: &str) -> (&str, Option<String>) {
    static INTERPRETER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^([^\d]+)(?:(\d)(?:[._])?(\d+)?)$").unwrap());

    match INTERPRETER.captures(tag) {
        None => (tag, None),
        Some(captures) => {
            let name = captures.get(1).unwrap().as_str();
            let version = match (captures.get(2), captures.get(3)) {
                (Some(major), Some(minor)) => {
                    Some(format!("{}.{}", major.as_str(), minor.as_str()))
                }
                (Some(major), None) => Some(major.as_str().to_owned()),
                _ => None,
            };
            (name, version)
        }
    }
}

fn python_at_least(python: &Version, floor: &str) -> bool {
    let spec = Specifier {
        op: CompareOp::GreaterThanEqual,
        value: floor.to_owned(),
    };
    spec.satisfied_by(python).unwrap_or(false)
}

/// Apply the repairs old uploads need before parsing a requires-python
/// value: a bare integer N becomes ==N, and '>=3.6.*' / '!=3.0*' style
/// trailing wildcards lose the wildcard.
fn repaired_requires_python(raw: &str) -> Result<Specifiers> {
    static TRAILING_WILDCARD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([0-9])\.?\*").unwrap());

    let repaired = if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        format!("=={}", raw)
    } else {
        raw.to_owned()
    };
    let repaired = TRAILING_WILDCARD.replace_all(&repaired, "${1}");
    repaired.as_ref().try_into()
}

/// Preference score for one wheel: the lexicographic maximum over its
/// tags of (interpreter version, platform score), where the platform
/// score is the glibc pair from a `..._<a>_<b>` suffix and the legacy
/// manylinux aliases get fixed fallbacks. Sdists get a sentinel that
/// sorts ahead of everything.
fn wheel_score(record: &FileRecord) -> (u64, u64) {
    const SDIST_SENTINEL: (u64, u64) = (10_000_000_000, 10_000_000_000);
    static VERSIONED_PLATFORM: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[a-z]+_(\d+)_(\d+)").unwrap());

    let tags = match &record.tags {
        Some(tags) => tags,
        None => return SDIST_SENTINEL,
    };
    let mut best = (0, 0);
    for tag in tags {
        let (interpreter, version) = parse_interpreter(&tag.interpreter);
        if interpreter != "cp" && interpreter != "py" {
            continue;
        }
        let version = match version {
            Some(version) => version,
            None => continue,
        };
        let mut parts = version.splitn(2, '.');
        let major: u64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let minor: u64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let py_score = major * 100 + minor;

        let platform_score = if let Some(captures) = VERSIONED_PLATFORM.captures(&tag.platform)
        {
            let a: u64 = captures[1].parse().unwrap_or(0);
            let b: u64 = captures[2].parse().unwrap_or(0);
            a * 100 + b
        } else if tag.platform.contains("manylinux2014") {
            90
        } else if tag.platform.contains("manylinux2010") {
            80
        } else if tag.platform.contains("manylinux1") {
            70
        } else {
            0
        };

        best = best.max((py_score, platform_score));
    }
    best
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use crate::env::environments_from_config;
    use crate::index::Yanked;
    use indoc::indoc;

    fn linux_envs() -> Vec<TargetEnv> {
        let config = Config::parse(indoc! {"
            [env.linux]
            os_name = posix
            platform_python_implementation = CPython
            python_version = 3.11
            implementation_name = cpython
            sys_platform = linux
            platform_machine = x86_64
        "})
        .unwrap();
        environments_from_config(&config).unwrap()
    }

    fn grid_envs() -> Vec<TargetEnv> {
        let config = Config::parse(indoc! {"
            [env.py310]
            os_name = posix
            platform_python_implementation = CPython
            python_version = 3.10
            implementation_name = cpython
            sys_platform = linux
            platform_machine = x86_64
            platform_tag = (manylinux.*_x86_64|any)

            [env.py311]
            os_name = posix
            platform_python_implementation = CPython
            python_version = 3.11
            implementation_name = cpython
            sys_platform = linux
            platform_machine = x86_64
            platform_tag = (manylinux.*_x86_64|any)
        "})
        .unwrap();
        environments_from_config(&config).unwrap()
    }

    fn selector(envs: &[TargetEnv], options: &SelectOptions) -> Selector {
        Selector::new(envs, options).unwrap()
    }

    fn file(filename: &str) -> ProjectFile {
        ProjectFile {
            filename: filename.to_owned(),
            url: filename.to_owned(),
            hashes: BTreeMap::new(),
            requires_python: None,
            yanked: Yanked::default(),
            upload_time: None,
        }
    }

    fn yanked_file(filename: &str) -> ProjectFile {
        let mut file = file(filename);
        file.yanked = Yanked {
            yanked: true,
            reason: None,
        };
        file
    }

    fn page(files: Vec<ProjectFile>) -> ProjectPage {
        ProjectPage {
            files,
            base_url: "https://example.org/simple/pkg/".parse().unwrap(),
        }
    }

    fn req(text: &str) -> Requirement {
        Requirement::parse(text).unwrap()
    }

    fn names(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.filename.as_str()).collect()
    }

    #[test]
    fn test_latest_version_best_wheel() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![
            file("foo-1.0.tar.gz"),
            file("foo-1.1-cp311-cp311-manylinux_2_17_x86_64.whl"),
            file("foo-1.1-cp39-cp39-manylinux_2_17_x86_64.whl"),
        ]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(
            names(&selected),
            vec!["foo-1.1-cp311-cp311-manylinux_2_17_x86_64.whl"]
        );
    }

    #[test]
    fn test_sdist_and_wheel_of_latest_version() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![
            file("foo-1.1.tar.gz"),
            file("foo-1.1-cp311-cp311-manylinux_2_17_x86_64.whl"),
            file("foo-1.0.tar.gz"),
        ]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(
            names(&selected),
            vec![
                "foo-1.1.tar.gz",
                "foo-1.1-cp311-cp311-manylinux_2_17_x86_64.whl"
            ]
        );
    }

    #[test]
    fn test_yanked_and_unparseable_files_dropped() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![
            yanked_file("qux-0.1.tar.gz"),
            file("qux-0.2-macosx-10.15-x86_64.tar.gz"),
            file("qux-0.3.tar.gz"),
            file("qux-0.4.exe"),
        ]);

        let selected = selector.select(&req("qux"), true, &page).unwrap();
        assert_eq!(names(&selected), vec!["qux-0.3.tar.gz"]);
    }

    #[test]
    fn test_legacy_dashed_sdist_name_is_repaired() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![file("selenium-2.0-dev-9429.tar.gz")]);

        let selected = selector
            .select(&req("selenium==2.0.dev9429"), true, &page)
            .unwrap();
        assert_eq!(names(&selected), vec!["selenium-2.0-dev-9429.tar.gz"]);
    }

    #[test]
    fn test_specifier_filter() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![
            file("foo-2.0.tar.gz"),
            file("foo-1.4.tar.gz"),
            file("foo-1.0.tar.gz"),
        ]);

        let selected = selector.select(&req("foo<2.0"), true, &page).unwrap();
        assert_eq!(names(&selected), vec!["foo-1.4.tar.gz"]);

        let selected = selector.select(&req("foo>=3"), true, &page).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_prereleases_need_an_invitation() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![file("foo-2.0a1.tar.gz"), file("foo-1.9.tar.gz")]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(names(&selected), vec!["foo-1.9.tar.gz"]);

        let selected = selector.select(&req("foo==2.0a1"), true, &page).unwrap();
        assert_eq!(names(&selected), vec!["foo-2.0a1.tar.gz"]);
    }

    #[test]
    fn test_requires_python_gates_all_envs() {
        let envs = grid_envs(); // 3.10 and 3.11
        let selector = selector(&envs, &SelectOptions::default());

        let mut old = file("foo-1.1.tar.gz");
        old.requires_python = Some(">=3.11".to_owned()); // excludes the 3.10 env
        let mut ok = file("foo-1.0.tar.gz");
        ok.requires_python = Some(">=3.6.*".to_owned()); // legacy wildcard, repaired

        let selected = selector
            .select(&req("foo"), true, &page(vec![old, ok]))
            .unwrap();
        assert_eq!(names(&selected), vec!["foo-1.0.tar.gz"]);
    }

    #[test]
    fn test_requires_python_repairs() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());

        // bare integer becomes ==3, which a 3.11 env does not satisfy
        let mut bare = file("foo-1.2.tar.gz");
        bare.requires_python = Some("3".to_owned());
        // malformed even after repair: dropped with a warning
        let mut broken = file("foo-1.1.tar.gz");
        broken.requires_python = Some(">=x.y".to_owned());
        let mut fine = file("foo-1.0.tar.gz");
        fine.requires_python = Some("!=3.0*,>=2.7".to_owned());

        let selected = selector
            .select(&req("foo"), true, &page(vec![bare, broken, fine]))
            .unwrap();
        assert_eq!(names(&selected), vec!["foo-1.0.tar.gz"]);
    }

    #[test]
    fn test_wheel_platform_preference() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![
            file("foo-1.0-cp311-cp311-manylinux2014_x86_64.whl"),
            file("foo-1.0-cp311-cp311-manylinux_2_28_x86_64.whl"),
            file("foo-1.0-cp311-cp311-manylinux1_x86_64.whl"),
        ]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(
            names(&selected),
            vec!["foo-1.0-cp311-cp311-manylinux_2_28_x86_64.whl"]
        );
    }

    #[test]
    fn test_incompatible_wheels_rejected() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![
            // wrong platform
            file("foo-1.0-cp311-cp311-win_amd64.whl"),
            // interpreter floor above every configured python
            file("foo-1.0-cp313-cp313-manylinux_2_17_x86_64.whl"),
            // not a cp/py interpreter
            file("foo-1.0-pp311-pypy311_pp73-manylinux_2_17_x86_64.whl"),
        ]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_pure_python_wheel_matches_via_any() {
        let envs = linux_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![file("foo-1.0-py3-none-any.whl")]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(names(&selected), vec!["foo-1.0-py3-none-any.whl"]);
    }

    #[test]
    fn test_mirror_all_wheels_keeps_every_compatible_wheel() {
        let envs = grid_envs();
        let options = SelectOptions {
            mirror_all_wheels: true,
            ..SelectOptions::default()
        };
        let selector = selector(&envs, &options);
        let page = page(vec![
            file("foo-2.0-cp310-cp310-manylinux_2_17_x86_64.whl"),
            file("foo-2.0-cp311-cp311-manylinux_2_17_x86_64.whl"),
            file("foo-2.0-cp311-cp311-manylinux_2_28_x86_64.whl"),
            file("foo-2.0-cp39-cp39-manylinux2014_x86_64.whl"),
            file("foo-2.0-py3-none-any.whl"),
            file("foo-2.0-cp311-cp311-win_amd64.whl"),
        ]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(selected.len(), 5);
        assert!(!names(&selected).contains(&"foo-2.0-cp311-cp311-win_amd64.whl"));
    }

    #[test]
    fn test_mirror_all_versions_applies_to_top_level_only() {
        let envs = linux_envs();
        let options = SelectOptions {
            mirror_all_versions: true,
            ..SelectOptions::default()
        };
        let selector = selector(&envs, &options);
        let files = vec![file("foo-2.0.tar.gz"), file("foo-1.0.tar.gz")];

        let selected = selector.select(&req("foo"), true, &page(files.clone())).unwrap();
        assert_eq!(names(&selected), vec!["foo-2.0.tar.gz", "foo-1.0.tar.gz"]);

        // a dependency still mirrors only the latest release
        let selected = selector.select(&req("foo"), false, &page(files)).unwrap();
        assert_eq!(names(&selected), vec!["foo-2.0.tar.gz"]);
    }

    #[test]
    fn test_parse_interpreter() {
        assert_eq!(parse_interpreter("cp311"), ("cp", Some("3.11".to_owned())));
        assert_eq!(parse_interpreter("cp38"), ("cp", Some("3.8".to_owned())));
        assert_eq!(parse_interpreter("py3"), ("py", Some("3".to_owned())));
        assert_eq!(parse_interpreter("py2.7"), ("py", Some("2.7".to_owned())));
        assert_eq!(parse_interpreter("abi3"), ("abi", Some("3".to_owned())));
        assert_eq!(parse_interpreter("none"), ("none", None));
    }

    #[test]
    fn test_environment_grid_dedup() {
        // both envs resolve to the same universal wheel; it is selected once
        let envs = grid_envs();
        let selector = selector(&envs, &SelectOptions::default());
        let page = page(vec![file("foo-1.0-py3-none-any.whl")]);

        let selected = selector.select(&req("foo"), true, &page).unwrap();
        assert_eq!(selected.len(), 1);
    }
}
