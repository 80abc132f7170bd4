use crate::prelude::*;
use std::path::Path;

// Partial reimplementation of Python's configparser, enough for the
// depot.ini dialect:
//
// - `[section]` headers, `key = value` (or `key: value`) entries
// - keys are lowercased, section names are not
// - indented lines continue the previous value; blank lines inside a
//   value contribute an empty continuation
// - full-line comments start with '#' or ';' (no inline comments)
// - duplicate keys and duplicate sections ACCUMULATE instead of
//   overwriting, so a requirements block can be composed from several
//   fragments; reading a key joins all of its values with newlines

static SECTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(?P<name>[^\]]+)\]\s*$").unwrap());

/// The entries of one section, in file order, duplicates preserved.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// All values recorded for `key`, joined with newlines, trailing
    /// whitespace trimmed the way configparser does. None if the key
    /// never appeared.
    pub fn get(&self, key: &str) -> Option<String> {
        let values: Vec<&str> = self
            .entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.join("\n").trim_end().to_owned())
    }

    /// Keys in first-appearance order, deduplicated.
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| seen.insert(*k))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Config {
    // section name -> merged properties, in first-appearance order
    sections: Vec<(String, Properties)>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Config::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(input: &str) -> Result<Config> {
        let mut config = Config::default();
        let mut current: Option<usize> = None;
        let mut open_value = false;

        for (lineno, raw) in input.lines().enumerate() {
            let line = raw.trim_end();
            let stripped = line.trim_start();

            if stripped.starts_with('#') || stripped.starts_with(';') {
                continue;
            }
            if stripped.is_empty() {
                // a blank line inside a value block becomes an empty
                // continuation; anywhere else it separates entries
                if open_value {
                    if let Some(section) = current {
                        if let Some((_, value)) =
                            config.sections[section].1.entries.last_mut()
                        {
                            value.push('\n');
                        }
                    }
                }
                continue;
            }
            if let Some(captures) = SECTION_LINE.captures(line) {
                let name = captures["name"].trim().to_owned();
                let index = match config.sections.iter().position(|(n, _)| *n == name) {
                    Some(index) => index,
                    None => {
                        config.sections.push((name, Properties::default()));
                        config.sections.len() - 1
                    }
                };
                current = Some(index);
                open_value = false;
                continue;
            }
            let section = match current {
                Some(section) => section,
                None => bail!("line {}: entry before any [section]", lineno + 1),
            };
            if raw.starts_with(' ') || raw.starts_with('\t') {
                // continuation of the previous value
                match config.sections[section].1.entries.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(stripped);
                        open_value = true;
                    }
                    None => bail!("line {}: continuation before any key", lineno + 1),
                }
                continue;
            }
            let (key, value) = match line.split_once(['=', ':']) {
                Some((key, value)) => (key.trim().to_lowercase(), value.trim().to_owned()),
                None => bail!("line {}: expected 'key = value', got {:?}", lineno + 1, line),
            };
            if key.is_empty() {
                bail!("line {}: empty key", lineno + 1);
            }
            config.sections[section].1.entries.push((key, value));
            open_value = true;
        }

        Ok(config)
    }

    pub fn section(&self, name: &str) -> Option<&Properties> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, props)| props)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(name, _)| name.as_str())
    }

    /// The `[requirements]` block: one (package, value) pair per key, in
    /// file order, with repeated keys already joined.
    pub fn requirements(&self) -> Vec<(String, String)> {
        match self.section("requirements") {
            Some(props) => props
                .keys()
                .into_iter()
                .map(|key| (key.to_owned(), props.get(key).unwrap_or_default()))
                .collect(),
            None => Vec::new(),
        }
    }
}
