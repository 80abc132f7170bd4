use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Deserialize;

use crate::error::DepotError;
use crate::prelude::*;

/// One entry of a PEP 691 project listing, as the index sent it. Nothing
/// is parsed beyond the JSON shape; filename and requires-python strings
/// are interpreted later, by the selector.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectFile {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(default, rename = "requires-python")]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub yanked: Yanked,
    #[serde(default, rename = "upload-time")]
    pub upload_time: Option<String>,
}

// The JSON form is either a bool or a free-text reason string.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawYanked")]
pub struct Yanked {
    pub yanked: bool,
    pub reason: Option<String>,
}

impl Default for Yanked {
    fn default() -> Self {
        Yanked {
            yanked: false,
            reason: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawYanked {
    Flag(bool),
    Reason(String),
}

impl From<RawYanked> for Yanked {
    fn from(raw: RawYanked) -> Self {
        match raw {
            RawYanked::Flag(yanked) => Yanked {
                yanked,
                reason: None,
            },
            RawYanked::Reason(reason) => Yanked {
                yanked: true,
                reason: Some(reason),
            },
        }
    }
}

/// A project's file listing plus the effective URL it was served from,
/// which is what relative file URLs resolve against.
#[derive(Debug, Clone)]
pub struct ProjectPage {
    pub files: Vec<ProjectFile>,
    pub base_url: Url,
}

/// Simple-API client with a per-run, per-package response cache.
pub struct IndexClient {
    agent: ureq::Agent,
    index_url: Url,
    cache: RefCell<HashMap<String, Rc<ProjectPage>>>,
}

impl IndexClient {
    pub fn new(agent: ureq::Agent, index_url: Url) -> IndexClient {
        IndexClient {
            agent,
            index_url,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Fetch (or reuse) the JSON listing for one package.
    pub fn project_page(&self, name: &PackageName) -> Result<Rc<ProjectPage>> {
        if let Some(page) = self.cache.borrow().get(name.canonical()) {
            return Ok(page.clone());
        }

        let url = self
            .index_url
            .join(&format!("{}/", name.canonical()))
            .with_context(|| format!("building index URL for {}", name.as_given()))?;
        debug!("fetching {}", url);
        let response = crate::net::call_with_retry(
            self.agent
                .request_url("GET", &url)
                .set("Accept", "application/vnd.pypi.simple.v1+json"),
        )
        .map_err(|err| match err {
            ureq::Error::Status(404, _) => {
                anyhow::Error::new(DepotError::PackageNotFound(name.canonical().to_owned()))
            }
            other => anyhow::Error::new(other)
                .context(format!("fetching index entry for {}", name.as_given())),
        })?;

        let base_url: Url = response
            .get_url()
            .parse()
            .context("index response has an unusable effective URL")?;
        let body: serde_json::Value = response
            .into_json()
            .with_context(|| format!("reading index response for {}", name.as_given()))?;

        let page = Rc::new(parse_project_page(name, base_url, &body)?);
        self.cache
            .borrow_mut()
            .insert(name.canonical().to_owned(), page.clone());
        Ok(page)
    }
}

fn parse_project_page(
    name: &PackageName,
    base_url: Url,
    body: &serde_json::Value,
) -> Result<ProjectPage> {
    // an absent or empty api-version counts as 1.0; any other major
    // version is something we don't speak
    let api_version = match body.pointer("/meta/api-version").and_then(|v| v.as_str()) {
        Some(version) if !version.is_empty() => version,
        _ => "1.0",
    };
    let major = api_version.split('.').next().unwrap_or("");
    if major.parse::<u32>() != Ok(1) {
        return Err(DepotError::UnsupportedIndexVersion(api_version.to_owned()).into());
    }

    let raw_files = match body.get("files") {
        Some(serde_json::Value::Array(files)) => files,
        _ => {
            return Err(DepotError::MalformedIndexResponse(name.canonical().to_owned()).into())
        }
    };
    let files = raw_files
        .iter()
        .map(|file| serde_json::from_value(file.clone()))
        .collect::<Result<Vec<ProjectFile>, _>>()
        .map_err(|err| {
            debug!("bad file entry for {}: {}", name.as_given(), err);
            DepotError::MalformedIndexResponse(name.canonical().to_owned())
        })?;

    Ok(ProjectPage { files, base_url })
}
