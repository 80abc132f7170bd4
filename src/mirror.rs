use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::Config;
use crate::env::TargetEnv;
use crate::error::DepotError;
use crate::fetch::Fetcher;
use crate::index::IndexClient;
use crate::prelude::*;
use crate::select::{FileRecord, SelectOptions, Selector};

/// The processed-requirement cache. A simple requirement (no marker, no
/// extras, no upper bound) burns only the package name: whatever latest
/// release was mirrored for it satisfies any later lower-bounded
/// occurrence, so revisiting would be wasted work. Everything else is
/// keyed by its full canonical rendering.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    seen: HashSet<String>,
}

impl ProcessedSet {
    fn key(requirement: &Requirement) -> String {
        if requirement.is_simple() {
            requirement.name.canonical().to_owned()
        } else {
            requirement.canonical()
        }
    }

    pub fn contains(&self, requirement: &Requirement) -> bool {
        self.seen.contains(&Self::key(requirement))
    }

    pub fn insert(&mut self, requirement: &Requirement) {
        self.seen.insert(Self::key(requirement));
    }
}

/// A dependency waiting in the next breadth-first batch. `extras` is the
/// union of the extras of every parent that pulled this requirement in;
/// the union is what the relevance check runs under.
#[derive(Debug)]
struct PendingDep {
    requirement: Requirement,
    required_by: Requirement,
    extras: BTreeSet<String>,
}

type DepBatch = BTreeMap<String, PendingDep>;

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub index_path: PathBuf,
    pub index_url: Url,
    pub select: SelectOptions,
}

/// The traversal engine: walks the dependency closure breadth-first over
/// the index client, selector, fetcher, and extractor. All caches (index
/// responses, verified paths, processed requirements) live on this value,
/// so every run starts fresh.
pub struct Mirrorer {
    index_path: PathBuf,
    requirements: Vec<(String, String)>,
    envs: Vec<TargetEnv>,
    index: IndexClient,
    selector: Selector,
    fetcher: Fetcher,
    processed: ProcessedSet,
}

impl Mirrorer {
    pub fn new(config: &Config, options: MirrorOptions) -> Result<Mirrorer> {
        let envs = crate::env::environments_from_config(config)?;
        if envs.is_empty() {
            bail!("configuration defines no [env.*] sections");
        }
        let selector = Selector::new(&envs, &options.select)?;
        Ok(Mirrorer {
            index_path: options.index_path,
            requirements: config.requirements(),
            envs,
            index: IndexClient::new(crate::net::agent(), options.index_url),
            selector,
            fetcher: Fetcher::new(crate::net::agent()),
            processed: ProcessedSet::default(),
        })
    }

    /// Mirror every requirement in the `[requirements]` block: a key with
    /// an empty value mirrors the bare package, a multiline value mirrors
    /// one requirement per non-empty line appended to the package name.
    pub fn run(&mut self) -> Result<()> {
        for (package, value) in self.requirements.clone() {
            let lines: Vec<String> = value
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect();
            if lines.is_empty() {
                self.mirror(&package)?;
            } else {
                for line in lines {
                    self.mirror(&format!("{}{}", package, line))?;
                }
            }
        }
        Ok(())
    }

    /// Mirror one top-level requirement and its dependency closure.
    pub fn mirror(&mut self, requirement_string: &str) -> Result<()> {
        let requirement = Requirement::parse(requirement_string)?;

        let mut batch = match self.mirror_requirement(&requirement, None, &[]) {
            Ok(deps) => deps,
            Err(err) if abandons_requirement(&err) => {
                // the index is missing or unreachable for this one;
                // carry on with the next top-level requirement
                println!("\tError: {:#}", err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        while !batch.is_empty() {
            let mut next = DepBatch::new();
            for dep in batch.values() {
                let extras: Vec<Extra> = dep
                    .extras
                    .iter()
                    .filter_map(|extra| extra.parse().ok())
                    .collect();
                let more = match self.mirror_requirement(
                    &dep.requirement,
                    Some(&dep.required_by),
                    &extras,
                ) {
                    Ok(more) => more,
                    Err(err) if abandons_requirement(&err) => {
                        println!("\tError: {:#}", err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                merge_deps(&mut next, more);
            }
            batch = next;
        }
        Ok(())
    }

    /// Process one requirement: relevance check, index fetch, file
    /// selection, then one materialize+extract round per file. Returns
    /// the dependencies discovered in this release's metadata.
    fn mirror_requirement(
        &mut self,
        requirement: &Requirement,
        required_by: Option<&Requirement>,
        extras: &[Extra],
    ) -> Result<DepBatch> {
        if self.processed.contains(requirement) {
            return Ok(DepBatch::new());
        }

        match required_by {
            Some(parent) => println!("[{}]: {}", parent, requirement),
            None => println!("{}", requirement),
        }

        if !crate::env::requirement_relevant(requirement, &self.envs, extras) {
            println!("\tSkipping, not relevant for any environment");
            self.processed.insert(requirement);
            return Ok(DepBatch::new());
        }

        let page = self.index.project_page(&requirement.name)?;
        let selected = self
            .selector
            .select(requirement, required_by.is_none(), &page)?;
        if selected.is_empty() {
            if required_by.is_none() {
                return Err(DepotError::NoMatchingFiles(requirement.to_string()).into());
            }
            // a dependency nothing matched for: assume it is simply not
            // relevant for our environments
            println!("\tSkipping, no file matches any environment");
            return Ok(DepBatch::new());
        }

        let mut deps = DepBatch::new();
        for file in &selected {
            if let Err(err) = self.process_file(requirement, file, &mut deps) {
                println!("\tFailed processing file {}, skipping it", file.filename);
                warn!("{:?}", err);
            }
        }
        self.processed.insert(requirement);
        Ok(deps)
    }

    fn process_file(
        &self,
        requirement: &Requirement,
        file: &FileRecord,
        deps: &mut DepBatch,
    ) -> Result<()> {
        let target = self
            .index_path
            .join(requirement.name.canonical())
            .join(&file.filename);
        self.fetcher.materialize(file, &target)?;

        let metadata = crate::extract::extract(&target)?;
        let found = match metadata.dependencies() {
            Some(found) => found,
            None => {
                warn!("no readable metadata in {}", file.filename);
                return Ok(());
            }
        };
        for dep in found {
            match deps.entry(dep.canonical()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().extras.extend(parent_extras(requirement));
                }
                Entry::Vacant(entry) => {
                    entry.insert(PendingDep {
                        requirement: dep,
                        required_by: requirement.clone(),
                        extras: parent_extras(requirement).collect(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn parent_extras(requirement: &Requirement) -> impl Iterator<Item = String> + '_ {
    requirement
        .extras
        .iter()
        .map(|extra| extra.canonical().to_owned())
}

fn merge_deps(into: &mut DepBatch, from: DepBatch) {
    for (key, dep) in from {
        match into.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().extras.extend(dep.extras);
            }
            Entry::Vacant(entry) => {
                entry.insert(dep);
            }
        }
    }
}

/// Failures that abandon one requirement's subtree but keep the overall
/// run going: the package is missing from the index, or the index could
/// not be reached at all.
fn abandons_requirement(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DepotError>(),
        Some(DepotError::PackageNotFound(_))
    ) || err.downcast_ref::<ureq::Error>().is_some()
}
