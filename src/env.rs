use crate::config::Properties;
use crate::prelude::*;

// Marker keys that must be spelled out in every [env.*] section; the
// remaining PEP 508 keys get empty-string defaults.
const REQUIRED_KEYS: &[&str] = &[
    "os_name",
    "platform_python_implementation",
    "python_version",
    "implementation_name",
    "sys_platform",
    "platform_machine",
];

const DEFAULTED_KEYS: &[&str] = &[
    "platform_release",
    "platform_version",
    "implementation_version",
    "extra",
];

/// One target environment: the marker values describing it, the Python
/// version used for compatibility checks, and the compiled wheel-platform
/// filter. Built once from a config section, immutable afterwards.
#[derive(Debug, Clone)]
pub struct TargetEnv {
    pub name: String,
    vars: HashMap<String, String>,
    python_version: String,
    platform_regex: Regex,
}

impl TargetEnv {
    pub fn from_properties(name: &str, props: &Properties) -> Result<TargetEnv> {
        let mut vars: HashMap<String, String> = props
            .keys()
            .into_iter()
            .filter_map(|key| props.get(key).map(|value| (key.to_owned(), value)))
            .collect();
        for key in REQUIRED_KEYS {
            if !vars.contains_key(*key) {
                bail!("environment {:?} is missing required key {:?}", name, key);
            }
        }
        for key in DEFAULTED_KEYS {
            vars.entry((*key).to_owned()).or_default();
        }

        // prefer the exact interpreter version when the config gives one;
        // unwrap can't fail, python_version is a required key
        let python_version = vars
            .get("python_full_version")
            .or_else(|| vars.get("python_version"))
            .cloned()
            .unwrap();

        let pattern = match vars.get("platform_tag") {
            Some(explicit) => explicit.clone(),
            None => format!(
                ".*{}.*{}",
                &vars["sys_platform"], &vars["platform_machine"]
            ),
        };
        let platform_regex = Regex::new(&format!("^(?:{})$", pattern))
            .with_context(|| format!("bad platform_tag in environment {:?}", name))?;

        Ok(TargetEnv {
            name: name.to_owned(),
            vars,
            python_version,
            platform_regex,
        })
    }

    /// `python_full_version` when configured, else `python_version`.
    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    /// Whole-string match of a wheel platform tag against this
    /// environment's platform filter.
    pub fn platform_regex(&self) -> &Regex {
        &self.platform_regex
    }

    /// The marker-evaluation context, with `extra` set to the
    /// comma-joined extras the depending requirement asked for.
    pub fn marker_context(&self, extras: &[Extra]) -> HashMap<String, String> {
        let mut context = self.vars.clone();
        if !extras.is_empty() {
            let joined = extras
                .iter()
                .map(|e| e.canonical())
                .collect::<Vec<_>>()
                .join(",");
            context.insert("extra".to_owned(), joined);
        }
        context
    }
}

/// Build one environment per `[env.<name>]` section (sub-sections such as
/// `env.local.nt` count as their own environments).
pub fn environments_from_config(config: &crate::config::Config) -> Result<Vec<TargetEnv>> {
    static ENV_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^env\.(.+)$").unwrap());

    let names: Vec<String> = config
        .section_names()
        .filter_map(|section| {
            ENV_SECTION
                .captures(section)
                .map(|c| c.get(1).unwrap().as_str().to_owned())
        })
        .collect();

    names
        .iter()
        .map(|name| {
            let props = config
                .section(&format!("env.{}", name))
                .expect("section name came from the config");
            TargetEnv::from_properties(name, props)
        })
        .collect()
}

/// A requirement applies when it has no marker, or when its marker is
/// true in at least one environment. A marker that fails to evaluate
/// counts as "not relevant" rather than an error.
pub fn requirement_relevant(
    requirement: &Requirement,
    envs: &[TargetEnv],
    extras: &[Extra],
) -> bool {
    let marker = match &requirement.marker {
        None => return true,
        Some(marker) => marker,
    };
    envs.iter().any(|env| {
        match marker.eval(&env.marker_context(extras)) {
            Ok(relevant) => relevant,
            Err(err) => {
                warn!(
                    "could not evaluate marker of {} for env {}: {:#}",
                    requirement, env.name, err
                );
                false
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use indoc::indoc;

    pub(crate) fn linux_env() -> TargetEnv {
        let config = Config::parse(indoc! {"
            [env.linux]
            os_name = posix
            platform_python_implementation = CPython
            python_version = 3.11
            python_full_version = 3.11.4
            implementation_name = cpython
            sys_platform = linux
            platform_machine = x86_64
        "})
        .unwrap();
        environments_from_config(&config).unwrap().pop().unwrap()
    }

    #[test]
    fn test_environment_from_config() {
        let env = linux_env();
        assert_eq!(env.name, "linux");
        assert_eq!(env.python_version(), "3.11.4");
        // synthesized platform filter: .*linux.*x86_64
        assert!(env.platform_regex().is_match("manylinux_2_17_x86_64"));
        assert!(!env.platform_regex().is_match("win_amd64"));
        assert!(!env.platform_regex().is_match("manylinux_2_17_aarch64"));
    }

    #[test]
    fn test_explicit_platform_tag() {
        let config = Config::parse(indoc! {"
            [env.win]
            os_name = nt
            platform_python_implementation = CPython
            python_version = 3.11
            implementation_name = cpython
            sys_platform = win32
            platform_machine = AMD64
            platform_tag = (win_amd64|win32)
        "})
        .unwrap();
        let env = environments_from_config(&config).unwrap().pop().unwrap();
        assert_eq!(env.python_version(), "3.11");
        assert!(env.platform_regex().is_match("win_amd64"));
        assert!(!env.platform_regex().is_match("manylinux1_x86_64"));
    }

    #[test]
    fn test_missing_required_key() {
        let config = Config::parse(indoc! {"
            [env.broken]
            os_name = posix
        "})
        .unwrap();
        assert!(environments_from_config(&config).is_err());
    }

    #[test]
    fn test_marker_context_defaults() {
        let env = linux_env();
        let context = env.marker_context(&[]);
        assert_eq!(context["extra"], "");
        assert_eq!(context["platform_release"], "");
        assert_eq!(context["sys_platform"], "linux");

        let extras = vec!["socks".parse().unwrap()];
        assert_eq!(env.marker_context(&extras)["extra"], "socks");
    }

    #[test]
    fn test_requirement_relevance() {
        let envs = vec![linux_env()];
        let relevant = |text: &str, extras: &[Extra]| {
            requirement_relevant(&Requirement::parse(text).unwrap(), &envs, extras)
        };

        assert!(relevant("foo", &[]));
        assert!(relevant(r#"foo; sys_platform == "linux""#, &[]));
        assert!(!relevant(r#"foo; sys_platform == "win32""#, &[]));
        assert!(!relevant(r#"foo; extra == "socks""#, &[]));
        assert!(relevant(
            r#"foo; extra == "socks""#,
            &["socks".parse().unwrap()]
        ));
        assert!(relevant(r#"foo; python_version >= "3.8""#, &[]));
    }
}
