use crate::prelude::*;

/// PEP 508 environment markers: a little boolean expression language over
/// the attributes of a target environment.
pub mod marker {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Value {
        Variable(String),
        Literal(String),
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum Op {
        Compare(CompareOp),
        In,
        NotIn,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Expr {
        And(Box<Expr>, Box<Expr>),
        Or(Box<Expr>, Box<Expr>),
        Test { op: Op, lhs: Value, rhs: Value },
    }

    impl Value {
        fn resolve(&self, context: &HashMap<String, String>) -> Result<String> {
            match self {
                Value::Variable(name) => context
                    .get(name)
                    .cloned()
                    .ok_or_else(|| anyhow!("no environment marker named {:?}", name)),
                Value::Literal(text) => Ok(text.clone()),
            }
        }
    }

    impl Expr {
        pub fn eval(&self, context: &HashMap<String, String>) -> Result<bool> {
            match self {
                Expr::And(lhs, rhs) => Ok(lhs.eval(context)? && rhs.eval(context)?),
                Expr::Or(lhs, rhs) => Ok(lhs.eval(context)? || rhs.eval(context)?),
                Expr::Test { op, lhs, rhs } => {
                    let lhs_val = lhs.resolve(context)?;
                    let rhs_val = rhs.resolve(context)?;
                    match op {
                        Op::In => Ok(rhs_val.contains(&lhs_val)),
                        Op::NotIn => Ok(!rhs_val.contains(&lhs_val)),
                        Op::Compare(op) => {
                            // Compare as versions when the operands allow
                            // it ("3.7" < "3.10" must be numeric), else
                            // fall back to plain string comparison.
                            if let Ok(lhs_version) = lhs_val.parse::<Version>() {
                                let as_spec = Specifier {
                                    op: *op,
                                    value: rhs_val.clone(),
                                };
                                if let Ok(result) = as_spec.satisfied_by(&lhs_version) {
                                    return Ok(result);
                                }
                            }
                            use CompareOp::*;
                            Ok(match op {
                                LessThanEqual => lhs_val <= rhs_val,
                                StrictlyLessThan => lhs_val < rhs_val,
                                NotEqual => lhs_val != rhs_val,
                                Equal => lhs_val == rhs_val,
                                GreaterThanEqual => lhs_val >= rhs_val,
                                StrictlyGreaterThan => lhs_val > rhs_val,
                                Compatible => bail!("~= requires version operands"),
                            })
                        }
                    }
                }
            }
        }
    }

    impl Display for Value {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Value::Variable(name) => write!(f, "{}", name),
                Value::Literal(text) => write!(f, "\"{}\"", text),
            }
        }
    }

    impl Display for Op {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Op::Compare(op) => write!(f, "{}", op),
                Op::In => write!(f, "in"),
                Op::NotIn => write!(f, "not in"),
            }
        }
    }

    impl Display for Expr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            fn child(expr: &Expr, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if matches!(expr, Expr::Test { .. }) {
                    write!(f, "{}", expr)
                } else {
                    write!(f, "({})", expr)
                }
            }
            match self {
                Expr::And(lhs, rhs) => {
                    child(lhs, f)?;
                    write!(f, " and ")?;
                    child(rhs, f)
                }
                Expr::Or(lhs, rhs) => {
                    child(lhs, f)?;
                    write!(f, " or ")?;
                    child(rhs, f)
                }
                Expr::Test { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            }
        }
    }
}

/// One parsed requirement line: a name, optional extras, an optional
/// specifier set, and an optional environment marker. Immutable value,
/// no lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<Extra>,
    pub specifiers: Specifiers,
    pub marker: Option<marker::Expr>,
}

peg::parser! {
    grammar pep508() for str {
        rule wsp()
            = quiet!{ [' ' | '\t'] }

        rule _()
            = quiet!{ wsp()* }

        rule alnum()
            = quiet!{ ['A'..='Z' | 'a'..='z' | '0'..='9'] } / expected!("letter or digit")

        rule ident() -> &'input str
            = $(alnum() (alnum() / "-" / "_" / ".")*)

        rule cmp_op() -> CompareOp
            = op:$("<=" / "<" / "!=" / "===" / "==" / ">=" / ">" / "~=")
              {? op.try_into().or(Err("supported version operator")) }

        rule version_text() -> &'input str
            = $((alnum() / "-" / "_" / "." / "*" / "+" / "!")+)

        rule one_specifier() -> Specifier
            = _ op:cmp_op() _ v:version_text()
              { Specifier { op, value: v.into() } }

        rule specifier_list() -> Specifiers
            = specs:(one_specifier() ++ (_ ",")) { Specifiers(specs) }

        rule version_set() -> Specifiers
            = ("(" _ s:specifier_list() _ ")" { s }) / specifier_list()

        pub rule specifiers_text() -> Specifiers
            = _ s:(version_set() / "" { Specifiers::default() }) _ { s }

        // PEP 508's python_str_c character set, minus the quote characters.
        rule str_char()
            = quiet!{ [' ' | '\t' | 'A'..='Z' | 'a'..='z' | '0'..='9' | '(' | ')'
                | '.' | '{' | '}' | '-' | '_' | '*' | '#' | ':' | ';' | ','
                | '/' | '?' | '[' | ']' | '!' | '~' | '`' | '@' | '$' | '%'
                | '^' | '&' | '=' | '+' | '|' | '<' | '>'] }
              / expected!("printable character")

        rule quoted_string() -> marker::Value
            = "'" s:$((str_char() / "\"")*) "'" { marker::Value::Literal(s.to_owned()) }
            / "\"" s:$((str_char() / "'")*) "\"" { marker::Value::Literal(s.to_owned()) }

        rule marker_variable() -> marker::Value
            = name:$(
                "python_full_version" / "python_version" / "os_name" / "sys_platform"
                / "platform_release" / "platform_system" / "platform_version"
                / "platform_machine" / "platform_python_implementation"
                / "implementation_name" / "implementation_version" / "extra"
              )
              { marker::Value::Variable(name.to_owned()) }

        rule marker_operand() -> marker::Value
            = _ v:(marker_variable() / quoted_string()) { v }

        rule marker_op() -> marker::Op
            = _ op:cmp_op() { marker::Op::Compare(op) }
            / _ "not" wsp()+ "in" { marker::Op::NotIn }
            / _ "in" { marker::Op::In }

        rule marker_test() -> marker::Expr
            = _ "(" m:marker_expr() _ ")" { m }
            / lhs:marker_operand() op:marker_op() rhs:marker_operand()
              { marker::Expr::Test { op, lhs, rhs } }

        rule marker_and() -> marker::Expr
            = lhs:marker_test() _ "and" _ rhs:marker_and()
              { marker::Expr::And(Box::new(lhs), Box::new(rhs)) }
            / marker_test()

        rule marker_expr() -> marker::Expr
            = lhs:marker_and() _ "or" _ rhs:marker_expr()
              { marker::Expr::Or(Box::new(lhs), Box::new(rhs)) }
            / marker_and()

        rule extra_name() -> Extra
            = e:ident() {? e.try_into().or(Err("extra name")) }

        rule extras_list() -> Vec<Extra>
            = "[" _ extras:(extra_name() ** (_ "," _)) _ "]" { extras }

        rule package() -> PackageName
            = n:ident() {? n.try_into().or(Err("package name")) }

        pub rule requirement() -> Requirement
            = _ name:package()
              _ extras:(extras_list() / "" { Vec::new() })
              _ specifiers:(version_set() / "" { Specifiers::default() })
              _ marker:((";" _ m:marker_expr() { m })?)
              _
              { Requirement { name, extras, specifiers, marker } }
    }
}

pub(crate) fn parse_specifiers(input: &str) -> Result<Specifiers> {
    Ok(pep508::specifiers_text(input)?)
}

impl Requirement {
    pub fn parse(input: &str) -> Result<Requirement> {
        pep508::requirement(input)
            .with_context(|| format!("failed to parse requirement {:?}", input))
    }

    /// Stable canonical rendering: canonical name, extras sorted, the
    /// specifier set's canonical form, then the marker. Two requirements
    /// that render the same are the same.
    pub fn canonical(&self) -> String {
        let mut out = self.name.canonical().to_owned();
        if !self.extras.is_empty() {
            let mut extras: Vec<&str> = self.extras.iter().map(|e| e.canonical()).collect();
            extras.sort_unstable();
            extras.dedup();
            out.push('[');
            out.push_str(&extras.join(","));
            out.push(']');
        }
        if !self.specifiers.is_empty() {
            out.push_str(&self.specifiers.to_string());
        }
        if let Some(marker) = &self.marker {
            out.push_str("; ");
            out.push_str(&marker.to_string());
        }
        out
    }

    /// A simple requirement can be keyed by package name alone: no
    /// marker, no extras, and no upper bound, so whatever latest release
    /// was already mirrored for the name satisfies it.
    pub fn is_simple(&self) -> bool {
        self.marker.is_none()
            && self.extras.is_empty()
            && self.specifiers.0.iter().all(|s| {
                matches!(
                    s.op,
                    CompareOp::StrictlyGreaterThan | CompareOp::GreaterThanEqual
                )
            })
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl TryFrom<&str> for Requirement {
    type Error = anyhow::Error;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        Requirement::parse(input)
    }
}

try_from_str_boilerplate!(Requirement);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_full_requirement() {
        let r = Requirement::parse("twisted[tls] >= 20, != 20.1.*; python_version >= '3'")
            .unwrap();
        assert_eq!(r.name.canonical(), "twisted");
        assert_eq!(r.extras.len(), 1);
        assert_eq!(r.extras[0].canonical(), "tls");
        assert_eq!(r.specifiers.0.len(), 2);
        assert!(r.marker.is_some());
    }

    #[test]
    fn test_bare_name() {
        let r = Requirement::parse("requests").unwrap();
        assert!(r.extras.is_empty());
        assert!(r.specifiers.is_empty());
        assert!(r.marker.is_none());
    }

    #[test]
    fn test_parenthesized_specifiers() {
        let r = Requirement::parse("attrs (>=19.2.0)").unwrap();
        assert_eq!(r.specifiers.to_string(), ">=19.2.0");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Requirement::parse("foo >").is_err());
        assert!(Requirement::parse("foo ?= 3").is_err());
        assert!(Requirement::parse("foo === 3").is_err());
    }

    #[test]
    fn test_canonical_rendering() {
        let r = Requirement::parse("Foo_Bar[Extra2,extra1] <2 , >=1.0").unwrap();
        assert_eq!(r.canonical(), "foo-bar[extra1,extra2]<2,>=1.0");

        // rendering is a fixed point of parse
        let again = Requirement::parse(&r.canonical()).unwrap();
        assert_eq!(again.canonical(), r.canonical());
    }

    #[test]
    fn test_marker_round_trip() {
        let r = Requirement::parse(
            r#"baz; (os_name == "posix" or os_name == "nt") and python_version >= "3.8""#,
        )
        .unwrap();
        let again = Requirement::parse(&r.canonical()).unwrap();
        assert_eq!(r.marker, again.marker);
    }

    #[test]
    fn test_marker_eval() {
        let context: HashMap<String, String> = [
            ("sys_platform", "linux"),
            ("python_version", "3.11"),
            ("extra", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let eval = |text: &str| {
            Requirement::parse(text)
                .unwrap()
                .marker
                .unwrap()
                .eval(&context)
                .unwrap()
        };

        assert!(!eval(r#"baz; sys_platform == "win32""#));
        assert!(eval(r#"baz; sys_platform == "linux""#));
        // numeric, not lexicographic: "3.11" >= "3.9"
        assert!(eval(r#"baz; python_version >= "3.9""#));
        assert!(eval(r#"baz; python_version == "3.*""#));
        assert!(!eval(r#"baz; extra == "tests""#));
        assert!(eval(r#"baz; sys_platform == "win32" or python_version >= "3""#));
    }

    #[test]
    fn test_marker_eval_missing_variable() {
        let r = Requirement::parse(r#"baz; os_name == "posix""#).unwrap();
        assert!(r.marker.unwrap().eval(&HashMap::new()).is_err());
    }

    #[test]
    fn test_simple_case_classification() {
        let simple = |s: &str| Requirement::parse(s).unwrap().is_simple();
        assert!(simple("foo"));
        assert!(simple("foo >= 1.2"));
        assert!(simple("foo > 1, >= 2"));
        assert!(!simple("foo == 1.2"));
        assert!(!simple("foo >= 1, < 2"));
        assert!(!simple("foo[extra]"));
        assert!(!simple(r#"foo; os_name == "posix""#));
    }
}
