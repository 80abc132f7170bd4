use crate::prelude::*;

/// METADATA / PKG-INFO claim to be RFC 822 messages. In practice the
/// format is "whatever Python's email.parser accepts": `Name: value`
/// header lines, continuation lines indented with space or tab (kept
/// verbatim, embedded newline and all), headers ending at the first blank
/// line, and everything after that blank line being the body. We parse
/// that, a bit more strictly than email.parser does (an empty field name
/// or a leading continuation line is an error here).
#[derive(Debug, Default, PartialEq)]
pub struct Rfc822ish {
    fields: HashMap<String, Vec<String>>,
    pub body: Option<String>,
}

fn valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| (0x21..=0x7e).contains(&b) && b != b':')
}

impl Rfc822ish {
    pub fn parse(input: &str) -> Result<Rfc822ish> {
        let mut parsed = Rfc822ish::default();
        let mut last_key: Option<String> = None;
        let mut rest = input;

        while !rest.is_empty() {
            let (line, tail) = match rest.split_once('\n') {
                Some((line, tail)) => (line, tail),
                None => (rest, ""),
            };
            rest = tail;
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() {
                // end of headers; the remainder is the body
                parsed.body = Some(rest.to_owned());
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match &last_key {
                    Some(key) => {
                        // unwraps can't fail: the entry was pushed when
                        // the key line was seen
                        let value =
                            parsed.fields.get_mut(key).unwrap().last_mut().unwrap();
                        value.push('\n');
                        value.push_str(line);
                    }
                    None => bail!("continuation line at start of metadata"),
                }
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("malformed metadata line {:?}", line))?;
            if !valid_field_name(name) {
                bail!("malformed field name {:?}", name);
            }
            let value = value.trim_start_matches([' ', '\t']).to_owned();
            parsed.fields.entry(name.to_owned()).or_default().push(value);
            last_key = Some(name.to_owned());
        }

        Ok(parsed)
    }

    pub fn take_all(&mut self, key: &str) -> Vec<String> {
        self.fields.remove(key).unwrap_or_default()
    }

    pub fn maybe_take(&mut self, key: &str) -> Result<Option<String>> {
        let mut values = self.take_all(key);
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.pop()),
            _ => bail!("multiple values for singleton field {}", key),
        }
    }

    pub fn take(&mut self, key: &str) -> Result<String> {
        self.maybe_take(key)?
            .ok_or_else(|| anyhow!("missing required field {}", key))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_basic_parse() {
        let mut parsed = Rfc822ish::parse(indoc! {r#"
            A: b
            C: d
               continued

            this is the
            body!
        "#})
        .unwrap();

        assert_eq!(parsed.take_all("A"), vec!["b"]);
        assert_eq!(parsed.take_all("C"), vec!["d\n   continued"]);
        assert_eq!(parsed.body.as_deref(), Some("this is the\nbody!\n"));
    }

    #[test]
    fn test_no_body() {
        let mut parsed = Rfc822ish::parse("no: body\n").unwrap();
        assert_eq!(parsed.take("no").unwrap(), "body");
        assert_eq!(parsed.body, None);

        let mut parsed = Rfc822ish::parse("no: trailing newline").unwrap();
        assert_eq!(parsed.take("no").unwrap(), "trailing newline");
    }

    #[test]
    fn test_repeated_fields() {
        let mut parsed = Rfc822ish::parse(indoc! {r#"
            dup: one
            dup: two
            other: field
            dup: three
        "#})
        .unwrap();

        assert_eq!(parsed.take_all("dup"), vec!["one", "two", "three"]);
        assert!(parsed.maybe_take("other").unwrap().is_some());
        assert!(parsed.maybe_take("missing").unwrap().is_none());
    }

    #[test]
    fn test_singleton_fields() {
        let mut parsed = Rfc822ish::parse("dup: one\ndup: two\n").unwrap();
        assert!(parsed.maybe_take("dup").is_err());

        let mut parsed = Rfc822ish::parse("a: b\n").unwrap();
        assert!(parsed.take("missing").is_err());
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parsed = Rfc822ish::parse("A: b\r\nC: d\r\n").unwrap();
        assert_eq!(parsed.take("A").unwrap(), "b");
        assert_eq!(parsed.take("C").unwrap(), "d");
    }

    #[test]
    fn test_malformed_input() {
        assert!(Rfc822ish::parse("   continuation first\nA: b\n").is_err());
        assert!(Rfc822ish::parse("bad key name: x\n").is_err());
        assert!(Rfc822ish::parse(": no key\n").is_err());
        assert!(Rfc822ish::parse("no colon here\n").is_err());
    }

    #[test]
    fn test_empty_input() {
        let parsed = Rfc822ish::parse("").unwrap();
        assert_eq!(parsed, Rfc822ish::default());
    }
}
