use crate::dispatch::Operation;

/// Methods the keyed route answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl KeyMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "GET" => Some(KeyMethod::Get),
            "POST" => Some(KeyMethod::Post),
            "PUT" => Some(KeyMethod::Put),
            "DELETE" => Some(KeyMethod::Delete),
            _ => None,
        }
    }

    /// Whether the operation carries a request body.
    pub fn has_body(self) -> bool {
        matches!(self, KeyMethod::Post | KeyMethod::Put)
    }

    /// Build the operation for `key`. POST and PUT are the same write.
    pub fn operation(self, key: String, body: Vec<u8>) -> Operation {
        match self {
            KeyMethod::Get => Operation::Read { key },
            KeyMethod::Post | KeyMethod::Put => Operation::Write { key, body },
            KeyMethod::Delete => Operation::Delete { key },
        }
    }
}

/// Extract the key from `/{key}`.
///
/// The query string is ignored and the path is percent-decoded before
/// matching, so the decoded key must be one non-empty segment: `/a%2Fb`
/// decodes to `/a/b` and does not match.
pub fn parse_key_route(url: &str) -> Option<String> {
    let raw = url.split_once('?').map_or(url, |(path, _)| path);
    let path = percent_decode(raw)?;
    let key = path.strip_prefix('/')?;
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key.to_owned())
}

fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_value(*bytes.get(i + 1)?)?;
            let lo = hex_value(*bytes.get(i + 2)?)?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_key() {
        assert_eq!(parse_key_route("/foo").as_deref(), Some("foo"));
    }

    #[test]
    fn parse_ignores_query() {
        assert_eq!(parse_key_route("/foo?pretty=1").as_deref(), Some("foo"));
    }

    #[test]
    fn parse_decodes_escapes() {
        assert_eq!(parse_key_route("/hello%20world").as_deref(), Some("hello world"));
        assert_eq!(parse_key_route("/caf%C3%A9").as_deref(), Some("café"));
    }

    #[test]
    fn parse_rejects_encoded_slash() {
        assert!(parse_key_route("/a%2Fb").is_none());
        assert!(parse_key_route("/a%2fb").is_none());
        assert!(parse_key_route("%2Ffoo").is_none());
    }

    #[test]
    fn parse_rejects_bad_escapes() {
        assert!(parse_key_route("/bad%zz").is_none());
        assert!(parse_key_route("/trunc%4").is_none());
        assert!(parse_key_route("/notutf8%FF").is_none());
    }

    #[test]
    fn parse_rejects_root_and_nested_paths() {
        assert!(parse_key_route("/").is_none());
        assert!(parse_key_route("").is_none());
        assert!(parse_key_route("/a/b").is_none());
        assert!(parse_key_route("/foo/").is_none());
        assert!(parse_key_route("foo").is_none());
    }

    #[test]
    fn methods_map_to_operations() {
        let get = KeyMethod::parse("GET").unwrap();
        assert!(!get.has_body());
        assert_eq!(
            get.operation("k".into(), Vec::new()),
            Operation::Read { key: "k".into() }
        );

        for m in ["POST", "PUT"] {
            let write = KeyMethod::parse(m).unwrap();
            assert!(write.has_body());
            assert_eq!(
                write.operation("k".into(), b"{}".to_vec()),
                Operation::Write {
                    key: "k".into(),
                    body: b"{}".to_vec()
                }
            );
        }

        assert_eq!(
            KeyMethod::parse("DELETE")
                .unwrap()
                .operation("k".into(), Vec::new()),
            Operation::Delete { key: "k".into() }
        );
        assert!(KeyMethod::parse("PATCH").is_none());
        assert!(KeyMethod::parse("get").is_none());
    }
}
