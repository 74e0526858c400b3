//! Connection strings.
//!
//! PostgreSQL accepts two equivalent forms:
//!
//! - the URI form, `postgres://user@host:port/dbname?sslmode=require`
//! - the keyword/value form, `host='h' port=5432 dbname='d'`
//!
//! In the keyword/value form every string value is single-quoted, and a
//! literal `'` or `\` inside a value is escaped with a backslash. Both
//! builders here round-trip through [`ConnInfo::parse`] for any
//! printable value.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::{PgError, PgResult};

// ============================================================================
// ConnInfo
// ============================================================================

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnInfo {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sslmode: Option<String>,
    /// Keywords we carry through without interpreting.
    pub extra: BTreeMap<String, String>,
}

impl ConnInfo {
    /// Creates a connection descriptor for a host, port and database.
    pub fn new(host: impl Into<String>, port: u16, dbname: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            dbname: dbname.into(),
            ..Self::default()
        }
    }

    /// Sets the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the `sslmode` keyword.
    pub fn with_sslmode(mut self, sslmode: impl Into<String>) -> Self {
        self.sslmode = Some(sslmode.into());
        self
    }

    /// Adds an uninterpreted keyword.
    pub fn with_keyword(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Renders the keyword/value form.
    ///
    /// String values are always single-quoted; `'` and `\` are escaped
    /// with a backslash.
    pub fn to_keyword_value(&self) -> String {
        let mut out = String::new();
        push_field(&mut out, "host", &self.host);
        let _ = write!(out, " port={}", self.port);
        push_field(&mut out, "dbname", &self.dbname);
        if let Some(user) = &self.user {
            push_field(&mut out, "user", user);
        }
        if let Some(password) = &self.password {
            push_field(&mut out, "password", password);
        }
        if let Some(sslmode) = &self.sslmode {
            push_field(&mut out, "sslmode", sslmode);
        }
        for (key, value) in &self.extra {
            push_field(&mut out, key, value);
        }
        out
    }

    /// Renders the URI form, percent-encoding reserved characters.
    pub fn to_uri(&self) -> String {
        let mut out = String::from("postgres://");
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => {
                let _ = write!(out, "{}:{}@", percent_encode(user), percent_encode(password));
            }
            (Some(user), None) => {
                let _ = write!(out, "{}@", percent_encode(user));
            }
            _ => {}
        }
        let _ = write!(
            out,
            "{}:{}/{}",
            percent_encode(&self.host),
            self.port,
            percent_encode(&self.dbname)
        );
        let mut sep = '?';
        if let Some(sslmode) = &self.sslmode {
            let _ = write!(out, "{sep}sslmode={}", percent_encode(sslmode));
            sep = '&';
        }
        for (key, value) in &self.extra {
            let _ = write!(out, "{sep}{}={}", percent_encode(key), percent_encode(value));
            sep = '&';
        }
        out
    }

    /// Parses either connection string form.
    pub fn parse(s: &str) -> PgResult<Self> {
        let trimmed = s.trim();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            Self::parse_uri(trimmed)
        } else {
            Self::parse_keyword_value(trimmed)
        }
    }

    fn parse_keyword_value(s: &str) -> PgResult<Self> {
        let mut info = ConnInfo::default();
        let mut chars = s.chars().peekable();

        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            for c in chars.by_ref() {
                if c == '=' {
                    break;
                }
                if c.is_whitespace() {
                    return Err(PgError::ConnInfo(format!(
                        "keyword {key:?} has no value in {s:?}"
                    )));
                }
                key.push(c);
            }
            if key.is_empty() {
                return Err(PgError::ConnInfo(format!("empty keyword in {s:?}")));
            }

            let value = if chars.peek() == Some(&'\'') {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => {
                                return Err(PgError::ConnInfo(format!(
                                    "dangling backslash in {s:?}"
                                )))
                            }
                        },
                        '\'' => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(PgError::ConnInfo(format!("unterminated quote in {s:?}")));
                }
                value
            } else {
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value
            };

            info.set_keyword(&key, value)?;
        }

        Ok(info)
    }

    fn parse_uri(s: &str) -> PgResult<Self> {
        let rest = s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
            .ok_or_else(|| PgError::ConnInfo(format!("not a database URI: {s:?}")))?;

        let (before_query, query) = match rest.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (rest, None),
        };
        let (authority, path) = match before_query.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (before_query, None),
        };

        let mut info = ConnInfo::default();

        let hostport = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => {
                match userinfo.split_once(':') {
                    Some((user, password)) => {
                        info.user = Some(percent_decode(user)?);
                        info.password = Some(percent_decode(password)?);
                    }
                    None => info.user = Some(percent_decode(userinfo)?),
                }
                hostport
            }
            None => authority,
        };

        match hostport.rsplit_once(':') {
            Some((host, port)) => {
                info.host = percent_decode(host)?;
                info.port = port
                    .parse()
                    .map_err(|_| PgError::ConnInfo(format!("invalid port in {s:?}")))?;
            }
            None => {
                info.host = percent_decode(hostport)?;
                info.port = 5432;
            }
        }

        if let Some(path) = path {
            info.dbname = percent_decode(path)?;
        }

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| PgError::ConnInfo(format!("bad query parameter {pair:?}")))?;
                info.set_keyword(&percent_decode(key)?, percent_decode(value)?)?;
            }
        }

        Ok(info)
    }

    fn set_keyword(&mut self, key: &str, value: String) -> PgResult<()> {
        match key {
            "host" | "hostaddr" => self.host = value,
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| PgError::ConnInfo(format!("invalid port {value:?}")))?;
            }
            "dbname" => self.dbname = value,
            "user" => self.user = Some(value),
            "password" => self.password = Some(value),
            "sslmode" => self.sslmode = Some(value),
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ConnInfo {
    /// The URI form, with the password elided.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut safe = self.clone();
        safe.password = None;
        f.write_str(&safe.to_uri())
    }
}

// ============================================================================
// Escaping helpers
// ============================================================================

fn push_field(out: &mut String, key: &str, value: &str) {
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(key);
    out.push('=');
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if is_unreserved(byte as char) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn percent_decode(s: &str) -> PgResult<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .ok_or_else(|| PgError::ConnInfo(format!("truncated percent escape in {s:?}")))?;
            let hex = std::str::from_utf8(hex)
                .map_err(|_| PgError::ConnInfo(format!("bad percent escape in {s:?}")))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| PgError::ConnInfo(format!("bad percent escape in {s:?}")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| PgError::ConnInfo(format!("non-utf8 value in {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_value_round_trips_plain_fields() {
        let info = ConnInfo::new("db.example.com", 6432, "appdb").with_user("app");
        let rendered = info.to_keyword_value();
        assert_eq!(
            rendered,
            "host='db.example.com' port=6432 dbname='appdb' user='app'"
        );
        assert_eq!(ConnInfo::parse(&rendered).unwrap(), info);
    }

    #[test]
    fn keyword_value_escapes_quotes_and_backslashes() {
        let info = ConnInfo::new("localhost", 5432, "it's a db").with_user(r"do\main'user");
        let rendered = info.to_keyword_value();
        assert!(rendered.contains(r"dbname='it\'s a db'"));
        assert!(rendered.contains(r"user='do\\main\'user'"));
        assert_eq!(ConnInfo::parse(&rendered).unwrap(), info);
    }

    #[test]
    fn keyword_value_round_trips_all_printable_ascii() {
        let nasty: String = (0x20u8..0x7f).map(|b| b as char).collect();
        let info = ConnInfo::new("localhost", 5432, nasty.clone())
            .with_user(nasty.clone())
            .with_password(nasty);
        let rendered = info.to_keyword_value();
        assert_eq!(ConnInfo::parse(&rendered).unwrap(), info);
    }

    #[test]
    fn uri_round_trips() {
        let info = ConnInfo::new("db.example.com", 5433, "postgres")
            .with_user("steward")
            .with_sslmode("require");
        let uri = info.to_uri();
        assert_eq!(
            uri,
            "postgres://steward@db.example.com:5433/postgres?sslmode=require"
        );
        assert_eq!(ConnInfo::parse(&uri).unwrap(), info);
    }

    #[test]
    fn uri_percent_encodes_awkward_values() {
        let info = ConnInfo::new("localhost", 5432, "my db/prod").with_user("user@corp");
        let uri = info.to_uri();
        assert!(uri.contains("user%40corp@"));
        assert!(uri.contains("my%20db%2Fprod"));
        assert_eq!(ConnInfo::parse(&uri).unwrap(), info);
    }

    #[test]
    fn uri_without_port_defaults_to_5432() {
        let info = ConnInfo::parse("postgres://monitor.internal/steward").unwrap();
        assert_eq!(info.host, "monitor.internal");
        assert_eq!(info.port, 5432);
        assert_eq!(info.dbname, "steward");
    }

    #[test]
    fn unknown_keywords_are_preserved() {
        let parsed =
            ConnInfo::parse("host='h' port=5432 dbname='d' connect_timeout='10'").unwrap();
        assert_eq!(parsed.extra.get("connect_timeout").map(String::as_str), Some("10"));
        assert!(parsed.to_keyword_value().contains("connect_timeout='10'"));
    }

    #[test]
    fn malformed_strings_are_rejected() {
        assert!(ConnInfo::parse("host='unterminated").is_err());
        assert!(ConnInfo::parse("host='trailing\\").is_err());
        assert!(ConnInfo::parse("=nokey").is_err());
        assert!(ConnInfo::parse("port='eleven' host='h'").is_err());
        assert!(ConnInfo::parse("postgres://h:notaport/db").is_err());
    }

    #[test]
    fn display_elides_the_password() {
        let info = ConnInfo::new("h", 5432, "d").with_user("u").with_password("hunter2");
        assert!(!format!("{info}").contains("hunter2"));
    }
}
