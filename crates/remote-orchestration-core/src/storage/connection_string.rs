//! Connection string building and parsing
//!
//! Builds `Key=Value;` connection strings from storage settings, filling gaps
//! with per-engine defaults. Building is pure: the same engine and settings
//! always produce the same string.
//!
//! Values containing `;`, quotes or surrounding whitespace are written in
//! double quotes with embedded `"` doubled (`Password="a;b ""c"""`). The
//! parser accepts double or single quoted values.

use std::borrow::Cow;

use super::engine::EngineKind;
use super::settings::{
    DEFAULT_DATABASE_NAME, DEFAULT_FILENAME, DEFAULT_HOST, KEY_CACHE, KEY_FILENAME, KEY_HOST,
    KEY_NAME, KEY_PASSWORD, KEY_POOLING, KEY_PORT, KEY_USER, StorageSettings,
};
use crate::error::{Error, Result};

/// Keys whose values are masked when a connection string is displayed
const SECRET_KEYS: [&str; 2] = ["password", "pwd"];

const REDACTED: &str = "***";

/// Build the connection string for an engine from (possibly incomplete) settings
///
/// A `DatabaseConnectionString` override is returned verbatim for any engine.
/// The embedded engine always gets `Pooling=False;Cache=Shared` unless the
/// settings choose otherwise.
pub fn build_connection_string(kind: EngineKind, settings: &StorageSettings) -> String {
    if let Some(full) = settings.connection_string_override() {
        return full.to_string();
    }

    let host = settings.get(KEY_HOST).unwrap_or(DEFAULT_HOST);
    let name = quote(settings.get(KEY_NAME).unwrap_or(DEFAULT_DATABASE_NAME));
    let password = quote(settings.get(KEY_PASSWORD).unwrap_or(""));
    let port = settings
        .get(KEY_PORT)
        .map(str::to_string)
        .or_else(|| kind.default_port().map(|p| p.to_string()))
        .unwrap_or_default();
    let user = quote(
        settings
            .get(KEY_USER)
            .or(kind.default_user())
            .unwrap_or_default(),
    );

    match kind {
        EngineKind::Sqlite => {
            let filename = quote(settings.get(KEY_FILENAME).unwrap_or(DEFAULT_FILENAME));
            let pooling = quote(settings.get(KEY_POOLING).unwrap_or("False"));
            let cache = quote(settings.get(KEY_CACHE).unwrap_or("Shared"));
            format!("Data Source={filename};Pooling={pooling};Cache={cache}")
        }
        EngineKind::SqlServer => {
            let server = format!("{host},{port}");
            let server = quote(&server);
            format!(
                "Server={server};Database={name};User Id={user};Password={password};TrustServerCertificate=True"
            )
        }
        EngineKind::Postgres => {
            let (host, port) = (quote(host), quote(&port));
            format!("Host={host};Port={port};Database={name};Username={user};Password={password}")
        }
        EngineKind::MySql => {
            let (host, port) = (quote(host), quote(&port));
            format!("Server={host};Port={port};Database={name};User={user};Password={password}")
        }
    }
}

/// Quote a value that would otherwise break `Key=Value;` parsing
fn quote(value: &str) -> Cow<'_, str> {
    if value.contains([';', '"', '\'']) || value.trim() != value {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Resolved engine plus connection string; derived every startup, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub kind: EngineKind,
    pub connection_string: String,
}

impl ConnectionDescriptor {
    pub fn new(kind: EngineKind, connection_string: impl Into<String>) -> Self {
        Self {
            kind,
            connection_string: connection_string.into(),
        }
    }

    /// Build the descriptor for an engine from settings
    pub fn resolve(kind: EngineKind, settings: &StorageSettings) -> Self {
        Self::new(kind, build_connection_string(kind, settings))
    }

    /// The embedded engine against its fixed default file
    pub fn embedded_default() -> Self {
        Self::resolve(EngineKind::Sqlite, &StorageSettings::new())
    }

    pub fn is_embedded_default(&self) -> bool {
        *self == Self::embedded_default()
    }

    /// Connection string with credentials masked, safe for logs
    pub fn redacted(&self) -> String {
        redact(&self.connection_string)
    }
}

/// Mask passwords in either `Key=Value;` or URL form
///
/// A `Key=Value;` string that cannot be parsed is masked entirely.
pub fn redact(connection_string: &str) -> String {
    if is_url(connection_string) {
        return redact_url(connection_string);
    }

    let Ok(segments) = segments(connection_string) else {
        return REDACTED.to_string();
    };

    segments
        .iter()
        .map(|segment| {
            if !segment.value.is_empty()
                && SECRET_KEYS.contains(&segment.key.to_lowercase().as_str())
            {
                format!("{}={REDACTED}", segment.key)
            } else {
                format!("{}={}", segment.key, quote(&segment.value))
            }
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &url[authority_start..];
    let authority_len = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_len];

    match authority.rfind('@') {
        Some(at) => match authority[..at].split_once(':') {
            Some((user, _)) => format!(
                "{}{user}:{REDACTED}{}",
                &url[..authority_start],
                &url[authority_start + at..]
            ),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}

/// Whether the string is driver URL form (`postgres://...`, `sqlite:...`)
pub fn is_url(connection_string: &str) -> bool {
    let s = connection_string.trim_start();
    s.contains("://") || s.starts_with("sqlite:")
}

/// One `Key=Value` pair as written, with the value unquoted
struct Segment<'a> {
    key: &'a str,
    value: String,
}

fn segments(s: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = s;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if rest.is_empty() {
            return Ok(segments);
        }

        let part = rest.split(';').next().unwrap_or(rest).trim();
        let Some(eq) = rest
            .find(['=', ';'])
            .filter(|&i| rest[i..].starts_with('='))
        else {
            return Err(Error::InvalidConnectionString(format!(
                "segment '{}' has no '='",
                part
            )));
        };
        let key = rest[..eq].trim();
        if key.is_empty() {
            return Err(Error::InvalidConnectionString(format!(
                "segment '{}' has an empty key",
                part
            )));
        }

        let after = rest[eq + 1..].trim_start();
        let (value, remainder) = match after.chars().next() {
            Some(q @ ('"' | '\'')) => unquote(&after[1..], q).ok_or_else(|| {
                Error::InvalidConnectionString(format!("unterminated quoted value for '{}'", key))
            })?,
            _ => {
                let end = after.find(';').unwrap_or(after.len());
                (after[..end].trim_end().to_string(), &after[end..])
            }
        };

        let remainder = remainder.trim_start();
        if !remainder.is_empty() && !remainder.starts_with(';') {
            return Err(Error::InvalidConnectionString(format!(
                "unexpected text after quoted value for '{}'",
                key
            )));
        }

        segments.push(Segment { key, value });
        rest = remainder;
    }
}

/// Read up to the closing quote; a doubled quote is a literal one
fn unquote(s: &str, quote: char) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != quote {
            value.push(c);
        } else if chars.peek().map(|&(_, next)| next) == Some(quote) {
            chars.next();
            value.push(quote);
        } else {
            return Some((value, &s[i + c.len_utf8()..]));
        }
    }
    None
}

/// Parsed `Key=Value;` connection string with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self> {
        let pairs: Vec<_> = segments(s)?
            .into_iter()
            .map(|segment| (segment.key.to_lowercase(), segment.value))
            .collect();

        if pairs.is_empty() {
            return Err(Error::InvalidConnectionString(
                "connection string is empty".to_string(),
            ));
        }
        Ok(Self { pairs })
    }

    /// First value among the given aliases, in alias order
    pub fn get(&self, aliases: &[&str]) -> Option<&str> {
        aliases.iter().find_map(|alias| {
            self.pairs
                .iter()
                .find(|(k, _)| k == alias)
                .map(|(_, v)| v.as_str())
        })
    }

    /// Required value, error names the first alias
    pub fn require(&self, aliases: &[&str]) -> Result<&str> {
        self.get(aliases)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::InvalidConnectionString(format!("missing '{}'", aliases[0]))
            })
    }

    /// Optional port value, validated
    pub fn port(&self, aliases: &[&str]) -> Result<Option<u16>> {
        match self.get(aliases).filter(|v| !v.is_empty()) {
            Some(raw) => raw.parse::<u16>().map(Some).map_err(|_| {
                Error::InvalidConnectionString(format!("invalid port '{}'", raw))
            }),
            None => Ok(None),
        }
    }

    /// Interpret a value as a boolean flag (`True`/`False`/`yes`/`1`...)
    pub fn flag(&self, aliases: &[&str]) -> Option<bool> {
        self.get(aliases)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "yes" | "1"))
    }
}
