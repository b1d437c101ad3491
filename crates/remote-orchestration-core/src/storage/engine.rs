//! Database engine kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Relational engine backing the main store
///
/// Exactly one kind is active per process; it is resolved once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Embedded single-file engine, needs no server process
    #[default]
    Sqlite,
    SqlServer,
    #[serde(rename = "postgresql")]
    Postgres,
    MySql,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Sqlite,
        EngineKind::SqlServer,
        EngineKind::Postgres,
        EngineKind::MySql,
    ];

    /// Canonical `database:type` value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::SqlServer => "sqlserver",
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
        }
    }

    /// Parse a `database:type` value, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "sqlserver" | "mssql" => Some(Self::SqlServer),
            "postgresql" | "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            _ => None,
        }
    }

    /// Whether the engine runs in-process against a local file
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Default TCP port for server engines
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Sqlite => None,
            Self::SqlServer => Some(1433),
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
        }
    }

    /// Default login for server engines
    pub fn default_user(&self) -> Option<&'static str> {
        match self {
            Self::Sqlite => None,
            Self::SqlServer => Some("sa"),
            Self::Postgres => Some("postgres"),
            Self::MySql => Some("root"),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::UnresolvableEngineSetting(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(EngineKind::parse("SQLite"), Some(EngineKind::Sqlite));
        assert_eq!(EngineKind::parse("PostgreSQL"), Some(EngineKind::Postgres));
        assert_eq!(EngineKind::parse(" MySQL "), Some(EngineKind::MySql));
        assert_eq!(EngineKind::parse("SqlServer"), Some(EngineKind::SqlServer));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(EngineKind::parse("postgres"), Some(EngineKind::Postgres));
        assert_eq!(EngineKind::parse("mssql"), Some(EngineKind::SqlServer));
    }

    #[test]
    fn test_unknown_engine_is_unresolvable() {
        assert_eq!(EngineKind::parse("oracle"), None);
        assert_eq!(EngineKind::parse(""), None);
        let err = "oracle".parse::<EngineKind>().unwrap_err();
        assert!(matches!(err, Error::UnresolvableEngineSetting(v) if v == "oracle"));
    }

    #[test]
    fn test_as_str_round_trips() {
        for kind in EngineKind::ALL {
            assert_eq!(EngineKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_defaults_table() {
        assert_eq!(EngineKind::default(), EngineKind::Sqlite);
        assert_eq!(EngineKind::SqlServer.default_port(), Some(1433));
        assert_eq!(EngineKind::Postgres.default_port(), Some(5432));
        assert_eq!(EngineKind::MySql.default_port(), Some(3306));
        assert_eq!(EngineKind::Postgres.default_user(), Some("postgres"));
        assert_eq!(EngineKind::Sqlite.default_port(), None);
    }

    #[test]
    fn test_serde_uses_setting_names() {
        let json = serde_json::to_string(&EngineKind::Postgres).unwrap();
        assert_eq!(json, "\"postgresql\"");
        let kind: EngineKind = serde_json::from_str("\"sqlserver\"").unwrap();
        assert_eq!(kind, EngineKind::SqlServer);
    }
}
