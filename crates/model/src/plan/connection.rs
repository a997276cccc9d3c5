use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    SqlServer,
    AzureSql,
    Oracle,
    MySql,
    PostgreSql,
}

impl Provider {
    pub fn is_valid_target(&self) -> bool {
        matches!(self, Provider::SqlServer | Provider::AzureSql)
    }

    /// Authentication modes each provider accepts; anything else fails
    /// loudly at validation time.
    pub fn supports_auth(&self, auth: AuthMode) -> bool {
        match self {
            Provider::SqlServer => matches!(auth, AuthMode::SqlAuth | AuthMode::WindowsAuth),
            Provider::AzureSql => matches!(
                auth,
                AuthMode::SqlAuth | AuthMode::InteractiveBrowser | AuthMode::CliDelegated
            ),
            Provider::Oracle | Provider::MySql | Provider::PostgreSql => {
                matches!(auth, AuthMode::SqlAuth)
            }
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::SqlServer => "SqlServer",
            Provider::AzureSql => "AzureSql",
            Provider::Oracle => "Oracle",
            Provider::MySql => "MySql",
            Provider::PostgreSql => "PostgreSql",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlserver" => Ok(Provider::SqlServer),
            "azuresql" => Ok(Provider::AzureSql),
            "oracle" => Ok(Provider::Oracle),
            "mysql" => Ok(Provider::MySql),
            "postgresql" | "postgres" => Ok(Provider::PostgreSql),
            other => Err(format!("unknown provider `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    SqlAuth,
    WindowsAuth,
    InteractiveBrowser,
    CliDelegated,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMode::SqlAuth => "SqlAuth",
            AuthMode::WindowsAuth => "WindowsAuth",
            AuthMode::InteractiveBrowser => "InteractiveBrowser",
            AuthMode::CliDelegated => "CliDelegated",
        };
        f.write_str(name)
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlauth" | "sql" => Ok(AuthMode::SqlAuth),
            "windowsauth" | "windows" => Ok(AuthMode::WindowsAuth),
            "interactivebrowser" => Ok(AuthMode::InteractiveBrowser),
            "clidelegated" | "azurecli" => Ok(AuthMode::CliDelegated),
            other => Err(format!("unknown auth mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub provider: Provider,
    pub server: String,
    pub port: Option<u16>,
    pub database: String,
    pub auth: AuthMode,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionDescriptor {
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_providers() {
        assert!(Provider::SqlServer.is_valid_target());
        assert!(Provider::AzureSql.is_valid_target());
        assert!(!Provider::MySql.is_valid_target());
    }

    #[test]
    fn auth_matrix() {
        assert!(Provider::SqlServer.supports_auth(AuthMode::WindowsAuth));
        assert!(!Provider::SqlServer.supports_auth(AuthMode::CliDelegated));
        assert!(Provider::AzureSql.supports_auth(AuthMode::InteractiveBrowser));
        assert!(!Provider::Oracle.supports_auth(AuthMode::WindowsAuth));
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("SQLServer".parse::<Provider>(), Ok(Provider::SqlServer));
        assert_eq!("postgres".parse::<Provider>(), Ok(Provider::PostgreSql));
        assert!("mongodb".parse::<Provider>().is_err());
    }
}
