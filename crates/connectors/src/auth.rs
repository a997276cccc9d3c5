//! Credential resolution for the five providers. SqlAuth credentials
//! missing from the configuration are solicited interactively before any
//! connection attempt; Azure AAD modes delegate token acquisition to the
//! Azure CLI.

use crate::error::ConnectorError;
use model::plan::connection::{AuthMode, ConnectionDescriptor, Provider};
use std::io::{self, BufRead, Write};
use tokio::process::Command;
use tracing::{debug, info};

const AZURE_SQL_RESOURCE: &str = "https://database.windows.net/";

#[derive(Debug, Clone)]
pub struct SqlCredentials {
    pub username: String,
    pub password: String,
}

/// Fully resolved authentication material, ready to hand to a driver.
#[derive(Debug, Clone)]
pub enum ResolvedAuth {
    Sql(SqlCredentials),
    Windows,
    AadToken(String),
}

/// Validates the (provider, auth mode) pair and produces connectable
/// credentials, prompting or shelling out as the mode requires.
pub async fn resolve(descriptor: &ConnectionDescriptor) -> Result<ResolvedAuth, ConnectorError> {
    if !descriptor.provider.supports_auth(descriptor.auth) {
        return Err(ConnectorError::UnsupportedAuth {
            provider: descriptor.provider,
            auth: descriptor.auth,
        });
    }

    match descriptor.auth {
        AuthMode::SqlAuth => {
            let credentials = match (&descriptor.username, &descriptor.password) {
                (Some(user), Some(pass)) => SqlCredentials {
                    username: user.clone(),
                    password: pass.clone(),
                },
                _ => prompt_credentials(descriptor)?,
            };
            Ok(ResolvedAuth::Sql(credentials))
        }
        AuthMode::WindowsAuth => {
            if cfg!(windows) {
                Ok(ResolvedAuth::Windows)
            } else {
                Err(ConnectorError::WindowsAuthUnavailable)
            }
        }
        AuthMode::CliDelegated => {
            let token = azure_cli_token().await?;
            Ok(ResolvedAuth::AadToken(token))
        }
        AuthMode::InteractiveBrowser => {
            // Reuse a cached CLI session when one exists; otherwise run
            // the browser login flow first.
            match azure_cli_token().await {
                Ok(token) => Ok(ResolvedAuth::AadToken(token)),
                Err(_) => {
                    info!("No cached Azure session, starting interactive login");
                    azure_cli_login().await?;
                    let token = azure_cli_token().await?;
                    Ok(ResolvedAuth::AadToken(token))
                }
            }
        }
    }
}

fn prompt_credentials(
    descriptor: &ConnectionDescriptor,
) -> Result<SqlCredentials, ConnectorError> {
    let username = match &descriptor.username {
        Some(user) => user.clone(),
        None => {
            eprint!(
                "Username for {} on {}: ",
                descriptor.provider, descriptor.server
            );
            io::stderr()
                .flush()
                .map_err(|e| ConnectorError::CredentialPrompt(e.to_string()))?;
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| ConnectorError::CredentialPrompt(e.to_string()))?;
            line.trim().to_string()
        }
    };

    let password = rpassword::prompt_password(format!(
        "Password for {username}@{}: ",
        descriptor.server
    ))
    .map_err(|e| ConnectorError::CredentialPrompt(e.to_string()))?;

    Ok(SqlCredentials { username, password })
}

async fn azure_cli_token() -> Result<String, ConnectorError> {
    debug!("Requesting access token from the Azure CLI");
    let output = Command::new("az")
        .args([
            "account",
            "get-access-token",
            "--resource",
            AZURE_SQL_RESOURCE,
            "--output",
            "json",
        ])
        .output()
        .await
        .map_err(|e| ConnectorError::AzureToken(format!("failed to run `az`: {e}")))?;

    if !output.status.success() {
        return Err(ConnectorError::AzureToken(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| ConnectorError::AzureToken(format!("unreadable token response: {e}")))?;
    parsed
        .get("accessToken")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| ConnectorError::AzureToken("token response had no accessToken".into()))
}

async fn azure_cli_login() -> Result<(), ConnectorError> {
    let status = Command::new("az")
        .arg("login")
        .status()
        .await
        .map_err(|e| ConnectorError::AzureToken(format!("failed to run `az login`: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(ConnectorError::AzureToken("`az login` failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(provider: Provider, auth: AuthMode) -> ConnectionDescriptor {
        ConnectionDescriptor {
            provider,
            server: "localhost".into(),
            port: None,
            database: "db".into(),
            auth,
            username: Some("user".into()),
            password: Some("pass".into()),
        }
    }

    #[tokio::test]
    async fn rejects_mismatched_auth_mode() {
        let d = descriptor(Provider::MySql, AuthMode::WindowsAuth);
        assert!(matches!(
            resolve(&d).await,
            Err(ConnectorError::UnsupportedAuth { .. })
        ));
    }

    #[tokio::test]
    async fn sql_auth_with_configured_credentials_does_not_prompt() {
        let d = descriptor(Provider::PostgreSql, AuthMode::SqlAuth);
        match resolve(&d).await.unwrap() {
            ResolvedAuth::Sql(creds) => {
                assert_eq!(creds.username, "user");
                assert_eq!(creds.password, "pass");
            }
            other => panic!("unexpected auth resolution: {other:?}"),
        }
    }
}
