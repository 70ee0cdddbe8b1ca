use core::fmt;

use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_AUTHORITY_BASE: &str = "https://login.microsoftonline.com";

/// Scopes requested when the caller does not provide one.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile"];

const RULE: &str = "================================================================================";

#[derive(Debug, Clone)]
pub struct RopcRequest {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub scopes: Vec<String>,
}

impl RopcRequest {
    /// Space-joined `scope` form parameter, as the token endpoint expects.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Error payload returned by the identity provider in place of a grant.
///
/// The full raw payload is retained so it can be shown to the user verbatim.
#[derive(Debug)]
pub struct ProviderRejection {
    pub error: String,
    pub error_description: String,
    pub raw: serde_json::Value,
}

impl ProviderRejection {
    fn from_payload(raw: serde_json::Value) -> Self {
        let error = raw
            .get("error")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_owned();

        let error_description = raw
            .get("error_description")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_owned();

        ProviderRejection {
            error,
            error_description,
            raw,
        }
    }

    pub fn hint(&self) -> Option<ErrorHint> {
        ErrorHint::classify(&self.error_description)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("failed to reach the token endpoint")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected token endpoint response: {0}")]
    Malformed(String),
    #[error("identity provider rejected the request: {}", .0.error)]
    Rejected(ProviderRejection),
    #[error("failed to write the token report")]
    Report(#[from] fmt::Error),
}

/// Known Entra ID error codes surfaced by the ROPC flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHint {
    InvalidCredentials,
    UnknownClient,
    UnknownTenant,
    PublicClientFlowDisabled,
}

const KNOWN_ERROR_CODES: &[(&str, ErrorHint)] = &[
    ("AADSTS50126", ErrorHint::InvalidCredentials),
    ("AADSTS700016", ErrorHint::UnknownClient),
    ("AADSTS90002", ErrorHint::UnknownTenant),
    ("AADSTS65001", ErrorHint::PublicClientFlowDisabled),
];

impl ErrorHint {
    /// Matches the AADSTS code carried at the front of Entra ID error
    /// descriptions. Unknown codes map to `None`; the caller falls back to
    /// showing the raw code and description.
    pub fn classify(error_description: &str) -> Option<Self> {
        KNOWN_ERROR_CODES
            .iter()
            .find(|(code, _)| error_description.contains(code))
            .map(|(_, hint)| *hint)
    }

    pub fn advice(self) -> &'static [&'static str] {
        match self {
            ErrorHint::InvalidCredentials => &["Invalid username or password"],
            ErrorHint::UnknownClient => &["Invalid client ID or application not found"],
            ErrorHint::UnknownTenant => &["Invalid tenant ID"],
            ErrorHint::PublicClientFlowDisabled => &[
                "User consent required - ROPC flow may not be enabled",
                "Enable 'Allow public client flows' in App Registration > Authentication",
            ],
        }
    }
}

/// Authority endpoint for a tenant, e.g.
/// `https://login.microsoftonline.com/<tenant_id>`.
pub fn authority_url(base: &str, tenant_id: &str) -> String {
    format!("{}/{tenant_id}", base.trim_end_matches('/'))
}

pub fn token_endpoint(authority: &str) -> String {
    format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'))
}

/// Performs the password-grant exchange against `authority` and writes the
/// success report into `out`.
///
/// Returns the access token string. A response without an `access_token`
/// member is returned as [`ExchangeError::Rejected`] carrying the raw
/// payload; nothing is written to `out` in that case.
pub async fn acquire_token(
    out: &mut dyn fmt::Write,
    client: &reqwest::Client,
    authority: &str,
    request: &RopcRequest,
) -> Result<String, ExchangeError> {
    let endpoint = token_endpoint(authority);

    debug!(%endpoint, "Requesting token");

    let scope = request.scope_param();
    let form = [
        ("client_id", request.client_id.as_str()),
        ("grant_type", "password"),
        ("username", request.username.as_str()),
        ("password", request.password.as_str()),
        ("scope", scope.as_str()),
    ];

    let response = client.post(&endpoint).form(&form).send().await?;
    let status = response.status();
    let body = response.text().await?;

    debug!(%status, "Token endpoint responded");

    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| ExchangeError::Malformed(format!("not JSON ({e}); status: {status}")))?;

    if payload.get("access_token").is_none() {
        return Err(ExchangeError::Rejected(ProviderRejection::from_payload(payload)));
    }

    let grant: TokenGrant = serde_json::from_value(payload)
        .map_err(|e| ExchangeError::Malformed(format!("bad grant shape: {e}")))?;

    write_grant_report(out, &grant)?;

    Ok(grant.access_token)
}

pub fn write_grant_report(out: &mut dyn fmt::Write, grant: &TokenGrant) -> fmt::Result {
    writeln!(out, "✅ Successfully obtained access token!")?;
    writeln!(out)?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "ACCESS TOKEN:")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "{}", grant.access_token)?;
    writeln!(out, "{RULE}")?;
    writeln!(out)?;
    writeln!(out, "Token Details:")?;

    match grant.expires_in {
        Some(seconds) => writeln!(out, "  Expires in: {seconds} seconds")?,
        None => writeln!(out, "  Expires in: N/A seconds")?,
    }

    writeln!(out, "  Token type: {}", grant.token_type.as_deref().unwrap_or("N/A"))?;
    writeln!(out, "  Scope: {}", grant.scope.as_deref().unwrap_or("N/A"))?;

    Ok(())
}

pub fn write_failure_report(out: &mut dyn fmt::Write, rejection: &ProviderRejection) -> fmt::Result {
    writeln!(out, "❌ Failed to obtain access token!")?;
    writeln!(out)?;
    writeln!(out, "Error Details:")?;

    let raw = serde_json::to_string_pretty(&rejection.raw).unwrap_or_else(|_| rejection.raw.to_string());
    writeln!(out, "{raw}")?;
    writeln!(out)?;

    writeln!(out, "Troubleshooting:")?;

    match rejection.hint() {
        Some(hint) => {
            for line in hint.advice() {
                writeln!(out, "  • {line}")?;
            }
        }
        None => {
            writeln!(out, "  • Error code: {}", rejection.error)?;
            writeln!(out, "  • Description: {}", rejection.error_description)?;
        }
    }

    Ok(())
}
