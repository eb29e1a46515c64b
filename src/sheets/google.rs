//! Google Sheets backed [`SheetWriter`].
//!
//! Authenticates with a service-account key through the OAuth2 JWT-bearer grant
//! and appends rows with the Sheets v4 `values:append` call.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{SheetError, SheetWriter};
use crate::config::SheetsConfig;
use crate::sales::SalesRecord;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";

const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before Google would reject them.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a service-account JSON key that the JWT grant needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, SheetError> {
        serde_json::from_str(raw).map_err(|e| SheetError::Credentials(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Issues and caches OAuth2 access tokens for one service account.
pub struct TokenSource {
    client: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey) -> Result<Self, SheetError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetError::Credentials(format!("private_key: {}", e)))?;
        Ok(Self {
            client,
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> Result<String, SheetError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn fetch(&self) -> Result<CachedToken, SheetError> {
        let now = Utc::now();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
                .map_err(|e| SheetError::Credentials(e.to_string()))?;

        debug!("Requesting access token for {}", self.key.client_email);
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
struct AppendRequest {
    values: Vec<Vec<serde_json::Value>>,
}

/// Handle to one worksheet tab of one spreadsheet.
pub struct GoogleSheet {
    client: reqwest::Client,
    tokens: TokenSource,
    api_base: Url,
    spreadsheet_id: String,
    tab_name: String,
}

impl GoogleSheet {
    /// Authenticate and confirm the configured tab exists.
    pub async fn connect(config: &SheetsConfig) -> Result<Self, SheetError> {
        Self::connect_to(SHEETS_API_BASE, config).await
    }

    pub async fn connect_to(api_base: &str, config: &SheetsConfig) -> Result<Self, SheetError> {
        let raw_key = config
            .service_account_key
            .as_deref()
            .ok_or(SheetError::MissingSetting("GSPREAD_SERVICE_ACCOUNT_KEY"))?;
        let key = ServiceAccountKey::from_json(raw_key)?;
        let spreadsheet_id = config
            .sheet_id
            .clone()
            .ok_or(SheetError::MissingSetting("GOOGLE_SHEET_ID"))?;

        let api_base = Url::parse(api_base)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| SheetError::InvalidEndpoint(api_base.to_string()))?;

        let client = reqwest::Client::new();
        let tokens = TokenSource::new(client.clone(), key)?;

        let sheet = Self {
            client,
            tokens,
            api_base,
            spreadsheet_id,
            tab_name: config.tab_name.clone(),
        };
        sheet.ensure_tab_exists().await?;
        Ok(sheet)
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn tab_name(&self) -> &str {
        &self.tab_name
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
                .extend(segments);
        }
        url
    }

    /// A1 range addressing the first cell of the tab; quotes are doubled per A1 syntax.
    fn append_range(&self) -> String {
        format!("'{}'!A1:append", self.tab_name.replace('\'', "''"))
    }

    async fn ensure_tab_exists(&self) -> Result<(), SheetError> {
        let token = self.tokens.access_token().await?;
        let mut url = self.endpoint(&[]);
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let response = self.client.get(url).bearer_auth(token).send().await?;
        let response =
            check_status(response, || format!("spreadsheet '{}'", self.spreadsheet_id)).await?;
        let meta: SpreadsheetMeta = response.json().await?;

        if meta
            .sheets
            .iter()
            .any(|sheet| sheet.properties.title == self.tab_name)
        {
            Ok(())
        } else {
            Err(SheetError::NotFound(format!("worksheet '{}'", self.tab_name)))
        }
    }
}

#[async_trait]
impl SheetWriter for GoogleSheet {
    async fn append_row(&self, record: &SalesRecord) -> Result<(), SheetError> {
        let token = self.tokens.access_token().await?;
        let range = self.append_range();
        let mut url = self.endpoint(&["values", range.as_str()]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = AppendRequest {
            values: vec![record.to_row()],
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check_status(response, || format!("worksheet '{}'", self.tab_name)).await?;
        Ok(())
    }
}

async fn check_status<F>(
    response: reqwest::Response,
    target: F,
) -> Result<reqwest::Response, SheetError>
where
    F: FnOnce() -> String,
{
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => SheetError::NotFound(target()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SheetError::Auth(message),
        _ => SheetError::Api {
            status: status.as_u16(),
            message,
        },
    })
}
