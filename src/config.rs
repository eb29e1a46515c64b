use anyhow::{Context, Result};

pub const DEFAULT_TAB_NAME: &str = "Checkin";
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub sheets: SheetsConfig,
    pub server: ServerConfig,
    /// Raw `AUTHORIZED_SALES` value, parsed by [`crate::auth::AuthorizedUsers`].
    pub authorized_sales: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Only validated at startup; the webhook itself is registered outside the process.
    pub webhook_url: String,
}

/// Settings for the Google Sheets connection. Missing values are not fatal:
/// the bot starts in degraded mode and every record attempt fails politely.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub service_account_key: Option<String>,
    pub sheet_id: Option<String>,
    pub tab_name: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = get("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN is not set")?;
        let webhook_url = get("WEBHOOK_URL").context("WEBHOOK_URL is not set")?;

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT value: {}", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                webhook_url,
            },
            sheets: SheetsConfig {
                service_account_key: get("GSPREAD_SERVICE_ACCOUNT_KEY"),
                sheet_id: get("GOOGLE_SHEET_ID"),
                tab_name: get("GOOGLE_SHEET_TAB_NAME")
                    .unwrap_or_else(|| DEFAULT_TAB_NAME.to_string()),
            },
            server: ServerConfig { port },
            authorized_sales: lookup("AUTHORIZED_SALES").unwrap_or_default(),
        })
    }
}
