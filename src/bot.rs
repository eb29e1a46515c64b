use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::utils::command::BotCommands;
use teloxide::RequestError;
use tracing::{debug, error, info, warn};

use crate::auth::{Access, AuthorizedUsers};
use crate::sales::{self, ParseError, SalesRecord};
use crate::sheets::SheetWriter;

pub const START_REFUSAL: &str = "Maaf, Anda tidak memiliki izin untuk menjalankan bot ini.";
pub const CHECKIN_REFUSAL: &str = "Maaf, Anda tidak memiliki izin untuk melakukan check-in.";
pub const MESSAGE_REFUSAL: &str = "Maaf, Anda tidak memiliki izin untuk menggunakan bot ini.";
pub const CHECKIN_PROMPT: &str =
    "Silakan kirimkan nama Anda dan jumlah sales hari ini (contoh: John Doe, 1000000).";
pub const FORMAT_ERROR: &str =
    "Format tidak benar. Mohon gunakan format 'Nama Anda, Jumlah Sales' (contoh: John Doe, 1000000).";
pub const AMOUNT_ERROR: &str = "Jumlah sales harus berupa angka. Mohon coba lagi.";
pub const SHEET_UNAVAILABLE: &str =
    "Maaf, gagal terhubung ke Google Sheets. Data tidak dapat dicatat.";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Perintah yang tersedia:")]
pub enum Command {
    #[command(description = "Mulai bot.")]
    Start,
    #[command(description = "Catat sales hari ini.")]
    Checkin,
}

/// Shared application state
pub struct AppState {
    authorized: AuthorizedUsers,
    /// `None` when the sheet could not be reached at startup.
    sheet: Option<Arc<dyn SheetWriter>>,
    bot_username: String,
}

impl AppState {
    pub fn new(
        authorized: AuthorizedUsers,
        sheet: Option<Arc<dyn SheetWriter>>,
        bot_username: String,
    ) -> Self {
        Self {
            authorized,
            sheet,
            bot_username,
        }
    }

    pub fn start_reply(&self, user_id: u64, first_name: &str) -> String {
        if self.authorized.check(user_id) == Access::Deny {
            warn!("Unauthorized user {} tried to use /start.", user_id);
            return START_REFUSAL.to_string();
        }
        format!(
            "Halo {}! 👋 Saya bot pencatat sales harian Anda.",
            first_name
        )
    }

    pub fn checkin_reply(&self, user_id: u64) -> String {
        if self.authorized.check(user_id) == Access::Deny {
            warn!("Unauthorized user {} tried to use /checkin.", user_id);
            return CHECKIN_REFUSAL.to_string();
        }
        CHECKIN_PROMPT.to_string()
    }

    /// Parse a `name, amount` message and record it. Always yields the text to send back.
    pub async fn sales_reply(&self, user_id: u64, text: &str) -> String {
        if self.authorized.check(user_id) == Access::Deny {
            warn!("Unauthorized user {} sent message: {}", user_id, text);
            return MESSAGE_REFUSAL.to_string();
        }

        let (name, amount) = match sales::parse_message(text) {
            Ok(parsed) => parsed,
            Err(ParseError::Format) => return FORMAT_ERROR.to_string(),
            Err(ParseError::Amount) => return AMOUNT_ERROR.to_string(),
        };

        let Some(sheet) = self.sheet.as_ref() else {
            error!("Attempted to record data but Google Sheets was not initialized.");
            return SHEET_UNAVAILABLE.to_string();
        };

        let record = SalesRecord::new(name, amount, Utc::now());
        match sheet.append_row(&record).await {
            Ok(()) => {
                info!(
                    "Sales data recorded: [{}, {}, {}]",
                    record.timestamp, record.name, record.amount
                );
                format!(
                    "Terima kasih, {}! Sales {} telah dicatat.",
                    record.name,
                    sales::format_thousands(record.amount)
                )
            }
            Err(e) => {
                let e = anyhow::Error::from(e);
                error!("Error processing message from {}: {:#}", user_id, e);
                format!("Terjadi kesalahan saat memproses pesan Anda: {}", e)
            }
        }
    }
}

/// Handler tree: commands first, then any non-command text.
pub fn schema() -> UpdateHandler<RequestError> {
    Update::filter_message()
        .branch(
            dptree::filter_map(|msg: Message, state: Arc<AppState>| {
                msg.text()
                    .and_then(|text| parse_command(text, &state.bot_username))
            })
            .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(|text| !text.starts_with('/')))
                .endpoint(handle_text),
        )
}

/// Match the leading `/command[@bot]` word case-insensitively; trailing arguments
/// (e.g. a `/start` deep-link payload) are ignored. Mentions of another bot yield `None`.
pub fn parse_command(text: &str, bot_username: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?.strip_prefix('/')?;
    let (name, mention) = match word.split_once('@') {
        Some((name, mention)) => (name, Some(mention)),
        None => (word, None),
    };
    if mention.is_some_and(|m| !m.eq_ignore_ascii_case(bot_username)) {
        return None;
    }
    Command::parse(&format!("/{}", name.to_lowercase()), bot_username).ok()
}

/// Run a single update through the handler tree.
pub async fn process_update(
    handler: &UpdateHandler<RequestError>,
    bot: Bot,
    state: Arc<AppState>,
    update: Update,
) -> ResponseResult<()> {
    let update_id = update.id;
    match handler.dispatch(dptree::deps![bot, state, update]).await {
        ControlFlow::Break(result) => result,
        ControlFlow::Continue(_) => {
            debug!("Unhandled update: {:?}", update_id);
            Ok(())
        }
    }
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let user = match msg.from.as_ref() {
        Some(user) => user,
        None => return Ok(()),
    };

    info!("Command {:?} from user {}", cmd, user.id.0);

    let reply = match cmd {
        Command::Start => state.start_reply(user.id.0, &user.first_name),
        Command::Checkin => state.checkin_reply(user.id.0),
    };
    send_reply(&bot, msg.chat.id, reply).await;
    Ok(())
}

async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = match msg.from.as_ref() {
        Some(user) => user.id.0,
        None => return Ok(()),
    };

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let reply = state.sales_reply(user_id, text).await;
    send_reply(&bot, msg.chat.id, reply).await;
    Ok(())
}

/// Reply failures are logged only. The update is still acknowledged, so Telegram
/// never redelivers a message whose row was already appended.
async fn send_reply(bot: &Bot, chat_id: ChatId, text: String) {
    if let Err(e) = bot.send_message(chat_id, text).await {
        error!("Failed to send reply to chat {}: {}", chat_id, e);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::sheets::testing::{FailingSheet, RecordingSheet};

    const SALES_ID: u64 = 123456789;
    const STRANGER_ID: u64 = 555;

    fn state_with(sheet: Option<Arc<dyn SheetWriter>>) -> AppState {
        AppState::new(
            AuthorizedUsers::from_iter([SALES_ID]),
            sheet,
            BOT_USERNAME.to_string(),
        )
    }

    fn recording_state() -> (Arc<RecordingSheet>, AppState) {
        let sheet = Arc::new(RecordingSheet::default());
        let state = state_with(Some(sheet.clone()));
        (sheet, state)
    }

    #[tokio::test]
    async fn test_valid_message_is_recorded() {
        let (sheet, state) = recording_state();

        let reply = state.sales_reply(SALES_ID, "John Doe, 1000000").await;

        assert_eq!(reply, "Terima kasih, John Doe! Sales 1,000,000 telah dicatat.");
        let rows = sheet.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "John Doe");
        assert_eq!(rows[0].amount, 1_000_000);
        assert!(rows[0].timestamp.ends_with(" WIB"));
    }

    #[tokio::test]
    async fn test_negative_amount_is_recorded() {
        let (sheet, state) = recording_state();

        let reply = state.sales_reply(SALES_ID, " Refund ,  -2500 ").await;

        assert!(reply.contains("Refund"));
        assert!(reply.contains("-2,500"));
        assert_eq!(sheet.rows()[0].amount, -2500);
    }

    #[tokio::test]
    async fn test_unauthorized_sender_never_appends() {
        let (sheet, state) = recording_state();

        for text in ["John Doe, 1000000", "John Doe", "a, b, 100"] {
            let reply = state.sales_reply(STRANGER_ID, text).await;
            assert_eq!(reply, MESSAGE_REFUSAL);
        }
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_format_and_amount_errors() {
        let (sheet, state) = recording_state();

        assert_eq!(state.sales_reply(SALES_ID, "John Doe").await, FORMAT_ERROR);
        assert_eq!(state.sales_reply(SALES_ID, "a, b, 100").await, FORMAT_ERROR);
        assert_eq!(state.sales_reply(SALES_ID, "John Doe, abc").await, AMOUNT_ERROR);
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_unset_sheet_reports_connectivity_error() {
        let state = state_with(None);
        let reply = state.sales_reply(SALES_ID, "John Doe, 1000000").await;
        assert_eq!(reply, SHEET_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_input_checked_before_sheet_availability() {
        let state = state_with(None);
        assert_eq!(state.sales_reply(SALES_ID, "John Doe").await, FORMAT_ERROR);
    }

    #[tokio::test]
    async fn test_append_failure_is_reported_with_cause() {
        let state = state_with(Some(Arc::new(FailingSheet)));
        let reply = state.sales_reply(SALES_ID, "John Doe, 1000").await;
        assert_eq!(
            reply,
            "Terjadi kesalahan saat memproses pesan Anda: Google Sheets API error (503): backend unavailable"
        );
    }

    #[test]
    fn test_command_replies() {
        let state = state_with(None);
        assert_eq!(
            state.start_reply(SALES_ID, "John"),
            "Halo John! 👋 Saya bot pencatat sales harian Anda."
        );
        assert_eq!(state.start_reply(STRANGER_ID, "Eve"), START_REFUSAL);
        assert_eq!(state.checkin_reply(SALES_ID), CHECKIN_PROMPT);
        assert_eq!(state.checkin_reply(STRANGER_ID), CHECKIN_REFUSAL);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(parse_command("/start", BOT_USERNAME), Some(Command::Start));
        assert_eq!(
            parse_command("/checkin@checkin_test_bot", BOT_USERNAME),
            Some(Command::Checkin)
        );
        assert_eq!(parse_command("/checkin@other_bot", BOT_USERNAME), None);
        assert_eq!(parse_command("/help", BOT_USERNAME), None);
        assert_eq!(parse_command("John Doe, 1000", BOT_USERNAME), None);
    }

    #[test]
    fn test_command_arguments_and_case_are_ignored() {
        assert_eq!(parse_command("/start ref123", BOT_USERNAME), Some(Command::Start));
        assert_eq!(parse_command("/checkin now", BOT_USERNAME), Some(Command::Checkin));
        assert_eq!(parse_command("/Start", BOT_USERNAME), Some(Command::Start));
        assert_eq!(
            parse_command("/CHECKIN@Checkin_Test_Bot today", BOT_USERNAME),
            Some(Command::Checkin)
        );
    }

    #[tokio::test]
    async fn test_dispatch_routes_commands_and_text() {
        let server = telegram_mock().await;
        let bot = mock_bot(&server);
        let (sheet, state) = recording_state();
        let state = Arc::new(state);
        let handler = schema();

        for text in ["/start", "/checkin", "John Doe, 1000000"] {
            process_update(&handler, bot.clone(), state.clone(), text_update(SALES_ID, text))
                .await
                .unwrap();
        }

        let sent = sent_texts(&server).await;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].starts_with("Halo John!"));
        assert_eq!(sent[1], CHECKIN_PROMPT);
        assert_eq!(sent[2], "Terima kasih, John Doe! Sales 1,000,000 telah dicatat.");
        assert_eq!(sheet.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_unknown_commands() {
        let server = telegram_mock().await;
        let bot = mock_bot(&server);
        let (sheet, state) = recording_state();

        process_update(&schema(), bot, Arc::new(state), text_update(SALES_ID, "/help"))
            .await
            .unwrap();

        assert!(sent_texts(&server).await.is_empty());
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_refuses_unauthorized_sender() {
        let server = telegram_mock().await;
        let bot = mock_bot(&server);
        let (sheet, state) = recording_state();

        process_update(
            &schema(),
            bot,
            Arc::new(state),
            text_update(STRANGER_ID, "John Doe, 1000000"),
        )
        .await
        .unwrap();

        assert_eq!(sent_texts(&server).await, vec![MESSAGE_REFUSAL.to_string()]);
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_answers_commands_with_arguments() {
        let server = telegram_mock().await;
        let bot = mock_bot(&server);
        let (sheet, state) = recording_state();
        let state = Arc::new(state);
        let handler = schema();

        for text in ["/start ref123", "/checkin now", "/Start"] {
            process_update(&handler, bot.clone(), state.clone(), text_update(SALES_ID, text))
                .await
                .unwrap();
        }

        let sent = sent_texts(&server).await;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].starts_with("Halo John!"));
        assert_eq!(sent[1], CHECKIN_PROMPT);
        assert!(sent[2].starts_with("Halo John!"));
        assert!(sheet.rows().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reply_still_acknowledges_update() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(SEND_MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let bot = mock_bot(&server);
        let (sheet, state) = recording_state();

        let result = process_update(
            &schema(),
            bot,
            Arc::new(state),
            text_update(SALES_ID, "John Doe, 1000000"),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(sheet.rows().len(), 1);
    }
}
