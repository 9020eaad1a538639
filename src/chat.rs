use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::logging::{log_chat, log_error, log_sync};
use crate::store::{BackupBundle, Meal, Profile, UserSession};

/// Name of the one tool the model may invoke.
pub const SAVE_TO_DRIVE_TOOL: &str = "organizeAndSaveToDrive";

pub const QUICK_REPLIES_DEFAULT: [&str; 4] = [
    "Registrar refeição",
    "O que temos hoje?",
    "Gerar lista de compras",
    "Fazer Backup Drive",
];

const GREETING: &str = "Olá! Sou o **NutrIA**. Estou aqui para cuidar da saúde da sua família. Deseja organizar os dados de hoje ou planejar a próxima refeição?";

const MSG_CONNECT_DRIVE: &str = "⚠️ Preciso que você esteja conectado ao Google Drive para salvar seus dados. Por favor, faça login na aba **Conta**.";
const MSG_SYNC_FAILED: &str = "❌ Houve um erro ao sincronizar com o Google Drive. Verifique sua conexão e tente novamente.";
const MSG_CONNECTION_TROUBLE: &str = "Ops, tive um problema de conexão. Vamos tentar de novo?";

const SYNC_STATUS_RESET_SECS: u64 = 3;

// ============ Transcript types ============

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: String,
    #[serde(rename = "quickReplies", skip_serializing_if = "Option::is_none")]
    pub quick_replies: Option<Vec<String>>,
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::User,
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            quick_replies: None,
        }
    }

    fn assistant(content: &str, quick_replies: Option<Vec<String>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::Assistant,
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            quick_replies,
        }
    }
}

/// One gateway-side conversation turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn wire_name(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

// ============ Gateway seams ============

#[allow(async_fn_in_trait)]
pub trait AssistantGateway {
    async fn generate(
        &self,
        history: Vec<Turn>,
        user_input: &str,
    ) -> Result<AssistantReply, Box<dyn Error + Send + Sync>>;

    async fn shopping_list(&self, meals: &[Meal]) -> String;
}

#[allow(async_fn_in_trait)]
pub trait SyncGateway {
    async fn sync_all(
        &self,
        token: &str,
        bundle: &BackupBundle,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}

// ============ Screens and suggestions ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Chat,
    Meals,
    Recipes,
    Dashboard,
    Settings,
}

impl Tab {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tab::Chat => "chat",
            Tab::Meals => "meals",
            Tab::Recipes => "recipes",
            Tab::Dashboard => "dashboard",
            Tab::Settings => "settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suggestion {
    pub label: &'static str,
    pub prompt: &'static str,
}

const fn suggestion(label: &'static str, prompt: &'static str) -> Suggestion {
    Suggestion { label, prompt }
}

const MEALS_SUGGESTIONS: &[Suggestion] = &[
    suggestion("🌅 Registrar café", "Quero registrar o café da manhã da família"),
    suggestion("🛒 Gerar lista IA", "Gerar lista de compras para a semana"),
    suggestion("🔥 Calorias do dia", "Quantas calorias consumimos hoje no total?"),
];

const DASHBOARD_SUGGESTIONS: &[Suggestion] = &[
    suggestion("📈 Evolução de peso", "Como está o progresso de peso do Cláudio?"),
    suggestion("➕ Novo membro", "Como adiciono um novo perfil familiar?"),
    suggestion("🏥 Resumo de saúde", "Resumo de saúde da família"),
];

const RECIPES_SUGGESTIONS: &[Suggestion] = &[
    suggestion("🍝 Sugestão de jantar", "Sugira um jantar saudável para hoje"),
    suggestion("🚫 Sem lactose", "Receitas rápidas sem lactose"),
    suggestion("🍰 Sobremesa fit", "Receita de sobremesa fit"),
];

const SETTINGS_SUGGESTIONS: &[Suggestion] = &[
    suggestion("☁️ Backup agora", "Fazer backup completo no Google Drive"),
    suggestion("🔒 Meus dados", "Como meus dados são protegidos?"),
    suggestion("📄 Exportar PDF", "Como exportar meu diário para PDF?"),
];

const CHAT_SUGGESTIONS: &[Suggestion] = &[
    suggestion("🤔 O que posso fazer?", "O que você pode fazer por mim?"),
    suggestion("🥗 Planejar cardápio", "Ajude-me a planejar o cardápio de amanhã"),
];

/// Shortcut chips shown under the transcript, keyed to the screen the user
/// came from.
pub fn contextual_suggestions(tab: Tab) -> &'static [Suggestion] {
    match tab {
        Tab::Meals => MEALS_SUGGESTIONS,
        Tab::Dashboard => DASHBOARD_SUGGESTIONS,
        Tab::Recipes => RECIPES_SUGGESTIONS,
        Tab::Settings => SETTINGS_SUGGESTIONS,
        Tab::Chat => CHAT_SUGGESTIONS,
    }
}

// ============ Quick-reply markers ============

static QUICK_REPLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]").expect("quick-reply pattern is valid"));

/// Splits assistant text into display text and bracketed suggestion chips.
/// A reply that is nothing but markers keeps its original text so the
/// message never renders empty.
pub fn extract_quick_replies(text: &str) -> (String, Vec<String>) {
    let replies: Vec<String> = QUICK_REPLY_RE
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect();
    let cleaned = QUICK_REPLY_RE.replace_all(text, "").trim().to_string();
    let display = if cleaned.is_empty() {
        text.to_string()
    } else {
        cleaned
    };
    (display, replies)
}

// ============ Sync status ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

// ============ Engine ============

/// Releases the busy flag on every exit path, error or not.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ChatEngine<A: AssistantGateway, D: SyncGateway> {
    assistant: A,
    drive: D,
    messages: Vec<ChatMessage>,
    busy: Arc<AtomicBool>,
    sync_status: Arc<Mutex<SyncStatus>>,
}

impl<A: AssistantGateway, D: SyncGateway> ChatEngine<A, D> {
    pub fn new(assistant: A, drive: D) -> Self {
        Self {
            assistant,
            drive,
            messages: vec![Self::greeting()],
            busy: Arc::new(AtomicBool::new(false)),
            sync_status: Arc::new(Mutex::new(SyncStatus::Idle)),
        }
    }

    fn greeting() -> ChatMessage {
        ChatMessage::assistant(
            GREETING,
            Some(QUICK_REPLIES_DEFAULT.iter().map(|s| s.to_string()).collect()),
        )
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn sync_status(&self) -> SyncStatus {
        *self.sync_status.lock().unwrap()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Drops the transcript back to the greeting.
    pub fn reset(&mut self) {
        self.messages = vec![Self::greeting()];
    }

    fn set_status(&self, status: SyncStatus) {
        *self.sync_status.lock().unwrap() = status;
    }

    fn schedule_status_reset(&self) {
        let cell = Arc::clone(&self.sync_status);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(SYNC_STATUS_RESET_SECS)).await;
            *cell.lock().unwrap() = SyncStatus::Idle;
        });
    }

    /// One full user turn. Returns the messages appended by this turn; blank
    /// input and overlapping turns append nothing.
    pub async fn send(
        &mut self,
        text: &str,
        profiles: &[Profile],
        tab: Tab,
        session: &UserSession,
        bundle: &BackupBundle,
    ) -> Vec<ChatMessage> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        let _guard = BusyGuard(Arc::clone(&self.busy));

        // History covers the transcript before this turn; the new input
        // travels separately, wrapped in app context
        let history: Vec<Turn> = self
            .messages
            .iter()
            .map(|m| Turn {
                role: match m.role {
                    ChatRole::User => TurnRole::User,
                    ChatRole::Assistant => TurnRole::Model,
                },
                text: m.content.clone(),
            })
            .collect();

        let mut appended = vec![ChatMessage::user(text)];
        self.messages.push(appended[0].clone());

        let names: Vec<&str> = profiles.iter().map(|p| p.nome.as_str()).collect();
        let context = format!(
            "Membros da Família: {}. Intenção: {}. Contexto do App: {}",
            names.join(", "),
            text,
            tab.as_str()
        );

        match self.assistant.generate(history, &context).await {
            Ok(reply) if !reply.tool_calls.is_empty() => {
                for call in reply.tool_calls {
                    if call.name != SAVE_TO_DRIVE_TOOL {
                        log_chat(&format!("Ignoring unknown tool '{}'", call.name));
                        continue;
                    }
                    let message = self.run_drive_sync(session, bundle).await;
                    self.messages.push(message.clone());
                    appended.push(message);
                }
            }
            Ok(reply) => {
                let raw = reply.text.unwrap_or_default();
                let (display, found) = extract_quick_replies(&raw);
                let replies = if found.is_empty() {
                    QUICK_REPLIES_DEFAULT.iter().map(|s| s.to_string()).collect()
                } else {
                    found
                };
                let message = ChatMessage::assistant(&display, Some(replies));
                self.messages.push(message.clone());
                appended.push(message);
            }
            Err(e) => {
                log_error(&format!("Assistant turn failed: {}", e));
                let message = ChatMessage::assistant(MSG_CONNECTION_TROUBLE, None);
                self.messages.push(message.clone());
                appended.push(message);
            }
        }

        appended
    }

    async fn run_drive_sync(&self, session: &UserSession, bundle: &BackupBundle) -> ChatMessage {
        let token = match session.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => {
                return ChatMessage::assistant(
                    MSG_CONNECT_DRIVE,
                    Some(vec!["Ir para Conta".to_string()]),
                );
            }
        };

        self.set_status(SyncStatus::Syncing);
        log_sync("Drive sync requested by assistant");

        let message = match self.drive.sync_all(token, bundle).await {
            Ok(label) => {
                self.set_status(SyncStatus::Success);
                ChatMessage::assistant(
                    &format!(
                        "✅ Sincronização concluída com sucesso! Salvei todos os dados da família na pasta **\"{}\"** do seu Google Drive, organizada por data.",
                        label
                    ),
                    Some(QUICK_REPLIES_DEFAULT.iter().map(|s| s.to_string()).collect()),
                )
            }
            Err(e) => {
                log_error(&format!("Drive sync failed: {}", e));
                self.set_status(SyncStatus::Error);
                ChatMessage::assistant(MSG_SYNC_FAILED, None)
            }
        };

        self.schedule_status_reset();
        message
    }

    /// Shopping list generation from the logged meals. The gateway already
    /// collapses failures into user-facing sentinel text.
    pub async fn shopping_list(&self, meals: &[Meal]) -> String {
        self.assistant.shopping_list(meals).await
    }
}
