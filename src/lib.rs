pub mod chat;
pub mod forms;
pub mod gemini;
pub mod google;
pub mod logging;
pub mod store;

use chat::{AssistantGateway, ChatEngine, ChatMessage, Suggestion, SyncGateway, SyncStatus, Tab};
use forms::{MealDraft, MeasureDraft, ProfileDraft, RecipeDraft};
use google::{ConsentFlow, GoogleIdentity};
use logging::{log_auth, log_chat, log_store};
use store::{
    AuthType, BackupBundle, Meal, Measure, Profile, Recipe, Store, UserSession,
    KEY_GEMINI_API_KEY, KEY_GOOGLE_CLIENT_ID,
};

pub const APP_VERSION: &str = "2.1.0";

const ERR_NOT_LOGGED_IN: &str = "Faça login para continuar.";

/// Application state behind the UI shell. Generic over the assistant, sync
/// and consent gateways so tests can drive it with stubs; production wiring
/// uses `GeminiClient`, `DriveClient` and the platform's consent surface.
pub struct AppState<A: AssistantGateway, D: SyncGateway, F: ConsentFlow> {
    store: Store,
    chat: ChatEngine<A, D>,
    identity: GoogleIdentity<F>,
    session: Option<UserSession>,
    active_tab: Tab,
}

impl<A: AssistantGateway, D: SyncGateway, F: ConsentFlow> AppState<A, D, F> {
    pub fn new(store: Store, assistant: A, drive: D, flow: F) -> Self {
        if let Err(e) = logging::init_logging() {
            eprintln!("Failed to initialize logging: {}", e);
        }
        let _ = logging::cleanup_old_logs();

        let client_id = store.load_config(KEY_GOOGLE_CLIENT_ID);
        let session = store.load_session();

        Self {
            chat: ChatEngine::new(assistant, drive),
            identity: GoogleIdentity::new(flow, client_id),
            session,
            active_tab: Tab::Chat,
            store,
        }
    }

    // ============ Session ============

    fn require_session(&self) -> Result<&UserSession, String> {
        self.session
            .as_ref()
            .ok_or_else(|| ERR_NOT_LOGGED_IN.to_string())
    }

    pub fn session(&self) -> Option<&UserSession> {
        self.session.as_ref()
    }

    /// Offline account: everything stays on this device.
    pub fn login_local(&mut self) -> Result<UserSession, String> {
        let session = UserSession {
            uid: "local".to_string(),
            email: "local@nutria.com".to_string(),
            display_name: "Usuário Local".to_string(),
            photo_url: None,
            auth_type: AuthType::Local,
            token: None,
        };
        self.store
            .save_session(&session)
            .map_err(|e| e.to_string())?;
        self.session = Some(session.clone());
        log_auth("Local session started");
        Ok(session)
    }

    /// Interactive Google login; the bearer token rides on the session and
    /// is what later authorizes Drive backups.
    pub async fn login_with_google(&mut self) -> Result<UserSession, String> {
        let auth = self.identity.login().await.map_err(|e| e.to_string())?;
        let session = UserSession {
            uid: format!("google_{}", auth.user.email),
            email: auth.user.email.clone(),
            display_name: auth.user.name.clone(),
            photo_url: if auth.user.picture.is_empty() {
                None
            } else {
                Some(auth.user.picture.clone())
            },
            auth_type: AuthType::Google,
            token: Some(auth.access_token.clone()),
        };
        self.store
            .save_session(&session)
            .map_err(|e| e.to_string())?;
        self.session = Some(session.clone());
        Ok(session)
    }

    pub fn logout(&mut self) -> Result<(), String> {
        self.store.clear_session().map_err(|e| e.to_string())?;
        self.session = None;
        self.chat.reset();
        log_auth("Session ended");
        Ok(())
    }

    pub fn active_tab(&self) -> Tab {
        self.active_tab
    }

    pub fn set_active_tab(&mut self, tab: Tab) {
        self.active_tab = tab;
    }

    // ============ Profiles ============

    pub fn profiles(&self) -> Result<Vec<Profile>, String> {
        self.require_session()?;
        Ok(self.store.load_profiles())
    }

    pub fn add_profile(&self, draft: ProfileDraft) -> Result<Profile, String> {
        self.require_session()?;
        let profile = draft.submit().map_err(|e| e.to_string())?;
        let mut profiles = self.store.load_profiles();
        profiles.push(profile.clone());
        self.store
            .save_profiles(&profiles)
            .map_err(|e| e.to_string())?;
        log_store(&format!("Profile added: {}", profile.nome));
        Ok(profile)
    }

    pub fn update_profile(&self, profile_id: &str, draft: ProfileDraft) -> Result<Profile, String> {
        self.require_session()?;
        let updated = draft.submit_update(profile_id).map_err(|e| e.to_string())?;
        let mut profiles = self.store.load_profiles();
        for profile in profiles.iter_mut() {
            if profile.profile_id == profile_id {
                *profile = updated.clone();
            }
        }
        self.store
            .save_profiles(&profiles)
            .map_err(|e| e.to_string())?;
        Ok(updated)
    }

    /// Meals and measurements referencing the removed profile stay put.
    pub fn delete_profile(&self, profile_id: &str) -> Result<(), String> {
        self.require_session()?;
        let mut profiles = self.store.load_profiles();
        profiles.retain(|p| p.profile_id != profile_id);
        self.store
            .save_profiles(&profiles)
            .map_err(|e| e.to_string())
    }

    // ============ Meals ============

    pub fn meals(&self) -> Result<Vec<Meal>, String> {
        self.require_session()?;
        Ok(self.store.load_meals())
    }

    /// Newest first; a logged meal is never edited afterwards.
    pub fn add_meal(&self, draft: MealDraft) -> Result<Meal, String> {
        self.require_session()?;
        let meal = draft.submit().map_err(|e| e.to_string())?;
        let mut meals = self.store.load_meals();
        meals.insert(0, meal.clone());
        self.store.save_meals(&meals).map_err(|e| e.to_string())?;
        Ok(meal)
    }

    pub fn delete_meal(&self, meal_id: &str) -> Result<(), String> {
        self.require_session()?;
        let mut meals = self.store.load_meals();
        meals.retain(|m| m.meal_id != meal_id);
        self.store.save_meals(&meals).map_err(|e| e.to_string())
    }

    // ============ Measurements ============

    pub fn measures(&self) -> Result<Vec<Measure>, String> {
        self.require_session()?;
        Ok(self.store.load_measures())
    }

    /// Append-only history, newest first.
    pub fn add_measure(&self, draft: MeasureDraft) -> Result<Measure, String> {
        self.require_session()?;
        let measure = draft.submit();
        let mut measures = self.store.load_measures();
        measures.insert(0, measure.clone());
        self.store
            .save_measures(&measures)
            .map_err(|e| e.to_string())?;
        Ok(measure)
    }

    // ============ Recipes ============

    pub fn recipes(&self) -> Result<Vec<Recipe>, String> {
        self.require_session()?;
        Ok(self.store.load_recipes())
    }

    pub fn add_recipe(&self, draft: RecipeDraft) -> Result<Recipe, String> {
        self.require_session()?;
        let recipe = draft.submit().map_err(|e| e.to_string())?;
        let mut recipes = self.store.load_recipes();
        recipes.push(recipe.clone());
        self.store
            .save_recipes(&recipes)
            .map_err(|e| e.to_string())?;
        Ok(recipe)
    }

    pub fn update_recipe(&self, recipe_id: &str, draft: RecipeDraft) -> Result<Recipe, String> {
        self.require_session()?;
        let updated = draft.submit_update(recipe_id).map_err(|e| e.to_string())?;
        let mut recipes = self.store.load_recipes();
        for recipe in recipes.iter_mut() {
            if recipe.recipe_id == recipe_id {
                *recipe = updated.clone();
            }
        }
        self.store
            .save_recipes(&recipes)
            .map_err(|e| e.to_string())?;
        Ok(updated)
    }

    pub fn delete_recipe(&self, recipe_id: &str) -> Result<(), String> {
        self.require_session()?;
        let mut recipes = self.store.load_recipes();
        recipes.retain(|r| r.recipe_id != recipe_id);
        self.store
            .save_recipes(&recipes)
            .map_err(|e| e.to_string())
    }

    // ============ Assistant ============

    fn bundle(&self) -> BackupBundle {
        BackupBundle {
            profiles: self.store.load_profiles(),
            meals: self.store.load_meals(),
            recipes: self.store.load_recipes(),
            measures: self.store.load_measures(),
        }
    }

    /// One chat turn. Returns the messages this turn appended to the
    /// transcript (the echoed user message plus any assistant output).
    pub async fn send_chat_message(&mut self, text: &str) -> Result<Vec<ChatMessage>, String> {
        let session = self.require_session()?.clone();
        let bundle = self.bundle();
        let profiles = bundle.profiles.clone();
        log_chat(&format!("User turn from tab '{}'", self.active_tab.as_str()));
        Ok(self
            .chat
            .send(text, &profiles, self.active_tab, &session, &bundle)
            .await)
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.chat.sync_status()
    }

    pub fn suggestions(&self) -> &'static [Suggestion] {
        chat::contextual_suggestions(self.active_tab)
    }

    pub async fn generate_shopping_list(&self) -> Result<String, String> {
        self.require_session()?;
        let meals = self.store.load_meals();
        if meals.is_empty() {
            return Err("Nenhuma refeição registrada.".to_string());
        }
        Ok(self.chat.shopping_list(&meals).await)
    }

    // ============ Settings ============

    /// Reachable without a session; the id is needed before Google login can
    /// happen. Returns the cleaned id actually stored.
    pub fn save_client_id(&mut self, id: &str) -> Result<String, String> {
        let clean = self.identity.set_client_id(id);
        self.store
            .save_config(KEY_GOOGLE_CLIENT_ID, &clean)
            .map_err(|e| e.to_string())?;
        Ok(clean)
    }

    pub fn google_configured(&self) -> bool {
        self.identity.is_configured()
    }

    pub fn save_api_key(&self, key: &str) -> Result<(), String> {
        self.require_session()?;
        self.store
            .save_config(KEY_GEMINI_API_KEY, key.trim())
            .map_err(|e| e.to_string())
    }

    /// Wipes every stored document and drops back to the login screen.
    pub fn clear_all_data(&mut self) -> Result<(), String> {
        self.require_session()?;
        self.store.reset_all_data().map_err(|e| e.to_string())?;
        self.session = None;
        self.chat.reset();
        Ok(())
    }

    pub fn encode_photo(&self, mime: &str, bytes: &[u8]) -> String {
        forms::photo_data_uri(mime, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat::{AssistantReply, Turn};
    use google::TokenGrant;
    use std::error::Error;
    use store::{Goal, MealKind, ProfileRole};

    struct StubAssistant;

    impl AssistantGateway for StubAssistant {
        async fn generate(
            &self,
            _history: Vec<Turn>,
            _user_input: &str,
        ) -> Result<AssistantReply, Box<dyn Error + Send + Sync>> {
            Ok(AssistantReply {
                text: Some("Anotado! [Registrar refeição]".to_string()),
                tool_calls: Vec::new(),
            })
        }

        async fn shopping_list(&self, meals: &[Meal]) -> String {
            format!("Lista para {} refeições", meals.len())
        }
    }

    struct StubDrive;

    impl SyncGateway for StubDrive {
        async fn sync_all(
            &self,
            _token: &str,
            _bundle: &BackupBundle,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok("Drive/NutrIA_Cloud".to_string())
        }
    }

    struct StubFlow;

    impl ConsentFlow for StubFlow {
        fn is_ready(&self) -> bool {
            true
        }

        async fn request_access_token(
            &self,
            _client_id: &str,
            _scopes: &str,
        ) -> Result<TokenGrant, Box<dyn Error + Send + Sync>> {
            Ok(TokenGrant {
                access_token: "tok".to_string(),
                expires_in: 3600,
            })
        }
    }

    fn app() -> AppState<StubAssistant, StubDrive, StubFlow> {
        AppState::new(
            Store::open_in_memory().unwrap(),
            StubAssistant,
            StubDrive,
            StubFlow,
        )
    }

    fn meal_draft() -> MealDraft {
        MealDraft {
            profile_ids: vec!["p1".to_string()],
            tipo: MealKind::Dinner,
            descricao: "Sopa de legumes".to_string(),
            foto_url: None,
            calorias_estimadas: Some(300),
        }
    }

    #[test]
    fn test_operations_require_login() {
        let app = app();
        assert_eq!(app.profiles().unwrap_err(), ERR_NOT_LOGGED_IN);
        assert_eq!(app.meals().unwrap_err(), ERR_NOT_LOGGED_IN);
        assert_eq!(app.add_meal(meal_draft()).unwrap_err(), ERR_NOT_LOGGED_IN);
        assert_eq!(app.recipes().unwrap_err(), ERR_NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn test_chat_requires_login() {
        let mut app = app();
        assert_eq!(
            app.send_chat_message("oi").await.unwrap_err(),
            ERR_NOT_LOGGED_IN
        );
    }

    #[test]
    fn test_local_login_session_shape() {
        let mut app = app();
        let session = app.login_local().unwrap();
        assert_eq!(session.uid, "local");
        assert_eq!(session.email, "local@nutria.com");
        assert_eq!(session.display_name, "Usuário Local");
        assert_eq!(session.auth_type, AuthType::Local);
        assert!(session.token.is_none());
        // Persisted for the next launch
        assert_eq!(app.store.load_session(), Some(session));
    }

    #[test]
    fn test_logout_clears_persisted_session() {
        let mut app = app();
        app.login_local().unwrap();
        app.logout().unwrap();
        assert!(app.session().is_none());
        assert!(app.store.load_session().is_none());
        assert!(app.profiles().is_err());
    }

    #[test]
    fn test_meals_are_prepended() {
        let mut app = app();
        app.login_local().unwrap();
        let first = app.add_meal(meal_draft()).unwrap();
        let second = app.add_meal(meal_draft()).unwrap();
        let meals = app.meals().unwrap();
        assert_eq!(meals[0].meal_id, second.meal_id);
        assert_eq!(meals[1].meal_id, first.meal_id);
    }

    #[test]
    fn test_meal_validation_surfaces_as_error() {
        let mut app = app();
        app.login_local().unwrap();
        let mut draft = meal_draft();
        draft.descricao = " ".to_string();
        assert_eq!(app.add_meal(draft).unwrap_err(), "Descreva a refeição.");
    }

    #[test]
    fn test_delete_profile_leaves_meals_untouched() {
        let mut app = app();
        app.login_local().unwrap();
        app.add_meal(meal_draft()).unwrap();
        app.delete_profile("p1").unwrap();
        assert!(app.profiles().unwrap().is_empty());
        assert_eq!(app.meals().unwrap()[0].profile_ids, vec!["p1"]);
    }

    #[test]
    fn test_update_profile_in_place() {
        let mut app = app();
        app.login_local().unwrap();
        let draft = ProfileDraft {
            nome: "Cláudio".to_string(),
            papel: ProfileRole::Husband,
            foto_url: None,
            idade: 48,
            altura_cm: 173,
            peso_atual_kg: 82.0,
            objetivo: Goal::Lose,
            restricoes: "Lactose".to_string(),
            preferencias: "Ovos".to_string(),
            horarios_refeicao: "12h, 20h".to_string(),
        };
        app.update_profile("p1", draft).unwrap();
        let profiles = app.profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].profile_id, "p1");
        assert_eq!(profiles[0].idade, 48);
    }

    #[test]
    fn test_measures_are_prepended() {
        let mut app = app();
        app.login_local().unwrap();
        app.add_measure(MeasureDraft {
            profile_id: "p1".to_string(),
            peso_kg: 84.0,
        })
        .unwrap();
        app.add_measure(MeasureDraft {
            profile_id: "p1".to_string(),
            peso_kg: 83.4,
        })
        .unwrap();
        let measures = app.measures().unwrap();
        assert_eq!(measures[0].peso_kg, 83.4);
    }

    #[tokio::test]
    async fn test_chat_turn_appends_messages() {
        let mut app = app();
        app.login_local().unwrap();
        let appended = app.send_chat_message("oi").await.unwrap();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[1].content, "Anotado!");
        // Greeting + user + assistant
        assert_eq!(app.chat_messages().len(), 3);
    }

    #[tokio::test]
    async fn test_shopping_list_requires_meals() {
        let mut app = app();
        app.login_local().unwrap();
        assert_eq!(
            app.generate_shopping_list().await.unwrap_err(),
            "Nenhuma refeição registrada."
        );
        app.add_meal(meal_draft()).unwrap();
        assert_eq!(
            app.generate_shopping_list().await.unwrap(),
            "Lista para 1 refeições"
        );
    }

    #[test]
    fn test_client_id_saved_without_session() {
        let mut app = app();
        let clean = app
            .save_client_id(" 12345.apps.googleusercontent.com\n")
            .unwrap();
        assert_eq!(clean, "12345.apps.googleusercontent.com");
        assert!(app.google_configured());
        assert_eq!(
            app.store.load_config(KEY_GOOGLE_CLIENT_ID).as_deref(),
            Some("12345.apps.googleusercontent.com")
        );
    }

    #[test]
    fn test_clear_all_data_resets_and_locks() {
        let mut app = app();
        app.login_local().unwrap();
        app.add_meal(meal_draft()).unwrap();
        app.clear_all_data().unwrap();
        assert!(app.session().is_none());
        assert!(app.meals().is_err());
        app.login_local().unwrap();
        assert!(app.meals().unwrap().is_empty());
        assert_eq!(app.profiles().unwrap()[0].nome, "Cláudio");
        assert_eq!(app.chat_messages().len(), 1);
    }
}
