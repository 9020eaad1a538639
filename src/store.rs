use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::logging::{log_error, log_store};

// Storage keys shared with the backup documents on Drive
pub const KEY_SESSION: &str = "nutria_session";
pub const KEY_PROFILES: &str = "np_profiles";
pub const KEY_MEALS: &str = "np_meals";
pub const KEY_RECIPES: &str = "np_recipes";
pub const KEY_MEASURES: &str = "np_measures";
pub const KEY_GOOGLE_CLIENT_ID: &str = "nutria_google_client_id";
pub const KEY_GEMINI_API_KEY: &str = "nutria_gemini_api_key";

// ============ Domain Records ============

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ProfileRole {
    #[serde(rename = "usuario")]
    User,
    #[serde(rename = "esposa")]
    Spouse,
    #[serde(rename = "marido")]
    Husband,
    #[serde(rename = "filho")]
    Child,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    #[serde(rename = "emagrecer")]
    Lose,
    #[serde(rename = "manter")]
    Maintain,
    #[serde(rename = "ganhar")]
    Gain,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum MealKind {
    #[serde(rename = "cafe")]
    Breakfast,
    #[serde(rename = "almoco")]
    Lunch,
    #[serde(rename = "lanche")]
    Snack,
    #[serde(rename = "jantar")]
    Dinner,
    #[serde(rename = "extra")]
    Extra,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Profile {
    pub profile_id: String,
    pub nome: String,
    pub papel: ProfileRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foto_url: Option<String>,
    pub idade: u32,
    pub altura_cm: u32,
    pub peso_atual_kg: f64,
    pub objetivo: Goal,
    pub restricoes: Vec<String>,
    pub preferencias: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horarios_refeicao: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Meal {
    pub meal_id: String,
    pub profile_ids: Vec<String>,
    pub data: String,
    pub tipo: MealKind,
    pub descricao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foto_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calorias_estimadas: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Measure {
    pub profile_id: String,
    pub data: String,
    pub peso_kg: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Recipe {
    pub recipe_id: String,
    pub nome: String,
    pub tags: Vec<String>,
    pub ingredientes: Vec<String>,
    pub modo_preparo: String,
    pub tempo_preparo: String,
    pub porcao_usuario: String,
    pub porcao_esposa: String,
    pub porcao_crianca: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "local")]
    Local,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserSession {
    pub uid: String,
    pub email: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(rename = "authType")]
    pub auth_type: AuthType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Snapshot of every collection, handed to the backup gateway in one piece.
#[derive(Debug, Serialize, Clone, Default)]
pub struct BackupBundle {
    pub profiles: Vec<Profile>,
    pub meals: Vec<Meal>,
    pub recipes: Vec<Recipe>,
    pub measures: Vec<Measure>,
}

/// Starter family member shown on first run, before any profile is created.
pub fn initial_profiles() -> Vec<Profile> {
    vec![Profile {
        profile_id: "p1".to_string(),
        nome: "Cláudio".to_string(),
        papel: ProfileRole::Husband,
        foto_url: None,
        idade: 47,
        altura_cm: 173,
        peso_atual_kg: 84.0,
        objetivo: Goal::Lose,
        restricoes: vec!["Lactose".to_string(), "Glúten".to_string()],
        preferencias: vec![
            "Ovos".to_string(),
            "Carne Grelhada".to_string(),
            "Frutas".to_string(),
        ],
        horarios_refeicao: Some("12h, 16h, 20h".to_string()),
    }]
}

// ============ Document Store ============

/// Keyed JSON-document store over SQLite. Each collection lives whole under
/// a fixed key; reads of absent or unparseable documents fall back to the
/// collection default so a corrupted document never blocks startup.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        log_store(&format!("Store opened at {}", path.display()));
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )
    }

    /// Default data file location, under the user's home directory.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".nutria").join("nutria.db")
    }

    // ============ Raw document access ============

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM documents WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn read_document<T: DeserializeOwned>(&self, key: &str, default: impl FnOnce() -> T) -> T {
        match self.get_raw(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(e) => {
                    log_error(&format!("Unparseable document '{}': {}", key, e));
                    default()
                }
            },
            Ok(None) => default(),
            Err(e) => {
                log_error(&format!("Failed to read document '{}': {}", key, e));
                default()
            }
        }
    }

    fn write_document<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.put_raw(key, &raw)
    }

    // ============ Typed collections ============

    pub fn load_profiles(&self) -> Vec<Profile> {
        self.read_document(KEY_PROFILES, initial_profiles)
    }

    pub fn save_profiles(&self, profiles: &[Profile]) -> Result<()> {
        self.write_document(KEY_PROFILES, &profiles)
    }

    pub fn load_meals(&self) -> Vec<Meal> {
        self.read_document(KEY_MEALS, Vec::new)
    }

    pub fn save_meals(&self, meals: &[Meal]) -> Result<()> {
        self.write_document(KEY_MEALS, &meals)
    }

    pub fn load_recipes(&self) -> Vec<Recipe> {
        self.read_document(KEY_RECIPES, Vec::new)
    }

    pub fn save_recipes(&self, recipes: &[Recipe]) -> Result<()> {
        self.write_document(KEY_RECIPES, &recipes)
    }

    pub fn load_measures(&self) -> Vec<Measure> {
        self.read_document(KEY_MEASURES, Vec::new)
    }

    pub fn save_measures(&self, measures: &[Measure]) -> Result<()> {
        self.write_document(KEY_MEASURES, &measures)
    }

    pub fn load_session(&self) -> Option<UserSession> {
        self.read_document(KEY_SESSION, || None)
    }

    pub fn save_session(&self, session: &UserSession) -> Result<()> {
        self.write_document(KEY_SESSION, session)
    }

    pub fn clear_session(&self) -> Result<()> {
        self.delete(KEY_SESSION)
    }

    // ============ Configuration ============

    pub fn load_config(&self, key: &str) -> Option<String> {
        match self.get_raw(key) {
            Ok(value) => value,
            Err(e) => {
                log_error(&format!("Failed to read config '{}': {}", key, e));
                None
            }
        }
    }

    pub fn save_config(&self, key: &str, value: &str) -> Result<()> {
        self.put_raw(key, value)
    }

    /// Drops every stored document, collections and configuration alike.
    pub fn reset_all_data(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM documents", [])?;
        log_store("All stored documents cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meal() -> Meal {
        Meal {
            meal_id: "m1".to_string(),
            profile_ids: vec!["p1".to_string()],
            data: "2024-05-01T12:00:00Z".to_string(),
            tipo: MealKind::Lunch,
            descricao: "Frango grelhado com salada".to_string(),
            foto_url: None,
            calorias_estimadas: Some(450),
        }
    }

    #[test]
    fn test_profiles_default_to_starter_family() {
        let store = Store::open_in_memory().unwrap();
        let profiles = store.load_profiles();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].nome, "Cláudio");
        assert_eq!(profiles[0].papel, ProfileRole::Husband);
        assert_eq!(profiles[0].restricoes, vec!["Lactose", "Glúten"]);
    }

    #[test]
    fn test_collections_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let meals = vec![sample_meal()];
        store.save_meals(&meals).unwrap();
        assert_eq!(store.load_meals(), meals);

        let measures = vec![Measure {
            profile_id: "p1".to_string(),
            data: "2024-05-01".to_string(),
            peso_kg: 83.2,
        }];
        store.save_measures(&measures).unwrap();
        assert_eq!(store.load_measures(), measures);
    }

    #[test]
    fn test_malformed_document_falls_back_to_default() {
        let store = Store::open_in_memory().unwrap();
        store.put_raw(KEY_MEALS, "{not json").unwrap();
        assert!(store.load_meals().is_empty());

        store.put_raw(KEY_PROFILES, "[{\"wrong\": true}]").unwrap();
        assert_eq!(store.load_profiles()[0].nome, "Cláudio");
    }

    #[test]
    fn test_enum_wire_values() {
        let json = serde_json::to_string(&MealKind::Breakfast).unwrap();
        assert_eq!(json, "\"cafe\"");
        let goal: Goal = serde_json::from_str("\"emagrecer\"").unwrap();
        assert_eq!(goal, Goal::Lose);
        let role: ProfileRole = serde_json::from_str("\"filho\"").unwrap();
        assert_eq!(role, ProfileRole::Child);
    }

    #[test]
    fn test_session_wire_field_names() {
        let session = UserSession {
            uid: "google_a@b.com".to_string(),
            email: "a@b.com".to_string(),
            display_name: "Ana".to_string(),
            photo_url: None,
            auth_type: AuthType::Google,
            token: Some("tok".to_string()),
        };
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"displayName\":\"Ana\""));
        assert!(json.contains("\"authType\":\"google\""));
        assert!(!json.contains("photoURL"));
    }

    #[test]
    fn test_session_persistence() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_session().is_none());

        let session = UserSession {
            uid: "local".to_string(),
            email: "local@nutria.com".to_string(),
            display_name: "Usuário Local".to_string(),
            photo_url: None,
            auth_type: AuthType::Local,
            token: None,
        };
        store.save_session(&session).unwrap();
        assert_eq!(store.load_session(), Some(session));

        store.clear_session().unwrap();
        assert!(store.load_session().is_none());
    }

    #[test]
    fn test_reset_all_data() {
        let store = Store::open_in_memory().unwrap();
        store.save_meals(&[sample_meal()]).unwrap();
        store.save_config(KEY_GOOGLE_CLIENT_ID, "abc").unwrap();
        store.reset_all_data().unwrap();
        assert!(store.load_meals().is_empty());
        assert!(store.load_config(KEY_GOOGLE_CLIENT_ID).is_none());
    }
}
