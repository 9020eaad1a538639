//! Google integration: OAuth identity and Drive backup.
//!
//! The interactive consent surface (the account chooser) is platform
//! territory and sits behind the `ConsentFlow` trait; everything after the
//! token grant is plain HTTP against the Google REST APIs.

use chrono::Utc;
use reqwest::multipart;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;

use crate::chat::SyncGateway;
use crate::logging::{log_auth, log_sync};
use crate::store::BackupBundle;

pub const SCOPES: &str = "https://www.googleapis.com/auth/drive.file https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/userinfo.profile";

const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

const READY_RETRIES: u32 = 30;
const READY_POLL_MS: u64 = 200;

// ============ Identity ============

/// Token grant from the interactive consent surface.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Seconds until the token expires
    pub expires_in: u64,
}

/// Platform-provided consent surface. `is_ready` reports whether the
/// provider has finished loading; it may flip to true at any point.
#[allow(async_fn_in_trait)]
pub trait ConsentFlow {
    fn is_ready(&self) -> bool;
    async fn request_access_token(
        &self,
        client_id: &str,
        scopes: &str,
    ) -> Result<TokenGrant, Box<dyn Error + Send + Sync>>;
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GoogleUser {
    pub name: String,
    pub email: String,
    pub picture: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GoogleAuth {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// Milliseconds since the epoch
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    pub user: GoogleUser,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    name: Option<String>,
    email: String,
    picture: Option<String>,
}

pub struct GoogleIdentity<F: ConsentFlow> {
    flow: F,
    http: Client,
    client_id: Option<String>,
    initialized: bool,
    initializing: bool,
}

impl<F: ConsentFlow> GoogleIdentity<F> {
    pub fn new(flow: F, client_id: Option<String>) -> Self {
        Self {
            flow,
            http: Client::new(),
            client_id,
            initialized: false,
            initializing: false,
        }
    }

    /// Stores the id stripped of all whitespace (pasted ids often carry
    /// stray newlines) and drops any initialized provider handle. Returns
    /// the cleaned id so the caller can persist it.
    pub fn set_client_id(&mut self, id: &str) -> String {
        let clean: String = id.chars().filter(|c| !c.is_whitespace()).collect();
        self.client_id = Some(clean.clone());
        self.initialized = false;
        log_auth("Google client id updated");
        clean
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn is_configured(&self) -> bool {
        self.client_id
            .as_deref()
            .map(|id| id.contains(".apps.googleusercontent.com"))
            .unwrap_or(false)
    }

    /// Waits for the consent surface to come up, bounded. Reports readiness
    /// rather than erroring so callers can fall back to local-only mode.
    pub async fn ensure_initialized(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        if !self.is_configured() {
            return false;
        }

        let mut retries = 0;
        while !self.flow.is_ready() && retries < READY_RETRIES {
            tokio::time::sleep(Duration::from_millis(READY_POLL_MS)).await;
            retries += 1;
        }

        if !self.flow.is_ready() {
            log_auth("Consent surface never became ready");
            return false;
        }
        if self.initializing {
            return false;
        }

        self.initializing = true;
        self.initialized = true;
        self.initializing = false;
        true
    }

    /// Full interactive login: consent, token grant, profile fetch.
    pub async fn login(&mut self) -> Result<GoogleAuth, Box<dyn Error + Send + Sync>> {
        if !self.ensure_initialized().await {
            return Err("SDK não carregado.".into());
        }

        let client_id = self.client_id.clone().unwrap_or_default();
        let grant = self.flow.request_access_token(&client_id, SCOPES).await?;

        let info: UserInfo = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(&grant.access_token)
            .send()
            .await?
            .json()
            .await?;

        log_auth(&format!("Google login completed for {}", info.email));

        Ok(GoogleAuth {
            expires_at: expires_at_ms(Utc::now().timestamp_millis(), grant.expires_in),
            access_token: grant.access_token,
            user: GoogleUser {
                name: info.name.unwrap_or_else(|| "Usuário NutrIA".to_string()),
                email: info.email,
                picture: info.picture.unwrap_or_default(),
            },
        })
    }
}

fn expires_at_ms(now_ms: i64, expires_in_secs: u64) -> i64 {
    now_ms + (expires_in_secs as i64) * 1000
}

// ============ Drive backup ============

#[derive(Debug, Serialize)]
struct FolderMetadata {
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
    parents: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FileMetadata {
    name: String,
    parents: Vec<String>,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

/// Search expression for an exact-name live folder, optionally under a
/// parent.
fn folder_query(name: &str, parent_id: Option<&str>) -> String {
    let mut q = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        name, FOLDER_MIME
    );
    if let Some(parent) = parent_id {
        q.push_str(&format!(" and '{}' in parents", parent));
    }
    q
}

/// Dated folder name, one per UTC day.
fn backup_folder_name() -> String {
    format!("Backup_{}", Utc::now().format("%Y-%m-%d"))
}

pub struct DriveClient {
    http: Client,
}

impl DriveClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    async fn find_or_create_folder(
        &self,
        token: &str,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let listing: FileList = self
            .http
            .get(DRIVE_FILES_URL)
            .query(&[("q", folder_query(name, parent_id))])
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await?;

        if let Some(existing) = listing.files.into_iter().next() {
            return Ok(existing.id);
        }

        let metadata = FolderMetadata {
            name: name.to_string(),
            mime_type: FOLDER_MIME.to_string(),
            parents: parent_id.map(|p| vec![p.to_string()]).unwrap_or_default(),
        };
        let created: DriveFile = self
            .http
            .post(DRIVE_FILES_URL)
            .bearer_auth(token)
            .json(&metadata)
            .send()
            .await?
            .json()
            .await?;

        log_sync(&format!("Created Drive folder '{}'", name));
        Ok(created.id)
    }

    async fn upload_json<T: Serialize>(
        &self,
        token: &str,
        folder_id: &str,
        name: &str,
        content: &T,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let metadata = FileMetadata {
            name: name.to_string(),
            parents: vec![folder_id.to_string()],
            mime_type: "application/json".to_string(),
        };

        let form = multipart::Form::new()
            .part(
                "metadata",
                multipart::Part::text(serde_json::to_string(&metadata)?)
                    .mime_str("application/json")?,
            )
            .part(
                "file",
                multipart::Part::text(serde_json::to_string(content)?)
                    .mime_str("application/json")?,
            );

        // Only transport failures matter here; the body is not inspected
        self.http
            .post(DRIVE_UPLOAD_URL)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        Ok(())
    }

    /// Backs every collection up into a dated folder under `NutrIA_Cloud`.
    /// Returns a fixed label describing where the data landed; with no token
    /// the data stays local and nothing is sent.
    pub async fn sync_all(
        &self,
        token: &str,
        bundle: &BackupBundle,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        if token.is_empty() {
            return Ok("Local".to_string());
        }

        let root_id = self.find_or_create_folder(token, "NutrIA_Cloud", None).await?;
        let backup_id = self
            .find_or_create_folder(token, &backup_folder_name(), Some(&root_id))
            .await?;

        tokio::try_join!(
            self.upload_json(token, &backup_id, "perfis.json", &bundle.profiles),
            self.upload_json(token, &backup_id, "refeicoes.json", &bundle.meals),
            self.upload_json(token, &backup_id, "receitas.json", &bundle.recipes),
        )?;

        log_sync(&format!(
            "Backup finished: {} profiles, {} meals, {} recipes",
            bundle.profiles.len(),
            bundle.meals.len(),
            bundle.recipes.len()
        ));

        Ok("Drive/NutrIA_Cloud".to_string())
    }
}

impl Default for DriveClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncGateway for DriveClient {
    async fn sync_all(
        &self,
        token: &str,
        bundle: &BackupBundle,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        DriveClient::sync_all(self, token, bundle).await
    }
}
