//! Draft records for the data-entry forms.
//!
//! Drafts hold multi-value fields as raw strings, exactly as typed. A single
//! explicit `submit` step normalizes them into the canonical list-typed
//! records; nothing else in the crate splits or trims user input.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::store::{Goal, Meal, MealKind, Measure, Profile, ProfileRole, Recipe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormError {
    MissingName,
    MissingProfiles,
    MissingDescription,
}

impl std::fmt::Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            FormError::MissingName => "Informe o nome.",
            FormError::MissingProfiles => "Selecione ao menos um membro da família.",
            FormError::MissingDescription => "Descreva a refeição.",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for FormError {}

// ============ Normalization helpers ============

/// Splits a comma-separated field into trimmed, non-empty entries.
/// Applying it to an already-clean joined list changes nothing.
pub fn normalize_csv(raw: &str) -> Vec<String> {
    normalize_items(raw.split(','))
}

/// Splits a one-entry-per-line field the same way.
pub fn normalize_lines(raw: &str) -> Vec<String> {
    normalize_items(raw.split('\n'))
}

fn normalize_items<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Wraps raw image bytes as a data URI usable in a `foto_url` field.
pub fn photo_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

// ============ Profile form ============

#[derive(Debug, Clone)]
pub struct ProfileDraft {
    pub nome: String,
    pub papel: ProfileRole,
    pub foto_url: Option<String>,
    pub idade: u32,
    pub altura_cm: u32,
    pub peso_atual_kg: f64,
    pub objetivo: Goal,
    /// Comma-separated, as typed
    pub restricoes: String,
    /// Comma-separated, as typed
    pub preferencias: String,
    pub horarios_refeicao: String,
}

impl ProfileDraft {
    pub fn submit(self) -> Result<Profile, FormError> {
        if self.nome.trim().is_empty() {
            return Err(FormError::MissingName);
        }
        let horarios = self.horarios_refeicao.trim();
        Ok(Profile {
            profile_id: Uuid::new_v4().to_string(),
            nome: self.nome.trim().to_string(),
            papel: self.papel,
            foto_url: self.foto_url,
            idade: self.idade,
            altura_cm: self.altura_cm,
            peso_atual_kg: self.peso_atual_kg,
            objetivo: self.objetivo,
            restricoes: normalize_csv(&self.restricoes),
            preferencias: normalize_csv(&self.preferencias),
            horarios_refeicao: if horarios.is_empty() {
                None
            } else {
                Some(horarios.to_string())
            },
        })
    }

    /// Re-submits an edit of an existing profile, keeping its id.
    pub fn submit_update(self, profile_id: &str) -> Result<Profile, FormError> {
        let mut profile = self.submit()?;
        profile.profile_id = profile_id.to_string();
        Ok(profile)
    }
}

// ============ Meal form ============

#[derive(Debug, Clone)]
pub struct MealDraft {
    pub profile_ids: Vec<String>,
    pub tipo: MealKind,
    pub descricao: String,
    pub foto_url: Option<String>,
    pub calorias_estimadas: Option<u32>,
}

impl MealDraft {
    pub fn submit(self) -> Result<Meal, FormError> {
        if self.profile_ids.is_empty() {
            return Err(FormError::MissingProfiles);
        }
        if self.descricao.trim().is_empty() {
            return Err(FormError::MissingDescription);
        }
        Ok(Meal {
            meal_id: Uuid::new_v4().to_string(),
            profile_ids: self.profile_ids,
            data: Utc::now().to_rfc3339(),
            tipo: self.tipo,
            descricao: self.descricao.trim().to_string(),
            foto_url: self.foto_url,
            // Placeholder estimate until a photo-based estimator lands
            calorias_estimadas: Some(
                self.calorias_estimadas
                    .unwrap_or_else(|| rand::rng().random_range(200..=600)),
            ),
        })
    }
}

// ============ Measurement form ============

#[derive(Debug, Clone)]
pub struct MeasureDraft {
    pub profile_id: String,
    pub peso_kg: f64,
}

impl MeasureDraft {
    pub fn submit(self) -> Measure {
        Measure {
            profile_id: self.profile_id,
            // Weight history is day-granular; the stored value is a plain
            // calendar date, not a timestamp
            data: Utc::now().format("%Y-%m-%d").to_string(),
            peso_kg: self.peso_kg,
        }
    }
}

// ============ Recipe form ============

#[derive(Debug, Clone)]
pub struct RecipeDraft {
    pub nome: String,
    /// Comma-separated, as typed
    pub tags: String,
    /// One ingredient per line, as typed
    pub ingredientes: String,
    pub modo_preparo: String,
    pub tempo_preparo: String,
    pub porcao_usuario: String,
    pub porcao_esposa: String,
    pub porcao_crianca: String,
}

impl RecipeDraft {
    pub fn submit(self) -> Result<Recipe, FormError> {
        if self.nome.trim().is_empty() {
            return Err(FormError::MissingName);
        }
        Ok(Recipe {
            recipe_id: Uuid::new_v4().to_string(),
            nome: self.nome.trim().to_string(),
            tags: normalize_csv(&self.tags),
            ingredientes: normalize_lines(&self.ingredientes),
            modo_preparo: self.modo_preparo,
            tempo_preparo: self.tempo_preparo,
            porcao_usuario: self.porcao_usuario,
            porcao_esposa: self.porcao_esposa,
            porcao_crianca: self.porcao_crianca,
        })
    }

    pub fn submit_update(self, recipe_id: &str) -> Result<Recipe, FormError> {
        let mut recipe = self.submit()?;
        recipe.recipe_id = recipe_id.to_string();
        Ok(recipe)
    }
}
