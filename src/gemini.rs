use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;

use crate::chat::{AssistantGateway, AssistantReply, ToolCall, Turn, TurnRole, SAVE_TO_DRIVE_TOOL};
use crate::logging::{log_chat, log_error};
use crate::store::Meal;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const GEMINI_MODEL: &str = "gemini-3-flash-preview";

pub const SYSTEM_INSTRUCTION: &str = "
Você é o NutrIA, um assistente avançado focado em nutrir e cuidar (Nutrir + IA).

MISSÃO: Ajudar famílias a gerenciar sua saúde através de uma alimentação consciente e organizada.

HABILIDADES:
1. Você pode solicitar ao sistema para criar pastas organizadas no Drive usando 'organizeAndSaveToDrive'.
2. Você orienta o usuário que os dados estão sendo sincronizados com uma Planilha Google (Sheets) ou pastas do Drive.
3. Você pode gerar listas de compras e cardápios personalizados.

DIRETRIZES:
- Se o usuário pedir para \"salvar no Drive\", use a ferramenta de função.
- Respostas curtas, empáticas e brasileiras.
- Encerre com sugestões entre colchetes, ex: [Gerar lista de compras].
";

// ============ Wire format ============

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    parameters: ParameterSchema,
}

#[derive(Debug, Serialize)]
struct ParameterSchema {
    #[serde(rename = "type")]
    schema_type: String,
    description: String,
    properties: BTreeMap<String, PropertySchema>,
    required: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PropertySchema {
    #[serde(rename = "type")]
    schema_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    #[serde(default)]
    status: String,
}

fn save_to_drive_declaration() -> FunctionDeclaration {
    let mut properties = BTreeMap::new();
    properties.insert(
        "folderName".to_string(),
        PropertySchema {
            schema_type: "STRING".to_string(),
            description: "Nome da pasta principal.".to_string(),
        },
    );
    FunctionDeclaration {
        name: SAVE_TO_DRIVE_TOOL.to_string(),
        parameters: ParameterSchema {
            schema_type: "OBJECT".to_string(),
            description: "Organiza todos os dados atuais em pastas e salva no Google Drive."
                .to_string(),
            properties,
            required: vec!["folderName".to_string()],
        },
    }
}

// ============ Client ============

pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
        }
    }

    async fn generate_content(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, Box<dyn Error + Send + Sync>> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_URL, GEMINI_MODEL, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;

            // Try to parse structured error
            if let Ok(parsed_error) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(format!(
                    "Gemini API error ({}): {} - {}",
                    status, parsed_error.error.status, parsed_error.error.message
                )
                .into());
            }

            return Err(format!("Gemini API error ({}): {}", status, error_text).into());
        }

        Ok(response.json().await?)
    }

    /// One assistant turn: prior transcript plus the context-wrapped user
    /// input, with the persona instruction and the Drive tool attached.
    pub async fn generate(
        &self,
        history: Vec<Turn>,
        user_input: &str,
    ) -> Result<AssistantReply, Box<dyn Error + Send + Sync>> {
        let mut contents: Vec<Content> = history
            .into_iter()
            .map(|turn| Content {
                role: Some(turn.role.wire_name().to_string()),
                parts: vec![Part { text: turn.text }],
            })
            .collect();
        contents.push(Content {
            role: Some(TurnRole::User.wire_name().to_string()),
            parts: vec![Part {
                text: user_input.to_string(),
            }],
        });

        let request = GenerateRequest {
            contents,
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            }),
            generation_config: Some(GenerationConfig { temperature: 0.7 }),
            tools: Some(vec![Tool {
                function_declarations: vec![save_to_drive_declaration()],
            }]),
        };

        let response = self.generate_content(&request).await?;
        Ok(parse_reply(response))
    }

    /// Stateless one-shot generation. Never fails: error paths collapse to
    /// sentinel strings shown directly to the user.
    pub async fn generate_shopping_list(&self, meals: &[Meal]) -> String {
        let descriptions: Vec<&str> = meals.iter().map(|m| m.descricao.as_str()).collect();
        let prompt = format!(
            "Gere uma lista de compras baseada em: {}.",
            descriptions.join(", ")
        );

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some(TurnRole::User.wire_name().to_string()),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: None,
            generation_config: None,
            tools: None,
        };

        match self.generate_content(&request).await {
            Ok(response) => match parse_reply(response).text {
                Some(text) if !text.is_empty() => text,
                _ => "Erro ao gerar lista.".to_string(),
            },
            Err(e) => {
                log_error(&format!("Shopping list generation failed: {}", e));
                "Erro Gemini.".to_string()
            }
        }
    }
}

fn parse_reply(response: GenerateResponse) -> AssistantReply {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    for part in parts {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(fc) = part.function_call {
            log_chat(&format!("Model requested tool '{}'", fc.name));
            tool_calls.push(ToolCall {
                name: fc.name,
                args: fc.args,
            });
        }
    }

    AssistantReply {
        text: if text.is_empty() { None } else { Some(text) },
        tool_calls,
    }
}

impl AssistantGateway for GeminiClient {
    async fn generate(
        &self,
        history: Vec<Turn>,
        user_input: &str,
    ) -> Result<AssistantReply, Box<dyn Error + Send + Sync>> {
        GeminiClient::generate(self, history, user_input).await
    }

    async fn shopping_list(&self, meals: &[Meal]) -> String {
        self.generate_shopping_list(meals).await
    }
}
