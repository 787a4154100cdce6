use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Top-level configuration for Dapur.
///
/// Loaded from `~/.dapur/config.toml` by default. Every section falls back to
/// its defaults, which reproduce the stock culinary assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DapurConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub refusal: RefusalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl DapurConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DapurConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check the value constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.refusal.messages.len() < 2 {
            return Err(CoreError::Config(format!(
                "refusal.messages needs at least 2 entries, found {}",
                self.refusal.messages.len()
            )));
        }
        if self.refusal.messages.iter().any(|m| m.trim().is_empty()) {
            return Err(CoreError::Config(
                "refusal.messages must not contain blank entries".to_string(),
            ));
        }
        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(CoreError::Config(format!(
                "generation.temperature must be within 0.0..=2.0, got {}",
                g.temperature
            )));
        }
        if !(0.0..=1.0).contains(&g.top_p) {
            return Err(CoreError::Config(format!(
                "generation.top_p must be within 0.0..=1.0, got {}",
                g.top_p
            )));
        }
        if g.top_k == 0 {
            return Err(CoreError::Config("generation.top_k must be positive".to_string()));
        }
        if g.stream_idle_timeout_secs == Some(0) {
            return Err(CoreError::Config(
                "generation.stream_idle_timeout_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Topic gate vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Domain terms matched as case-insensitive substrings.
    pub keywords: Vec<String>,
    /// Case-insensitive regular expressions for domain phrasing.
    pub patterns: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        let keywords = [
            "masak", "makanan", "minuman", "kuliner", "resep", "dapur", "makan", "masakan",
            "bumbu", "rempah", "sayur", "buah", "daging", "ikan", "telur", "tepung", "beras",
            "goreng", "rebus", "kukus", "panggang", "tumis", "bakar", "panci", "wajan",
            "kompor", "oven", "rendang", "ayam", "sambal",
            // English vocabulary; verbs like "cook" live in the word-bounded patterns
            "recipe", "ingredient", "kitchen", "food", "spice",
        ];
        let patterns = [
            r"cara membuat",
            r"resep",
            r"masak",
            r"bahan.*(makanan|masakan|minuman)",
            r"teknik.*(memasak|kuliner)",
            r"how to (make|cook|bake|prepare)",
            r"\b(cook(s|ed|ing)?|bak(e|es|ed|ing))\b",
            r"\brecipes?\b",
            r"cooking techniques?",
            r"ingredients?\s+for\b.*\b(food|dish|drink)",
        ];
        Self {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Messages used when a question falls outside the culinary domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefusalConfig {
    pub messages: Vec<String>,
}

impl Default for RefusalConfig {
    fn default() -> Self {
        let messages = [
            "Maaf Tuan, saya hanya bisa membahas hal-hal seputar dunia kuliner! \u{1f373} Bagaimana kalau kita diskusi tentang resep atau teknik memasak saja? \u{1f60a}",
            "Ups! Sepertinya pertanyaan ini di luar menu saya! \u{1f37d}\u{fe0f} Saya lebih suka membahas tentang masakan, makanan, atau minuman. Mau tanya soal itu? \u{1f468}\u{200d}\u{1f373}",
            "Mohon maaf, sebagai AI Chef, saya hanya ahli dalam urusan dapur dan kuliner. \u{1f958} Yuk, tanya seputar makanan atau cara memasak saja! \u{1f372}",
            "Wah, itu bukan bidang keahlian saya! Saya lebih jago urusan masak-memasak. \u{1f957} Bagaimana kalau kita bahas resep favoritmu? \u{1f35d}",
        ];
        Self {
            messages: messages.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Streaming generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Model identifier, e.g. `gemini-1.5-flash`.
    pub model: String,
    /// Base URL of the generation API.
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Persona and behavioural rules prepended to every prompt.
    pub system_instruction: String,
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    pub top_k: u32,
    /// Maximum wait for the next delta. `None` waits indefinitely.
    pub stream_idle_timeout_secs: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            temperature: 0.7,
            top_p: 0.8,
            top_k: 40,
            stream_idle_timeout_secs: Some(60),
        }
    }
}

const DEFAULT_SYSTEM_INSTRUCTION: &str = "Anda adalah AI Chef, \
asisten memasak profesional yang HANYA fokus pada dunia kuliner.

ATURAN UTAMA:
1. DILARANG KERAS membahas topik di luar kuliner/makanan/minuman
2. WAJIB menolak pertanyaan non-kuliner dengan sopan
3. HANYA menjawab tentang:
   - Resep dan cara memasak
   - Bahan makanan dan minuman
   - Teknik dan tips memasak
   - Sejarah kuliner dan budaya makanan
   - Peralatan masak dan dapur
   - Nutrisi dan kandungan makanan
   - Penyajian dan plating
   - Fakta menarik seputar kuliner

PANDUAN JAWABAN:
1. Untuk pertanyaan kuliner:
   - Berikan jawaban detail dan terstruktur
   - Sertakan tips praktis
   - Tambahkan fakta menarik
   - Gunakan emoji makanan yang relevan

2. Untuk pertanyaan non-kuliner:
   - WAJIB menolak menjawab
   - Arahkan kembali ke topik kuliner
   - Gunakan nada ramah tapi tegas

FORMAT:
- Bahasa: Formal tapi ramah
- Struktur: Jelas dan terorganisir
- Tone: Profesional dan membantu
- Tambahkan emoji makanan yang relevan";

/// Chat backend (turn storage) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Base URL of the chat API, without the `/api` suffix.
    pub api_url: String,
    /// Raw `Cookie` header value carrying the session credentials.
    pub credentials: Option<String>,
    /// Optional bearer token sent alongside the cookie.
    pub bearer_token: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            credentials: None,
            bearer_token: None,
            request_timeout_secs: 30,
        }
    }
}
