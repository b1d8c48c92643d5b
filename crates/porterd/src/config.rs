use porter_core::DEFAULT_MATCH_THRESHOLD;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8700";
const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// How enrollment treats an image containing more than one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiFacePolicy {
    /// Take the highest-confidence face.
    First,
    /// Reject the image.
    Reject,
}

/// Messaging provider credentials.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

/// Language-model service settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Absent key leaves calls failing softly: extraction re-prompts and
    /// judgment denies.
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
}

/// Daemon configuration, loaded from `PORTER_*` environment variables.
pub struct Config {
    /// Address the HTTP API binds to.
    pub listen_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the TOML contact roster.
    pub roster_path: PathBuf,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Enrollment behavior when an image contains more than one face.
    pub multi_face_policy: MultiFacePolicy,
    /// Seconds before an unresolved visitor session expires.
    pub session_ttl_secs: u64,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Public base URL used for messaging status callbacks.
    pub public_base_url: Option<String>,
    /// Messaging provider credentials; absent = log-only gateway.
    pub twilio: Option<TwilioConfig>,
    /// Language-model service settings.
    pub openai: OpenAiConfig,
}

impl Config {
    /// Load configuration from `PORTER_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("porter");

        let db_path = std::env::var("PORTER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("porter.db"));

        let model_dir = std::env::var("PORTER_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let roster_path = std::env::var("PORTER_ROSTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("contacts.toml"));

        let twilio = match (
            std::env::var("PORTER_TWILIO_ACCOUNT_SID"),
            std::env::var("PORTER_TWILIO_AUTH_TOKEN"),
            std::env::var("PORTER_TWILIO_FROM"),
        ) {
            (Ok(account_sid), Ok(auth_token), Ok(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            _ => None,
        };

        Self {
            listen_addr: env_addr("PORTER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
            db_path,
            model_dir,
            roster_path,
            match_threshold: env_f32("PORTER_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            multi_face_policy: match std::env::var("PORTER_ENROLL_MULTI_FACE").as_deref() {
                Ok("reject") => MultiFacePolicy::Reject,
                _ => MultiFacePolicy::First,
            },
            session_ttl_secs: env_u64("PORTER_SESSION_TTL_SECS", 900),
            sweep_interval_secs: env_u64("PORTER_SWEEP_INTERVAL_SECS", 60),
            public_base_url: std::env::var("PORTER_PUBLIC_BASE_URL").ok(),
            twilio,
            openai: OpenAiConfig {
                api_key: std::env::var("PORTER_OPENAI_API_KEY").ok(),
                model: std::env::var("PORTER_OPENAI_MODEL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
                endpoint: std::env::var("PORTER_OPENAI_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_ENDPOINT.to_string()),
            },
        }
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("version-RFB-320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face encoder model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("face_encoder_r128.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_addr(key: &str, default: &str) -> SocketAddr {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| default.parse().expect("default listen addr is valid"))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
