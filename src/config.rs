use serde_derive::Deserialize;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub reader: Option<ReaderConfig>,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Pcsc,
    Simulated,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ReaderConfig {
    pub backend: Option<Backend>,
    /// Substring of the PC/SC reader name to watch. All readers when unset.
    pub name: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub scan_on_start: Option<bool>,
    pub simulated_tags: Option<Vec<String>>,
    pub simulated_enabled: Option<bool>,
}
