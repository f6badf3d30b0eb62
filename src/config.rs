use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub db: DbConfig,
    pub mqtt: MqttConfig,
    pub irc: IrcConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Prepended to every topic the bot publishes or subscribes to.
    pub prefix: String,
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
    pub nick: String,
    /// Sent as PASS during registration when non-empty.
    #[serde(default)]
    pub password: String,
    pub channels: Vec<String>,
    /// Single character marking a message as a bot invocation, e.g. "~".
    pub prefix: char,
    /// Nick that receives operational error notices.
    #[serde(default)]
    pub owner: String,
    /// Send channel errors and continuations as NOTICE instead of PRIVMSG.
    #[serde(default = "default_use_notice")]
    pub use_notice: bool,
}

fn default_use_notice() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            port: default_http_port(),
        }
    }
}

fn default_http_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}
