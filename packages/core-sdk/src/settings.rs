use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde_json::Value;
use thiserror::Error;

use crate::telemetry;

pub const KEY_PROVIDER: &str = "provider";
pub const KEY_API_KEY: &str = "api_key";
pub const KEY_BASE_URL: &str = "base_url";
pub const KEY_MODEL: &str = "model";
pub const KEY_SYSTEM_MESSAGE: &str = "system_message";
pub const KEY_WEB_SEARCH_ENABLED: &str = "web_search_enabled";
pub const KEY_MCP_SERVERS: &str = "mcp_servers";

/** \brief 设置记录的全部键，顺序即配置页参数顺序。 */
pub const SETTINGS_KEYS: [&str; 7] = [
    KEY_PROVIDER,
    KEY_API_KEY,
    KEY_BASE_URL,
    KEY_MODEL,
    KEY_SYSTEM_MESSAGE,
    KEY_WEB_SEARCH_ENABLED,
    KEY_MCP_SERVERS,
];

/** \brief 未设置 provider 时使用的默认服务。 */
pub const DEFAULT_PROVIDER_ID: &str = "claude";

/**
 * \brief 设置读写与配置页回传的错误。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("settings storage failed: {0}")]
    Storage(String),
    #[error("invalid settings payload: {0}")]
    InvalidPayload(String),
    #[error("invalid boolean for {key}: {value:?}")]
    InvalidBool { key: &'static str, value: String },
    #[error("MCP servers must be a JSON array: {0}")]
    InvalidMcpServers(String),
}

impl From<anyhow::Error> for SettingsError {
    fn from(err: anyhow::Error) -> Self {
        SettingsError::Storage(err.to_string())
    }
}

/**
 * \brief 扁平的用户设置快照，每个提问周期重新读取，读取后不再修改。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /** \brief Provider 标识，缺省为 claude */
    pub provider: Option<String>,
    /** \brief API Key */
    pub api_key: Option<String>,
    /** \brief 覆盖默认接口地址 */
    pub base_url: Option<String>,
    /** \brief 模型名 */
    pub model: Option<String>,
    /** \brief 系统提示词 */
    pub system_message: Option<String>,
    /** \brief 是否启用联网搜索（仅支持的 Provider 生效） */
    pub web_search_enabled: bool,
    /** \brief MCP 服务器 JSON 数组原文，不做解释 */
    pub mcp_servers: Option<String>,
}

impl Settings {
    /**
     * \brief 从键值记录构造设置；空值视为未设置。
     */
    pub fn from_entries(entries: &BTreeMap<String, String>) -> Result<Self, SettingsError> {
        let get = |key: &str| {
            entries
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let web_search_enabled = match get(KEY_WEB_SEARCH_ENABLED) {
            Some(raw) => parse_bool(KEY_WEB_SEARCH_ENABLED, &raw)?,
            None => false,
        };
        let mcp_servers = get(KEY_MCP_SERVERS);
        if let Some(raw) = mcp_servers.as_deref() {
            validate_mcp_servers(raw)?;
        }
        Ok(Self {
            provider: get(KEY_PROVIDER),
            api_key: get(KEY_API_KEY),
            base_url: get(KEY_BASE_URL),
            model: get(KEY_MODEL),
            system_message: get(KEY_SYSTEM_MESSAGE),
            web_search_enabled,
            mcp_servers,
        })
    }

    /**
     * \brief 按 SETTINGS_KEYS 顺序导出已设置的键值，布尔值写成 "true"/"false"。
     */
    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let optional = [
            (KEY_PROVIDER, &self.provider),
            (KEY_API_KEY, &self.api_key),
            (KEY_BASE_URL, &self.base_url),
            (KEY_MODEL, &self.model),
            (KEY_SYSTEM_MESSAGE, &self.system_message),
        ];
        for (key, value) in optional {
            if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                out.push((key, v.to_string()));
            }
        }
        out.push((KEY_WEB_SEARCH_ENABLED, self.web_search_enabled.to_string()));
        if let Some(v) = self.mcp_servers.as_deref().filter(|v| !v.trim().is_empty()) {
            out.push((KEY_MCP_SERVERS, v.to_string()));
        }
        out
    }

    /** \brief 去除空白后的 API Key。 */
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    /** \brief 生效的 Provider 标识。 */
    pub fn provider_id(&self) -> &str {
        self.provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROVIDER_ID)
    }

    fn non_empty(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn base_url(&self) -> Option<&str> {
        Self::non_empty(&self.base_url)
    }

    pub fn model(&self) -> Option<&str> {
        Self::non_empty(&self.model)
    }

    pub fn system_message(&self) -> Option<&str> {
        Self::non_empty(&self.system_message)
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, SettingsError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SettingsError::InvalidBool {
            key,
            value: raw.to_string(),
        }),
    }
}

/**
 * \brief 校验 MCP 服务器字段为 JSON 数组；内容本身不解释。
 */
pub fn validate_mcp_servers(raw: &str) -> Result<(), SettingsError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| SettingsError::InvalidMcpServers(e.to_string()))?;
    if parsed.is_array() {
        Ok(())
    } else {
        Err(SettingsError::InvalidMcpServers("not an array".to_string()))
    }
}

/**
 * \brief 扁平键值持久化接口。
 */
pub trait SettingsStore: Send + Sync {
    /** \brief 读取全部设置键值。 */
    fn entries(&self) -> Result<BTreeMap<String, String>>;
    /** \brief 写入单个键。 */
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /** \brief 删除单个键（不存在时为空操作）。 */
    fn remove(&self, key: &str) -> Result<()>;
}

/**
 * \brief 内存实现，用于测试与临时会话。
 */
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Mutex::new(map),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn entries(&self) -> Result<BTreeMap<String, String>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("settings store poisoned"))?;
        Ok(guard.clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("settings store poisoned"))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("settings store poisoned"))?;
        guard.remove(key);
        Ok(())
    }
}

/**
 * \brief 读取设置快照；存储失败或内容损坏时返回错误，由调用方决定是否替换为默认值。
 */
pub fn load(store: &dyn SettingsStore) -> Result<Settings, SettingsError> {
    let entries = store.entries()?;
    Settings::from_entries(&entries)
}

/**
 * \brief 容忍损坏的读取策略：记录错误并返回空设置。
 */
pub fn load_or_default(store: &dyn SettingsStore) -> Settings {
    match load(store) {
        Ok(settings) => settings,
        Err(err) => {
            telemetry::log_error("settings.load", &format!("falling back to defaults: {}", err));
            Settings::default()
        }
    }
}

/**
 * \brief 整体保存设置：已设置的键写入，未设置的键删除。
 */
pub fn save(store: &dyn SettingsStore, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(raw) = settings.mcp_servers.as_deref().filter(|v| !v.trim().is_empty()) {
        validate_mcp_servers(raw)?;
    }
    let entries = settings.to_entries();
    for key in SETTINGS_KEYS {
        match entries.iter().find(|(k, _)| *k == key) {
            Some((_, value)) => store.set(key, value)?,
            None => store.remove(key)?,
        }
    }
    Ok(())
}

/**
 * \brief 清空全部设置键。
 */
pub fn clear(store: &dyn SettingsStore) -> Result<(), SettingsError> {
    for key in SETTINGS_KEYS {
        store.remove(key)?;
    }
    Ok(())
}

/**
 * \brief 配置页关闭时回传的扁平设置对象（值均为字符串）。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorPayload {
    values: BTreeMap<String, String>,
}

impl EditorPayload {
    /**
     * \brief 解析配置页回传：URI 编码的 JSON 对象。
     * \details 未知键被忽略；布尔值与 null 会被宽容地转成字符串。
     */
    pub fn parse(response: &str) -> Result<Self, SettingsError> {
        let decoded = urlencoding::decode(response)
            .map_err(|e| SettingsError::InvalidPayload(e.to_string()))?;
        let raw: BTreeMap<String, Value> = serde_json::from_str(&decoded)
            .map_err(|e| SettingsError::InvalidPayload(e.to_string()))?;

        let mut values = BTreeMap::new();
        for (key, value) in raw {
            let Some(known) = SETTINGS_KEYS.iter().find(|k| **k == key) else {
                continue;
            };
            let text = match value {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => {
                    return Err(SettingsError::InvalidPayload(format!(
                        "{} must be a string, got {}",
                        key, other
                    )))
                }
            };
            values.insert((*known).to_string(), text.trim().to_string());
        }

        if let Some(raw) = values.get(KEY_MCP_SERVERS).filter(|v| !v.is_empty()) {
            validate_mcp_servers(raw)?;
        }
        if let Some(raw) = values.get(KEY_WEB_SEARCH_ENABLED).filter(|v| !v.is_empty()) {
            parse_bool(KEY_WEB_SEARCH_ENABLED, raw)?;
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/**
 * \brief 应用配置页回传：非空值写入，空值删除，未出现的键保持不变。
 * \details 先在内存中合并并校验，校验失败时存储不被改动。
 * \return 应用后的最新设置快照
 */
pub fn apply_editor_payload(
    store: &dyn SettingsStore,
    payload: &EditorPayload,
) -> Result<Settings, SettingsError> {
    let mut merged = store.entries()?;
    for (key, value) in &payload.values {
        if value.is_empty() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    let settings = Settings::from_entries(&merged)?;

    for (key, value) in &payload.values {
        if value.is_empty() {
            store.remove(key)?;
        } else {
            store.set(key, value)?;
        }
    }
    Ok(settings)
}

/**
 * \brief 生成配置页地址，附带当前已保存的设置作为查询参数。
 */
pub fn configuration_url(page: &str, settings: &Settings) -> String {
    let params = settings
        .to_entries()
        .into_iter()
        .filter(|(key, _)| *key != KEY_WEB_SEARCH_ENABLED || settings.web_search_enabled)
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value)))
        .collect::<Vec<_>>();
    if params.is_empty() {
        return page.to_string();
    }
    let sep = if page.contains('?') { '&' } else { '?' };
    format!("{}{}{}", page, sep, params.join("&"))
}
