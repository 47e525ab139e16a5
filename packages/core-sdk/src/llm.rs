use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{Prompt, Role};
use crate::settings::Settings;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";
const WEB_SEARCH_TOOL_NAME: &str = "web_search";

/** \brief 各 Provider 的输出 token 上限。 */
pub const MAX_OUTPUT_TOKENS: u32 = 300;

/** \brief 响应中找不到文本时的兜底回复。 */
pub const NO_RESPONSE: &str = "No response";

/** \brief 默认 HTTP 超时。 */
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/**
 * \brief 单次提问的失败原因，Display 即发往手表的错误文本。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("No API key set")]
    NoApiKey,
    #[error("Unknown provider")]
    UnknownProvider,
    #[error("{provider} error {status}")]
    HttpStatus { provider: &'static str, status: u16 },
    #[error("Parse error")]
    Parse,
    #[error("Network error")]
    Network,
    /** \brief 超时与网络错误对用户呈现一致，仅在日志中区分。 */
    #[error("Network error")]
    Timeout,
}

impl ProviderError {
    /** \brief 日志用的错误类别名。 */
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NoApiKey => "no_api_key",
            ProviderError::UnknownProvider => "unknown_provider",
            ProviderError::HttpStatus { .. } => "http_status",
            ProviderError::Parse => "parse",
            ProviderError::Network => "network",
            ProviderError::Timeout => "timeout",
        }
    }
}

/** \brief Provider 调用结果：成功文本或失败原因。 */
pub type ProviderResult = std::result::Result<String, ProviderError>;

/**
 * \brief 传输层失败。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
}

/**
 * \brief 需要归类的失败结果。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Status(u16),
    Parse,
    Transport(TransportError),
}

/**
 * \brief 与具体 HTTP 客户端无关的请求描述。
 */
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Value,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/**
 * \brief 原始 HTTP 响应：状态码与正文。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/**
 * \brief 发送单个请求并返回唯一终态结果，不做重试。
 */
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/**
 * \brief 基于 reqwest 的传输实现，带固定超时。
 */
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /**
     * \brief 读取 WATCHBRIDGE_HTTP_TIMEOUT_SECS，缺省 15 秒。
     */
    pub fn from_env() -> Result<Self> {
        let timeout = std::env::var("WATCHBRIDGE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self::new(timeout)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let resp = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body.to_string())
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

/**
 * \brief Provider 的静态描述。
 */
#[derive(Debug)]
pub struct ProviderProfile {
    /** \brief 设置中的标识 */
    pub id: &'static str,
    /** \brief 错误文本里的名称 */
    pub display_name: &'static str,
    pub default_url: &'static str,
    pub default_model: &'static str,
    pub default_system_message: &'static str,
    pub supports_web_search: bool,
    /** \brief 响应正文中回答文本的 JSON Pointer */
    pub response_pointer: &'static str,
}

static CLAUDE: ProviderProfile = ProviderProfile {
    id: "claude",
    display_name: "Claude",
    default_url: "https://api.anthropic.com/v1/messages",
    default_model: "claude-haiku-4-5",
    default_system_message: "You're running on a Pebble smartwatch. Please respond in plain text without any formatting, keeping your responses within 1-3 sentences.",
    supports_web_search: true,
    response_pointer: "/content/0/text",
};

static OPENAI: ProviderProfile = ProviderProfile {
    id: "openai",
    display_name: "OpenAI",
    default_url: "https://api.openai.com/v1/chat/completions",
    default_model: "gpt-4o-mini",
    default_system_message: "You're running on a Pebble smartwatch. Keep responses very brief - 1-3 sentences maximum.",
    supports_web_search: false,
    response_pointer: "/choices/0/message/content",
};

static GEMINI: ProviderProfile = ProviderProfile {
    id: "gemini",
    display_name: "Gemini",
    default_url: "https://generativelanguage.googleapis.com/v1beta/models",
    default_model: "gemini-2.0-flash-lite",
    default_system_message: "You're running on a Pebble smartwatch. Keep responses extremely brief - 1-3 sentences only.",
    supports_web_search: false,
    response_pointer: "/candidates/0/content/parts/0/text",
};

static GROK: ProviderProfile = ProviderProfile {
    id: "grok",
    display_name: "Grok",
    default_url: "https://api.x.ai/v1/chat/completions",
    default_model: "grok-2-latest",
    default_system_message: "You're running on a Pebble smartwatch. Keep responses brief - 1-3 sentences.",
    supports_web_search: false,
    response_pointer: "/choices/0/message/content",
};

/**
 * \brief 支持的 Provider；新增 Provider 只需新增一个变体及其 profile。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    OpenAi,
    Gemini,
    Grok,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Claude,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::Grok,
    ];

    /**
     * \brief 按设置中的标识查找 Provider。
     */
    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.profile().id.eq_ignore_ascii_case(id))
    }

    pub fn profile(self) -> &'static ProviderProfile {
        match self {
            ProviderKind::Claude => &CLAUDE,
            ProviderKind::OpenAi => &OPENAI,
            ProviderKind::Gemini => &GEMINI,
            ProviderKind::Grok => &GROK,
        }
    }

    pub fn id(self) -> &'static str {
        self.profile().id
    }

    pub fn display_name(self) -> &'static str {
        self.profile().display_name
    }

    /** \brief 设置中的模型名，缺省为 Provider 默认模型。 */
    pub fn model<'a>(self, settings: &'a Settings) -> &'a str {
        settings.model().unwrap_or(self.profile().default_model)
    }

    /**
     * \brief 依据提问与设置构建 HTTP 请求。
     * \details 地址非法或密钥无法放入请求头时按网络错误处理，不发出请求。
     */
    pub fn build_request(
        self,
        prompt: &Prompt,
        settings: &Settings,
    ) -> std::result::Result<HttpRequest, ProviderError> {
        let api_key = settings.api_key().ok_or(ProviderError::NoApiKey)?;
        let profile = self.profile();
        let base = settings.base_url().unwrap_or(profile.default_url);
        let model = self.model(settings);
        let system = settings
            .system_message()
            .unwrap_or(profile.default_system_message);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let (url, body) = match self {
            ProviderKind::Claude => {
                headers.insert(
                    HeaderName::from_static("x-api-key"),
                    header_value(api_key)?,
                );
                headers.insert(
                    HeaderName::from_static("anthropic-version"),
                    HeaderValue::from_static(ANTHROPIC_VERSION),
                );
                let web_search = settings.web_search_enabled && profile.supports_web_search;
                (parse_url(base)?, claude_body(model, system, prompt, web_search))
            }
            ProviderKind::OpenAi | ProviderKind::Grok => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", api_key))?);
                (parse_url(base)?, chat_completions_body(model, system, prompt))
            }
            ProviderKind::Gemini => {
                let mut url = parse_url(&format!(
                    "{}/{}:generateContent",
                    normalize_gemini_base(base),
                    model
                ))?;
                url.query_pairs_mut().append_pair("key", api_key);
                (url, gemini_body(system, prompt))
            }
        };

        Ok(HttpRequest {
            method: Method::POST,
            url,
            headers,
            body,
        })
    }

    /**
     * \brief 从响应正文提取回答文本。
     * \details 正文不是 JSON 时为解析错误；路径缺失或文本为空时回退为 "No response"。
     */
    pub fn parse_response(self, raw: &str) -> ProviderResult {
        let v: Value =
            serde_json::from_str(raw).map_err(|_| self.classify_failure(Failure::Parse))?;
        let text = v
            .pointer(self.profile().response_pointer)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(NO_RESPONSE);
        Ok(text.to_string())
    }

    /**
     * \brief 将失败统一归类为错误文本。
     */
    pub fn classify_failure(self, failure: Failure) -> ProviderError {
        match failure {
            Failure::Status(status) => ProviderError::HttpStatus {
                provider: self.display_name(),
                status,
            },
            Failure::Parse => ProviderError::Parse,
            Failure::Transport(TransportError::Timeout) => ProviderError::Timeout,
            Failure::Transport(TransportError::Network(_)) => ProviderError::Network,
        }
    }

    /**
     * \brief 完整流程：构建请求 → 发送一次 → 解析或归类失败。
     */
    pub async fn execute(
        self,
        transport: &dyn Transport,
        prompt: &Prompt,
        settings: &Settings,
    ) -> ProviderResult {
        let request = self.build_request(prompt, settings)?;
        match transport.send(request).await {
            Ok(resp) if resp.status == 200 => self.parse_response(&resp.body),
            Ok(resp) => Err(self.classify_failure(Failure::Status(resp.status))),
            Err(err) => Err(self.classify_failure(Failure::Transport(err))),
        }
    }
}

fn parse_url(raw: &str) -> std::result::Result<Url, ProviderError> {
    Url::parse(raw).map_err(|_| ProviderError::Network)
}

fn header_value(raw: &str) -> std::result::Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(raw).map_err(|_| ProviderError::Network)
}

fn claude_body(model: &str, system: &str, prompt: &Prompt, web_search: bool) -> Value {
    let messages = prompt
        .turns()
        .into_iter()
        .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content}))
        .collect::<Vec<_>>();
    let mut body = json!({
        "model": model,
        "max_tokens": MAX_OUTPUT_TOKENS,
        "system": system,
        "messages": messages,
    });
    if web_search {
        body["tools"] = json!([{
            "type": WEB_SEARCH_TOOL_TYPE,
            "name": WEB_SEARCH_TOOL_NAME
        }]);
    }
    body
}

fn chat_completions_body(model: &str, system: &str, prompt: &Prompt) -> Value {
    let mut messages = vec![json!({"role": "system", "content": system})];
    messages.extend(
        prompt
            .turns()
            .into_iter()
            .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content})),
    );
    json!({
        "model": model,
        "max_tokens": MAX_OUTPUT_TOKENS,
        "messages": messages,
    })
}

fn gemini_body(system: &str, prompt: &Prompt) -> Value {
    let contents = match prompt {
        Prompt::Question(question) => vec![json!({"parts": [{"text": question}]})],
        Prompt::Turns(turns) => turns
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({"role": role, "parts": [{"text": turn.content}]})
            })
            .collect(),
    };
    json!({
        "system_instruction": {"parts": [{"text": system}]},
        "contents": contents,
        "generationConfig": {"maxOutputTokens": MAX_OUTPUT_TOKENS},
    })
}

/**
 * \brief Gemini 基地址需指向 models 集合。
 * \details base_url 覆盖值不以 "/models" 结尾时会被追加 "/models"，
 *          例如 "https://proxy/gemini" 变为 "https://proxy/gemini/models"；
 *          已以 "/models" 或 "/models/" 结尾的地址原样使用。
 */
fn normalize_gemini_base(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/models") {
        trimmed.to_string()
    } else {
        format!("{}/models", trimmed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::*;

    /**
     * \brief 记录请求并返回预设结果的传输实现。
     */
    pub(crate) struct RecordingTransport {
        pub requests: Mutex<Vec<HttpRequest>>,
        outcome: std::result::Result<HttpResponse, TransportError>,
    }

    impl RecordingTransport {
        pub fn replying(status: u16, body: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                outcome: Ok(HttpResponse::new(status, body)),
            }
        }

        pub fn failing(err: TransportError) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                outcome: Err(err),
            }
        }

        pub fn sent(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("lock requests").clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(
            &self,
            request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.requests.lock().expect("lock requests").push(request);
            self.outcome.clone()
        }
    }
}
