use serde::{Deserialize, Serialize};

/**
 * \brief 对话角色：手表端编码记录里只会出现 user 与 assistant。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/**
 * \brief 解码后的一轮对话。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /** \brief 角色 */
    pub role: Role,
    /** \brief 内容，非空 */
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/**
 * \brief 一次提问的输入：单条问题或多轮对话。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Question(String),
    Turns(Vec<ConversationTurn>),
}

impl Prompt {
    /**
     * \brief 统一视图：单条问题视为一轮 user 对话。
     */
    pub fn turns(&self) -> Vec<ConversationTurn> {
        match self {
            Prompt::Question(q) => vec![ConversationTurn::new(Role::User, q.clone())],
            Prompt::Turns(turns) => turns.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Prompt::Question(q) => q.is_empty(),
            Prompt::Turns(turns) => turns.is_empty(),
        }
    }

    /** \brief 日志用的字符数。 */
    pub fn char_len(&self) -> usize {
        match self {
            Prompt::Question(q) => q.chars().count(),
            Prompt::Turns(turns) => turns.iter().map(|t| t.content.chars().count()).sum(),
        }
    }
}

impl From<&str> for Prompt {
    fn from(value: &str) -> Self {
        Prompt::Question(value.to_string())
    }
}

impl From<String> for Prompt {
    fn from(value: String) -> Self {
        Prompt::Question(value)
    }
}

/**
 * \brief 发往手表的回复，键为 RESPONSE 或 ERROR。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutgoingMessage {
    #[serde(rename = "RESPONSE")]
    Response(String),
    #[serde(rename = "ERROR")]
    Error(String),
}

impl OutgoingMessage {
    pub fn key(&self) -> &'static str {
        match self {
            OutgoingMessage::Response(_) => "RESPONSE",
            OutgoingMessage::Error(_) => "ERROR",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            OutgoingMessage::Response(text) | OutgoingMessage::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutgoingMessage::Error(_))
    }
}

/**
 * \brief 设备通道上的全部出站消息。
 * \details 序列化为 `{"RESPONSE": ".."}`、`{"ERROR": ".."}` 或 `{"READY_STATUS": 1}`。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DeviceMessage {
    Reply(OutgoingMessage),
    Ready {
        #[serde(rename = "READY_STATUS")]
        ready_status: u8,
    },
}

impl DeviceMessage {
    pub fn ready(ready: bool) -> Self {
        DeviceMessage::Ready {
            ready_status: u8::from(ready),
        }
    }
}

impl From<OutgoingMessage> for DeviceMessage {
    fn from(value: OutgoingMessage) -> Self {
        DeviceMessage::Reply(value)
    }
}

/**
 * \brief 手表发来的入站消息。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPayload {
    /** \brief 单条问题原文 */
    #[serde(rename = "QUESTION", default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /** \brief `[U]..[A]..` 编码的多轮对话 */
    #[serde(rename = "CHAT", default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
}
