use std::sync::Arc;

use crate::conversation;
use crate::llm::{ProviderKind, Transport};
use crate::models::{DeviceMessage, InboundPayload, OutgoingMessage, Prompt};
use crate::normalize::cap;
use crate::router;
use crate::settings::{self, EditorPayload, Settings, SettingsError, SettingsStore};
use crate::telemetry;

/** \brief 默认配置页地址，可通过 WATCHBRIDGE_CONFIG_PAGE 覆盖。 */
pub const DEFAULT_CONFIG_PAGE: &str =
    "https://dinosan-kinde.github.io/client-for-pebble/index.html";

/** \brief 配置页回传无法处理时发给手表的错误。 */
pub const SETTINGS_ERROR: &str = "Settings error";

/**
 * \brief 手表与 Provider 之间的桥：处理 ready、提问、配置页打开与关闭事件。
 * \details 不保留跨周期状态，每次提问都重新读取设置快照。
 */
#[derive(Clone)]
pub struct Bridge {
    store: Arc<dyn SettingsStore>,
    transport: Arc<dyn Transport>,
    config_page: String,
}

impl Bridge {
    pub fn new(store: Arc<dyn SettingsStore>, transport: Arc<dyn Transport>) -> Self {
        let config_page = std::env::var("WATCHBRIDGE_CONFIG_PAGE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PAGE.to_string());
        Self {
            store,
            transport,
            config_page,
        }
    }

    pub fn with_config_page(mut self, page: impl Into<String>) -> Self {
        self.config_page = page.into();
        self
    }

    /** \brief 当前设置快照（损坏时退回默认值）。 */
    pub fn settings(&self) -> Settings {
        settings::load_or_default(self.store.as_ref())
    }

    /**
     * \brief 通道就绪：告知手表是否已配置 API Key。
     */
    pub fn on_ready(&self) -> DeviceMessage {
        let ready = self.settings().has_api_key();
        telemetry::log_event("bridge.ready", &format!("ready={}", ready));
        DeviceMessage::ready(ready)
    }

    /**
     * \brief 处理手表发来的提问；CHAT 优先于 QUESTION。
     * \return 恰好一条回复；空提问返回 None
     */
    pub async fn on_message(&self, payload: &InboundPayload) -> Option<DeviceMessage> {
        let prompt = match (payload.chat.as_deref(), payload.question.as_deref()) {
            (Some(chat), _) if !chat.is_empty() => Prompt::Turns(conversation::decode(chat)),
            (_, Some(question)) if !question.is_empty() => Prompt::Question(question.to_string()),
            _ => {
                telemetry::log_event("bridge.message", "ignored payload without question");
                return None;
            }
        };
        if prompt.is_empty() {
            telemetry::log_event("bridge.message", "ignored transcript without turns");
            return None;
        }

        let settings = self.settings();
        let reply = router::handle(&prompt, &settings, self.transport.as_ref()).await;
        Some(reply.into())
    }

    /**
     * \brief 配置页关闭：保存回传设置并通知手表。
     * \details 回传无法解析或校验失败时记录日志、回复 "Settings error"，存储保持不变。
     */
    pub fn on_configuration_closed(&self, response: &str) -> Vec<DeviceMessage> {
        if response.trim().is_empty() {
            return Vec::new();
        }
        let applied = EditorPayload::parse(response)
            .and_then(|payload| settings::apply_editor_payload(self.store.as_ref(), &payload));
        match applied {
            Ok(saved) => {
                telemetry::log_event(
                    "bridge.config",
                    &format!(
                        "saved provider={} web_search={} has_key={}",
                        saved.provider_id(),
                        saved.web_search_enabled,
                        saved.has_api_key()
                    ),
                );
                let status = if saved.has_api_key() {
                    let name = ProviderKind::from_id(saved.provider_id())
                        .map(ProviderKind::display_name)
                        .unwrap_or(saved.provider_id());
                    format!("Saved! Using {}", name)
                } else {
                    "Settings cleared".to_string()
                };
                vec![
                    DeviceMessage::ready(saved.has_api_key()),
                    OutgoingMessage::Response(cap(&status)).into(),
                ]
            }
            Err(err) => {
                telemetry::log_error("bridge.config", &format!("rejected settings: {}", err));
                vec![OutgoingMessage::Error(SETTINGS_ERROR.to_string()).into()]
            }
        }
    }

    /**
     * \brief 打开配置页：返回附带当前设置的页面地址。
     */
    pub fn configuration_url(&self) -> String {
        settings::configuration_url(&self.config_page, &self.settings())
    }

    /**
     * \brief 清空全部设置。
     */
    pub fn reset(&self) -> Result<(), SettingsError> {
        settings::clear(self.store.as_ref())?;
        telemetry::log_event("bridge.config", "settings reset");
        Ok(())
    }
}
