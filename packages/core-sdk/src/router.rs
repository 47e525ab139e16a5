use crate::llm::{ProviderError, ProviderKind, ProviderResult, Transport};
use crate::models::{OutgoingMessage, Prompt};
use crate::normalize::normalize;
use crate::settings::Settings;
use crate::telemetry;

/**
 * \brief 处理一次提问：选择 Provider、调用一次、规整为出站消息。
 */
pub async fn handle(
    prompt: &Prompt,
    settings: &Settings,
    transport: &dyn Transport,
) -> OutgoingMessage {
    normalize(dispatch(prompt, settings, transport).await)
}

/**
 * \brief 路由并执行，未规整的原始结果。
 * \details 缺少 API Key 或 Provider 未知时直接返回错误，不发出任何请求。
 */
pub async fn dispatch(
    prompt: &Prompt,
    settings: &Settings,
    transport: &dyn Transport,
) -> ProviderResult {
    if !settings.has_api_key() {
        telemetry::log_error("router", "rejected: no api key");
        return Err(ProviderError::NoApiKey);
    }
    let Some(kind) = ProviderKind::from_id(settings.provider_id()) else {
        telemetry::log_error(
            "router",
            &format!("rejected: unknown provider {:?}", settings.provider_id()),
        );
        return Err(ProviderError::UnknownProvider);
    };

    telemetry::log_event(
        "router",
        &format!(
            "provider={} model={} prompt_len={}",
            kind.id(),
            kind.model(settings),
            prompt.char_len()
        ),
    );
    let result = kind.execute(transport, prompt, settings).await;
    match &result {
        Ok(text) => telemetry::log_event(
            "router",
            &format!("provider={} reply_len={}", kind.id(), text.chars().count()),
        ),
        Err(err) => telemetry::log_error(
            "router",
            &format!("provider={} kind={} detail={}", kind.id(), err.kind(), err),
        ),
    }
    result
}
