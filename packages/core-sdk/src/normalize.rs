use crate::llm::ProviderResult;
use crate::models::OutgoingMessage;

/** \brief 手表端显示的最大字符数（含省略号）。 */
pub const DISPLAY_LIMIT: usize = 480;
/** \brief 设备通道单条消息的硬上限。 */
pub const SEND_LIMIT: usize = 500;
pub const ELLIPSIS: &str = "...";

/**
 * \brief 超长时截断到 max_chars 个字符，末尾三个字符替换为省略号。
 */
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out.chars().take(max_chars).collect()
}

/**
 * \brief 通道硬上限，直接截断不加省略号。
 */
pub fn cap(text: &str) -> String {
    text.chars().take(SEND_LIMIT).collect()
}

/**
 * \brief 将 Provider 结果转为出站消息；两类消息共用同一长度上限。
 */
pub fn normalize(result: ProviderResult) -> OutgoingMessage {
    match result {
        Ok(text) => OutgoingMessage::Response(cap(&truncate(&text, DISPLAY_LIMIT))),
        Err(err) => OutgoingMessage::Error(cap(&err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderError;

    #[test]
    fn test_short_text_passes_through() {
        assert_eq!(
            normalize(Ok("42".to_string())),
            OutgoingMessage::Response("42".to_string())
        );
    }

    #[test]
    fn test_long_text_truncated_to_display_limit() {
        let long = "a".repeat(1200);
        let msg = normalize(Ok(long));
        assert_eq!(msg.text().chars().count(), DISPLAY_LIMIT);
        assert!(msg.text().ends_with(ELLIPSIS));
        assert!(!msg.is_error());
    }

    #[test]
    fn test_exact_limit_is_not_truncated() {
        let text = "b".repeat(DISPLAY_LIMIT);
        assert_eq!(normalize(Ok(text.clone())).text(), text);
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "é".repeat(DISPLAY_LIMIT + 1);
        let out = truncate(&text, DISPLAY_LIMIT);
        assert_eq!(out.chars().count(), DISPLAY_LIMIT);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn test_errors_use_detail_verbatim() {
        let msg = normalize(Err(ProviderError::HttpStatus {
            provider: "OpenAI",
            status: 401,
        }));
        assert_eq!(msg, OutgoingMessage::Error("OpenAI error 401".to_string()));
        assert_eq!(msg.key(), "ERROR");
    }

    #[test]
    fn test_cap_bounds_everything() {
        assert_eq!(cap(&"x".repeat(900)).chars().count(), SEND_LIMIT);
        assert_eq!(truncate("abcdef", 2), "..");
    }
}
