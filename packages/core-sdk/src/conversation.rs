use crate::models::{ConversationTurn, Role};

const USER_MARKER: &str = "[U]";
const ASSISTANT_MARKER: &str = "[A]";
const MARKER_LEN: usize = 3;

enum Segment<'a> {
    Marker(Role),
    Text(&'a str),
}

/**
 * \brief 解码手表端的线性对话记录，如 `[U]Hello[A]Hi there[U]How are you?`。
 * \details 标记之后的第一段非空文本成为一轮对话；没有待定角色的文本直接丢弃，
 *          畸形输入被容忍而不是报错。
 */
pub fn decode(encoded: &str) -> Vec<ConversationTurn> {
    let mut turns = Vec::new();
    let mut pending: Option<Role> = None;
    for segment in segments(encoded) {
        match segment {
            Segment::Marker(role) => pending = Some(role),
            Segment::Text(text) if !text.is_empty() => {
                if let Some(role) = pending.take() {
                    turns.push(ConversationTurn::new(role, text));
                }
            }
            Segment::Text(_) => {}
        }
    }
    turns
}

fn segments(encoded: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = encoded;
    while let Some(idx) = next_marker(rest) {
        let (text, tail) = rest.split_at(idx);
        out.push(Segment::Text(text));
        let role = if tail.starts_with(USER_MARKER) {
            Role::User
        } else {
            Role::Assistant
        };
        out.push(Segment::Marker(role));
        rest = &tail[MARKER_LEN..];
    }
    out.push(Segment::Text(rest));
    out
}

fn next_marker(s: &str) -> Option<usize> {
    match (s.find(USER_MARKER), s.find(ASSISTANT_MARKER)) {
        (Some(u), Some(a)) => Some(u.min(a)),
        (u, a) => u.or(a),
    }
}
