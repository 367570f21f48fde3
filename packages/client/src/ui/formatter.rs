//! Message formatting utilities for client display.

use pairchat_shared::time::timestamp_to_local_hhmm;

use crate::domain::{SessionEvent, SessionStatus};

const RULE: &str = "============================================================";

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format a session event received at `now_millis`.
    ///
    /// Returns an empty string for events that print nothing.
    pub fn format_event(event: &SessionEvent, now_millis: i64) -> String {
        match event {
            SessionEvent::Status(status) => Self::format_status(*status),
            SessionEvent::Message { text, own } => {
                Self::format_chat_message(text, *own, now_millis)
            }
            SessionEvent::Notice(text) => format!("\n! {}\n", text),
            SessionEvent::PeerTyping(true) => "\n(Stranger is typing...)\n".to_string(),
            SessionEvent::PeerTyping(false) => String::new(),
        }
    }

    /// Format a status change
    pub fn format_status(status: SessionStatus) -> String {
        match status {
            SessionStatus::SigningIn => "\n* Signing in...\n".to_string(),
            SessionStatus::Ready => "\n* Ready. Type /find to meet a stranger.\n".to_string(),
            SessionStatus::Searching => "\n* Looking for someone to chat with...\n".to_string(),
            SessionStatus::Connected => format!(
                "\n\n{}\nYou're now chatting with a random stranger. Say hi!\n{}\n",
                RULE, RULE
            ),
            SessionStatus::PeerLeft => {
                "\n* Stranger has disconnected. Type /next to meet someone new.\n".to_string()
            }
            SessionStatus::Error => {
                "\n* Something went wrong. Type /find to try again.\n".to_string()
            }
        }
    }

    /// Format a chat message
    ///
    /// # Arguments
    ///
    /// * `text` - The message text
    /// * `own` - Whether this client sent the message
    /// * `shown_at` - Unix timestamp the message is displayed at (milliseconds)
    pub fn format_chat_message(text: &str, own: bool, shown_at: i64) -> String {
        let sender = if own { "You" } else { "Stranger" };
        match timestamp_to_local_hhmm(shown_at) {
            Some(time) => format!("\n[{}] {}: {}\n", time, sender, text),
            None => format!("\n{}: {}\n", sender, text),
        }
    }

    /// Format the list of commands
    pub fn format_help() -> String {
        format!(
            "\n{}\n\
             /find   look for a stranger to chat with\n\
             /next   leave the current chat and look for someone new\n\
             /leave  leave the current chat\n\
             /help   show this help\n\
             /quit   exit\n\
             Anything else is sent as a message.\n\
             {}\n",
            RULE, RULE
        )
    }

    /// Format the reply to an unknown command
    pub fn format_unknown_command(command: &str) -> String {
        format!("\n! Unknown command '{}'. Type /help for the list.\n", command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_own_and_peer_messages() {
        // テスト項目: 自分と相手のメッセージが送信者ラベル付きでフォーマットされる
        // given (前提条件):
        let shown_at = 1672498800000;

        // when (操作):
        let own = MessageFormatter::format_chat_message("hi", true, shown_at);
        let peer = MessageFormatter::format_chat_message("hello", false, shown_at);

        // then (期待する結果):
        assert!(own.contains("You: hi"));
        assert!(peer.contains("Stranger: hello"));
        assert!(own.starts_with("\n["));
    }

    #[test]
    fn test_format_connected_status() {
        // テスト項目: 接続状態が区切り線付きで表示される
        // given (前提条件):
        let event = SessionEvent::Status(SessionStatus::Connected);

        // when (操作):
        let result = MessageFormatter::format_event(&event, 0);

        // then (期待する結果):
        assert!(result.contains("chatting with a random stranger"));
        assert!(result.contains(RULE));
    }

    #[test]
    fn test_format_peer_left_suggests_next() {
        // テスト項目: 相手の退出時に /next が案内される
        // given (前提条件):
        let event = SessionEvent::Status(SessionStatus::PeerLeft);

        // when (操作):
        let result = MessageFormatter::format_event(&event, 0);

        // then (期待する結果):
        assert!(result.contains("Stranger has disconnected"));
        assert!(result.contains("/next"));
    }

    #[test]
    fn test_format_typing_events() {
        // テスト項目: 入力中の通知は表示され、入力終了は何も表示しない
        // given (前提条件):
        let typing = SessionEvent::PeerTyping(true);
        let stopped = SessionEvent::PeerTyping(false);

        // when (操作):
        let shown = MessageFormatter::format_event(&typing, 0);
        let hidden = MessageFormatter::format_event(&stopped, 0);

        // then (期待する結果):
        assert!(shown.contains("typing"));
        assert!(hidden.is_empty());
    }

    #[test]
    fn test_format_notice() {
        // テスト項目: 通知が ! 付きでフォーマットされる
        // given (前提条件):
        let event = SessionEvent::Notice("Message is empty".to_string());

        // when (操作):
        let result = MessageFormatter::format_event(&event, 0);

        // then (期待する結果):
        assert_eq!(result, "\n! Message is empty\n");
    }

    #[test]
    fn test_format_help_lists_commands() {
        // テスト項目: ヘルプに全コマンドが含まれる
        // given (前提条件) / when (操作):
        let result = MessageFormatter::format_help();

        // then (期待する結果):
        for command in ["/find", "/next", "/leave", "/help", "/quit"] {
            assert!(result.contains(command));
        }
    }
}
