//! Prompt handling.

use std::io::Write;

pub const PROMPT: &str = "you> ";

/// Redisplay the prompt after printing asynchronous output
pub fn redisplay_prompt() {
    print!("{}", PROMPT);
    std::io::stdout().flush().ok();
}
