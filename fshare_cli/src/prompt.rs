use async_trait::async_trait;
use fshare_core::receive::PasswordPrompt;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Reads a replacement password from the terminal
pub struct StdinPrompt;

#[async_trait]
impl PasswordPrompt for StdinPrompt {
    async fn prompt(&self, attempt: u32) -> Option<String> {
        eprint!("Invalid password (attempt {}). Enter password: ", attempt);
        let _ = std::io::stderr().flush();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => Some(line.trim().to_string()),
            _ => None,
        }
    }
}
