use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::traits::OperatorGate;

/// Blocks on a line from stdin. Used after login so an operator can clear
/// a captcha or two-factor challenge in the browser session.
pub struct StdinGate;

#[async_trait]
impl OperatorGate for StdinGate {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        info!(prompt, "Waiting for operator confirmation");
        let prompt = prompt.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut stdout = std::io::stdout();
            write!(stdout, "{prompt} [press enter to continue] ")?;
            stdout.flush()?;

            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line)?;
            if read == 0 {
                anyhow::bail!("stdin closed before operator confirmed");
            }
            Ok(())
        })
        .await
        .context("Operator prompt task panicked")??;

        info!("Operator confirmed");
        Ok(())
    }
}
