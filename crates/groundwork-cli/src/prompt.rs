use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use groundwork_installer::{AssumeYes, Confirmer, NonInteractive, Prompter};

/// Asks on stderr and reads the answer from stdin.
pub(crate) struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn as_confirmer(&self) -> Option<&dyn Confirmer> {
        Some(self)
    }
}

impl Confirmer for StdinPrompter {
    fn confirm(&self, question: &str) -> Result<bool> {
        let mut stderr = io::stderr();
        write!(stderr, "{question} [y/N] ").context("failed to write prompt")?;
        stderr.flush().context("failed to flush prompt")?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed to read confirmation from stdin")?;
        Ok(is_affirmative(&answer))
    }
}

pub(crate) fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub(crate) fn select_prompter(assume_yes: bool) -> Box<dyn Prompter> {
    if assume_yes {
        Box::new(AssumeYes)
    } else if io::stdin().is_terminal() {
        Box::new(StdinPrompter)
    } else {
        Box::new(NonInteractive)
    }
}
