use anyhow::Result;

/// Hook for questions asked during an upgrade. Implementations that can ask
/// yes/no questions expose that through [`Prompter::as_confirmer`].
pub trait Prompter {
    fn as_confirmer(&self) -> Option<&dyn Confirmer> {
        None
    }
}

pub trait Confirmer {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Answers every question with yes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn as_confirmer(&self) -> Option<&dyn Confirmer> {
        Some(self)
    }
}

impl Confirmer for AssumeYes {
    fn confirm(&self, question: &str) -> Result<bool> {
        tracing::debug!(question, "confirmed without prompting");
        Ok(true)
    }
}

/// Cannot ask anything; operations that need consent fail instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {}
