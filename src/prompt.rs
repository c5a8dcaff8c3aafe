//! Terminal login form.

use crate::auth::AuthMode;
use crate::error::AuthError;
use crate::supervisor::{LoginPrompt, LoginRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use dialoguer::{Input, Password, Select};

/// Asks for credentials on the controlling terminal.
pub struct TerminalPrompt {
    mode: Option<AuthMode>,
    email: Option<String>,
}

impl TerminalPrompt {
    /// Let the operator pick between signing in and registering.
    pub fn interactive() -> Self {
        Self {
            mode: None,
            email: None,
        }
    }

    pub fn with_mode(mode: AuthMode, email: Option<String>) -> Self {
        Self {
            mode: Some(mode),
            email,
        }
    }

    /// Whether a human is there to answer.
    pub fn is_available() -> bool {
        console::user_attended()
    }
}

#[async_trait]
impl LoginPrompt for TerminalPrompt {
    async fn next_attempt(&self) -> Result<Option<LoginRequest>> {
        let mode = self.mode;
        let email = self.email.clone();
        tokio::task::spawn_blocking(move || ask(mode, email))
            .await
            .context("prompt task")?
    }

    async fn report_failure(&self, err: &AuthError) {
        eprintln!("{} {err}", style("Login failed:").red().bold());
    }
}

fn ask(mode: Option<AuthMode>, email: Option<String>) -> Result<Option<LoginRequest>> {
    let mode = match mode {
        Some(mode) => mode,
        None => {
            let choice = Select::new()
                .with_prompt("pcctl is not linked to an account")
                .item("Sign in")
                .item("Register")
                .default(0)
                .interact_opt()?;
            match choice {
                Some(0) => AuthMode::SignIn,
                Some(_) => AuthMode::SignUp,
                None => return Ok(None),
            }
        }
    };

    let mut input = Input::<String>::new().with_prompt("Email");
    if let Some(email) = email {
        input = input.with_initial_text(email);
    }
    let email = input.interact_text()?;

    let mut password = Password::new().with_prompt("Password");
    if mode == AuthMode::SignUp {
        password = password.with_confirmation("Repeat password", "Passwords do not match");
    }
    let password = password.interact()?;

    Ok(Some(LoginRequest {
        mode,
        email,
        password,
    }))
}
