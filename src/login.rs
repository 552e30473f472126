use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use grammers_client::{Client, SignInError};
use grammers_session::Session;
use log::info;

use crate::config::Config;

fn prompt(message: &str) -> Result<String> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(message.as_bytes())?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub fn encode_session(session: &Session) -> String {
    STANDARD.encode(session.save())
}

pub fn decode_session(encoded: &str) -> Result<Session> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .context("SESSION is not valid base64")?;
    Session::load(&bytes).context("SESSION does not contain a valid session")
}

/// Interactive sign-in that prints a reusable SESSION string
pub async fn run(client: Client, config: &Config) -> Result<()> {
    if client.is_authorized().await? {
        info!("Session is already authorized");
    } else {
        let phone = match std::env::var("PHONE_NUMBER").ok().filter(|p| !p.trim().is_empty()) {
            Some(phone) => phone,
            None => prompt("Phone number (+82...): ")?,
        };

        let token = client
            .request_login_code(phone.trim())
            .await
            .context("failed to request login code")?;
        let code = prompt("Login code: ")?;

        let user = match client.sign_in(&token, &code).await {
            Ok(user) => user,
            Err(SignInError::PasswordRequired(password_token)) => {
                let hint = password_token.hint().map(|h| h.to_string()).unwrap_or_default();
                let password = prompt(&format!("2FA password (hint: {}): ", hint))?;
                client
                    .check_password(password_token, password.trim())
                    .await
                    .context("2FA sign in failed")?
            }
            Err(SignInError::SignUpRequired { .. }) => {
                bail!("this phone number has no Telegram account")
            }
            Err(err) => return Err(err).context("sign in failed"),
        };

        info!("Signed in as {} (id={})", user.first_name(), user.id());
    }

    client
        .session()
        .save_to_file(&config.session_file)
        .with_context(|| format!("failed to save {}", config.session_file.display()))?;

    println!("----------------------------------------");
    println!("SESSION={}", encode_session(client.session()));
    println!("----------------------------------------");
    println!("Set this value as the SESSION env of the relay.");
    println!("PHONE_NUMBER is no longer needed.");

    Ok(())
}
