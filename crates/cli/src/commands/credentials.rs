use cirrus_core::domain::credentials::Credentials;
use cirrus_core::domain::session::UserId;
use cirrus_db::repositories::{CredentialRepository, SqlCredentialRepository};

use crate::commands::{open_database, prepare, CommandResult};

pub struct CredentialInput<'a> {
    pub user_id: &'a str,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub profile: &'a str,
}

/// Stores provider credentials for a user, replacing any previous set.
pub fn set(input: CredentialInput<'_>) -> CommandResult {
    if input.access_key_id.trim().is_empty() || input.secret_access_key.trim().is_empty() {
        return CommandResult::failure(
            "credentials.set",
            "invalid_input",
            "access key id and secret access key must not be blank",
            2,
        );
    }

    let (config, runtime) = match prepare("credentials.set") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let user_id = UserId(input.user_id.to_string());
    let credentials = Credentials::new(
        input.access_key_id.trim(),
        input.secret_access_key.trim(),
        input.profile.trim(),
    );

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let outcome = SqlCredentialRepository::new(pool.clone())
            .save_credentials(&user_id, credentials)
            .await
            .map_err(|error| ("persistence", error.to_string(), 5u8));
        pool.close().await;
        outcome
    });

    match result {
        Ok(()) => CommandResult::success(
            "credentials.set",
            format!("stored credentials for user `{}`", input.user_id),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("credentials.set", error_class, message, exit_code)
        }
    }
}
