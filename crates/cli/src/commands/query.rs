use cirrus_agent::AgentRuntime;
use cirrus_core::domain::session::{SessionId, UserId};
use cirrus_core::errors::ApplicationError;
use cirrus_db::SessionStore;

use crate::commands::{
    correlation_id, open_database, prepare, request_failure, CommandResult,
};

pub fn run(user_id: &str, session_id: &str, message: &str) -> CommandResult {
    let (config, runtime) = match prepare("query") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let correlation_id = correlation_id("query");

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let agent = AgentRuntime::from_config(&config, SessionStore::sql(pool.clone()))
            .map_err(|error| ("agent_init", error.to_string(), 6u8))?;

        let outcome = agent
            .handle_message(
                message,
                &UserId(user_id.to_string()),
                &SessionId(session_id.to_string()),
                &correlation_id,
            )
            .await;
        pool.close().await;

        outcome.map_err(|error| {
            request_failure(ApplicationError::from(error).into_interface(correlation_id.clone()))
        })
    });

    match result {
        Ok(outcome) => {
            let message = outcome.into_response().unwrap_or_else(|| "(no response)".to_string());
            CommandResult::success("query", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("query", error_class, message, exit_code)
        }
    }
}
