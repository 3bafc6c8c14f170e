//! Turns natural-language instructions into provider CLI commands, runs them,
//! and keeps every command and its output in a [`CommandLedger`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tera::Context;
use thiserror::Error;
use tracing::{info, warn};

use cirrus_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use cirrus_core::config::ExecutorConfig;
use cirrus_core::domain::credentials::{Credentials, DEFAULT_PROFILE};
use cirrus_core::ledger::{CommandId, CommandLedger, LedgerError};

use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::process::{ProcessError, ProcessInvocation, ProcessRunner};
use crate::prompts::{PromptLibrary, PromptTemplate};
use crate::tokenize::{split_command_line, TokenizeError};

const COMMAND_TEMPERATURE: f32 = 0.3;
const NO_OUTPUT_PLACEHOLDER: &str = "(no output captured)";
/// Most recent ledger entries shown to the model when generating a follow-up command.
pub const HISTORY_WINDOW: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub provider_binary: String,
    /// Used when the caller's credentials name no profile.
    pub default_profile: String,
    pub command_timeout: Option<Duration>,
}

impl EngineSettings {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            provider_binary: config.provider_binary.clone(),
            default_profile: config.default_profile.clone(),
            command_timeout: config.command_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            provider_binary: "aws".to_string(),
            default_profile: DEFAULT_PROFILE.to_string(),
            command_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command generation failed: {0}")]
    Generation(#[source] GenerationError),
    #[error("response refinement failed: {0}")]
    Refinement(#[source] GenerationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("command {id} could not be parsed: {source}")]
    Tokenize {
        id: CommandId,
        #[source]
        source: TokenizeError,
    },
    #[error("command {0} is empty")]
    EmptyCommand(CommandId),
    #[error("provider credential files could not be written: {0}")]
    CredentialFiles(#[source] std::io::Error),
    #[error("command {id} failed: {source}")]
    ExecutionFailed {
        id: CommandId,
        #[source]
        source: ProcessError,
    },
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    command: &'a str,
    output: &'a str,
}

/// Private shared-credentials and config files for one engine. The directory
/// is removed when the engine is dropped.
struct ProfileFiles {
    _dir: TempDir,
    env: Vec<(String, String)>,
}

impl ProfileFiles {
    fn write(credentials: &Credentials, profile: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("cirrus-profile-").tempdir()?;
        let credentials_path = dir.path().join("credentials");
        let config_path = dir.path().join("config");
        std::fs::write(&credentials_path, credentials.shared_credentials_file(profile))?;
        std::fs::write(&config_path, Credentials::shared_config_file(profile))?;

        let env = vec![
            ("AWS_SHARED_CREDENTIALS_FILE".to_string(), credentials_path.display().to_string()),
            ("AWS_CONFIG_FILE".to_string(), config_path.display().to_string()),
        ];
        Ok(Self { _dir: dir, env })
    }
}

/// One execution session. Owns its ledger; not shared between requests.
pub struct CommandEngine {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLibrary>,
    runner: Arc<dyn ProcessRunner>,
    credentials: Credentials,
    settings: EngineSettings,
    ledger: CommandLedger,
    profile_files: Option<ProfileFiles>,
    audit_sink: Arc<dyn AuditSink>,
    audit: AuditContext,
}

impl CommandEngine {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<PromptLibrary>,
        runner: Arc<dyn ProcessRunner>,
        credentials: Credentials,
        settings: EngineSettings,
    ) -> Self {
        Self {
            generator,
            prompts,
            runner,
            credentials,
            settings,
            ledger: CommandLedger::new(),
            profile_files: None,
            audit_sink: Arc::new(cirrus_core::audit::NoopAuditSink),
            audit: AuditContext::new(None, "unassigned", "command-engine"),
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, audit: AuditContext) -> Self {
        self.audit_sink = sink;
        self.audit = audit;
        self
    }

    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    /// Generates one provider command for `instruction` and records it.
    pub async fn generate(&mut self, instruction: &str) -> Result<CommandId, ExecutionError> {
        let prompt = self.command_prompt(instruction).map_err(ExecutionError::Generation)?;
        let reply = self
            .generator
            .generate(GenerationRequest::text(prompt, COMMAND_TEMPERATURE))
            .await
            .map_err(ExecutionError::Generation)?;

        let command =
            format!("{} --profile {}", normalize_generated_command(&reply), self.profile());
        let id = self.ledger.record_command(command);

        info!(
            event_name = "command.generated",
            correlation_id = %self.audit.correlation_id,
            command_id = %id,
            "provider command generated"
        );
        self.emit("command.generated", id, AuditOutcome::Success);
        Ok(id)
    }

    /// Runs a recorded command and captures its stdout. Nothing is recorded on failure.
    pub async fn execute(&mut self, id: CommandId) -> Result<String, ExecutionError> {
        let command = self.ledger.command(id).ok_or(LedgerError::UnknownCommand(id))?;
        let words =
            split_command_line(command).map_err(|source| ExecutionError::Tokenize { id, source })?;
        let invocation =
            ProcessInvocation::from_words(words).ok_or(ExecutionError::EmptyCommand(id))?;
        if invocation.program != self.settings.provider_binary {
            warn!(
                event_name = "command.unexpected_program",
                correlation_id = %self.audit.correlation_id,
                command_id = %id,
                program = %invocation.program,
                expected = %self.settings.provider_binary,
                "generated command does not invoke the provider CLI"
            );
            self.audit_sink.emit(
                AuditEvent::from_context(
                    &self.audit,
                    "command.unexpected_program",
                    AuditCategory::Execution,
                    AuditOutcome::Success,
                )
                .with_metadata("command_id", id.to_string())
                .with_metadata("program", invocation.program.clone()),
            );
        }
        let env = self.provider_env().map_err(ExecutionError::CredentialFiles)?;
        let invocation = invocation.with_env(env).with_timeout(self.settings.command_timeout);

        match self.runner.run(invocation).await {
            Ok(output) => {
                let stdout = self.ledger.record_output(id, output.stdout)?.stdout.clone();
                info!(
                    event_name = "command.executed",
                    correlation_id = %self.audit.correlation_id,
                    command_id = %id,
                    duration_ms = output.duration_ms,
                    "provider command executed"
                );
                self.emit("command.executed", id, AuditOutcome::Success);
                Ok(stdout)
            }
            Err(source) => {
                warn!(
                    event_name = "command.failed",
                    correlation_id = %self.audit.correlation_id,
                    command_id = %id,
                    error = %source,
                    "provider command failed"
                );
                self.emit("command.failed", id, AuditOutcome::Failed);
                Err(ExecutionError::ExecutionFailed { id, source })
            }
        }
    }

    /// `generate` followed by `execute`.
    pub async fn run(&mut self, instruction: &str) -> Result<String, ExecutionError> {
        let id = self.generate(instruction).await?;
        self.execute(id).await
    }

    /// Environment pointing the provider CLI at this engine's profile files,
    /// writing them on first use.
    fn provider_env(&mut self) -> std::io::Result<Vec<(String, String)>> {
        let files = match self.profile_files.take() {
            Some(files) => files,
            None => ProfileFiles::write(&self.credentials, self.profile())?,
        };
        let env = files.env.clone();
        self.profile_files = Some(files);
        Ok(env)
    }

    fn profile(&self) -> &str {
        match self.credentials.profile.trim() {
            "" => &self.settings.default_profile,
            profile => profile,
        }
    }

    fn command_prompt(&self, instruction: &str) -> Result<String, GenerationError> {
        let mut context = Context::new();
        context.insert("provider_binary", &self.settings.provider_binary);
        context.insert("instruction", instruction);

        if self.ledger.is_empty() {
            return Ok(self.prompts.render(PromptTemplate::GenerateCommand, &context)?);
        }

        let history: Vec<HistoryEntry<'_>> = self
            .ledger
            .history()
            .skip(self.ledger.len().saturating_sub(HISTORY_WINDOW))
            .map(|(command, output)| HistoryEntry {
                command,
                output: output.unwrap_or(NO_OUTPUT_PLACEHOLDER),
            })
            .collect();
        context.insert("history", &history);
        Ok(self.prompts.render(PromptTemplate::GenerateFollowUpCommand, &context)?)
    }

    fn emit(&self, event_type: &str, id: CommandId, outcome: AuditOutcome) {
        self.audit_sink.emit(
            AuditEvent::from_context(&self.audit, event_type, AuditCategory::Execution, outcome)
                .with_metadata("command_id", id.to_string()),
        );
    }
}

/// Strips surrounding whitespace and markdown code fences from a generated command.
pub fn normalize_generated_command(reply: &str) -> String {
    let mut text = reply.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // drop the language tag line
        text = rest.split_once('\n').map_or(rest, |(_, body)| body);
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
    }

    let text = text.trim();
    text.strip_prefix('`').and_then(|inner| inner.strip_suffix('`')).unwrap_or(text).trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use cirrus_core::audit::{AuditContext, InMemoryAuditSink};
    use cirrus_core::domain::credentials::Credentials;
    use cirrus_core::ledger::CommandId;

    use super::{
        normalize_generated_command, CommandEngine, EngineSettings, ExecutionError, HISTORY_WINDOW,
    };
    use crate::llm::ScriptedTextGenerator;
    use crate::process::{ProcessError, ProcessInvocation, ScriptedProcessRunner};
    use crate::prompts::PromptLibrary;

    fn engine(
        generator: Arc<ScriptedTextGenerator>,
        runner: Arc<ScriptedProcessRunner>,
    ) -> CommandEngine {
        CommandEngine::new(
            generator,
            Arc::new(PromptLibrary::builtin().expect("prompts")),
            runner,
            Credentials::new("AKIATEST", "secret-value", "dev"),
            EngineSettings::default(),
        )
    }

    #[test]
    fn normalization_strips_fences_and_backticks() {
        assert_eq!(normalize_generated_command("  aws s3 ls \n"), "aws s3 ls");
        assert_eq!(normalize_generated_command("```bash\naws s3 ls\n```"), "aws s3 ls");
        assert_eq!(normalize_generated_command("```\naws s3 ls\n```\n"), "aws s3 ls");
        assert_eq!(normalize_generated_command("`aws s3 ls`"), "aws s3 ls");
        assert_eq!(normalize_generated_command("```aws s3 ls```"), "aws s3 ls");
    }

    #[tokio::test]
    async fn generate_appends_profile_and_records_command() {
        let generator = Arc::new(ScriptedTextGenerator::new(["```bash\naws s3 ls\n```"]));
        let mut engine = engine(generator.clone(), Arc::new(ScriptedProcessRunner::default()));

        let id = engine.generate("list my buckets").await.expect("generate");

        assert_eq!(engine.ledger().command(id), Some("aws s3 ls --profile dev"));
        assert_eq!(engine.ledger().output(id), None);
        let request = &generator.requests()[0];
        assert!(request.prompt.contains("list my buckets"));
        assert!((request.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn execute_passes_credentials_and_records_stdout() {
        let generator = Arc::new(ScriptedTextGenerator::new(["aws s3 ls"]));
        let runner = Arc::new(ScriptedProcessRunner::default());
        runner.push_success("2024-01-01 logs\n");
        let mut engine = engine(generator, runner.clone());

        let output = engine.run("list my buckets").await.expect("run");

        assert_eq!(output, "2024-01-01 logs\n");
        assert_eq!(engine.ledger().output(CommandId(0)), Some("2024-01-01 logs\n"));
        let invocation = &runner.invocations()[0];
        assert_eq!(invocation.program, "aws");
        assert_eq!(invocation.args, vec!["s3", "ls", "--profile", "dev"]);
        assert!(invocation.env.iter().all(|(key, _)| key != "AWS_SECRET_ACCESS_KEY"));
    }

    fn env_value<'a>(invocation: &'a ProcessInvocation, key: &str) -> &'a str {
        invocation
            .env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .expect("env var present")
    }

    #[tokio::test]
    async fn profile_files_carry_the_key_pair_until_the_engine_drops() {
        let generator = Arc::new(ScriptedTextGenerator::new(["aws s3 ls", "aws s3 ls s3://logs"]));
        let runner = Arc::new(ScriptedProcessRunner::default());
        runner.push_success("");
        runner.push_success("");
        let mut engine = engine(generator, runner.clone());

        engine.run("list my buckets").await.expect("first run");
        engine.run("list the logs bucket").await.expect("second run");

        let invocations = runner.invocations();
        let credentials_path = env_value(&invocations[0], "AWS_SHARED_CREDENTIALS_FILE");
        let config_path = env_value(&invocations[0], "AWS_CONFIG_FILE");
        assert_eq!(env_value(&invocations[1], "AWS_SHARED_CREDENTIALS_FILE"), credentials_path);

        let credentials_file = std::fs::read_to_string(credentials_path).expect("credentials file");
        assert!(credentials_file.starts_with("[dev]\n"));
        assert!(credentials_file.contains("aws_access_key_id = AKIATEST"));
        assert!(credentials_file.contains("aws_secret_access_key = secret-value"));
        assert_eq!(std::fs::read_to_string(config_path).expect("config file"), "[profile dev]\n");

        let credentials_path = std::path::PathBuf::from(credentials_path);
        drop(engine);
        assert!(!credentials_path.exists());
    }

    #[tokio::test]
    async fn commands_for_other_programs_are_flagged() {
        let generator = Arc::new(ScriptedTextGenerator::new(["curl https://example.com"]));
        let runner = Arc::new(ScriptedProcessRunner::default());
        runner.push_success("");
        let sink = InMemoryAuditSink::default();
        let mut engine = engine(generator, runner.clone())
            .with_audit(Arc::new(sink.clone()), AuditContext::new(None, "req-1", "test"));

        engine.run("fetch the page").await.expect("run");

        assert_eq!(runner.invocations()[0].program, "curl");
        assert_eq!(
            sink.event_types(),
            vec!["command.generated", "command.unexpected_program", "command.executed"]
        );
    }

    #[tokio::test]
    async fn quoted_json_argument_reaches_the_process_intact() {
        let generator = Arc::new(ScriptedTextGenerator::new([
            r#"aws s3api put-bucket-versioning --bucket logs --versioning-configuration '{"Status": "Enabled"}'"#,
        ]));
        let runner = Arc::new(ScriptedProcessRunner::default());
        runner.push_success("");
        let mut engine = engine(generator, runner.clone());

        engine.run("enable versioning on logs").await.expect("run");

        let args = &runner.invocations()[0].args;
        assert!(args.contains(&r#"{"Status": "Enabled"}"#.to_string()));
    }

    #[tokio::test]
    async fn non_zero_exit_fails_without_recording_output() {
        let generator = Arc::new(ScriptedTextGenerator::new(["aws s3 mb s3://logs"]));
        let runner = Arc::new(ScriptedProcessRunner::default());
        runner.push_exit_failure(255, "BucketAlreadyExists");
        let sink = InMemoryAuditSink::default();
        let mut engine = engine(generator, runner)
            .with_audit(Arc::new(sink.clone()), AuditContext::new(None, "req-1", "test"));

        let id = engine.generate("create bucket logs").await.expect("generate");
        let error = engine.execute(id).await.expect_err("fails");

        assert!(matches!(
            error,
            ExecutionError::ExecutionFailed { source: ProcessError::NonZeroExit { .. }, .. }
        ));
        assert_eq!(engine.ledger().output(id), None);
        assert_eq!(sink.event_types(), vec!["command.generated", "command.failed"]);
    }

    #[tokio::test]
    async fn follow_up_generation_includes_prior_history() {
        let generator = Arc::new(ScriptedTextGenerator::new(["aws s3 mb s3://logs", "aws s3 ls"]));
        let runner = Arc::new(ScriptedProcessRunner::default());
        runner.push_success("make_bucket: logs");
        let mut engine = engine(generator.clone(), runner);

        engine.run("create bucket logs").await.expect("first run");
        engine.generate("list buckets").await.expect("second generate");

        let requests = generator.requests();
        assert!(!requests[0].prompt.contains("already run"));
        assert!(requests[1].prompt.contains("aws s3 mb s3://logs --profile dev"));
        assert!(requests[1].prompt.contains("make_bucket: logs"));
        assert!(requests[1].prompt.contains("list buckets"));
    }

    #[tokio::test]
    async fn unknown_and_unparseable_commands_are_rejected() {
        let generator = Arc::new(ScriptedTextGenerator::new(["aws s3 ls 's3://logs"]));
        let mut engine = engine(generator, Arc::new(ScriptedProcessRunner::default()));

        assert!(matches!(engine.execute(CommandId(7)).await, Err(ExecutionError::Ledger(_))));

        let id = engine.generate("list logs").await.expect("generate");
        assert!(matches!(engine.execute(id).await, Err(ExecutionError::Tokenize { .. })));
    }

    #[tokio::test]
    async fn repeated_generations_yield_unique_ids() {
        let generator = Arc::new(ScriptedTextGenerator::default());
        for _ in 0..10_000 {
            generator.push_reply("aws s3 ls");
        }
        let mut engine = engine(generator, Arc::new(ScriptedProcessRunner::default()));

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = engine.generate("list buckets").await.expect("generate");
            assert!(seen.insert(id));
        }
        assert_eq!(engine.ledger().len(), 10_000);
        assert!(engine.ledger().verify().valid);
    }

    #[tokio::test]
    async fn follow_up_prompt_only_carries_recent_history() {
        let generator = Arc::new(ScriptedTextGenerator::default());
        for index in 0..=HISTORY_WINDOW + 5 {
            generator.push_reply(format!("aws s3 mb s3://bucket-{index:03}"));
        }
        let mut engine = engine(generator.clone(), Arc::new(ScriptedProcessRunner::default()));

        for _ in 0..=HISTORY_WINDOW + 5 {
            engine.generate("create another bucket").await.expect("generate");
        }

        let requests = generator.requests();
        let last = &requests[HISTORY_WINDOW + 5].prompt;
        assert!(!last.contains("bucket-004 "));
        assert!(last.contains("bucket-005 "));
        assert!(last.contains(&format!("bucket-{:03} ", HISTORY_WINDOW + 4)));
    }

    #[tokio::test]
    async fn blank_profile_falls_back_to_configured_default() {
        let generator = Arc::new(ScriptedTextGenerator::new(["aws s3 ls"]));
        let mut engine = CommandEngine::new(
            generator,
            Arc::new(PromptLibrary::builtin().expect("prompts")),
            Arc::new(ScriptedProcessRunner::default()),
            Credentials::new("AKIATEST", "secret-value", " "),
            EngineSettings { default_profile: "sandbox".to_string(), ..EngineSettings::default() },
        );

        let id = engine.generate("list buckets").await.expect("generate");
        assert_eq!(engine.ledger().command(id), Some("aws s3 ls --profile sandbox"));
    }

    #[test]
    fn settings_follow_executor_config() {
        let config = cirrus_core::config::ExecutorConfig {
            provider_binary: "aws".to_string(),
            default_profile: "default".to_string(),
            command_timeout_secs: Some(30),
        };
        assert_eq!(
            EngineSettings::from_config(&config).command_timeout,
            Some(Duration::from_secs(30))
        );
    }
}
