//! Prompt templates for every text-generation call the agent makes.
//!
//! Built-in templates are always available. A configured prompt directory may
//! override any of them by providing a file with the template's name.

use std::fs;
use std::path::{Path, PathBuf};

use cirrus_core::config::PromptConfig;
use tera::{Context, Tera};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    ConstructOrOther,
    IrrelevantQuery,
    ConstructConfiguration,
    EditConfiguration,
    SummarizeConfiguration,
    GenerateCommand,
    GenerateFollowUpCommand,
    CleanResponse,
    DeployConfiguration,
}

impl PromptTemplate {
    pub const ALL: [Self; 9] = [
        Self::ConstructOrOther,
        Self::IrrelevantQuery,
        Self::ConstructConfiguration,
        Self::EditConfiguration,
        Self::SummarizeConfiguration,
        Self::GenerateCommand,
        Self::GenerateFollowUpCommand,
        Self::CleanResponse,
        Self::DeployConfiguration,
    ];

    /// File name looked up in the override directory. The `.txt` suffix keeps
    /// tera from html-escaping generated content.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::ConstructOrOther => "construct_or_other.txt",
            Self::IrrelevantQuery => "handle_irrelevant_query.txt",
            Self::ConstructConfiguration => "construct_configuration.txt",
            Self::EditConfiguration => "edit_configuration.txt",
            Self::SummarizeConfiguration => "summarize_configuration.txt",
            Self::GenerateCommand => "generate_command.txt",
            Self::GenerateFollowUpCommand => "generate_follow_up_command.txt",
            Self::CleanResponse => "clean_response.txt",
            Self::DeployConfiguration => "deploy_configuration.txt",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            Self::ConstructOrOther => CONSTRUCT_OR_OTHER,
            Self::IrrelevantQuery => IRRELEVANT_QUERY,
            Self::ConstructConfiguration => CONSTRUCT_CONFIGURATION,
            Self::EditConfiguration => EDIT_CONFIGURATION,
            Self::SummarizeConfiguration => SUMMARIZE_CONFIGURATION,
            Self::GenerateCommand => GENERATE_COMMAND,
            Self::GenerateFollowUpCommand => GENERATE_FOLLOW_UP_COMMAND,
            Self::CleanResponse => CLEAN_RESPONSE,
            Self::DeployConfiguration => DEPLOY_CONFIGURATION,
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompt override {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("prompt template `{name}` is invalid: {source}")]
    Template {
        name: &'static str,
        #[source]
        source: tera::Error,
    },
}

#[derive(Debug)]
pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    pub fn builtin() -> Result<Self, PromptError> {
        Self::load(None)
    }

    pub fn from_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::load(config.directory.as_deref())
    }

    fn load(directory: Option<&Path>) -> Result<Self, PromptError> {
        let mut tera = Tera::default();

        for template in PromptTemplate::ALL {
            let source = match directory.map(|dir| dir.join(template.file_name())) {
                Some(path) if path.is_file() => {
                    debug!(
                        event_name = "prompts.override_loaded",
                        template = template.file_name(),
                        path = %path.display(),
                        "using prompt override"
                    );
                    fs::read_to_string(&path)
                        .map_err(|source| PromptError::Read { path: path.clone(), source })?
                }
                _ => template.builtin().to_string(),
            };

            tera.add_raw_template(template.file_name(), &source)
                .map_err(|source| PromptError::Template { name: template.file_name(), source })?;
        }

        Ok(Self { tera })
    }

    pub fn render(&self, template: PromptTemplate, context: &Context) -> Result<String, PromptError> {
        self.tera
            .render(template.file_name(), context)
            .map_err(|source| PromptError::Template { name: template.file_name(), source })
    }
}

const CONSTRUCT_OR_OTHER: &str = "\
You decide whether a chat message asks to create new cloud infrastructure.
Reply with the single word true when the message asks to create or provision infrastructure.
Reply with the single word false for anything else.

Message: {{ message }}
";

const IRRELEVANT_QUERY: &str = "\
You are Cirrus, an assistant that designs AWS infrastructure from plain-language requests.
If the message below is a question about AWS or about how Cirrus works, answer it briefly.
Otherwise ask the user to describe the infrastructure they want in more specific terms.

Message: {{ message }}
";

const CONSTRUCT_CONFIGURATION: &str = "\
Design the AWS infrastructure requested below.
Respond with one JSON object and nothing else, using this shape:
{\"name\": string, \"resources\": [{\"resource_type\": string, \"name\": string, \"properties\": object}], \"metadata\": {string: string}}
Resource types use Terraform AWS provider names such as aws_s3_bucket.

Request: {{ instruction }}
";

const EDIT_CONFIGURATION: &str = "\
Here is the current infrastructure configuration as JSON:
{{ configuration }}

Apply the change requested below and respond with the complete replacement configuration.
Respond with one JSON object and nothing else, keeping the same shape as the current configuration.

Change: {{ instruction }}
";

const SUMMARIZE_CONFIGURATION: &str = "\
The user asked: {{ instruction }}

The resulting infrastructure configuration is:
{{ configuration }}

Explain to the user in a few sentences what this configuration contains.
";

const GENERATE_COMMAND: &str = "\
Translate the request below into exactly one {{ provider_binary }} command.
Reply with the command only, on a single line, starting with `{{ provider_binary }}`.
Do not add a --profile flag.

Request: {{ instruction }}
";

const GENERATE_FOLLOW_UP_COMMAND: &str = "\
Translate the request below into exactly one {{ provider_binary }} command.
Reply with the command only, on a single line, starting with `{{ provider_binary }}`.
Do not add a --profile flag.

Most recent commands already run in this session, oldest first:
{% for entry in history %}
Command {{ loop.index }}: {{ entry.command }}
Output:
{{ entry.output }}
{% endfor %}
Request: {{ instruction }}
";

const CLEAN_RESPONSE: &str = "\
The user asked: {{ instruction }}

Running the matching AWS CLI command printed:
{{ output }}

Answer the user in plain language using only this output.
";

const DEPLOY_CONFIGURATION: &str = "\
Create the AWS resources described by this configuration:
{{ configuration }}
";
