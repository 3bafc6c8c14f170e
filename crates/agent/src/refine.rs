use std::sync::Arc;

use tera::Context;

use crate::executor::{CommandEngine, ExecutionError};
use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::prompts::{PromptLibrary, PromptTemplate};

const REFINE_TEMPERATURE: f32 = 0.4;

/// Rewrites raw command output into an answer for the user.
pub struct ResponseRefiner {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLibrary>,
}

impl ResponseRefiner {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Arc<PromptLibrary>) -> Self {
        Self { generator, prompts }
    }

    pub async fn refine(
        &self,
        raw_output: &str,
        original_instruction: &str,
    ) -> Result<String, GenerationError> {
        let mut context = Context::new();
        context.insert("instruction", original_instruction);
        context.insert("output", raw_output);
        let prompt = self.prompts.render(PromptTemplate::CleanResponse, &context)?;

        self.generator.generate(GenerationRequest::text(prompt, REFINE_TEMPERATURE)).await
    }
}

/// Runs an instruction through a command engine and answers with the refined output.
pub struct ExecutionAction {
    engine: CommandEngine,
    refiner: ResponseRefiner,
}

impl ExecutionAction {
    pub fn new(engine: CommandEngine, refiner: ResponseRefiner) -> Self {
        Self { engine, refiner }
    }

    pub async fn trigger(&mut self, instruction: &str) -> Result<String, ExecutionError> {
        let output = self.engine.run(instruction).await?;
        self.refiner.refine(&output, instruction).await.map_err(ExecutionError::Refinement)
    }

    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    pub fn into_engine(self) -> CommandEngine {
        self.engine
    }
}
