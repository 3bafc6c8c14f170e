use std::sync::Arc;

use tera::Context;

use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::prompts::{PromptLibrary, PromptTemplate};

const CLASSIFY_TEMPERATURE: f32 = 0.0;
const ANSWER_TEMPERATURE: f32 = 0.5;

/// What a message to a fresh session asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageIntent {
    Construct,
    Other,
}

impl MessageIntent {
    /// Only a reply of `true` (any case, surrounding whitespace ignored) means construct.
    pub fn from_classifier_reply(reply: &str) -> Self {
        if reply.trim().eq_ignore_ascii_case("true") {
            Self::Construct
        } else {
            Self::Other
        }
    }
}

pub struct IntentClassifier {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLibrary>,
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Arc<PromptLibrary>) -> Self {
        Self { generator, prompts }
    }

    pub async fn classify(&self, message: &str) -> Result<MessageIntent, GenerationError> {
        let mut context = Context::new();
        context.insert("message", message);
        let prompt = self.prompts.render(PromptTemplate::ConstructOrOther, &context)?;

        let reply =
            self.generator.generate(GenerationRequest::text(prompt, CLASSIFY_TEMPERATURE)).await?;
        Ok(MessageIntent::from_classifier_reply(&reply))
    }
}

/// Answers messages that neither construct nor edit a configuration.
pub struct GeneralResponder {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptLibrary>,
}

impl GeneralResponder {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Arc<PromptLibrary>) -> Self {
        Self { generator, prompts }
    }

    pub async fn answer(&self, message: &str) -> Result<String, GenerationError> {
        let mut context = Context::new();
        context.insert("message", message);
        let prompt = self.prompts.render(PromptTemplate::IrrelevantQuery, &context)?;

        self.generator.generate(GenerationRequest::text(prompt, ANSWER_TEMPERATURE)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{GeneralResponder, IntentClassifier, MessageIntent};
    use crate::llm::{GenerationError, ScriptedTextGenerator};
    use crate::prompts::PromptLibrary;

    #[test]
    fn only_literal_true_means_construct() {
        assert_eq!(MessageIntent::from_classifier_reply("true"), MessageIntent::Construct);
        assert_eq!(MessageIntent::from_classifier_reply("  TRUE\n"), MessageIntent::Construct);
        assert_eq!(MessageIntent::from_classifier_reply("True."), MessageIntent::Other);
        assert_eq!(MessageIntent::from_classifier_reply("yes"), MessageIntent::Other);
        assert_eq!(MessageIntent::from_classifier_reply(""), MessageIntent::Other);
    }

    #[tokio::test]
    async fn classifier_sends_the_message_and_maps_the_reply() {
        let generator = Arc::new(ScriptedTextGenerator::new(["false"]));
        let classifier = IntentClassifier::new(
            generator.clone(),
            Arc::new(PromptLibrary::builtin().expect("prompts")),
        );

        let intent = classifier.classify("what is a VPC?").await.expect("classify");

        assert_eq!(intent, MessageIntent::Other);
        let requests = generator.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("what is a VPC?"));
        assert!(!requests[0].structured);
    }

    #[tokio::test]
    async fn classifier_surfaces_generation_failures() {
        let generator = Arc::new(ScriptedTextGenerator::default());
        generator.push_failure("rate limited");
        let classifier =
            IntentClassifier::new(generator, Arc::new(PromptLibrary::builtin().expect("prompts")));

        let error = classifier.classify("create a bucket").await.expect_err("failure surfaces");
        assert!(matches!(error, GenerationError::Api { .. }));
    }

    #[tokio::test]
    async fn responder_returns_generated_answer() {
        let generator = Arc::new(ScriptedTextGenerator::new(["A VPC is a private network."]));
        let responder = GeneralResponder::new(
            generator.clone(),
            Arc::new(PromptLibrary::builtin().expect("prompts")),
        );

        let answer = responder.answer("what is a VPC?").await.expect("answer");
        assert_eq!(answer, "A VPC is a private network.");
        assert!(generator.requests()[0].prompt.contains("what is a VPC?"));
    }
}
