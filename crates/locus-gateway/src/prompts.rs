//! Prompt construction for the five gateway tasks

use locus_model::{render_code_structure, CodeDefinition, Feature, ProjectKind};
use serde::Serialize;
use std::fmt::Write as _;

/// Maximum schema characters placed in a test-generation prompt
pub const MAX_SCHEMA_CHARS: usize = 6000;
/// Maximum code-structure characters placed in a test-generation prompt
pub const MAX_STRUCTURE_CHARS: usize = 2000;
/// Maximum characters of one retrieved snippet in a localization prompt
pub const MAX_SNIPPET_CHARS: usize = 2000;
/// Maximum code-structure characters in a plan prompt
pub const MAX_PLAN_STRUCTURE_CHARS: usize = 12_000;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// User request
    User,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,
    /// Text content
    pub content: String,
}

impl ChatMessage {
    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

const EXTRACT_SYSTEM: &str = "You are a requirements analyst. Split the given requirement \
description into independent, individually testable features.

Reply with a JSON array of strings, one short feature statement per element, e.g.
[\"Create a channel\", \"Send a message to a channel\", \"List messages in a channel\"]

Output only the JSON array.";

/// Prompt for feature extraction
#[must_use]
pub fn extract_features(description: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EXTRACT_SYSTEM),
        ChatMessage::user(format!("Requirement description:\n{description}")),
    ]
}

const LOCALIZE_SYSTEM: &str = "You are a code analysis expert. Given a feature and the most \
relevant code snippets of a project, identify the code that implements the feature.

Reply with JSON in exactly this shape:
{
  \"feature_description\": \"<feature>\",
  \"implementation_location\": [
    {\"file\": \"<path>\", \"function\": \"<function or method>\", \"lines\": \"<start>-<end>\", \"reason\": \"<why this code implements the feature>\"}
  ]
}

Use only files and line numbers shown in the snippets. If nothing implements the \
feature, return an empty implementation_location list. Output only JSON.";

/// Prompt for localizing one feature against retrieved snippets
#[must_use]
pub fn localize(feature: &Feature, context: &[CodeDefinition]) -> Vec<ChatMessage> {
    let mut snippets = String::new();
    for def in context {
        let _ = writeln!(
            snippets,
            "### {} ({} {}, lines {})\n```\n{}\n```",
            def.file,
            def.kind,
            def.name,
            def.span(),
            truncate_chars(&def.text, MAX_SNIPPET_CHARS)
        );
    }
    if snippets.is_empty() {
        snippets.push_str("(no relevant code found)\n");
    }

    vec![
        ChatMessage::system(LOCALIZE_SYSTEM),
        ChatMessage::user(format!(
            "Feature: {}\n\nRelevant code:\n{snippets}\nLocate the code implementing this feature.",
            feature.statement
        )),
    ]
}

const PLAN_SYSTEM: &str = "You are a deployment expert. From the requirement and code \
structure, explain how to install and run this project. Reply with concise steps, \
at most 100 words.";

/// Prompt for the execution plan
#[must_use]
pub fn generate_plan(description: &str, definitions: &[CodeDefinition]) -> Vec<ChatMessage> {
    let structure = render_code_structure(definitions);
    vec![
        ChatMessage::system(PLAN_SYSTEM),
        ChatMessage::user(format!(
            "Requirement:\n{description}\n\nCode structure:\n{}",
            truncate_chars(&structure, MAX_PLAN_STRUCTURE_CHARS)
        )),
    ]
}

const NODE_TEST_SYSTEM: &str = "You are a test engineer. Write a Node.js integration test \
for the analysed features.

Requirements:
1. Use mocha with supertest and assert.
2. The service runs at http://localhost:3000.
3. For a GraphQL API, POST queries to /graphql.
4. GraphQL operations must match the provided schema exactly: operation names, input \
argument names and field types.
5. Do not call this.timeout().
6. Output only runnable JavaScript.

Example:
const request = require('supertest');
const assert = require('assert');

describe('API Tests', () => {
  it('should test feature', async () => {
    const res = await request('http://localhost:3000')
      .post('/graphql')
      .send({ query: '...' });
    assert.equal(res.status, 200);
  });
});";

const PYTHON_TEST_SYSTEM: &str = "You are a test engineer. Write a Python integration test \
for the analysed features.

Requirements:
1. Use pytest with httpx.
2. The service runs at http://localhost:8000.
3. Cover every analysed feature.
4. Output only runnable Python.

Example:
import httpx

def test_feature():
    with httpx.Client(base_url=\"http://localhost:8000\") as client:
        response = client.get(\"/api/endpoint\")
        assert response.status_code == 200";

/// Inputs to test generation
#[derive(Debug, Clone, Copy)]
pub struct TestBrief<'a> {
    /// Numbered feature and location outline
    pub features: &'a str,
    /// How to run the project
    pub execution_plan: &'a str,
    /// Runtime family
    pub kind: ProjectKind,
    /// API schema excerpt, possibly empty
    pub api_schema: &'a str,
    /// Code structure outline
    pub code_structure: &'a str,
}

/// Prompt for initial test generation
#[must_use]
pub fn generate_test(brief: &TestBrief<'_>) -> Vec<ChatMessage> {
    let system = match brief.kind {
        ProjectKind::Node => NODE_TEST_SYSTEM,
        ProjectKind::Python => PYTHON_TEST_SYSTEM,
    };

    let mut user = format!(
        "Feature analysis:\n{}\n\nHow to run the project:\n{}\n",
        brief.features, brief.execution_plan
    );
    if !brief.api_schema.is_empty() {
        let _ = write!(
            user,
            "\nAPI schema (follow it exactly):\n{}\n",
            truncate_chars(brief.api_schema, MAX_SCHEMA_CHARS)
        );
    }
    let _ = write!(
        user,
        "\nCode structure (partial):\n{}\n\nWrite an integration test covering the features above.",
        truncate_chars(brief.code_structure, MAX_STRUCTURE_CHARS)
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

const REPAIR_SYSTEM: &str = "You are a test engineer. A generated test failed. Analyse the \
failure log and fix the test.

Rules:
1. Find the cause in the log: query syntax, wrong variable or argument names, wrong \
assertions, unsupported calls.
2. If the error is \"this.timeout is not a function\", remove the this.timeout() calls.
3. Return the complete fixed test and nothing else.";

/// Prompt for repairing a failing test
#[must_use]
pub fn repair_test(prior_source: &str, failure_log: &str, kind: ProjectKind) -> Vec<ChatMessage> {
    let lang = match kind {
        ProjectKind::Node => "javascript",
        ProjectKind::Python => "python",
    };
    vec![
        ChatMessage::system(REPAIR_SYSTEM),
        ChatMessage::user(format!(
            "Original test:\n```{lang}\n{prior_source}\n```\n\nFailure log:\n```\n{failure_log}\n```\n\n\
             Output the complete fixed test."
        )),
    ]
}
