//! Gemini conversation types with tool calling support
//!
//! Models the `generateContent` wire format: a conversation is a sequence of
//! turns with roles `user`, `model` and `function`, each carrying parts that
//! hold free text, a tool call emitted by the model, or a tool response fed
//! back to it.

use serde::{Deserialize, Serialize};

/// One turn of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String, // "user", "model", "function"
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: "model".to_string(),
            parts,
        }
    }

    pub fn function(parts: Vec<Part>) -> Self {
        Self {
            role: "function".to_string(),
            parts,
        }
    }
}

/// One part of a turn. Exactly one of the fields is set; the others are
/// omitted from the serialized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Default::default()
        }
    }

    /// A tool response part wrapping the aggregated execution result.
    pub fn response(name: impl Into<String>, result: impl Into<String>) -> Self {
        let result: String = result.into();
        Self {
            function_response: Some(FunctionResponse {
                name: name.into(),
                response: serde_json::json!({ "result": result }),
            }),
            ..Default::default()
        }
    }
}

/// A tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The response paired with a tool call, in the same relative order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

/// A tool the model may invoke, declared in `tools[].functionDeclarations`.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema (Gemini upper-case types)
}

/// Name of the single tool the grader declares.
pub const RUN_NOTEBOOK_CELL: &str = "run_notebook_cell";

/// Declaration of the `run_notebook_cell` tool.
///
/// The model supplies the 0-based cell index and, when the cell reads from
/// stdin, the queued textual answers for its input prompts.
pub fn run_notebook_cell_tool() -> FunctionDeclaration {
    FunctionDeclaration {
        name: RUN_NOTEBOOK_CELL.to_string(),
        description: "Executes a specific code cell in the Jupyter notebook. \
                      Use this to run student code or test logic."
            .to_string(),
        parameters: serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "cell_index": {
                    "type": "NUMBER",
                    "description": "The 0-based index of the cell to run."
                },
                "input_value": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "If the cell calls input(), provide the text response(s) here. Defaults to empty string if omitted."
                }
            },
            "required": ["cell_index"]
        }),
    }
}

/// System instruction template for the grading agent. The rubric/question
/// text is appended below it per job.
pub const GRADER_SYSTEM_PROMPT: &str = r#"You are a code reviewer that reviews student code submissions. Read the Jupyter notebook submission and check whether the code runs without errors. To check if code runs without errors, use the 'run_notebook_cell' tool to run a cell in the Jupyter notebook and verify that it works. This tool takes the cell number and an array of inputs that are to be passed to the notebook. Your output must consist of extremely concise comments as well as a breakup of the grade question-wise based on the rubric below, and the final grade. Output a JSON object for each question with the following keys:
"feedback": one-line written feedback on the errors.
"number_of_minor_errors": the number of minor errors. Minor errors are runtime errors that occur only for certain inputs.
"number_of_major_errors": the number of severe runtime errors and any compile time errors. Incorrect output also counts as a major error.
"correctness": a number between 0 and 10 where 10 means the program logic is correct (even if there are errors) and 0 means the program logic is completely incorrect.
"descriptive_comments": the number of descriptive comments in the program.
Example JSON output:
{
    "Question 1": {
        "feedback": "The sorting program works correctly for the given inputs.",
        "number_of_minor_errors": 0,
        "number_of_major_errors": 0,
        "correctness": 10,
        "descriptive_comments": 0
    },
    "Question 2": {
        "feedback": "The variable 'classified' is not defined, leading to a NameError.",
        "number_of_minor_errors": 0,
        "number_of_major_errors": 1,
        "correctness": 8,
        "descriptive_comments": 2
    }
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_construction() {
        let user = Turn::user("grade this");
        assert_eq!(user.role, "user");
        assert_eq!(user.parts.len(), 1);
        assert_eq!(user.parts[0].text.as_deref(), Some("grade this"));

        let model = Turn::model(vec![Part::text("looks fine")]);
        assert_eq!(model.role, "model");

        let function = Turn::function(vec![Part::response(RUN_NOTEBOOK_CELL, "42\n")]);
        assert_eq!(function.role, "function");
        let resp = function.parts[0].function_response.as_ref().unwrap();
        assert_eq!(resp.name, RUN_NOTEBOOK_CELL);
        assert_eq!(resp.response["result"], "42\n");
    }

    #[test]
    fn test_part_serialization_skips_unset_fields() {
        let part = Part::text("hello");
        let json = serde_json::to_string(&part).unwrap();
        assert_eq!(json, r#"{"text":"hello"}"#);

        let call = Part::call(FunctionCall {
            name: RUN_NOTEBOOK_CELL.to_string(),
            args: serde_json::json!({ "cell_index": 2 }),
        });
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains("\"functionCall\""));
        assert!(!json.contains("\"text\""));
    }

    #[test]
    fn test_function_call_deserializes_without_args() {
        let call: FunctionCall =
            serde_json::from_str(r#"{"name": "run_notebook_cell"}"#).unwrap();
        assert_eq!(call.name, RUN_NOTEBOOK_CELL);
        assert!(call.args.is_null());
    }

    #[test]
    fn test_tool_declaration_schema() {
        let tool = run_notebook_cell_tool();
        assert_eq!(tool.name, RUN_NOTEBOOK_CELL);
        let params = &tool.parameters;
        assert_eq!(params["type"], "OBJECT");
        assert!(params["properties"]["cell_index"].is_object());
        assert_eq!(params["required"][0], "cell_index");
    }
}
