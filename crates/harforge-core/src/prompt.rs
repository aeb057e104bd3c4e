//! Instruction-prompt assembly for the external coding agent
//!
//! The agent receives one large prompt describing the HAR capture, the user's
//! goal, the output locations, and the AskUserQuestion tool contract it can
//! use to ask clarifying questions. The core only assembles text; the agent
//! does all analysis and generation.

use crate::run::RunIdentity;

/// Build the analysis prompt for one run
pub fn build_analysis_prompt(identity: &RunIdentity, fresh: bool) -> String {
    let scripts_dir = identity.scripts_dir();
    let messages_dir = identity
        .messages_path()
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let har_dir = identity
        .har_path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let mut prompt = format!(
        r#"You are tasked with analyzing a HAR (HTTP Archive) file to reverse engineer API calls,
and generate production-ready code that replicates those calls.

Here is the HAR file path you need to analyze:
<har_path>
{har_path}
</har_path>

Here is the original user prompt with context about what they're trying to accomplish:
<user_prompt>
{goal}
</user_prompt>

Here is the output directory where you should save your generated files:
<output_dir>
{scripts_dir}
</output_dir>

**IMPORTANT: You have access to the AskUserQuestion tool to ask clarifying questions during your analysis.**
Use this tool when you need to clarify functional requirements, prioritize features, or choose
between implementation approaches.

Your task is to:

1. **Read and analyze the HAR file** to understand all captured API calls: HTTP methods,
   request URLs and endpoints, request headers (especially authentication-related ones),
   request bodies and parameters, response structures and status codes.

2. **Identify authentication patterns**: cookies and session tokens, Authorization headers
   (Bearer tokens, API keys), CSRF tokens, custom authentication headers.

3. **Extract request/response patterns** for each distinct endpoint: required vs optional
   parameters, data formats, query vs body parameters, response data structures.

4. **Ask clarifying questions using AskUserQuestion** when multiple authentication methods
   are found, when feature priorities are uncertain, or when implementation approaches are
   ambiguous.

5. **Generate a client script** that replicates these API calls: proper authentication
   handling, a separate function per distinct endpoint, typed parameters and return values,
   docstrings, error handling, logging, and a main section with example usage.

6. **Create documentation**: a README.md explaining what APIs were discovered, how
   authentication works, how to use each function, and any limitations.

7. **Test your implementation** after generating the code. You have up to 5 attempts to fix
   any issues; document each attempt and what you learned.

8. **Handle bot detection**: if you encounter CAPTCHAs or anti-scraping measures with plain
   HTTP requests, switch to a real-browser approach via CDP while keeping the same code
   quality standards.

After your analysis, save the client script and the README.md under the output directory,
then provide a final summary of the APIs discovered, the authentication method used, whether
the implementation works, and the paths to the generated files. Do not include the full code
in your response.
"#,
        har_path = identity.har_path.display(),
        goal = identity.goal,
        scripts_dir = scripts_dir.display(),
    );

    if let Some(instructions) = &identity.additional_instructions {
        prompt.push_str(&format!("\n\nAdditional instructions:\n{instructions}\n"));
    }

    prompt.push_str(
        r#"
## Interactive Clarification with AskUserQuestion

The `AskUserQuestion` tool accepts a list of questions with the following structure:

- `question` (required): The question text
- `header` (optional): Short category label for context
- `options` (required): List of choices, each with a `label` and a `description`
- `multiSelect` (optional): true for checkbox selection, false for single select (default: false)

Example:

```json
{
  "questions": [{
    "question": "Which authentication method should I implement?",
    "header": "Auth Method",
    "options": [
      {"label": "Cookie-based", "description": "Session cookies"},
      {"label": "Bearer token", "description": "JWT tokens"},
      {"label": "Both", "description": "Support both methods"}
    ],
    "multiSelect": false
  }]
}
```

Ask 1-3 well-targeted questions that materially impact implementation; the user's answers
are returned in the tool result.
"#,
    );

    prompt.push_str(&format!(
        r#"
## Run Context

- Target run: {run_id}
- HAR location: {har_dir}
- Existing scripts: {scripts_dir}
- Message history: {messages_dir} (available for reference if needed)
- Fresh mode: {fresh}

By default, treat this as an iterative refinement: the user's prompt describes changes or
improvements to make to the existing script. If fresh mode is enabled, ignore the previous
implementation and start from scratch.
"#,
        run_id = identity.run_id,
        har_dir = har_dir,
        scripts_dir = scripts_dir.display(),
        messages_dir = messages_dir,
        fresh = fresh,
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn identity(instructions: Option<&str>) -> RunIdentity {
        RunIdentity {
            run_id: "run-20260401-101500".to_string(),
            har_path: PathBuf::from("/captures/shop.har"),
            goal: "download all invoices".to_string(),
            model: None,
            additional_instructions: instructions.map(str::to_string),
            output_root: PathBuf::from("/data/harforge"),
        }
    }

    #[test]
    fn test_prompt_includes_run_paths() {
        let prompt = build_analysis_prompt(&identity(None), false);
        assert!(prompt.contains("/captures/shop.har"));
        assert!(prompt.contains("download all invoices"));
        assert!(prompt.contains("run-20260401-101500"));
        assert!(prompt.contains("Fresh mode: false"));
    }

    #[test]
    fn test_prompt_documents_ask_user_question_contract() {
        let prompt = build_analysis_prompt(&identity(None), false);
        assert!(prompt.contains("AskUserQuestion"));
        assert!(prompt.contains("multiSelect"));
        assert!(prompt.contains("`options` (required)"));
    }

    #[test]
    fn test_additional_instructions_are_appended() {
        let with = build_analysis_prompt(&identity(Some("prefer async clients")), false);
        assert!(with.contains("prefer async clients"));

        let without = build_analysis_prompt(&identity(None), false);
        assert!(!without.contains("Additional instructions"));
    }

    #[test]
    fn test_fresh_mode_is_rendered() {
        let prompt = build_analysis_prompt(&identity(None), true);
        assert!(prompt.contains("Fresh mode: true"));
    }
}
