use std::env;
use std::fs;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use ai_edit_rs::{
    EditSession, EditorConfig, EditorOptions, MemoryDocumentStore, ScriptedGenerationClient,
    ScriptedReply, SessionRunner, SubmitOutcome, logging,
};

type SimResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditScenario {
    document: String,
    options: Option<EditorOptions>,
    actions: Vec<ScenarioAction>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ScenarioAction {
    Select { text: String },
    Submit { prompt: String, reply: ScriptedReply },
    Accept,
    Reject,
    Undo,
    Redo,
    Edit { markdown: String },
    DismissError,
}

async fn apply_action(
    runner: &SessionRunner<ScriptedGenerationClient>,
    action: ScenarioAction,
) -> SimResult<Value> {
    let step = match action {
        ScenarioAction::Select { text } => {
            runner.select(&text)?;
            json!({ "action": "select" })
        }
        ScenarioAction::Submit { prompt, reply } => {
            runner.client().push_reply(reply);
            let outcome = runner.submit(&prompt).await?;
            if outcome == SubmitOutcome::Ignored {
                // Never requested; must not answer the next submission.
                runner.client().pop_reply();
            }
            json!({ "action": "submit", "outcome": outcome })
        }
        ScenarioAction::Accept => json!({ "action": "accept", "applied": runner.accept()? }),
        ScenarioAction::Reject => json!({ "action": "reject", "rejected": runner.reject()? }),
        ScenarioAction::Undo => json!({ "action": "undo", "moved": runner.undo()? }),
        ScenarioAction::Redo => json!({ "action": "redo", "moved": runner.redo()? }),
        ScenarioAction::Edit { markdown } => {
            json!({ "action": "edit", "changed": runner.edit_markdown(&markdown)? })
        }
        ScenarioAction::DismissError => {
            runner.dismiss_error()?;
            json!({ "action": "dismiss_error" })
        }
    };
    Ok(step)
}

async fn run_scenario(scenario: EditScenario) -> SimResult<Value> {
    let config = EditorConfig::from_options(scenario.options)?;
    let logs = logging::init(config.level_filter());
    let store = Arc::new(MemoryDocumentStore::new());
    let session = EditSession::new(&scenario.document, Box::new(Arc::clone(&store)), &config);
    let runner = SessionRunner::new(session, ScriptedGenerationClient::new());

    let mut steps = Vec::with_capacity(scenario.actions.len());
    for action in scenario.actions {
        steps.push(apply_action(&runner, action).await?);
    }

    Ok(json!({
        "steps": steps,
        "view": runner.view()?,
        "store": store.entries()?,
        "logs": logs.drain(),
    }))
}

#[tokio::main]
async fn main() -> SimResult<()> {
    let path = env::args()
        .nth(1)
        .ok_or("Usage: ai-edit-simulator <scenario.json>")?;
    let payload = fs::read_to_string(path)?;
    let scenario: EditScenario = serde_json::from_str(&payload)?;

    let output = run_scenario(scenario).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
