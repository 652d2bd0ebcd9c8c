//! Bounded model/capability conversation for a single step.

use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::capability::tools::{SCREENSHOT, STEP_COMPLETE, screenshot_format};
use crate::capability::{
    Arguments, CapabilityChannel, ToolContent, ToolDeclaration, ToolOutput, simulator_tools,
};
use crate::model::prompts::{CONTINUE_NUDGE, EMPTY_RESULT_TEXT, step_prompt, system_prompt};
use crate::model::{Invocation, InvocationResult, ModelChannel, ModelReply, Turn};
use crate::runner::StepResult;
use crate::session::DeviceSession;
use crate::workflow::StepSpec;

/// Per-step conversation state. Created fresh for every step.
#[derive(Debug)]
struct ConversationState {
    transcript: Vec<Turn>,
    iterations: u32,
    completed: bool,
    success: bool,
    error: Option<String>,
    tools_used: Vec<String>,
}

impl ConversationState {
    fn new(step: &StepSpec) -> Self {
        Self {
            transcript: vec![Turn::user_text(step_prompt(&step.goal, &step.hints))],
            iterations: 0,
            completed: false,
            success: false,
            error: None,
            tools_used: Vec::new(),
        }
    }

    /// Append a turn; the transcript is never edited in place
    fn push(&mut self, turn: Turn) {
        self.transcript.push(turn);
    }

    fn record_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }

    fn complete(&mut self, input: &Value) {
        let success = input["success"].as_bool().unwrap_or(false);
        let summary = input["summary"].as_str().unwrap_or("").trim();

        self.completed = true;
        self.success = success;
        if success {
            info!(summary, "step complete");
        } else {
            let reason = if summary.is_empty() {
                "agent reported the goal as unreachable"
            } else {
                summary
            };
            warn!(reason, "step abandoned by agent");
            self.error = Some(reason.to_string());
        }
    }
}

/// Runs one step against the shared model and capability channels
pub struct StepExecutor<'a> {
    model: &'a mut dyn ModelChannel,
    capabilities: &'a mut dyn CapabilityChannel,
    session: &'a DeviceSession,
    system: String,
    tools: Vec<ToolDeclaration>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        model: &'a mut dyn ModelChannel,
        capabilities: &'a mut dyn CapabilityChannel,
        session: &'a DeviceSession,
    ) -> Self {
        Self {
            model,
            capabilities,
            session,
            system: system_prompt(),
            tools: simulator_tools(),
        }
    }

    /// Drive the step until the agent signals completion, the model fails,
    /// or `budget` model round-trips are used up.
    pub fn run(&mut self, step: &StepSpec, budget: u32) -> StepResult {
        let mut state = ConversationState::new(step);

        while !state.completed && state.iterations < budget {
            state.iterations += 1;
            info!(iteration = state.iterations, budget, "model turn");

            let reply = match self.model.respond(&self.system, &state.transcript, &self.tools) {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "model request failed");
                    state.error = Some(e.to_string());
                    state.completed = true;
                    break;
                }
            };

            state.push(Turn::assistant(reply.content().to_vec()));

            let invocations = match reply {
                ModelReply::NoActionRequested { .. } => {
                    state.push(Turn::user_text(CONTINUE_NUDGE));
                    continue;
                }
                ModelReply::ActionsRequested { invocations, .. } => invocations,
            };

            let mut results = Vec::with_capacity(invocations.len());
            for invocation in &invocations {
                info!(tool = %invocation.name, "invoking");
                state.record_tool(&invocation.name);

                if invocation.name == STEP_COMPLETE {
                    state.complete(&invocation.input);
                    break;
                }

                results.push(self.dispatch(invocation));
            }

            if !state.completed && !results.is_empty() {
                state.push(Turn::results(results));
            }
        }

        if !state.success && state.error.is_none() {
            state.error = Some(format!(
                "max iterations ({}) reached without completing goal",
                budget
            ));
        }

        let screenshot_path = match &step.screenshot {
            Some(filename) if state.success => self.save_screenshot(filename),
            _ => None,
        };

        StepResult {
            step: step.clone(),
            success: state.success,
            screenshot_path,
            error: state.error,
            iterations: state.iterations,
            tools_used: state.tools_used,
        }
    }

    /// Invoke a capability, folding any failure into an error-flagged result
    fn dispatch(&mut self, invocation: &Invocation) -> InvocationResult {
        let args = match &invocation.input {
            Value::Object(map) => map.clone(),
            _ => Arguments::new(),
        };

        let output = match self
            .capabilities
            .invoke(&invocation.name, self.session.target(args))
        {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %invocation.name, error = %e, "capability failed");
                ToolOutput::error(e.to_string())
            }
        };

        into_result(&invocation.id, output)
    }

    fn save_screenshot(&mut self, filename: &str) -> Option<PathBuf> {
        let path = self.session.screenshot_path(filename);

        let mut args = Arguments::new();
        args.insert(
            "output_path".into(),
            Value::String(path.to_string_lossy().into_owned()),
        );
        args.insert("type".into(), Value::String(screenshot_format(filename).into()));

        match self.capabilities.invoke(SCREENSHOT, self.session.target(args)) {
            Ok(output) if !output.is_error => {
                info!(path = %path.display(), "screenshot saved");
                Some(path)
            }
            Ok(output) => {
                warn!(path = %path.display(), reason = %output.text_summary(), "failed to save screenshot");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to save screenshot");
                None
            }
        }
    }
}

/// Convert capability output into the fragment sent back to the model
fn into_result(invocation_id: &str, output: ToolOutput) -> InvocationResult {
    let mut content: Vec<ToolContent> = output
        .content
        .into_iter()
        .map(|item| {
            let media_type = item.image_media_type();
            match item {
                ToolContent::Image { data, .. } => ToolContent::Image { data, media_type },
                text => text,
            }
        })
        .collect();

    if content.is_empty() {
        content.push(ToolContent::text(EMPTY_RESULT_TEXT));
    }

    InvocationResult {
        invocation_id: invocation_id.to_string(),
        content,
        is_error: output.is_error,
    }
}
