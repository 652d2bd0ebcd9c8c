//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

use shotter::capability::tools::{DEVICE_ID_ARG, SCREENSHOT, STEP_COMPLETE};
use shotter::capability::{
    Arguments, CapabilityChannel, CapabilityError, CapabilityResult, ToolDeclaration, ToolOutput,
};
use shotter::model::{Block, Invocation, ModelChannel, ModelError, ModelReply, ModelResult, Turn};
use shotter::simulator::{Device, DeviceControl, DeviceError};

// ============================================================================
// Model
// ============================================================================

/// Model that replays queued replies, then repeats a fallback if one is set
#[derive(Default)]
pub struct ScriptedModel {
    replies: VecDeque<ModelResult<ModelReply>>,
    fallback: Option<ModelReply>,
    /// Transcript seen by each call
    pub transcripts: Vec<Vec<Turn>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, reply: ModelReply) -> Self {
        self.replies.push_back(Ok(reply));
        self
    }

    pub fn fail(mut self, error: ModelError) -> Self {
        self.replies.push_back(Err(error));
        self
    }

    /// Reply used once the queue is empty
    pub fn otherwise(mut self, reply: ModelReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.transcripts.len()
    }
}

impl ModelChannel for ScriptedModel {
    fn respond(
        &mut self,
        _system: &str,
        transcript: &[Turn],
        _tools: &[ToolDeclaration],
    ) -> ModelResult<ModelReply> {
        self.transcripts.push(transcript.to_vec());
        match self.replies.pop_front() {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into())),
        }
    }
}

pub fn invocation(id: &str, name: &str, input: Value) -> Block {
    Block::Invocation(Invocation {
        id: id.to_string(),
        name: name.to_string(),
        input,
    })
}

pub fn actions(blocks: Vec<Block>) -> ModelReply {
    ModelReply::from_content(blocks)
}

pub fn complete(success: bool, summary: &str) -> ModelReply {
    actions(vec![invocation(
        "toolu_done",
        STEP_COMPLETE,
        json!({ "success": success, "summary": summary }),
    )])
}

pub fn idle(text: &str) -> ModelReply {
    ModelReply::from_content(vec![Block::Text(text.to_string())])
}

// ============================================================================
// Capabilities
// ============================================================================

/// In-memory automation backend. Screenshots are written as real PNG files.
#[derive(Default)]
pub struct FakeCapabilities {
    pub invocations: Vec<(String, Arguments)>,
    pub connects: usize,
    pub disconnects: usize,
    connected: bool,
    /// Tools whose invocation returns a channel error
    failing: HashSet<String>,
    /// Device ids on which `launch_app` reports an error
    launch_failures: HashSet<String>,
    refuse_connect: bool,
}

impl FakeCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_string());
        self
    }

    pub fn launch_fails_on(mut self, udid: &str) -> Self {
        self.launch_failures.insert(udid.to_string());
        self
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.invocations.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl CapabilityChannel for FakeCapabilities {
    fn connect(&mut self) -> CapabilityResult<()> {
        self.connects += 1;
        if self.refuse_connect {
            return Err(CapabilityError::Disconnected);
        }
        self.connected = true;
        Ok(())
    }

    fn invoke(&mut self, name: &str, args: Arguments) -> CapabilityResult<ToolOutput> {
        self.invocations.push((name.to_string(), args.clone()));

        if self.failing.contains(name) {
            return Err(CapabilityError::Protocol(format!("{} exploded", name)));
        }

        let udid = args.get(DEVICE_ID_ARG).and_then(Value::as_str).unwrap_or("");
        match name {
            "launch_app" if self.launch_failures.contains(udid) => {
                Ok(ToolOutput::error("App not installed"))
            }
            SCREENSHOT => {
                let path = args.get("output_path").and_then(Value::as_str).unwrap_or_default();
                write_png(Path::new(path));
                Ok(ToolOutput::text(format!("Saved {}", path)))
            }
            _ => Ok(ToolOutput::text(format!("{} ok", name))),
        }
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }
}

pub fn write_png(path: &Path) {
    let img = image::RgbaImage::from_pixel(4, 8, image::Rgba([20, 40, 200, 255]));
    img.save_with_format(path, image::ImageFormat::Png).unwrap();
}

// ============================================================================
// Devices
// ============================================================================

/// Device list with recorded boot/open calls
#[derive(Default)]
pub struct FakeDevices {
    devices: Vec<Device>,
    pub boots: RefCell<Vec<String>>,
    pub opens: RefCell<usize>,
}

impl FakeDevices {
    pub fn with(names: &[&str]) -> Self {
        let devices = names
            .iter()
            .enumerate()
            .map(|(i, name)| Device {
                name: name.to_string(),
                udid: format!("UDID-{}", i + 1),
                state: "Shutdown".to_string(),
                runtime: "iOS-17-5".to_string(),
            })
            .collect();
        Self {
            devices,
            ..Default::default()
        }
    }
}

impl DeviceControl for FakeDevices {
    fn list(&self) -> Result<Vec<Device>, DeviceError> {
        Ok(self.devices.clone())
    }

    fn boot(&self, udid: &str) -> Result<(), DeviceError> {
        self.boots.borrow_mut().push(udid.to_string());
        Ok(())
    }

    fn open(&self) -> Result<(), DeviceError> {
        *self.opens.borrow_mut() += 1;
        Ok(())
    }

    fn shutdown(&self, _udid: &str) -> Result<(), DeviceError> {
        Ok(())
    }
}
