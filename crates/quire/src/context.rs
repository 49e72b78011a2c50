//! Variable scopes and per-render scratch state.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::node::{BlockNode, NodeId};
use crate::value::Value;

pub type Frame = IndexMap<String, Value>;

/// The variables a template sees while it renders.
///
/// Lookups search frames from the most recently pushed one down. The stack
/// never runs empty: popping the last frame is an error.
#[derive(Debug)]
pub struct Context {
    dicts: Vec<Frame>,
    pub autoescape: bool,
    pub current_app: Option<String>,
    pub use_l10n: Option<bool>,
    pub use_tz: Option<bool>,
    pub(crate) render_context: RenderContext,
    loops: Vec<u64>,
    loop_serial: u64,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::from_frame(Frame::new())
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self {
            dicts: vec![frame],
            autoescape: true,
            current_app: None,
            use_l10n: None,
            use_tz: None,
            render_context: RenderContext::default(),
            loops: Vec::new(),
            loop_serial: 0,
        }
    }

    /// Build a context from a mapping value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(map) => Ok(Self::from_frame(map.as_ref().clone())),
            Value::None => Ok(Self::new()),
            other => Err(Error::InvalidContext(other.type_name())),
        }
    }

    pub fn from_json(json: JsonValue) -> Result<Self> {
        Self::from_value(Value::from_json(json))
    }

    pub fn with_autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }

    pub fn push(&mut self) {
        self.dicts.push(Frame::new());
    }

    /// Push a frame holding the given variables.
    pub fn update(&mut self, frame: Frame) {
        self.dicts.push(frame);
    }

    pub fn pop(&mut self) -> Result<Frame> {
        if self.dicts.len() <= 1 {
            return Err(Error::ContextPop);
        }
        self.dicts.pop().ok_or(Error::ContextPop)
    }

    /// Set a variable in the innermost frame.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(frame) = self.dicts.last_mut() {
            frame.insert(key.into(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.dicts.iter().rev().find_map(|frame| frame.get(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of frames on the stack.
    pub fn depth(&self) -> usize {
        self.dicts.len()
    }

    /// Replace the whole frame stack, returning the previous one.
    pub(crate) fn swap_frames(&mut self, frames: Vec<Frame>) -> Vec<Frame> {
        std::mem::replace(&mut self.dicts, frames)
    }

    pub(crate) fn enter_loop(&mut self) -> u64 {
        self.loop_serial += 1;
        self.loops.push(self.loop_serial);
        self.loop_serial
    }

    pub(crate) fn exit_loop(&mut self) {
        self.loops.pop();
    }

    /// Serial of the innermost `for` loop being rendered.
    pub(crate) fn current_loop(&self) -> Option<u64> {
        self.loops.last().copied()
    }

    /// Frames in push order, as they appear in lookup failures.
    pub(crate) fn describe(&self) -> String {
        let frames: Vec<String> = self
            .dicts
            .iter()
            .map(|frame| Value::map(frame.clone()).to_string())
            .collect();
        format!("[{}]", frames.join(", "))
    }
}

// ============================================================================
// Render context
// ============================================================================

/// Scratch state private to the nodes of one template render.
#[derive(Debug)]
pub(crate) struct RenderContext {
    frames: Vec<RenderFrame>,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            frames: vec![RenderFrame::default()],
        }
    }
}

impl RenderContext {
    pub(crate) fn push(&mut self) {
        self.frames.push(RenderFrame::default());
    }

    pub(crate) fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Nodes only ever see the frame of the template they belong to.
    pub(crate) fn top(&mut self) -> &mut RenderFrame {
        if self.frames.is_empty() {
            self.frames.push(RenderFrame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug, Default)]
pub(crate) struct RenderFrame {
    pub(crate) block_context: Option<BlockContext>,
    /// Parents already entered through `extends` in this render.
    pub(crate) extends_chain: Vec<String>,
    pub(crate) state: HashMap<NodeId, NodeState>,
}

/// Per-node state kept across repeated renders of the same node.
#[derive(Debug, Clone)]
pub(crate) enum NodeState {
    /// Index of the next value a cycle emits.
    Cycle(usize),
    IfChanged {
        loop_id: Option<u64>,
        last_seen: Option<Value>,
    },
}

/// Pending block overrides along an `extends` chain.
///
/// Each name maps to a stack whose end is the most derived definition.
#[derive(Debug, Default, Clone)]
pub struct BlockContext {
    blocks: HashMap<String, Vec<Arc<BlockNode>>>,
}

impl BlockContext {
    /// Register blocks beneath the ones already known.
    pub fn add_blocks<'a>(&mut self, blocks: impl IntoIterator<Item = &'a Arc<BlockNode>>) {
        for block in blocks {
            self.blocks
                .entry(block.name.clone())
                .or_default()
                .insert(0, Arc::clone(block));
        }
    }

    pub fn pop(&mut self, name: &str) -> Option<Arc<BlockNode>> {
        self.blocks.get_mut(name).and_then(Vec::pop)
    }

    pub fn push(&mut self, name: &str, block: Arc<BlockNode>) {
        self.blocks.entry(name.to_string()).or_default().push(block);
    }

    pub fn get_block(&self, name: &str) -> Option<&Arc<BlockNode>> {
        self.blocks.get(name).and_then(|stack| stack.last())
    }
}
