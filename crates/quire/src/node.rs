//! The compiled node tree.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::filter_expr::FilterExpression;
use crate::render::Renderer;
use crate::tags::cache::CacheNode;
use crate::tags::flow::{CycleNode, ForNode, IfChangedNode, IfEqualNode, IfNode, WithNode};
use crate::tags::i18n::{BlockTransNode, TransNode};
use crate::tags::loader::{ExtendsNode, IncludeNode};
use crate::tags::markup::{AutoEscapeNode, FilterNode, RegroupNode, UrlNode, WidthRatioNode};

/// Stable identity of a node, used to key per-render node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node contributed by a tag library outside the builtin set.
pub trait CustomNode: Send + Sync + fmt::Debug {
    fn render(&self, ctx: &mut Context, renderer: &Renderer<'_>) -> Result<String>;

    fn child_nodelists(&self) -> Vec<&NodeList> {
        Vec::new()
    }

    /// Nodes that may only be preceded by text.
    fn must_be_first(&self) -> bool {
        false
    }
}

#[derive(Debug)]
pub enum Node {
    Text(String),
    Variable(FilterExpression),
    If(IfNode),
    IfEqual(IfEqualNode),
    IfChanged(IfChangedNode),
    For(ForNode),
    With(WithNode),
    FirstOf(Vec<FilterExpression>),
    Cycle(Arc<CycleNode>),
    Block(Arc<BlockNode>),
    Extends(ExtendsNode),
    Include(IncludeNode),
    AutoEscape(AutoEscapeNode),
    Filter(FilterNode),
    Spaceless(NodeList),
    TemplateTag(&'static str),
    WidthRatio(WidthRatioNode),
    Regroup(RegroupNode),
    Url(UrlNode),
    Cache(CacheNode),
    GetAvailableLanguages(String),
    Trans(TransNode),
    BlockTrans(BlockTransNode),
    Comment,
    Load,
    Custom(Arc<dyn CustomNode>),
}

impl Node {
    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }

    pub fn must_be_first(&self) -> bool {
        match self {
            Node::Extends(_) => true,
            Node::Custom(custom) => custom.must_be_first(),
            _ => false,
        }
    }

    /// The node lists nested directly inside this node.
    pub fn child_nodelists(&self) -> Vec<&NodeList> {
        match self {
            Node::If(n) => n.branches.iter().map(|(_, body)| body).collect(),
            Node::IfEqual(n) => vec![&n.nodelist_true, &n.nodelist_false],
            Node::IfChanged(n) => vec![&n.nodelist_true, &n.nodelist_false],
            Node::For(n) => vec![&n.nodelist_loop, &n.nodelist_empty],
            Node::With(n) => vec![&n.nodelist],
            Node::Block(n) => vec![&n.nodelist],
            Node::Extends(n) => vec![&n.nodelist],
            Node::AutoEscape(n) => vec![&n.nodelist],
            Node::Filter(n) => vec![&n.nodelist],
            Node::Spaceless(nodelist) => vec![nodelist],
            Node::Cache(n) => vec![&n.nodelist],
            Node::Custom(custom) => custom.child_nodelists(),
            _ => Vec::new(),
        }
    }
}

/// A `{% block %}` definition.
#[derive(Debug)]
pub struct BlockNode {
    pub name: String,
    pub nodelist: NodeList,
}

#[derive(Debug, Default)]
pub struct NodeList {
    nodes: Vec<Node>,
    contains_nontext: bool,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn from_text(text: &str) -> Self {
        let mut nodelist = Self::new();
        nodelist.push(Node::Text(text.to_string()));
        nodelist
    }

    pub fn push(&mut self, node: Node) {
        if !node.is_text() {
            self.contains_nontext = true;
        }
        self.nodes.push(node);
    }

    pub fn contains_nontext(&self) -> bool {
        self.contains_nontext
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    /// Visit every node in document order, descending into children.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        for node in &self.nodes {
            visit(node);
            for child in node.child_nodelists() {
                child.walk(visit);
            }
        }
    }

    /// All block definitions at any depth.
    pub fn blocks(&self) -> Vec<Arc<BlockNode>> {
        let mut blocks = Vec::new();
        self.walk(&mut |node| {
            if let Node::Block(block) = node {
                blocks.push(Arc::clone(block));
            }
        });
        blocks
    }

    pub fn contains_extends(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| found |= matches!(node, Node::Extends(_)));
        found
    }

    pub fn first_nontext(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| !node.is_text())
    }
}

impl<'a> IntoIterator for &'a NodeList {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
