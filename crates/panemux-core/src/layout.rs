//! Binary layout tree of split panes.
//!
//! A session's layout is either a single leaf (one terminal pane) or a split
//! holding exactly two children. Leaves carry the pane id that binds them to
//! a multiplexer session. Operations here are pure on the tree value; the
//! caller persists the result.
//!
//! On disk the tree keeps a string-tagged shape:
//!
//! ```json
//! {"type":"split","direction":"horizontal","ratio":0.5,
//!  "first":{"type":"leaf","pane_id":"a","tmux_name":"panemux-a"},
//!  "second":{"type":"leaf","pane_id":"b","tmux_name":"panemux-b","pane_type":"shell"}}
//! ```

use crate::error::{MuxError, MuxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every multiplexer session this server owns.
pub const SESSION_PREFIX: &str = "panemux-";

/// Ratio assigned to a freshly created split.
pub const DEFAULT_RATIO: f64 = 0.5;
pub const MIN_RATIO: f64 = 0.1;
pub const MAX_RATIO: f64 = 0.9;

/// Multiplexer session name bound to a pane id.
pub fn multiplexer_name(pane_id: &str) -> String {
    format!("{SESSION_PREFIX}{pane_id}")
}

/// Inverse of [`multiplexer_name`]. `None` for foreign session names.
pub fn pane_id_from_multiplexer_name(name: &str) -> Option<&str> {
    name.strip_prefix(SESSION_PREFIX)
}

/// Mint a new, never reused pane id.
pub fn new_pane_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// What a pane runs when its shell is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaneRole {
    /// Gets the configured agent command typed into a fresh shell.
    Agent,
    /// Plain interactive shell.
    Shell,
}

impl FromStr for PaneRole {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(PaneRole::Agent),
            "shell" => Ok(PaneRole::Shell),
            other => Err(MuxError::Other(format!(
                "pane role must be 'agent' or 'shell', got '{other}'"
            ))),
        }
    }
}

/// Orientation of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl FromStr for Direction {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "horizontal" => Ok(Direction::Horizontal),
            "vertical" => Ok(Direction::Vertical),
            other => Err(MuxError::BadDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Horizontal => f.write_str("horizontal"),
            Direction::Vertical => f.write_str("vertical"),
        }
    }
}

/// A single terminal pane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub pane_id: String,
    /// Stored for on-disk compatibility; always `multiplexer_name(pane_id)`.
    #[serde(rename = "tmux_name", default)]
    pub multiplexer_name: String,
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Absent on layouts written before roles existed.
    #[serde(rename = "pane_type", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<PaneRole>,
}

impl Leaf {
    pub fn new(pane_id: impl Into<String>, role: PaneRole) -> Self {
        let pane_id = pane_id.into();
        Self {
            multiplexer_name: multiplexer_name(&pane_id),
            pane_id,
            display_name: None,
            role: Some(role),
        }
    }

    /// A leaf with a freshly minted pane id.
    pub fn fresh(role: PaneRole) -> Self {
        Self::new(new_pane_id(), role)
    }

    /// Role with the legacy default applied: role-less panes ran the agent.
    pub fn effective_role(&self) -> PaneRole {
        self.role.unwrap_or(PaneRole::Agent)
    }
}

/// Two panes side by side (`horizontal`) or stacked (`vertical`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub direction: Direction,
    pub ratio: f64,
    pub first: Box<LayoutNode>,
    pub second: Box<LayoutNode>,
}

/// A node of the layout tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayoutNode {
    Leaf(Leaf),
    Split(Split),
}

impl From<Leaf> for LayoutNode {
    fn from(leaf: Leaf) -> Self {
        LayoutNode::Leaf(leaf)
    }
}

impl LayoutNode {
    /// Single-leaf layout.
    pub fn leaf(pane_id: impl Into<String>, role: PaneRole) -> Self {
        LayoutNode::Leaf(Leaf::new(pane_id, role))
    }

    pub fn split(direction: Direction, ratio: f64, first: LayoutNode, second: LayoutNode) -> Self {
        LayoutNode::Split(Split {
            direction,
            ratio,
            first: Box::new(first),
            second: Box::new(second),
        })
    }

    fn is_leaf_with(&self, pane_id: &str) -> bool {
        matches!(self, LayoutNode::Leaf(leaf) if leaf.pane_id == pane_id)
    }

    /// Depth-first search for a leaf. The second element is the split that
    /// directly contains the leaf, `None` when the leaf is the root.
    /// The first child is searched before the second.
    pub fn find(&self, pane_id: &str) -> Option<(&Leaf, Option<&Split>)> {
        fn walk<'a>(
            node: &'a LayoutNode,
            parent: Option<&'a Split>,
            pane_id: &str,
        ) -> Option<(&'a Leaf, Option<&'a Split>)> {
            match node {
                LayoutNode::Leaf(leaf) => (leaf.pane_id == pane_id).then_some((leaf, parent)),
                LayoutNode::Split(split) => walk(&split.first, Some(split), pane_id)
                    .or_else(|| walk(&split.second, Some(split), pane_id)),
            }
        }
        walk(self, None, pane_id)
    }

    pub fn has_pane(&self, pane_id: &str) -> bool {
        self.find(pane_id).is_some()
    }

    /// Pane ids in in-order (first before second) traversal.
    pub fn collect_leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |leaf| out.push(leaf.pane_id.clone()));
        out
    }

    pub fn for_each_leaf(&self, f: &mut impl FnMut(&Leaf)) {
        match self {
            LayoutNode::Leaf(leaf) => f(leaf),
            LayoutNode::Split(split) => {
                split.first.for_each_leaf(f);
                split.second.for_each_leaf(f);
            }
        }
    }

    fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut Leaf)) {
        match self {
            LayoutNode::Leaf(leaf) => f(leaf),
            LayoutNode::Split(split) => {
                split.first.for_each_leaf_mut(f);
                split.second.for_each_leaf_mut(f);
            }
        }
    }

    /// Fill in stored multiplexer names that are missing or stale.
    /// Returns whether anything changed.
    pub fn normalize_names(&mut self) -> bool {
        let mut changed = false;
        self.for_each_leaf_mut(&mut |leaf| {
            let expected = multiplexer_name(&leaf.pane_id);
            if leaf.multiplexer_name != expected {
                leaf.multiplexer_name = expected;
                changed = true;
            }
        });
        changed
    }

    fn leaf_node_mut(&mut self, pane_id: &str) -> Option<&mut LayoutNode> {
        if self.is_leaf_with(pane_id) {
            return Some(self);
        }
        match self {
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split(split) => {
                if split.first.has_pane(pane_id) {
                    split.first.leaf_node_mut(pane_id)
                } else {
                    split.second.leaf_node_mut(pane_id)
                }
            }
        }
    }

    /// The split node that directly contains the leaf.
    fn parent_node_mut(&mut self, pane_id: &str) -> Option<&mut LayoutNode> {
        let direct = match self {
            LayoutNode::Leaf(_) => return None,
            LayoutNode::Split(split) => {
                split.first.is_leaf_with(pane_id) || split.second.is_leaf_with(pane_id)
            }
        };
        if direct {
            return Some(self);
        }
        match self {
            LayoutNode::Leaf(_) => None,
            LayoutNode::Split(split) => {
                if split.first.has_pane(pane_id) {
                    split.first.parent_node_mut(pane_id)
                } else {
                    split.second.parent_node_mut(pane_id)
                }
            }
        }
    }

    pub fn leaf_mut(&mut self, pane_id: &str) -> Option<&mut Leaf> {
        match self.leaf_node_mut(pane_id)? {
            LayoutNode::Leaf(leaf) => Some(leaf),
            LayoutNode::Split(_) => None,
        }
    }

    /// Split a pane, placing a new shell pane second.
    ///
    /// Returns the new tree and the newly minted pane id.
    pub fn split_pane(&self, pane_id: &str, direction: &str) -> MuxResult<(LayoutNode, String)> {
        let direction: Direction = direction.parse()?;
        let leaf = Leaf::fresh(PaneRole::Shell);
        let new_pane_id = leaf.pane_id.clone();
        let tree = self.split_with(pane_id, direction, leaf)?;
        Ok((tree, new_pane_id))
    }

    /// Replace the target leaf with `Split{direction, 0.5, target, new_leaf}`.
    pub fn split_with(
        &self,
        pane_id: &str,
        direction: Direction,
        new_leaf: Leaf,
    ) -> MuxResult<LayoutNode> {
        if self.has_pane(&new_leaf.pane_id) {
            return Err(MuxError::AlreadyExists(new_leaf.pane_id));
        }
        let mut tree = self.clone();
        let target = tree
            .leaf_node_mut(pane_id)
            .ok_or_else(|| MuxError::NotFound(format!("pane {pane_id}")))?;
        let original = target.clone();
        *target = LayoutNode::split(direction, DEFAULT_RATIO, original, new_leaf.into());
        Ok(tree)
    }

    /// Remove a leaf, collapsing its parent split into the surviving sibling.
    ///
    /// Returns `(None, true)` when the tree was just this leaf; the caller
    /// then deletes the owning session record.
    pub fn close_leaf(&self, pane_id: &str) -> MuxResult<(Option<LayoutNode>, bool)> {
        if self.is_leaf_with(pane_id) {
            return Ok((None, true));
        }
        let mut tree = self.clone();
        let parent = tree
            .parent_node_mut(pane_id)
            .ok_or_else(|| MuxError::NotFound(format!("pane {pane_id}")))?;
        let removed = std::mem::replace(parent, LayoutNode::Leaf(Leaf::default()));
        let LayoutNode::Split(split) = removed else {
            return Err(MuxError::Other("parent of a leaf must be a split".into()));
        };
        // When both children match, the first one is the one removed.
        let survivor = if split.first.is_leaf_with(pane_id) {
            split.second
        } else {
            split.first
        };
        *parent = *survivor;
        Ok((Some(tree), false))
    }

    /// Set the ratio of the split directly containing the pane.
    /// The tree is left untouched on error.
    pub fn resize(&mut self, pane_id: &str, ratio: f64) -> MuxResult<()> {
        if !(MIN_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(MuxError::RatioOutOfRange(ratio));
        }
        if !self.has_pane(pane_id) {
            return Err(MuxError::NotFound(format!("pane {pane_id}")));
        }
        match self.parent_node_mut(pane_id) {
            Some(LayoutNode::Split(split)) => {
                split.ratio = ratio;
                Ok(())
            }
            _ => Err(MuxError::NotInSplit(pane_id.to_string())),
        }
    }

    /// Set a pane's display name; an empty name clears it.
    pub fn rename(&mut self, pane_id: &str, display_name: &str) -> MuxResult<()> {
        let leaf = self
            .leaf_mut(pane_id)
            .ok_or_else(|| MuxError::NotFound(format!("pane {pane_id}")))?;
        leaf.display_name = if display_name.is_empty() {
            None
        } else {
            Some(display_name.to_string())
        };
        Ok(())
    }
}
