//! Structured CFG components: the tagged component tree.
//!
//! Components live in an arena owned by the function; each slot records its
//! parent, and every ownership change goes through the `set_parent` hook so
//! parent pointers and child ownership always agree. The leaves of a
//! structure (the blocks whose outgoing edges leave it) are cached per slot
//! and invalidated whenever a leaf position changes.
//!
//! Control flow is implied by the tree shape:
//! - `sequence`: children run one after another;
//! - `fork`: one condition block followed by N case subcomponents, merging at
//!   the fork's successor;
//! - `loop`: `start -> condition -> {body -> update -> condition}* -> after`,
//!   with the cycle edge `update -> condition`.

use std::cell::RefCell;

use smallvec::{smallvec, SmallVec};

use crate::block::Block;
use crate::error::CoreError;
use crate::function::Function;
use crate::id::{BlockId, CompId, VarId};
use crate::link_set::LinkSet;

/// A component of the structured CFG.
#[derive(Debug, Clone)]
pub enum Component {
    Block(Block),
    Sequence(Sequence),
    Fork(Fork),
    Loop(Loop),
}

/// Ordered subcomponents with sequential control flow. Never empty.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub children: Vec<CompId>,
}

/// A condition block selecting between N case subcomponents.
#[derive(Debug, Clone)]
pub struct Fork {
    pub condition: BlockId,
    pub cases: Vec<CompId>,
}

/// A structured loop with five roles; the condition is always a block.
#[derive(Debug, Clone)]
pub struct Loop {
    pub start: CompId,
    pub condition: BlockId,
    pub body: CompId,
    pub update: BlockId,
    pub after: BlockId,
}

/// Which role a subcomponent plays inside a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopRole {
    Start,
    Condition,
    Body,
    Update,
    After,
}

/// An arena slot: the component, its parent, and the cached leaf set.
#[derive(Debug, Clone)]
pub struct Slot {
    pub component: Component,
    pub parent: Option<CompId>,
    leaf_cache: RefCell<Option<LinkSet<BlockId>>>,
}

impl Slot {
    pub(crate) fn new(component: Component, parent: Option<CompId>) -> Self {
        Slot {
            component,
            parent,
            leaf_cache: RefCell::new(None),
        }
    }
}

impl Loop {
    /// The role of direct subcomponent `sub` within this loop.
    pub fn role_of(&self, sub: CompId) -> Option<LoopRole> {
        if sub == self.start {
            Some(LoopRole::Start)
        } else if sub == self.condition.into() {
            Some(LoopRole::Condition)
        } else if sub == self.body {
            Some(LoopRole::Body)
        } else if sub == self.update.into() {
            Some(LoopRole::Update)
        } else if sub == self.after.into() {
            Some(LoopRole::After)
        } else {
            None
        }
    }
}

impl Function {
    // -----------------------------------------------------------------------
    // Arena access
    // -----------------------------------------------------------------------

    pub fn component(&self, id: CompId) -> &Component {
        &self.slots[id.0 as usize].component
    }

    pub(crate) fn component_mut(&mut self, id: CompId) -> &mut Component {
        &mut self.slots[id.0 as usize].component
    }

    pub fn parent(&self, id: CompId) -> Option<CompId> {
        self.slots[id.0 as usize].parent
    }

    pub(crate) fn set_parent(&mut self, id: CompId, parent: Option<CompId>) {
        self.slots[id.0 as usize].parent = parent;
    }

    pub fn block(&self, id: BlockId) -> &Block {
        match self.component(id.into()) {
            Component::Block(b) => b,
            _ => panic!("BlockId {} does not name a block", id),
        }
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.component_mut(id.into()) {
            Component::Block(b) => b,
            _ => panic!("BlockId {} does not name a block", id),
        }
    }

    /// All block ids, in arena order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            matches!(s.component, Component::Block(_)).then_some(BlockId(i as u32))
        })
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    pub(crate) fn alloc_block(&mut self, parent: Option<CompId>, condition_var: Option<VarId>) -> BlockId {
        let id = BlockId(self.slots.len() as u32);
        self.slots
            .push(Slot::new(Component::Block(Block::new(condition_var)), parent));
        id
    }

    /// Allocates a sequence pre-populated with a single block, matching how
    /// fresh structures always expose an entry block.
    pub(crate) fn alloc_sequence(&mut self, parent: Option<CompId>) -> CompId {
        let id = CompId(self.slots.len() as u32);
        self.slots.push(Slot::new(
            Component::Sequence(Sequence { children: vec![] }),
            parent,
        ));
        let entry = self.alloc_block(Some(id), None);
        match self.component_mut(id) {
            Component::Sequence(seq) => seq.children.push(entry.into()),
            _ => unreachable!(),
        }
        id
    }

    // -----------------------------------------------------------------------
    // Structure construction
    // -----------------------------------------------------------------------

    fn sequence_mut(&mut self, id: CompId) -> Result<&mut Sequence, CoreError> {
        match self.component_mut(id) {
            Component::Sequence(seq) => Ok(seq),
            _ => Err(CoreError::NotASequence(id)),
        }
    }

    /// Appends a new block at the end of sequence `seq`.
    pub fn emplace_back_block(&mut self, seq: CompId) -> Result<BlockId, CoreError> {
        self.sequence_mut(seq)?;
        let b = self.alloc_block(Some(seq), None);
        self.sequence_mut(seq)?.children.push(b.into());
        self.invalidate_leaf_cache(seq);
        Ok(b)
    }

    /// Appends a new fork (condition block, no cases yet) at the end of
    /// sequence `seq`. The condition block defines `condition_var`.
    pub fn emplace_back_fork(&mut self, seq: CompId, condition_var: VarId) -> Result<CompId, CoreError> {
        self.sequence_mut(seq)?;
        let id = CompId(self.slots.len() as u32);
        self.slots.push(Slot::new(
            Component::Fork(Fork {
                condition: BlockId(0),
                cases: Vec::new(),
            }),
            Some(seq),
        ));
        let cond = self.alloc_block(Some(id), Some(condition_var));
        match self.component_mut(id) {
            Component::Fork(fork) => fork.condition = cond,
            _ => unreachable!(),
        }
        self.sequence_mut(seq)?.children.push(id);
        self.invalidate_leaf_cache(seq);
        Ok(id)
    }

    /// Appends a new loop at the end of sequence `seq`. All five roles are
    /// allocated: start / update / after blocks, a one-block body sequence,
    /// and the condition block defining `condition_var`.
    pub fn emplace_back_loop(&mut self, seq: CompId, condition_var: VarId) -> Result<CompId, CoreError> {
        self.sequence_mut(seq)?;
        let id = CompId(self.slots.len() as u32);
        self.slots.push(Slot::new(
            Component::Loop(Loop {
                start: CompId(0),
                condition: BlockId(0),
                body: CompId(0),
                update: BlockId(0),
                after: BlockId(0),
            }),
            Some(seq),
        ));
        let start = self.alloc_block(Some(id), None);
        let condition = self.alloc_block(Some(id), Some(condition_var));
        let body = self.alloc_sequence(Some(id));
        let update = self.alloc_block(Some(id), None);
        let after = self.alloc_block(Some(id), None);
        match self.component_mut(id) {
            Component::Loop(lp) => {
                lp.start = start.into();
                lp.condition = condition;
                lp.body = body;
                lp.update = update;
                lp.after = after;
            }
            _ => unreachable!(),
        }
        self.sequence_mut(seq)?.children.push(id);
        self.invalidate_leaf_cache(seq);
        Ok(id)
    }

    /// Adds a block case to fork `fork`.
    pub fn fork_add_case_block(&mut self, fork: CompId) -> Result<BlockId, CoreError> {
        match self.component(fork) {
            Component::Fork(_) => {}
            _ => return Err(CoreError::NotAFork(fork)),
        }
        let b = self.alloc_block(Some(fork), None);
        match self.component_mut(fork) {
            Component::Fork(f) => f.cases.push(b.into()),
            _ => unreachable!(),
        }
        self.invalidate_leaf_cache(fork);
        Ok(b)
    }

    /// Adds a sequence case (pre-populated with one block) to fork `fork`.
    pub fn fork_add_case_sequence(&mut self, fork: CompId) -> Result<CompId, CoreError> {
        match self.component(fork) {
            Component::Fork(_) => {}
            _ => return Err(CoreError::NotAFork(fork)),
        }
        let seq = self.alloc_sequence(Some(fork));
        match self.component_mut(fork) {
            Component::Fork(f) => f.cases.push(seq),
            _ => unreachable!(),
        }
        self.invalidate_leaf_cache(fork);
        Ok(seq)
    }

    // -----------------------------------------------------------------------
    // Structural queries
    // -----------------------------------------------------------------------

    /// The unique entry block of a component, found by left-first descent.
    pub fn entry_block(&self, comp: CompId) -> BlockId {
        match self.component(comp) {
            Component::Block(_) => BlockId(comp.0),
            Component::Sequence(seq) => {
                self.entry_block(*seq.children.first().expect("sequence is never empty"))
            }
            Component::Fork(fork) => fork.condition,
            Component::Loop(lp) => self.entry_block(lp.start),
        }
    }

    /// The blocks whose outgoing edges leave `comp`. Cached per slot.
    pub fn leaves(&self, comp: CompId) -> LinkSet<BlockId> {
        if let Some(cached) = self.slots[comp.0 as usize].leaf_cache.borrow().as_ref() {
            return cached.clone();
        }
        let computed = match self.component(comp) {
            Component::Block(_) => LinkSet::from_one(BlockId(comp.0)),
            Component::Sequence(seq) => {
                self.leaves(*seq.children.last().expect("sequence is never empty"))
            }
            Component::Fork(fork) => {
                let mut set = LinkSet::new();
                for case in &fork.cases {
                    set.merge(&self.leaves(*case));
                }
                set
            }
            Component::Loop(lp) => self.leaves(lp.after.into()),
        };
        *self.slots[comp.0 as usize].leaf_cache.borrow_mut() = Some(computed.clone());
        computed
    }

    /// Whether `sub` is a leaf of `parent`: its outgoing edges leave the
    /// structure.
    pub fn is_leaf(&self, parent: CompId, sub: CompId) -> bool {
        self.in_leaf_position(parent, sub)
    }

    /// Whether `sub` sits in a leaf position of its parent `parent`
    /// (its leaves are part of the parent's leaves).
    fn in_leaf_position(&self, parent: CompId, sub: CompId) -> bool {
        match self.component(parent) {
            Component::Block(_) => false,
            Component::Sequence(seq) => seq.children.last() == Some(&sub),
            Component::Fork(fork) => fork.cases.contains(&sub),
            Component::Loop(lp) => sub == lp.after.into(),
        }
    }

    /// Drops the cached leaf set of `comp` and of every ancestor whose
    /// leaves contain it.
    pub(crate) fn invalidate_leaf_cache(&mut self, comp: CompId) {
        let mut cur = Some(comp);
        while let Some(id) = cur {
            let had = self.slots[id.0 as usize].leaf_cache.borrow_mut().take().is_some();
            let parent = self.parent(id);
            cur = match parent {
                Some(p) if had || self.in_leaf_position(p, id) => Some(p),
                _ => None,
            };
        }
    }

    /// The role of `sub` inside loop component `lp`.
    pub fn loop_role(&self, lp: &Loop, sub: CompId) -> LoopRole {
        lp.role_of(sub).expect("subcomponent not part of the loop")
    }

    /// Ordered successor blocks of `b` (fork cases in case order; a loop
    /// condition yields body entry first, then after).
    pub fn block_successors(&self, b: BlockId) -> SmallVec<[BlockId; 2]> {
        let mut sub: CompId = b.into();
        loop {
            let Some(parent) = self.parent(sub) else {
                return SmallVec::new();
            };
            match self.component(parent) {
                Component::Block(_) => unreachable!("blocks have no children"),
                Component::Sequence(seq) => {
                    let pos = seq
                        .children
                        .iter()
                        .position(|c| *c == sub)
                        .expect("child not listed in parent");
                    if pos + 1 < seq.children.len() {
                        return smallvec![self.entry_block(seq.children[pos + 1])];
                    }
                    sub = parent;
                }
                Component::Fork(fork) => {
                    if sub == fork.condition.into() {
                        return fork.cases.iter().map(|c| self.entry_block(*c)).collect();
                    }
                    sub = parent;
                }
                Component::Loop(lp) => match self.loop_role(lp, sub) {
                    LoopRole::Start => return smallvec![lp.condition],
                    LoopRole::Condition => {
                        return smallvec![self.entry_block(lp.body), lp.after]
                    }
                    LoopRole::Body => return smallvec![lp.update],
                    LoopRole::Update => return smallvec![lp.condition],
                    LoopRole::After => sub = parent,
                },
            }
        }
    }

    /// Predecessor blocks of `b`.
    pub fn block_predecessors(&self, b: BlockId) -> LinkSet<BlockId> {
        let mut sub: CompId = b.into();
        loop {
            let Some(parent) = self.parent(sub) else {
                return LinkSet::new();
            };
            match self.component(parent) {
                Component::Block(_) => unreachable!("blocks have no children"),
                Component::Sequence(seq) => {
                    let pos = seq
                        .children
                        .iter()
                        .position(|c| *c == sub)
                        .expect("child not listed in parent");
                    if pos > 0 {
                        return self.leaves(seq.children[pos - 1]);
                    }
                    sub = parent;
                }
                Component::Fork(fork) => {
                    if sub == fork.condition.into() {
                        sub = parent;
                    } else {
                        return LinkSet::from_one(fork.condition);
                    }
                }
                Component::Loop(lp) => match self.loop_role(lp, sub) {
                    LoopRole::Start => sub = parent,
                    LoopRole::Condition => {
                        let mut set = self.leaves(lp.start);
                        set.insert(lp.update);
                        return set;
                    }
                    LoopRole::Body => return LinkSet::from_one(lp.condition),
                    LoopRole::Update => return self.leaves(lp.body),
                    LoopRole::After => return LinkSet::from_one(lp.condition),
                },
            }
        }
    }

    // -----------------------------------------------------------------------
    // Flattening
    // -----------------------------------------------------------------------

    /// Merges nested sequences of `seq` into one flat child list.
    ///
    /// Children of inner sequences are re-parented onto `seq`; inner
    /// sequence slots are left empty (no element aliases after the move).
    /// Idempotent.
    pub fn flatten(&mut self, seq: CompId) -> Result<(), CoreError> {
        let children = match self.component(seq) {
            Component::Sequence(s) => s.children.clone(),
            _ => return Err(CoreError::NotASequence(seq)),
        };
        let mut flat: Vec<CompId> = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in children {
            if matches!(self.component(child), Component::Sequence(_)) {
                self.flatten(child)?;
                let grandchildren = match self.component_mut(child) {
                    Component::Sequence(s) => std::mem::take(&mut s.children),
                    _ => unreachable!(),
                };
                for g in grandchildren {
                    self.set_parent(g, Some(seq));
                    flat.push(g);
                }
                self.set_parent(child, None);
                changed = true;
            } else {
                flat.push(child);
            }
        }
        if changed {
            self.sequence_mut(seq)?.children = flat;
            self.invalidate_leaf_cache(seq);
        }
        Ok(())
    }
}
