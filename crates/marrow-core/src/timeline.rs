//! Use-timelines and def-timelines: the per-(block, variable) SSA record.
//!
//! A def-timeline contains the sequence of defs of one variable observed in
//! one block. Locally created defs are kept as an ordered list of
//! use-timelines, one per def, pinned to body positions. Defs imported from
//! predecessor blocks are abstracted behind a single *incoming* use-timeline
//! whose head starts as a logical join node and is promoted to a phi
//! instruction only when the joined predecessors are heterogeneous. Incoming
//! nodes record, per predecessor block, the set of predecessor def-timelines
//! flowing in along that edge; the predecessor timelines list this one in
//! their `succs`, and the pair is kept bidirectionally consistent.

use smallvec::SmallVec;

use crate::id::{BlockId, DtKey, InstrId, TimelineId, VarId};
use crate::link_set::LinkSet;

/// Identifies a use: an operand slot of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UseId {
    pub instr: InstrId,
    pub operand: u32,
}

/// What a use-timeline's head is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineHead {
    /// A def instruction in this block (a body def, or a materialised phi).
    Instr(InstrId),
    /// The logical join node of an incoming timeline; no phi exists yet.
    Incoming,
    /// The implicit def 0 of a function parameter, at the entry block.
    Param,
    /// Synthetic head of an orphaned incoming timeline: the variable is
    /// uninitialised on some (or every) path reaching this block.
    Uninit,
}

/// An ordered list of uses sharing one def.
#[derive(Debug, Clone, PartialEq)]
pub struct UseTimeline {
    pub id: TimelineId,
    pub head: TimelineHead,
    uses: SmallVec<[UseId; 4]>,
}

impl UseTimeline {
    pub fn new(id: TimelineId, head: TimelineHead) -> Self {
        UseTimeline {
            id,
            head,
            uses: SmallVec::new(),
        }
    }

    /// The defining instruction, if the head is one.
    pub fn head_instr(&self) -> Option<InstrId> {
        match self.head {
            TimelineHead::Instr(i) => Some(i),
            _ => None,
        }
    }

    pub fn uses(&self) -> &[UseId] {
        &self.uses
    }

    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }

    pub fn push_use(&mut self, u: UseId) {
        self.uses.push(u);
    }

    pub fn remove_use(&mut self, u: UseId) -> bool {
        if let Some(pos) = self.uses.iter().position(|x| *x == u) {
            self.uses.remove(pos);
            true
        } else {
            false
        }
    }

    /// Removes and returns the uses for which `pred` returns `true`,
    /// preserving order.
    pub fn drain_uses<F: FnMut(&UseId) -> bool>(&mut self, mut pred: F) -> SmallVec<[UseId; 4]> {
        let mut taken = SmallVec::new();
        let mut kept = SmallVec::new();
        for u in self.uses.drain(..) {
            if pred(&u) {
                taken.push(u);
            } else {
                kept.push(u);
            }
        }
        self.uses = kept;
        taken
    }

    /// Appends `uses` at the end, keeping their order.
    pub fn append_uses(&mut self, uses: impl IntoIterator<Item = UseId>) {
        self.uses.extend(uses);
    }
}

/// One incoming edge record: predecessor block plus the set of predecessor
/// def-timelines flowing in along it. An empty set marks an edge along which
/// the variable is undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingNode {
    pub pred: BlockId,
    pub timelines: LinkSet<DtKey>,
}

/// The complete def record for one variable inside one block.
#[derive(Debug, Clone)]
pub struct DefTimeline {
    block: BlockId,
    var: VarId,
    incoming: SmallVec<[IncomingNode; 2]>,
    incoming_timeline: Option<UseTimeline>,
    locals: Vec<UseTimeline>,
    succs: LinkSet<DtKey>,
}

impl DefTimeline {
    pub fn new(block: BlockId, var: VarId) -> Self {
        DefTimeline {
            block,
            var,
            incoming: SmallVec::new(),
            incoming_timeline: None,
            locals: Vec::new(),
            succs: LinkSet::new(),
        }
    }

    pub fn key(&self) -> DtKey {
        DtKey::new(self.block, self.var)
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    // -- incoming nodes --

    pub fn incoming(&self) -> &[IncomingNode] {
        &self.incoming
    }

    pub fn has_incoming(&self) -> bool {
        !self.incoming.is_empty()
    }

    pub fn find_incoming(&self, pred: BlockId) -> Option<&IncomingNode> {
        self.incoming.iter().find(|n| n.pred == pred)
    }

    pub fn find_incoming_mut(&mut self, pred: BlockId) -> Option<&mut IncomingNode> {
        self.incoming.iter_mut().find(|n| n.pred == pred)
    }

    /// Appends (or merges into) the incoming node for `pred`.
    ///
    /// The incoming use-timeline must already exist; see
    /// [`DefTimeline::create_incoming_timeline`].
    pub fn append_incoming(&mut self, pred: BlockId, timelines: LinkSet<DtKey>) {
        debug_assert!(
            self.incoming_timeline.is_some(),
            "incoming node appended without an incoming timeline"
        );
        if let Some(node) = self.find_incoming_mut(pred) {
            node.timelines.merge(&timelines);
        } else {
            self.incoming.push(IncomingNode { pred, timelines });
        }
    }

    /// Removes the incoming node for `pred`, returning it.
    pub fn remove_incoming(&mut self, pred: BlockId) -> Option<IncomingNode> {
        let pos = self.incoming.iter().position(|n| n.pred == pred)?;
        Some(self.incoming.remove(pos))
    }

    // -- incoming use-timeline --

    pub fn has_incoming_timeline(&self) -> bool {
        self.incoming_timeline.is_some()
    }

    pub fn incoming_timeline(&self) -> Option<&UseTimeline> {
        self.incoming_timeline.as_ref()
    }

    pub fn incoming_timeline_mut(&mut self) -> Option<&mut UseTimeline> {
        self.incoming_timeline.as_mut()
    }

    /// Starts up the incoming use-timeline. At most one may exist.
    pub fn create_incoming_timeline(&mut self, id: TimelineId, head: TimelineHead) -> &mut UseTimeline {
        debug_assert!(self.incoming_timeline.is_none(), "incoming timeline already exists");
        self.incoming_timeline = Some(UseTimeline::new(id, head));
        self.incoming_timeline.as_mut().unwrap()
    }

    pub fn destroy_incoming_timeline(&mut self) -> Option<UseTimeline> {
        self.incoming_timeline.take()
    }

    // -- local timelines --

    pub fn locals(&self) -> &[UseTimeline] {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Vec<UseTimeline> {
        &mut self.locals
    }

    pub fn has_local_timelines(&self) -> bool {
        !self.locals.is_empty()
    }

    /// Returns `true` if any timeline (incoming or local) exists.
    pub fn has_timelines(&self) -> bool {
        self.incoming_timeline.is_some() || !self.locals.is_empty()
    }

    /// The timeline whose def flows out of the block: the last local if any,
    /// otherwise the incoming timeline.
    pub fn outgoing_timeline(&self) -> Option<&UseTimeline> {
        self.locals.last().or(self.incoming_timeline.as_ref())
    }

    /// Looks up a timeline (incoming or local) by id.
    pub fn timeline(&self, id: TimelineId) -> Option<&UseTimeline> {
        if let Some(inc) = &self.incoming_timeline {
            if inc.id == id {
                return Some(inc);
            }
        }
        self.locals.iter().find(|t| t.id == id)
    }

    pub fn timeline_mut(&mut self, id: TimelineId) -> Option<&mut UseTimeline> {
        if let Some(inc) = &mut self.incoming_timeline {
            if inc.id == id {
                return Some(inc);
            }
        }
        self.locals.iter_mut().find(|t| t.id == id)
    }

    pub fn num_timelines(&self) -> usize {
        self.locals.len() + usize::from(self.incoming_timeline.is_some())
    }

    // -- successor links --

    pub fn succs(&self) -> &LinkSet<DtKey> {
        &self.succs
    }

    pub fn add_successor(&mut self, key: DtKey) {
        self.succs.insert(key);
    }

    pub fn remove_successor(&mut self, key: DtKey) {
        self.succs.remove(&key);
    }
}
