//! The def-resolution engine: locating reaching defs on demand.
//!
//! Resolution is split between two read-only builders and a mutating
//! collapse:
//!
//! - the **descending resolver** describes, for a component, which
//!   def-timelines flow out of its leaves (one resolution per leaf block);
//! - the **ascending resolver** walks parent-ward from a subcomponent,
//!   using the descender on predecessor subcomponents, and assembles a
//!   [`ResolutionStack`] describing what reaches the subcomponent's entry;
//! - [`Function::resolve_stack`] collapses a stack; join frames materialise
//!   incoming nodes via [`Function::join_at`], which promotes the join head
//!   to a phi only when the joined origins are heterogeneous (or an edge is
//!   undefined).
//!
//! Joins are only scheduled where control flow actually merges: a substack
//! whose resolution is single-threaded (`needs_join == false`) is *forwarded*
//! -- its remote timelines ride along and fill unresolved block-resolutions
//! directly, so pass-through blocks never acquire def-timelines of their own.
//! This keeps incoming nodes pointing at the remote timelines the values
//! actually originate from, which is what the def-propagator later retargets.
//!
//! Loops push two join frames at the condition block. The start-edge frame
//! collapses first and seeds the condition's def-timeline; the update-edge
//! frame then resolves against it, with the cyclic edge bottoming out in an
//! unresolved block-resolution for the condition block that the dominating
//! timeline fills in. Ascension that reaches the function root unresolved
//! yields an orphaned `Uninit` timeline, except for parameters, which seed a
//! `Param` timeline at the entry block instead.

use smallvec::{smallvec, SmallVec};

use crate::component::Component;
use crate::error::CoreError;
use crate::function::Function;
use crate::id::{BlockId, CompId, DefId, DtKey, TimelineId, VarId};
use crate::link_set::LinkSet;
use crate::timeline::TimelineHead;

/// Terminal resolution of a single block: either the def-timelines flowing
/// out of it, or "unknown" (filled by the dominating timelines on collapse).
#[derive(Debug, Clone)]
pub struct BlockResolution {
    pub block: BlockId,
    pub timelines: Option<LinkSet<DtKey>>,
}

/// A pending step of the collapse: either a join at `join_block` fed by the
/// substack's resolutions, or a plain forwarding of the substack's timelines
/// into the dominator position.
#[derive(Debug, Clone)]
pub struct Frame {
    pub join_block: Option<BlockId>,
    pub substack: ResolutionStack,
}

impl Frame {
    fn join(join_block: BlockId, substack: ResolutionStack) -> Self {
        Frame {
            join_block: Some(join_block),
            substack,
        }
    }

    fn forward(substack: ResolutionStack) -> Self {
        Frame {
            join_block: None,
            substack,
        }
    }

    /// A frame is joinable iff its substack is resolvable.
    pub fn is_joinable(&self) -> bool {
        self.substack.is_resolvable()
    }
}

/// A transient description of where reaching defs will come from.
#[derive(Debug, Clone)]
pub struct ResolutionStack {
    var: VarId,
    frames: Vec<Frame>,
    leaves: Vec<ResolutionStack>,
    block_res: Option<BlockResolution>,
}

impl ResolutionStack {
    fn new(var: VarId) -> Self {
        ResolutionStack {
            var,
            frames: Vec::new(),
            leaves: Vec::new(),
            block_res: None,
        }
    }

    fn for_block(var: VarId, block: BlockId, timelines: Option<LinkSet<DtKey>>) -> Self {
        ResolutionStack {
            var,
            frames: Vec::new(),
            leaves: Vec::new(),
            block_res: Some(BlockResolution { block, timelines }),
        }
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    fn push_join(&mut self, join_block: BlockId, substack: ResolutionStack) {
        self.frames.push(Frame::join(join_block, substack));
    }

    fn push_forward(&mut self, substack: ResolutionStack) {
        self.frames.push(Frame::forward(substack));
    }

    /// A stack with nothing in it: no predecessors exist (function root).
    pub fn is_vacant(&self) -> bool {
        self.frames.is_empty() && self.leaves.is_empty() && self.block_res.is_none()
    }

    /// Whether collapsing this stack yields a def for every leaf.
    pub fn is_resolvable(&self) -> bool {
        if let Some(br) = &self.block_res {
            if br.timelines.is_some() {
                return true;
            }
        }
        if let Some(top) = self.frames.last() {
            if top.is_joinable() {
                return true;
            }
        }
        !self.leaves.is_empty() && self.leaves.iter().all(ResolutionStack::is_resolvable)
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }
}

/// Result of a resolution build: the stack plus summary flags.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub stack: ResolutionStack,
    /// Whether the resolution is split over several leaves and therefore
    /// requires a join at the block where the edges meet again.
    pub needs_join: bool,
    /// Whether every path covered by the stack reaches a def.
    pub resolvable: bool,
}

impl BuildResult {
    fn vacant(var: VarId) -> Self {
        BuildResult {
            stack: ResolutionStack::new(var),
            needs_join: false,
            resolvable: false,
        }
    }
}

/// One reaching-def resolution: the leaf (predecessor) block an edge leaves
/// from, and the def-timelines flowing along it. Empty timelines mean the
/// variable is undefined along that edge.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub leaf: BlockId,
    pub timelines: LinkSet<DtKey>,
}

// ---------------------------------------------------------------------------
// Descending resolver
// ---------------------------------------------------------------------------

pub(crate) struct DescendingResolver<'a> {
    pub func: &'a Function,
    pub var: VarId,
}

impl<'a> DescendingResolver<'a> {
    /// Builds the resolution of what flows out of `comp`'s leaves.
    pub fn dispatch_descender(&self, comp: CompId) -> BuildResult {
        match self.func.component(comp) {
            Component::Block(_) => self.visit_block(BlockId(comp.0)),
            Component::Sequence(seq) => self.visit_sequence(seq.children.clone()),
            Component::Fork(fork) => self.visit_fork(fork.clone()),
            Component::Loop(lp) => self.visit_loop(lp.clone()),
        }
    }

    fn visit_block(&self, b: BlockId) -> BuildResult {
        let resolved = self
            .func
            .block(b)
            .dt(self.var)
            .and_then(|dt| dt.has_timelines().then(|| LinkSet::from_one(dt.key())));
        BuildResult {
            resolvable: resolved.is_some(),
            needs_join: false,
            stack: ResolutionStack::for_block(self.var, b, resolved),
        }
    }

    fn visit_sequence(&self, children: Vec<CompId>) -> BuildResult {
        let mut acc: Option<BuildResult> = None;
        for i in (0..children.len()).rev() {
            let r = self.dispatch_descender(children[i]);
            match acc.as_mut() {
                None => {
                    if r.resolvable {
                        return r;
                    }
                    acc = Some(r);
                }
                Some(a) => {
                    let resolvable = r.resolvable;
                    if r.needs_join {
                        a.stack
                            .push_join(self.func.entry_block(children[i + 1]), r.stack);
                    } else {
                        a.stack.push_forward(r.stack);
                    }
                    a.resolvable = resolvable;
                    if resolvable {
                        break;
                    }
                }
            }
        }
        acc.expect("sequence is never empty")
    }

    fn visit_fork(&self, fork: crate::component::Fork) -> BuildResult {
        let cond_r = self.visit_block(fork.condition);
        let cond_resolvable = cond_r.resolvable;
        let mut all_cases = !fork.cases.is_empty();
        let mut needs_join = fork.cases.len() > 1;
        let mut stack = ResolutionStack::new(self.var);
        for case in &fork.cases {
            let mut r = self.dispatch_descender(*case);
            needs_join |= r.needs_join;
            if !r.resolvable {
                all_cases = false;
                // what enters the case flows out of the condition block
                r.stack.push_forward(cond_r.stack.clone());
            }
            stack.leaves.push(r.stack);
        }
        BuildResult {
            needs_join,
            resolvable: all_cases || (cond_resolvable && !fork.cases.is_empty()),
            stack,
        }
    }

    fn visit_loop(&self, lp: crate::component::Loop) -> BuildResult {
        let mut after_r = self.visit_block(lp.after);
        if after_r.resolvable {
            return after_r;
        }
        let (cond_stack, cond_resolvable) = self.loop_condition_stack(&lp, None);
        after_r.stack.push_forward(cond_stack);
        after_r.resolvable = cond_resolvable;
        after_r
    }

    /// The stack resolving what flows out of the loop's condition block,
    /// including the two condition-entry frames when the condition itself
    /// holds no def.
    pub(crate) fn loop_condition_stack(
        &self,
        lp: &crate::component::Loop,
        asc: Option<&AscendingResolver<'a>>,
    ) -> (ResolutionStack, bool) {
        let cond_r = self.visit_block(lp.condition);
        if cond_r.resolvable {
            return (cond_r.stack, true);
        }
        let mut stack = cond_r.stack;
        let (frames, resolvable) = self.loop_condition_frames(lp, asc);
        stack.frames.extend(frames);
        (stack, resolvable)
    }

    /// The two join frames feeding the loop condition block: the update-edge
    /// frame (pushed first, collapsed second) and the start-edge frame
    /// (pushed last, collapsed first -- it seeds the condition's timeline).
    pub(crate) fn loop_condition_frames(
        &self,
        lp: &crate::component::Loop,
        asc: Option<&AscendingResolver<'a>>,
    ) -> (Vec<Frame>, bool) {
        // update edge
        let mut update_r = self.visit_block(lp.update);
        if !update_r.resolvable {
            let mut body_r = self.dispatch_descender(lp.body);
            if !body_r.resolvable {
                // cyclic edge: bottoms out at the condition block and is
                // filled by the start-edge join when the stack collapses
                body_r
                    .stack
                    .push_forward(ResolutionStack::for_block(self.var, lp.condition, None));
            }
            if body_r.needs_join {
                update_r.stack.push_join(lp.update, body_r.stack);
            } else {
                update_r.stack.push_forward(body_r.stack);
            }
        }

        // start edge
        let mut start_r = self.dispatch_descender(lp.start);
        let mut resolvable = start_r.resolvable;
        if !start_r.resolvable {
            if let Some(asc) = asc {
                let up = asc.entry_stack(lp.start);
                if !up.stack.is_vacant() {
                    if up.needs_join {
                        start_r
                            .stack
                            .push_join(self.func.entry_block(lp.start), up.stack);
                    } else {
                        start_r.stack.push_forward(up.stack);
                    }
                    resolvable = up.resolvable;
                }
            }
        }

        let frames = vec![
            Frame::join(lp.condition, update_r.stack),
            Frame::join(lp.condition, start_r.stack),
        ];
        (frames, resolvable)
    }
}

// ---------------------------------------------------------------------------
// Ascending resolver
// ---------------------------------------------------------------------------

pub(crate) struct AscendingResolver<'a> {
    pub func: &'a Function,
    pub var: VarId,
}

impl<'a> AscendingResolver<'a> {
    fn descender(&self) -> DescendingResolver<'a> {
        DescendingResolver {
            func: self.func,
            var: self.var,
        }
    }

    /// Builds a stack whose collapse yields one [`Resolution`] per CFG edge
    /// entering `entry_block(sub)`. A vacant stack means the function root
    /// was reached: no predecessors exist.
    pub fn entry_stack(&self, sub: CompId) -> BuildResult {
        let Some(parent) = self.func.parent(sub) else {
            return BuildResult::vacant(self.var);
        };
        match self.func.component(parent) {
            Component::Block(_) => unreachable!("blocks have no children"),
            Component::Sequence(seq) => {
                let children = seq.children.clone();
                let pos = children
                    .iter()
                    .position(|c| *c == sub)
                    .expect("child not listed in parent");
                if pos == 0 {
                    return self.ascend(parent);
                }
                let prev = children[pos - 1];
                let mut r = self.descender().dispatch_descender(prev);
                if !r.resolvable {
                    let up = self.entry_stack(prev);
                    if !up.stack.is_vacant() {
                        if up.needs_join {
                            r.stack.push_join(self.func.entry_block(prev), up.stack);
                        } else {
                            r.stack.push_forward(up.stack);
                        }
                        r.resolvable = up.resolvable;
                    }
                }
                r
            }
            Component::Fork(fork) => {
                let fork = fork.clone();
                if sub == fork.condition.into() {
                    return self.ascend(parent);
                }
                // the only predecessor of a case is the condition block
                let mut r = self.descender().visit_block(fork.condition);
                if !r.resolvable {
                    let up = self.ascend(parent);
                    if !up.stack.is_vacant() {
                        if up.needs_join {
                            r.stack.push_join(fork.condition, up.stack);
                        } else {
                            r.stack.push_forward(up.stack);
                        }
                        r.resolvable = up.resolvable;
                    }
                }
                r
            }
            Component::Loop(lp) => {
                let lp = lp.clone();
                use crate::component::LoopRole;
                match self.func.loop_role(&lp, sub) {
                    LoopRole::Start => self.ascend(parent),
                    LoopRole::Condition => {
                        let (frames, resolvable) =
                            self.descender().loop_condition_frames(&lp, Some(self));
                        let mut stack = ResolutionStack::new(self.var);
                        stack.frames = frames;
                        BuildResult {
                            stack,
                            needs_join: false,
                            resolvable,
                        }
                    }
                    LoopRole::Body | LoopRole::After => {
                        let (stack, resolvable) =
                            self.descender().loop_condition_stack(&lp, Some(self));
                        BuildResult {
                            needs_join: false,
                            stack,
                            resolvable,
                        }
                    }
                    LoopRole::Update => {
                        let mut r = self.descender().dispatch_descender(lp.body);
                        if !r.resolvable {
                            let (cstack, cres) =
                                self.descender().loop_condition_stack(&lp, Some(self));
                            r.stack.push_forward(cstack);
                            r.resolvable = cres;
                        }
                        r
                    }
                }
            }
        }
    }

    /// Continues the ascension at the parent of `sub`.
    fn ascend(&self, sub: CompId) -> BuildResult {
        self.entry_stack(sub)
    }
}

// ---------------------------------------------------------------------------
// Collapse (mutating)
// ---------------------------------------------------------------------------

/// Distinct origin defs flowing into a join, plus whether any path carries
/// an undefined value.
#[derive(Debug, Default)]
struct OriginSet {
    defs: LinkSet<DefId>,
    undefined: bool,
}

impl Function {
    /// Materialises the incoming use-timeline of `var` at `block`, joining
    /// reaching defs on demand.
    ///
    /// Parameters seed a `Param`-headed timeline at the entry block first;
    /// a resolution that reaches the function root with nothing found leaves
    /// an orphaned `Uninit`-headed timeline.
    pub fn materialize_incoming(
        &mut self,
        block: BlockId,
        var: VarId,
    ) -> Result<TimelineId, CoreError> {
        if let Some(tl) = self.block(block).dt(var).and_then(|d| d.incoming_timeline()) {
            return Ok(tl.id);
        }

        if self.variable(var).is_param {
            let entry = self.entry();
            let missing = !self
                .block(entry)
                .dt(var)
                .map_or(false, |d| d.has_incoming_timeline());
            if missing {
                let tl = self.alloc_timeline_id();
                self.ensure_dt(entry, var)
                    .create_incoming_timeline(tl, TimelineHead::Param);
            }
            if block == entry {
                return Ok(self
                    .block(entry)
                    .dt(var)
                    .and_then(|d| d.incoming_timeline())
                    .expect("just seeded")
                    .id);
            }
        }

        let build = {
            let asc = AscendingResolver { func: &*self, var };
            asc.entry_stack(block.into())
        };
        let resolutions = self.resolve_stack(build.stack, LinkSet::new())?;
        if !resolutions.is_empty() {
            self.join_at(block, var, &resolutions)?;
        }
        if let Some(tl) = self.block(block).dt(var).and_then(|d| d.incoming_timeline()) {
            return Ok(tl.id);
        }

        // uninitialised on every path reaching this block
        let tl = self.alloc_timeline_id();
        self.ensure_dt(block, var)
            .create_incoming_timeline(tl, TimelineHead::Uninit);
        Ok(tl)
    }

    /// Collapses a resolution stack. Frames pop in reverse push order: join
    /// frames materialise a def-timeline at their block and thread it on as
    /// the dominator; forward frames thread their substack's timelines
    /// through unchanged. Unresolved block-resolutions are filled by the
    /// dominating timelines.
    pub(crate) fn resolve_stack(
        &mut self,
        mut stack: ResolutionStack,
        mut dom: LinkSet<DtKey>,
    ) -> Result<SmallVec<[Resolution; 4]>, CoreError> {
        let var = stack.var;
        while let Some(frame) = stack.frames.pop() {
            let rs = self.resolve_stack(frame.substack, dom.clone())?;
            match frame.join_block {
                Some(b) => {
                    dom = match self.join_at(b, var, &rs)? {
                        Some(key) => LinkSet::from_one(key),
                        None => LinkSet::new(),
                    };
                }
                None => {
                    let mut set = LinkSet::new();
                    for r in &rs {
                        set.merge(&r.timelines);
                    }
                    dom = set;
                }
            }
        }
        if let Some(br) = stack.block_res.take() {
            let timelines = br.timelines.unwrap_or(dom);
            return Ok(smallvec![Resolution {
                leaf: br.block,
                timelines,
            }]);
        }
        let mut out = SmallVec::new();
        for leaf in stack.leaves {
            out.extend(self.resolve_stack(leaf, dom.clone())?);
        }
        Ok(out)
    }

    /// Appends the given resolutions as incoming nodes of `DT(block, var)`,
    /// keeping successor backlinks consistent, and re-evaluates the join's
    /// phi decision. Homogeneous joins forward timelines without a phi.
    pub(crate) fn join_at(
        &mut self,
        block: BlockId,
        var: VarId,
        resolutions: &[Resolution],
    ) -> Result<Option<DtKey>, CoreError> {
        if resolutions.is_empty() {
            return Ok(self.block(block).dt(var).map(|d| d.key()));
        }
        let key = DtKey::new(block, var);

        let missing_tl = !self
            .block(block)
            .dt(var)
            .map_or(false, |d| d.has_incoming_timeline());
        if missing_tl {
            let tl = self.alloc_timeline_id();
            self.ensure_dt(block, var)
                .create_incoming_timeline(tl, TimelineHead::Incoming);
        }

        for r in resolutions {
            self.ensure_dt(block, var)
                .append_incoming(r.leaf, r.timelines.clone());
            for pred in r.timelines.iter().copied().collect::<Vec<_>>() {
                self.ensure_dt(pred.block, pred.var).add_successor(key);
            }
        }

        self.refresh_join(block, var)?;
        Ok(Some(key))
    }

    /// Re-evaluates the phi decision of the join at `DT(block, var)`: a
    /// logical join head is promoted to a phi instruction when the joined
    /// origins are heterogeneous or any edge is undefined. Returns whether a
    /// phi was materialised by this call.
    pub(crate) fn refresh_join(&mut self, block: BlockId, var: VarId) -> Result<bool, CoreError> {
        let head = self
            .block(block)
            .dt(var)
            .and_then(|d| d.incoming_timeline())
            .map(|t| t.head);
        if head != Some(TimelineHead::Incoming) {
            return Ok(false);
        }
        let needs_phi = {
            let mut origins = OriginSet::default();
            let mut visited = LinkSet::new();
            let dt = self.block(block).dt(var).expect("checked above");
            if dt.incoming().is_empty() {
                return Ok(false);
            }
            let nodes: Vec<_> = dt.incoming().to_vec();
            for node in &nodes {
                if node.timelines.is_empty() {
                    origins.undefined = true;
                }
                for k in node.timelines.iter() {
                    self.collect_origins(*k, &mut visited, &mut origins);
                }
            }
            origins.undefined || origins.defs.len() > 1
        };
        if needs_phi {
            self.create_phi(block, var)?;
        }
        Ok(needs_phi)
    }

    /// Walks the successor links from `key`, re-evaluating each reachable
    /// join's phi decision. A newly materialised phi changes the origin its
    /// successors observe, so their decisions are revisited.
    pub(crate) fn refresh_joins_from(&mut self, key: DtKey) -> Result<(), CoreError> {
        let mut work: Vec<DtKey> = vec![key];
        let mut visited: LinkSet<DtKey> = LinkSet::new();
        while let Some(k) = work.pop() {
            if !visited.insert(k) {
                continue;
            }
            let created = self.refresh_join(k.block, k.var)?;
            let succs: Vec<DtKey> = self
                .block(k.block)
                .dt(k.var)
                .map(|d| d.succs().iter().copied().collect())
                .unwrap_or_default();
            for s in succs {
                if created {
                    visited.remove(&s);
                }
                work.push(s);
            }
        }
        Ok(())
    }

    /// Accumulates the origin defs of the def flowing *out* of `key`,
    /// guarding against the cyclic reference graphs loops produce.
    fn collect_origins(&self, key: DtKey, visited: &mut LinkSet<DtKey>, out: &mut OriginSet) {
        if !visited.insert(key) {
            return;
        }
        let dt = match self.block(key.block).dt(key.var) {
            Some(dt) => dt,
            None => {
                out.undefined = true;
                return;
            }
        };
        if let Some(local) = dt.locals().last() {
            match local.head_instr().and_then(|h| self.instr_def(h)) {
                Some(d) => {
                    out.defs.insert(d.id);
                }
                None => out.undefined = true,
            }
            return;
        }
        match dt.incoming_timeline().map(|t| t.head) {
            Some(TimelineHead::Instr(i)) => match self.instr_def(i) {
                Some(d) => {
                    out.defs.insert(d.id);
                }
                None => out.undefined = true,
            },
            Some(TimelineHead::Param) => {
                out.defs.insert(DefId(0));
            }
            Some(TimelineHead::Uninit) => out.undefined = true,
            Some(TimelineHead::Incoming) => {
                if dt.incoming().is_empty() {
                    out.undefined = true;
                }
                for node in dt.incoming() {
                    if node.timelines.is_empty() {
                        out.undefined = true;
                    }
                    for k in node.timelines.iter() {
                        self.collect_origins(*k, visited, out);
                    }
                }
            }
            None => out.undefined = true,
        }
    }

    /// The single origin def flowing out of `key`, or `None` when the value
    /// is undefined or heterogeneous (the latter only occurs transiently).
    pub fn outgoing_origin(&self, key: DtKey) -> Option<DefId> {
        let (defs, undefined) = self.outgoing_origin_info(key);
        if undefined || defs.len() != 1 {
            None
        } else {
            defs.first().copied()
        }
    }

    /// The distinct origin defs flowing out of `key` plus whether any path
    /// carries an undefined value. Used by the static lowering to resolve
    /// forwarded timelines and phi inputs.
    pub fn outgoing_origin_info(&self, key: DtKey) -> (Vec<DefId>, bool) {
        let mut origins = OriginSet::default();
        let mut visited = LinkSet::new();
        self.collect_origins(key, &mut visited, &mut origins);
        (origins.defs.iter().copied().collect(), origins.undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::OperandSpec;
    use crate::metadata::Opcode;
    use crate::types::{Constant, IrType, ScalarType};

    fn int() -> IrType {
        IrType::Scalar(ScalarType::I32)
    }

    fn c(v: i32) -> OperandSpec {
        OperandSpec::Const(Constant::I32(v))
    }

    #[test]
    fn straight_line_join_points_at_remote_timeline() {
        // entry defines x; an empty block sits between it and the use. The
        // use's incoming node names the adjacent predecessor but points at
        // the remote def-timeline; the pass-through block stays untouched.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();
        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        let mid = f.emplace_back_block(body).unwrap();
        let last = f.emplace_back_block(body).unwrap();
        f.append_with_def(last, Opcode::Add, z, &[OperandSpec::Var(x), c(2)])
            .unwrap();

        assert!(f.block(mid).dt(x).is_none(), "pass-through gets no timeline");

        let dt = f.block(last).dt(x).expect("incoming dt materialised");
        assert!(dt.has_incoming_timeline());
        assert_eq!(dt.incoming().len(), 1);
        assert_eq!(dt.incoming()[0].pred, mid);
        assert!(dt.incoming()[0].timelines.contains(&DtKey::new(entry, x)));
        assert_eq!(
            dt.incoming_timeline().unwrap().head,
            TimelineHead::Incoming,
            "homogeneous join must not materialise a phi"
        );
        assert!(f.block(last).phi_instructions().is_empty());

        // bidirectional: the entry dt lists the successor
        let entry_dt = f.block(entry).dt(x).unwrap();
        assert!(entry_dt.succs().contains(&DtKey::new(last, x)));
    }

    #[test]
    fn heterogeneous_fork_join_creates_phi() {
        // out = false; if (cond) out = true; use out afterwards
        let mut f = Function::new("f", ("out", IrType::Scalar(ScalarType::Bool)), &[]);
        let body = f.body();
        let entry = f.entry();
        let out = f.ret_var();
        let cv = f.anonymous_variable();

        f.append_with_def(entry, Opcode::Assign, out, &[OperandSpec::Const(Constant::Bool(false))])
            .unwrap();
        let fork = f.emplace_back_fork(body, cv).unwrap();
        let cond = match f.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        f.append_with_def(cond, Opcode::Eq, cv, &[c(1), c(1)]).unwrap();
        let t = f.fork_add_case_block(fork).unwrap();
        let e = f.fork_add_case_block(fork).unwrap();
        f.append_with_def(t, Opcode::Assign, out, &[OperandSpec::Const(Constant::Bool(true))])
            .unwrap();
        let after = f.emplace_back_block(body).unwrap();

        let tl = f.reaching_timeline_at_end(after, out).unwrap();
        let dt = f.block(after).dt(out).unwrap();
        assert_eq!(dt.incoming_timeline().unwrap().id, tl);
        assert_eq!(dt.incoming().len(), 2, "one node per predecessor");
        let preds: Vec<_> = dt.incoming().iter().map(|n| n.pred).collect();
        assert!(preds.contains(&t));
        assert!(preds.contains(&e));
        // the empty case forwards the def from before the fork
        assert!(dt
            .find_incoming(e)
            .unwrap()
            .timelines
            .contains(&DtKey::new(entry, out)));
        assert!(
            matches!(dt.incoming_timeline().unwrap().head, TimelineHead::Instr(_)),
            "heterogeneous join must materialise a phi"
        );
        assert_eq!(f.block(after).phi_instructions().len(), 1);
    }

    #[test]
    fn homogeneous_fork_join_forwards() {
        // x defined before the fork, untouched in both cases: no phi after.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let cv = f.anonymous_variable();
        let x = f.create_variable("x", Some(int())).unwrap();

        f.append_with_def(entry, Opcode::Assign, x, &[c(5)]).unwrap();
        let fork = f.emplace_back_fork(body, cv).unwrap();
        let cond = match f.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        f.append_with_def(cond, Opcode::Eq, cv, &[c(0), c(0)]).unwrap();
        f.fork_add_case_block(fork).unwrap();
        f.fork_add_case_block(fork).unwrap();
        let after = f.emplace_back_block(body).unwrap();
        f.append_with_def(after, Opcode::Add, z, &[OperandSpec::Var(x), c(1)])
            .unwrap();

        let dt = f.block(after).dt(x).unwrap();
        assert_eq!(dt.incoming().len(), 2);
        for node in dt.incoming() {
            assert!(node.timelines.contains(&DtKey::new(entry, x)));
        }
        assert_eq!(dt.incoming_timeline().unwrap().head, TimelineHead::Incoming);
        assert!(f.block(after).phi_instructions().is_empty());
    }

    #[test]
    fn fork_merge_point_joins_before_a_later_use() {
        // x defined in both cases; the use sits two blocks after the fork.
        // The phi belongs at the merge point, and the later use forwards it.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let z = f.ret_var();
        let cv = f.anonymous_variable();
        let x = f.create_variable("x", Some(int())).unwrap();

        let fork = f.emplace_back_fork(body, cv).unwrap();
        let cond = match f.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        f.append_with_def(cond, Opcode::Eq, cv, &[c(0), c(0)]).unwrap();
        let t = f.fork_add_case_block(fork).unwrap();
        let e = f.fork_add_case_block(fork).unwrap();
        f.append_with_def(t, Opcode::Assign, x, &[c(1)]).unwrap();
        f.append_with_def(e, Opcode::Assign, x, &[c(2)]).unwrap();
        let merge = f.emplace_back_block(body).unwrap();
        let last = f.emplace_back_block(body).unwrap();
        f.append_with_def(last, Opcode::Assign, z, &[OperandSpec::Var(x)])
            .unwrap();

        // the phi materialised at the merge point, not at the use block
        let merge_dt = f.block(merge).dt(x).expect("merge joined");
        assert!(matches!(
            merge_dt.incoming_timeline().unwrap().head,
            TimelineHead::Instr(_)
        ));
        assert_eq!(f.block(merge).phi_instructions().len(), 1);

        let last_dt = f.block(last).dt(x).unwrap();
        assert_eq!(last_dt.incoming().len(), 1);
        assert!(last_dt.incoming()[0]
            .timelines
            .contains(&DtKey::new(merge, x)));
        assert!(f.block(last).phi_instructions().is_empty());
    }

    #[test]
    fn loop_body_use_creates_condition_phi() {
        // x = 1; loop { x = x + 2 }: the use of x in the body resolves
        // through the condition block; installing the body def afterwards
        // retargets the update edge and promotes the join to a phi.
        let mut f = Function::new("f", ("x", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let x = f.ret_var();
        let cv = f.anonymous_variable();

        f.append_with_def(entry, Opcode::Assign, x, &[c(1)]).unwrap();
        let lp_id = f.emplace_back_loop(body, cv).unwrap();
        let (start, cond, lbody, update) = match f.component(lp_id) {
            Component::Loop(lp) => (lp.start, lp.condition, lp.body, lp.update),
            _ => unreachable!(),
        };
        let start_b = f.entry_block(start);
        let body_b = f.entry_block(lbody);
        f.append_with_def(body_b, Opcode::Add, x, &[OperandSpec::Var(x), c(2)])
            .unwrap();

        let dt = f.block(cond).dt(x).expect("condition dt materialised");
        assert!(
            matches!(dt.incoming_timeline().unwrap().head, TimelineHead::Instr(_)),
            "loop-carried variable needs a phi at the condition"
        );
        assert_eq!(f.block(cond).phi_instructions().len(), 1);
        let preds: Vec<_> = dt.incoming().iter().map(|n| n.pred).collect();
        assert!(preds.contains(&start_b), "start edge joined");
        assert!(preds.contains(&update), "update edge joined");
        assert!(
            dt.find_incoming(update)
                .unwrap()
                .timelines
                .contains(&DtKey::new(body_b, x)),
            "update edge retargeted at the body def"
        );
    }

    #[test]
    fn loop_invariant_variable_gets_no_phi() {
        // y defined before the loop and only read inside it: the condition
        // join is homogeneous, so no phi is created.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let entry = f.entry();
        let z = f.ret_var();
        let cv = f.anonymous_variable();
        let y = f.create_variable("y", Some(int())).unwrap();

        f.append_with_def(entry, Opcode::Assign, y, &[c(7)]).unwrap();
        let lp_id = f.emplace_back_loop(body, cv).unwrap();
        let (cond, lbody) = match f.component(lp_id) {
            Component::Loop(lp) => (lp.condition, lp.body),
            _ => unreachable!(),
        };
        let body_b = f.entry_block(lbody);
        f.append_with_def(body_b, Opcode::Add, z, &[OperandSpec::Var(y), c(1)])
            .unwrap();

        let dt = f.block(cond).dt(y).expect("condition joined");
        assert_eq!(
            dt.incoming_timeline().map(|t| t.head),
            Some(TimelineHead::Incoming)
        );
        assert!(f.block(cond).phi_instructions().is_empty());
    }

    #[test]
    fn parameter_use_resolves_to_param_timeline() {
        let mut f = Function::new("f", ("z", int()), &[("a", int())]);
        let entry = f.entry();
        let z = f.ret_var();
        let a = f.params()[0];
        f.append_with_def(entry, Opcode::Add, z, &[OperandSpec::Var(a), c(1)])
            .unwrap();

        let dt = f.block(entry).dt(a).unwrap();
        assert_eq!(dt.incoming_timeline().unwrap().head, TimelineHead::Param);
        assert_eq!(dt.incoming_timeline().unwrap().uses().len(), 1);
    }

    #[test]
    fn uninitialised_use_leaves_orphaned_timeline() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let entry = f.entry();
        let z = f.ret_var();
        let x = f.create_variable("x", Some(int())).unwrap();
        f.append_with_def(entry, Opcode::Assign, z, &[OperandSpec::Var(x)])
            .unwrap();

        let dt = f.block(entry).dt(x).unwrap();
        assert_eq!(dt.incoming_timeline().unwrap().head, TimelineHead::Uninit);
        assert!(!dt.has_incoming(), "orphan timeline has no incoming node");
    }

    #[test]
    fn undefined_edge_forces_phi() {
        // x defined only in one fork case; using it after the fork joins a
        // defined edge with an undefined one, which must produce a phi.
        let mut f = Function::new("f", ("z", int()), &[]);
        let body = f.body();
        let z = f.ret_var();
        let cv = f.anonymous_variable();
        let x = f.create_variable("x", Some(int())).unwrap();

        let fork = f.emplace_back_fork(body, cv).unwrap();
        let cond = match f.component(fork) {
            Component::Fork(fk) => fk.condition,
            _ => unreachable!(),
        };
        f.append_with_def(cond, Opcode::Eq, cv, &[c(0), c(0)]).unwrap();
        let t = f.fork_add_case_block(fork).unwrap();
        let e = f.fork_add_case_block(fork).unwrap();
        f.append_with_def(t, Opcode::Assign, x, &[c(1)]).unwrap();
        let after = f.emplace_back_block(body).unwrap();
        f.append_with_def(after, Opcode::Assign, z, &[OperandSpec::Var(x)])
            .unwrap();

        let dt = f.block(after).dt(x).unwrap();
        assert!(matches!(
            dt.incoming_timeline().unwrap().head,
            TimelineHead::Instr(_)
        ));
        assert_eq!(
            dt.find_incoming(e).map(|n| n.timelines.len()),
            Some(0),
            "the empty case contributes an undefined edge"
        );
    }
}
