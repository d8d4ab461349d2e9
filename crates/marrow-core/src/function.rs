//! The function: root of the component tree and owner of all IR state.
//!
//! A function owns the component arena, the variables (return slot first,
//! then parameters, then locals), and the id counters for instructions,
//! timelines and defs. The body is a single root sequence created with one
//! entry block.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::component::Component;
use crate::error::CoreError;
use crate::id::{BlockId, CompId, DefId, InstrId, TimelineId, VarId};
use crate::instruction::{Def, Instruction};
use crate::types::IrType;

/// A variable owned by the function.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    /// Declared or inferred IR type, when known.
    pub ty: Option<IrType>,
    /// Count of numbered defs issued so far.
    pub num_defs: u32,
    /// Parameters carry an implicit def 0 at function entry.
    pub is_param: bool,
}

/// The root of the structured CFG.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    pub(crate) slots: Vec<crate::component::Slot>,
    body: CompId,
    vars: Vec<Variable>,
    var_names: IndexMap<String, VarId>,
    ret: VarId,
    params: Vec<VarId>,
    anon: Option<VarId>,
    /// Which block currently holds each instruction.
    pub(crate) instr_blocks: HashMap<InstrId, BlockId>,
    next_instr: u32,
    next_timeline: u32,
}

impl Function {
    /// Creates a function with a return slot, parameters, and a one-block
    /// body sequence.
    pub fn new(name: &str, ret: (&str, IrType), params: &[(&str, IrType)]) -> Function {
        let mut f = Function {
            name: name.to_string(),
            slots: Vec::new(),
            body: CompId(0),
            vars: Vec::new(),
            var_names: IndexMap::new(),
            ret: VarId(0),
            params: Vec::new(),
            anon: None,
            instr_blocks: HashMap::new(),
            next_instr: 0,
            next_timeline: 0,
        };
        f.body = f.alloc_sequence(None);

        f.ret = f
            .create_variable(ret.0, Some(ret.1))
            .expect("return variable name is fresh");
        for (pname, pty) in params {
            let v = f
                .create_variable(pname, Some(*pty))
                .expect("parameter names are fresh");
            f.vars[v.0 as usize].is_param = true;
            f.vars[v.0 as usize].num_defs = 1; // implicit def 0
            f.params.push(v);
        }
        f
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root body sequence.
    pub fn body(&self) -> CompId {
        self.body
    }

    /// The function's entry block.
    pub fn entry(&self) -> BlockId {
        self.entry_block(self.body)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    pub fn variable(&self, v: VarId) -> &Variable {
        &self.vars[v.0 as usize]
    }

    pub(crate) fn variable_mut(&mut self, v: VarId) -> &mut Variable {
        &mut self.vars[v.0 as usize]
    }

    pub fn num_variables(&self) -> usize {
        self.vars.len()
    }

    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    /// Looks a variable up by name.
    pub fn find_variable(&self, name: &str) -> Option<VarId> {
        self.var_names.get(name).copied()
    }

    /// Creates a named variable.
    pub fn create_variable(&mut self, name: &str, ty: Option<IrType>) -> Result<VarId, CoreError> {
        if self.var_names.contains_key(name) {
            return Err(CoreError::DuplicateVariable {
                name: name.to_string(),
            });
        }
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable {
            name: name.to_string(),
            ty,
            num_defs: 0,
            is_param: false,
        });
        self.var_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// The return slot variable.
    pub fn ret_var(&self) -> VarId {
        self.ret
    }

    pub fn params(&self) -> &[VarId] {
        &self.params
    }

    /// The shared anonymous variable used by condition blocks. Created on
    /// first request with type `bool` unless changed afterwards.
    pub fn anonymous_variable(&mut self) -> VarId {
        if let Some(v) = self.anon {
            return v;
        }
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable {
            name: String::new(),
            ty: Some(IrType::Scalar(crate::types::ScalarType::Bool)),
            num_defs: 0,
            is_param: false,
        });
        self.anon = Some(id);
        id
    }

    pub fn set_anonymous_variable_type(&mut self, ty: IrType) {
        let v = self.anonymous_variable();
        self.vars[v.0 as usize].ty = Some(ty);
    }

    // -----------------------------------------------------------------------
    // Id allocation
    // -----------------------------------------------------------------------

    pub(crate) fn alloc_instr_id(&mut self) -> InstrId {
        let id = InstrId(self.next_instr);
        self.next_instr += 1;
        id
    }

    pub(crate) fn alloc_timeline_id(&mut self) -> TimelineId {
        let id = TimelineId(self.next_timeline);
        self.next_timeline += 1;
        id
    }

    pub(crate) fn alloc_def(&mut self, var: VarId, ty: Option<IrType>) -> Def {
        let n = self.vars[var.0 as usize].num_defs;
        self.vars[var.0 as usize].num_defs = n + 1;
        Def {
            var,
            id: DefId(n),
            ty,
        }
    }

    // -----------------------------------------------------------------------
    // Instruction lookup
    // -----------------------------------------------------------------------

    /// The block currently holding `instr`.
    pub fn instr_block(&self, instr: InstrId) -> Option<BlockId> {
        self.instr_blocks.get(&instr).copied()
    }

    /// Looks an instruction up anywhere in the function.
    pub fn instruction(&self, instr: InstrId) -> Option<&Instruction> {
        let block = self.instr_block(instr)?;
        self.block(block).instruction(instr)
    }

    /// The def produced by `instr`, if any.
    pub fn instr_def(&self, instr: InstrId) -> Option<Def> {
        self.instruction(instr).and_then(|i| i.def)
    }

    /// Total number of blocks in the function.
    pub fn num_blocks(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.component, Component::Block(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn int() -> IrType {
        IrType::Scalar(ScalarType::I32)
    }

    #[test]
    fn new_function_layout() {
        let f = Function::new("f", ("z", int()), &[("x", int()), ("y", int())]);
        assert_eq!(f.name(), "f");
        assert_eq!(f.ret_var(), VarId(0));
        assert_eq!(f.params(), &[VarId(1), VarId(2)]);
        assert_eq!(f.variable(f.ret_var()).name, "z");
        assert!(!f.variable(f.ret_var()).is_param);
        assert!(f.variable(VarId(1)).is_param);
        assert_eq!(f.variable(VarId(1)).num_defs, 1);
        assert_eq!(f.num_blocks(), 1);
    }

    #[test]
    fn duplicate_variable_rejected() {
        let mut f = Function::new("f", ("z", int()), &[]);
        assert!(f.create_variable("z", None).is_err());
        let x = f.create_variable("x", None).unwrap();
        assert_eq!(f.find_variable("x"), Some(x));
    }

    #[test]
    fn anonymous_variable_is_shared() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let a = f.anonymous_variable();
        let b = f.anonymous_variable();
        assert_eq!(a, b);
        assert_eq!(
            f.variable(a).ty,
            Some(IrType::Scalar(ScalarType::Bool))
        );
        f.set_anonymous_variable_type(int());
        assert_eq!(f.variable(a).ty, Some(int()));
    }

    #[test]
    fn def_ids_are_monotone_per_variable() {
        let mut f = Function::new("f", ("z", int()), &[]);
        let z = f.ret_var();
        let d0 = f.alloc_def(z, None);
        let d1 = f.alloc_def(z, None);
        assert_eq!(d0.id, DefId(0));
        assert_eq!(d1.id, DefId(1));
        assert_eq!(f.variable(z).num_defs, 2);
    }
}
