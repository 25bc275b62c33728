//! Three-address IR: opcodes, typed operands, basic blocks and per-function
//! control-flow graphs.
//!
//! Instructions are emitted with symbol *names*; the names are resolved into
//! typed [`Operand`]s against the current scope at emission time, because the
//! scope that declared a temporary may be gone by the time the backends run.
//! Arithmetic, bitwise and the element-indexed update opcodes share the
//! [`AluOp`] function sub-enum, and the six comparisons share [`CmpOp`], so
//! every backend lowers the whole family in one match arm group.

use std::iter;

use crate::globals::Globals;
use crate::rodata::RoData;
use crate::symbols::{ScopeArena, ScopeId, StorageClass};
use crate::types::VarType;

pub type BlockId = usize;

/// Function selector for arithmetic and bitwise opcodes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
}

/// Function selector for the comparison opcodes; the result is always 0 or 1.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// The instruction set. Operand interpretation is opcode-specific:
///
/// | opcode | operands |
/// |---|---|
/// | `LdConst` | dest, immediate |
/// | `Copy` | dest, src |
/// | `Alu(f)` | dest, lhs, rhs |
/// | `Cmp(f)` | dest, lhs, rhs |
/// | `LogAnd`/`LogOr` | dest, lhs, rhs (short-circuit emulation) |
/// | `Not` | dest, src |
/// | `Neg` | dest, src[, sign-mask label when float] |
/// | `Incr`/`Decr` | var[, literal 1.0 when float] |
/// | `RMem` | dest, address |
/// | `WMem` | address, value |
/// | `StoreIdx` | array base, value, index |
/// | `AluIdx(f)` | array base, value, index (op-store on one element) |
/// | `LoadIdx` | dest, array base, index |
/// | `IntToFloat`/`FloatToInt` | dest, src |
/// | `Call` | label, dest, args... |
/// | `Jmp` | label |
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    LdConst,
    Copy,
    Alu(AluOp),
    Cmp(CmpOp),
    LogAnd,
    LogOr,
    Not,
    Neg,
    Incr,
    Decr,
    RMem,
    WMem,
    StoreIdx,
    AluIdx(AluOp),
    LoadIdx,
    IntToFloat,
    FloatToInt,
    Call,
    Jmp,
}

/// A resolved operand. Backends render these into target syntax; the
/// builders never smuggle target syntax through the IR.
#[derive(Clone, PartialEq, Debug)]
pub enum Operand {
    /// Integer or character immediate, by value text.
    Imm { text: String, ty: VarType },
    /// A frame slot, `offset` bytes below the frame pointer.
    Stack { offset: i32, ty: VarType },
    /// A global variable, addressed by label.
    Global { name: String, ty: VarType },
    /// An interned read-only datum (float literal or the sign-mask vector).
    Ro { label: String },
    /// A code label: jump or call target.
    Label { name: String },
}

impl Operand {
    /// The typed replacement for the old `$`/`#` prefix sniffing: only plain
    /// immediates fold into `ldconst`.
    pub fn is_immediate(&self) -> bool {
        match self {
            Operand::Imm { .. } => true,
            _ => false,
        }
    }

    pub fn ty(&self) -> VarType {
        match self {
            Operand::Imm { ty, .. } | Operand::Stack { ty, .. } | Operand::Global { ty, .. } => *ty,
            Operand::Ro { .. } => VarType::Float,
            Operand::Label { .. } => VarType::Void,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Instr {
    pub op: Op,
    pub ty: VarType,
    pub operands: Vec<Operand>,
}

/// Straight-line run of instructions with explicit successors.
///
/// A block with a `test_var` branches two ways; a block with only
/// `exit_true` jumps unconditionally; the block with neither successor is
/// the function's epilogue.
#[derive(Debug)]
pub struct BasicBlock {
    pub label: String,
    pub instrs: Vec<Instr>,
    pub exit_true: Option<BlockId>,
    pub exit_false: Option<BlockId>,
    pub test_var: Option<Operand>,
}

impl BasicBlock {
    fn new(label: String) -> BasicBlock {
        BasicBlock {
            label,
            instrs: Vec::new(),
            exit_true: None,
            exit_false: None,
            test_var: None,
        }
    }
}

/// A function signature as the middle-end sees it.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub ret: VarType,
    pub params: Vec<(String, VarType)>,
}

/// The per-compilation state shared by every pass: the scope arena, both
/// data managers and the monotonic block counter. Threading this one value
/// through the passes keeps the compiler free of hidden process state.
pub struct Context {
    pub scopes: ScopeArena,
    pub rodata: RoData,
    pub globals: Globals,
    pub global_scope: ScopeId,
    next_block: u32,
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Context {
        let mut scopes = ScopeArena::new();
        let global_scope = scopes.push(None);
        Context {
            scopes,
            rodata: RoData::new(),
            globals: Globals::new(),
            global_scope,
            next_block: 0,
        }
    }

    fn new_block_label(&mut self) -> String {
        let label = format!(".BB{}", self.next_block);
        self.next_block += 1;
        label
    }

    /// Resolves a symbol name against `scope` into a typed operand.
    ///
    /// Constants become immediates (floats are interned into the read-only
    /// pool instead, since no target takes a float immediate), globals become
    /// label references, everything else becomes a frame slot. Failing to
    /// resolve here is a compiler bug: the analyzer has already accepted the
    /// program.
    pub fn resolve(&mut self, scope: ScopeId, name: &str) -> Operand {
        let symbol = match self.scopes.find_visible(scope, name) {
            Some(symbol) => symbol,
            None => panic!("symbol '{}' not found during IR emission", name),
        };
        if let Some(value) = &symbol.value {
            if symbol.ty == VarType::Float {
                let parsed = match value.parse::<f32>() {
                    Ok(parsed) => parsed,
                    Err(_) => panic!("malformed float constant '{}'", value),
                };
                return Operand::Ro {
                    label: self.rodata.intern(parsed),
                };
            }
            return Operand::Imm {
                text: value.clone(),
                ty: symbol.ty,
            };
        }
        match symbol.storage {
            StorageClass::Global => Operand::Global {
                name: name.to_string(),
                ty: symbol.ty,
            },
            _ => Operand::Stack {
                offset: symbol.offset,
                ty: symbol.ty,
            },
        }
    }

    /// Type of the nearest visible symbol called `name`.
    pub fn type_of(&self, scope: ScopeId, name: &str) -> VarType {
        match self.scopes.find_visible(scope, name) {
            Some(symbol) => symbol.ty,
            None => panic!("symbol '{}' not found during IR emission", name),
        }
    }
}

/// Control-flow graph of one function. Blocks are stored in creation order;
/// [`Cfg::layout`] yields them in emission order, entry first and the
/// epilogue block last.
pub struct Cfg {
    pub func: Function,
    pub blocks: Vec<BasicBlock>,
    pub current: BlockId,
    pub root_scope: ScopeId,
    pub epilogue: BlockId,
}

impl Cfg {
    pub fn new(func: Function, root_scope: ScopeId) -> Cfg {
        let entry = BasicBlock::new(func.name.clone());
        let epilogue = BasicBlock::new(format!(".Lepilogue_{}", func.name));
        Cfg {
            func,
            blocks: vec![entry, epilogue],
            current: 0,
            root_scope,
            epilogue: 1,
        }
    }

    pub fn epilogue_label(&self) -> &str {
        &self.blocks[self.epilogue].label
    }

    pub fn new_block(&mut self, ctx: &mut Context) -> BlockId {
        let label = ctx.new_block_label();
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    /// Appends an instruction to the current block. A `copy` whose source
    /// turns out to be an immediate is rewritten to `ldconst` on the fly.
    pub fn add_instr(&mut self, op: Op, ty: VarType, operands: Vec<Operand>) {
        let op = match op {
            Op::Copy if operands.len() >= 2 && operands[1].is_immediate() => Op::LdConst,
            other => other,
        };
        self.blocks[self.current].instrs.push(Instr { op, ty, operands });
    }

    pub fn current_mut(&mut self) -> &mut BasicBlock {
        let id = self.current;
        &mut self.blocks[id]
    }

    /// Emission order: entry block, then the interior blocks, epilogue last.
    pub fn layout(&self) -> impl Iterator<Item = BlockId> + '_ {
        let epilogue = self.epilogue;
        (0..self.blocks.len())
            .filter(move |id| *id != epilogue)
            .chain(iter::once(epilogue))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn context_with_local(name: &str, ty: VarType) -> (Context, ScopeId) {
        let mut ctx = Context::new();
        let scope = ctx.scopes.push(Some(ctx.global_scope));
        ctx.scopes.add_local(scope, name, ty, 1).unwrap();
        (ctx, scope)
    }

    #[test]
    fn copy_of_immediate_becomes_ldconst() {
        let (mut ctx, scope) = context_with_local("a", VarType::Int);
        let konst = ctx.scopes.add_temp_const(scope, VarType::Int, "7".to_string());

        let mut cfg = Cfg::new(
            Function {
                name: "main".to_string(),
                ret: VarType::Int,
                params: Vec::new(),
            },
            scope,
        );
        let dest = ctx.resolve(scope, "a");
        let src = ctx.resolve(scope, &konst);
        cfg.add_instr(Op::Copy, VarType::Int, vec![dest, src]);

        assert_eq!(cfg.blocks[0].instrs[0].op, Op::LdConst);
    }

    #[test]
    fn copy_of_slot_stays_copy() {
        let (mut ctx, scope) = context_with_local("a", VarType::Int);
        ctx.scopes.add_local(scope, "b", VarType::Int, 1).unwrap();

        let mut cfg = Cfg::new(
            Function {
                name: "main".to_string(),
                ret: VarType::Int,
                params: Vec::new(),
            },
            scope,
        );
        let dest = ctx.resolve(scope, "a");
        let src = ctx.resolve(scope, "b");
        cfg.add_instr(Op::Copy, VarType::Int, vec![dest, src]);

        assert_eq!(cfg.blocks[0].instrs[0].op, Op::Copy);
    }

    #[test]
    fn float_constants_resolve_into_the_readonly_pool() {
        let (mut ctx, scope) = context_with_local("f", VarType::Float);
        let konst = ctx
            .scopes
            .add_temp_const(scope, VarType::Float, "1.5".to_string());

        match ctx.resolve(scope, &konst) {
            Operand::Ro { label } => assert_eq!(label, ".LFD0"),
            other => panic!("expected rodata operand, got {:?}", other),
        }
        assert!(!ctx.resolve(scope, &konst).is_immediate());
    }

    #[test]
    fn globals_resolve_to_labels() {
        let mut ctx = Context::new();
        let global_scope = ctx.global_scope;
        ctx.scopes
            .add_global(global_scope, "g", VarType::Int)
            .unwrap();
        let scope = ctx.scopes.push(Some(global_scope));

        match ctx.resolve(scope, "g") {
            Operand::Global { name, ty } => {
                assert_eq!(name, "g");
                assert_eq!(ty, VarType::Int);
            }
            other => panic!("expected global operand, got {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "not found during IR emission")]
    fn unresolved_names_are_a_bug() {
        let (mut ctx, scope) = context_with_local("a", VarType::Int);
        ctx.resolve(scope, "ghost");
    }

    #[test]
    fn block_labels_are_globally_monotonic() {
        let mut ctx = Context::new();
        let scope = ctx.scopes.push(Some(ctx.global_scope));
        let func = |name: &str| Function {
            name: name.to_string(),
            ret: VarType::Int,
            params: Vec::new(),
        };

        let mut first = Cfg::new(func("f"), scope);
        let mut second = Cfg::new(func("g"), scope);
        first.new_block(&mut ctx);
        second.new_block(&mut ctx);
        first.new_block(&mut ctx);

        assert_eq!(first.blocks[2].label, ".BB0");
        assert_eq!(second.blocks[2].label, ".BB1");
        assert_eq!(first.blocks[3].label, ".BB2");
    }

    #[test]
    fn layout_puts_the_epilogue_last() {
        let mut ctx = Context::new();
        let scope = ctx.scopes.push(Some(ctx.global_scope));
        let mut cfg = Cfg::new(
            Function {
                name: "f".to_string(),
                ret: VarType::Void,
                params: Vec::new(),
            },
            scope,
        );
        cfg.new_block(&mut ctx);
        cfg.new_block(&mut ctx);

        let order: Vec<BlockId> = cfg.layout().collect();
        assert_eq!(order, vec![0, 2, 3, 1]);
        assert_eq!(cfg.epilogue_label(), ".Lepilogue_f");
    }
}
