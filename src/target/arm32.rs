//! ARM32 (AAPCS) lowering, integers only: the source never targeted a VFP
//! unit, so float-tagged instructions lower to an `@ unsupported` comment.
//! Division goes through the `__aeabi_idiv` runtime helper.

use std::io::{self, Write};

use crate::ir::{AluOp, Cfg, CmpOp, Context, Instr, Op, Operand};
use crate::symbols::ScopeArena;
use crate::target::{frame_size, LabelAlloc, TargetIsa, RETVAL};
use crate::types::VarType;

const INT_ARGS: [&str; 4] = ["r0", "r1", "r2", "r3"];

pub struct Arm32;

impl Arm32 {
    fn load(&self, w: &mut dyn Write, op: &Operand, reg: &str) -> io::Result<()> {
        match op {
            Operand::Imm { text, .. } => writeln!(w, "    mov {}, #{}", reg, text),
            Operand::Stack { offset, .. } => writeln!(w, "    ldr {}, [fp, #-{}]", reg, offset),
            Operand::Global { name, .. } => {
                writeln!(w, "    ldr {}, =_{}", reg, name)?;
                writeln!(w, "    ldr {}, [{}]", reg, reg)
            }
            Operand::Ro { .. } => writeln!(w, "    @ unsupported float operation"),
            Operand::Label { name } => panic!("cannot load label '{}' as a value", name),
        }
    }

    fn store(&self, w: &mut dyn Write, reg: &str, op: &Operand) -> io::Result<()> {
        match op {
            Operand::Stack { offset, .. } => writeln!(w, "    str {}, [fp, #-{}]", reg, offset),
            Operand::Global { name, .. } => {
                writeln!(w, "    ldr r12, =_{}", name)?;
                writeln!(w, "    str {}, [r12]", reg)
            }
            other => panic!("cannot store into operand {:?}", other),
        }
    }

    /// Leaves the address of element `index` of the array `base_offset`
    /// bytes below the frame pointer in `r3`.
    fn element_address(&self, w: &mut dyn Write, base_offset: i32, index: &Operand) -> io::Result<()> {
        self.load(w, index, "r1")?;
        writeln!(w, "    lsl r2, r1, #2")?;
        writeln!(w, "    sub r3, fp, #{}", base_offset)?;
        writeln!(w, "    add r3, r3, r2")
    }

    fn stack_offset(&self, op: &Operand) -> i32 {
        match op {
            Operand::Stack { offset, .. } => *offset,
            other => panic!("array base must be a frame slot, got {:?}", other),
        }
    }

    fn unsupported(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "    @ unsupported float operation")
    }

    /// `mov<cond>`/`mov<inverse>` pair writing the boolean for `cmp`.
    fn cmp_movs(&self, cmp: CmpOp) -> (&'static str, &'static str) {
        match cmp {
            CmpOp::Eq => ("moveq", "movne"),
            CmpOp::Ne => ("movne", "moveq"),
            CmpOp::Lt => ("movlt", "movge"),
            CmpOp::Le => ("movle", "movgt"),
            CmpOp::Gt => ("movgt", "movle"),
            CmpOp::Ge => ("movge", "movlt"),
        }
    }
}

impl TargetIsa for Arm32 {
    fn name(&self) -> &'static str {
        "arm32"
    }

    fn mangle(&self, name: &str) -> String {
        format!("_{}", name)
    }

    fn frame_align(&self) -> i32 {
        8
    }

    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Imm { text, .. } => format!("#{}", text),
            Operand::Stack { offset, .. } => format!("[fp, #-{}]", offset),
            Operand::Global { name, .. } => format!("_{}", name),
            Operand::Ro { label } => label.clone(),
            Operand::Label { name } => name.clone(),
        }
    }

    fn prologue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        writeln!(w, "    push {{fp, lr}}")?;
        writeln!(w, "    mov fp, sp")?;
        writeln!(w, "    sub sp, sp, #{}", frame_size(cfg, scopes, self.frame_align()))?;

        for (index, (name, _)) in cfg.func.params.iter().enumerate() {
            let offset = match scopes.find_visible(cfg.root_scope, name) {
                Some(symbol) => symbol.offset,
                None => panic!("parameter '{}' has no slot", name),
            };
            writeln!(w, "    str {}, [fp, #-{}]", INT_ARGS[index], offset)?;
        }
        Ok(())
    }

    fn epilogue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        if cfg.func.ret != VarType::Void {
            if let Some(symbol) = scopes.find_visible(cfg.root_scope, RETVAL) {
                writeln!(w, "    ldr r0, [fp, #-{}]", symbol.offset)?;
            }
        }
        writeln!(w, "    mov sp, fp")?;
        writeln!(w, "    pop {{fp, pc}}")
    }

    fn instr(&self, w: &mut dyn Write, instr: &Instr, labels: &mut LabelAlloc) -> io::Result<()> {
        let ops = &instr.operands;
        if instr.ty.is_float() {
            return self.unsupported(w);
        }
        match instr.op {
            Op::LdConst | Op::Copy => {
                self.load(w, &ops[1], "r3")?;
                self.store(w, "r3", &ops[0])
            }
            Op::Alu(alu) => {
                self.load(w, &ops[1], "r0")?;
                self.load(w, &ops[2], "r1")?;
                match alu {
                    AluOp::Add => writeln!(w, "    add r0, r0, r1")?,
                    AluOp::Sub => writeln!(w, "    sub r0, r0, r1")?,
                    AluOp::Mul => writeln!(w, "    mul r0, r0, r1")?,
                    AluOp::Div => writeln!(w, "    bl __aeabi_idiv")?,
                    AluOp::Mod => {
                        writeln!(w, "    bl __aeabi_idiv")?;
                        writeln!(w, "    mov r2, r0")?;
                        self.load(w, &ops[2], "r1")?;
                        writeln!(w, "    mul r2, r2, r1")?;
                        self.load(w, &ops[1], "r0")?;
                        writeln!(w, "    sub r0, r0, r2")?;
                    }
                    AluOp::And => writeln!(w, "    and r0, r0, r1")?,
                    AluOp::Or => writeln!(w, "    orr r0, r0, r1")?,
                    AluOp::Xor => writeln!(w, "    eor r0, r0, r1")?,
                }
                self.store(w, "r0", &ops[0])
            }
            Op::Cmp(cmp) => {
                let (on_true, on_false) = self.cmp_movs(cmp);
                self.load(w, &ops[1], "r0")?;
                self.load(w, &ops[2], "r1")?;
                writeln!(w, "    cmp r0, r1")?;
                writeln!(w, "    {} r0, #1", on_true)?;
                writeln!(w, "    {} r0, #0", on_false)?;
                self.store(w, "r0", &ops[0])
            }
            Op::LogAnd => {
                let (label_false, label_end) = labels.pair("false", "end");
                self.load(w, &ops[1], "r0")?;
                writeln!(w, "    cmp r0, #0")?;
                writeln!(w, "    beq {}", label_false)?;
                self.load(w, &ops[2], "r0")?;
                writeln!(w, "    cmp r0, #0")?;
                writeln!(w, "    beq {}", label_false)?;
                writeln!(w, "    mov r0, #1")?;
                writeln!(w, "    b {}", label_end)?;
                writeln!(w, "{}:", label_false)?;
                writeln!(w, "    mov r0, #0")?;
                writeln!(w, "{}:", label_end)?;
                self.store(w, "r0", &ops[0])
            }
            Op::LogOr => {
                let (label_true, label_end) = labels.pair("true", "end");
                self.load(w, &ops[1], "r0")?;
                writeln!(w, "    cmp r0, #0")?;
                writeln!(w, "    bne {}", label_true)?;
                self.load(w, &ops[2], "r0")?;
                writeln!(w, "    cmp r0, #0")?;
                writeln!(w, "    bne {}", label_true)?;
                writeln!(w, "    mov r0, #0")?;
                writeln!(w, "    b {}", label_end)?;
                writeln!(w, "{}:", label_true)?;
                writeln!(w, "    mov r0, #1")?;
                writeln!(w, "{}:", label_end)?;
                self.store(w, "r0", &ops[0])
            }
            Op::Not => {
                self.load(w, &ops[1], "r0")?;
                writeln!(w, "    cmp r0, #0")?;
                writeln!(w, "    moveq r0, #1")?;
                writeln!(w, "    movne r0, #0")?;
                self.store(w, "r0", &ops[0])
            }
            Op::Neg => {
                self.load(w, &ops[1], "r0")?;
                writeln!(w, "    rsb r0, r0, #0")?;
                self.store(w, "r0", &ops[0])
            }
            Op::Incr | Op::Decr => {
                let mnemonic = if instr.op == Op::Incr { "add" } else { "sub" };
                self.load(w, &ops[0], "r0")?;
                writeln!(w, "    {} r0, r0, #1", mnemonic)?;
                self.store(w, "r0", &ops[0])
            }
            Op::RMem => {
                self.load(w, &ops[1], "r1")?;
                writeln!(w, "    ldr r0, [r1]")?;
                self.store(w, "r0", &ops[0])
            }
            Op::WMem => {
                self.load(w, &ops[0], "r1")?;
                self.load(w, &ops[1], "r0")?;
                writeln!(w, "    str r0, [r1]")
            }
            Op::StoreIdx => {
                let base = self.stack_offset(&ops[0]);
                self.element_address(w, base, &ops[2])?;
                self.load(w, &ops[1], "r0")?;
                writeln!(w, "    str r0, [r3]")
            }
            Op::AluIdx(alu) => {
                let base = self.stack_offset(&ops[0]);
                self.element_address(w, base, &ops[2])?;
                match alu {
                    AluOp::Div => {
                        writeln!(w, "    ldr r0, [r3]")?;
                        self.load(w, &ops[1], "r1")?;
                        writeln!(w, "    push {{r3}}")?;
                        writeln!(w, "    bl __aeabi_idiv")?;
                        writeln!(w, "    pop {{r3}}")?;
                        writeln!(w, "    str r0, [r3]")
                    }
                    AluOp::Mod => {
                        writeln!(w, "    ldr r0, [r3]")?;
                        self.load(w, &ops[1], "r1")?;
                        writeln!(w, "    push {{r1, r3}}")?;
                        writeln!(w, "    bl __aeabi_idiv")?;
                        writeln!(w, "    mov r2, r0")?;
                        writeln!(w, "    pop {{r1, r3}}")?;
                        writeln!(w, "    ldr r0, [r3]")?;
                        writeln!(w, "    mul r2, r2, r1")?;
                        writeln!(w, "    sub r0, r0, r2")?;
                        writeln!(w, "    str r0, [r3]")
                    }
                    _ => {
                        writeln!(w, "    ldr r2, [r3]")?;
                        self.load(w, &ops[1], "r0")?;
                        match alu {
                            AluOp::Add => writeln!(w, "    add r2, r2, r0")?,
                            AluOp::Sub => writeln!(w, "    sub r2, r2, r0")?,
                            AluOp::Mul => writeln!(w, "    mul r2, r2, r0")?,
                            AluOp::And => writeln!(w, "    and r2, r2, r0")?,
                            AluOp::Or => writeln!(w, "    orr r2, r2, r0")?,
                            AluOp::Xor => writeln!(w, "    eor r2, r2, r0")?,
                            AluOp::Div | AluOp::Mod => unreachable!(),
                        }
                        writeln!(w, "    str r2, [r3]")
                    }
                }
            }
            Op::LoadIdx => {
                let base = self.stack_offset(&ops[1]);
                self.element_address(w, base, &ops[2])?;
                writeln!(w, "    ldr r0, [r3]")?;
                self.store(w, "r0", &ops[0])
            }
            Op::IntToFloat | Op::FloatToInt => self.unsupported(w),
            Op::Call => {
                for (index, arg) in ops[2..].iter().enumerate() {
                    self.load(w, arg, INT_ARGS[index])?;
                }
                writeln!(w, "    bl {}", self.mangle(&self.operand(&ops[0])))?;
                self.store(w, "r0", &ops[1])
            }
            Op::Jmp => writeln!(w, "    b {}", self.operand(&ops[0])),
        }
    }

    fn branch_if_zero(&self, w: &mut dyn Write, test: &Operand, label: &str) -> io::Result<()> {
        self.load(w, test, "r0")?;
        writeln!(w, "    cmp r0, #0")?;
        writeln!(w, "    beq {}", label)
    }

    fn jump(&self, w: &mut dyn Write, label: &str) -> io::Result<()> {
        writeln!(w, "    b {}", label)
    }

    fn emit_data(&self, w: &mut dyn Write, ctx: &Context) -> io::Result<()> {
        if ctx.globals.is_empty() {
            return Ok(());
        }
        writeln!(w, ".data")?;
        writeln!(w, ".align 2")?;
        for name in ctx.globals.names() {
            writeln!(w, ".global _{}", name)?;
            writeln!(w, "_{}:", name)?;
            match ctx.globals.value(name) {
                None => writeln!(w, "    .space 4")?,
                Some(value) => writeln!(w, "    .word {}", value)?,
            }
        }
        Ok(())
    }

    fn emit_rodata(&self, _w: &mut dyn Write, _ctx: &Context) -> io::Result<()> {
        // No float support, so nothing ever lands in the pool on this target.
        Ok(())
    }
}
