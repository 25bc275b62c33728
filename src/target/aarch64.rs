//! AArch64 (AAPCS64, Mach-O flavor) lowering. The ISA is load/store, so
//! every lowering pulls its operands into `w`/`s` registers first; `w9` is
//! the scratch for moves, `x8` the scratch for global addressing.

use std::io::{self, Write};

use crate::ir::{AluOp, Cfg, CmpOp, Context, Instr, Op, Operand};
use crate::symbols::ScopeArena;
use crate::target::{frame_size, LabelAlloc, TargetIsa, RETVAL};
use crate::types::VarType;

const INT_ARGS: [&str; 8] = ["w0", "w1", "w2", "w3", "w4", "w5", "w6", "w7"];
const FLOAT_ARGS: [&str; 8] = ["s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7"];

pub struct Aarch64;

impl Aarch64 {
    fn load(&self, w: &mut dyn Write, op: &Operand, reg: &str) -> io::Result<()> {
        match op {
            Operand::Imm { text, .. } => writeln!(w, "    mov {}, #{}", reg, text),
            Operand::Stack { offset, .. } => writeln!(w, "    ldr {}, [x29, #-{}]", reg, offset),
            Operand::Global { name, .. } => {
                writeln!(w, "    adrp x8, _{}@PAGE", name)?;
                writeln!(w, "    ldr {}, [x8, _{}@PAGEOFF]", reg, name)
            }
            Operand::Ro { label } => {
                writeln!(w, "    adrp x8, {}@PAGE", label)?;
                writeln!(w, "    ldr {}, [x8, {}@PAGEOFF]", reg, label)
            }
            Operand::Label { name } => panic!("cannot load label '{}' as a value", name),
        }
    }

    fn store(&self, w: &mut dyn Write, reg: &str, op: &Operand) -> io::Result<()> {
        match op {
            Operand::Stack { offset, .. } => writeln!(w, "    str {}, [x29, #-{}]", reg, offset),
            Operand::Global { name, .. } => {
                writeln!(w, "    adrp x8, _{}@PAGE", name)?;
                writeln!(w, "    str {}, [x8, _{}@PAGEOFF]", reg, name)
            }
            other => panic!("cannot store into operand {:?}", other),
        }
    }

    /// Leaves the address of element `index` of the array `base_offset`
    /// bytes below the frame pointer in `x2`.
    fn element_address(&self, w: &mut dyn Write, base_offset: i32, index: &Operand) -> io::Result<()> {
        self.load(w, index, "w1")?;
        writeln!(w, "    lsl w2, w1, #2")?;
        writeln!(w, "    sub x3, x29, #{}", base_offset)?;
        writeln!(w, "    add x2, x3, w2, uxtw")
    }

    fn stack_offset(&self, op: &Operand) -> i32 {
        match op {
            Operand::Stack { offset, .. } => *offset,
            other => panic!("array base must be a frame slot, got {:?}", other),
        }
    }

    fn cmp_cond(&self, cmp: CmpOp, float: bool) -> &'static str {
        match cmp {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => {
                if float {
                    "mi"
                } else {
                    "lt"
                }
            }
            CmpOp::Le => {
                if float {
                    "ls"
                } else {
                    "le"
                }
            }
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

impl TargetIsa for Aarch64 {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn mangle(&self, name: &str) -> String {
        format!("_{}", name)
    }

    fn frame_align(&self) -> i32 {
        16
    }

    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Imm { text, .. } => format!("#{}", text),
            Operand::Stack { offset, .. } => format!("[x29, #-{}]", offset),
            Operand::Global { name, .. } => format!("_{}", name),
            Operand::Ro { label } => label.clone(),
            Operand::Label { name } => name.clone(),
        }
    }

    fn prologue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        writeln!(w, "    stp x29, x30, [sp, #-16]!")?;
        writeln!(w, "    mov x29, sp")?;
        writeln!(w, "    sub sp, sp, #{}", frame_size(cfg, scopes, self.frame_align()))?;

        let mut ints = 0;
        let mut floats = 0;
        for (name, ty) in &cfg.func.params {
            let offset = match scopes.find_visible(cfg.root_scope, name) {
                Some(symbol) => symbol.offset,
                None => panic!("parameter '{}' has no slot", name),
            };
            if ty.is_float() {
                writeln!(w, "    str {}, [x29, #-{}]", FLOAT_ARGS[floats], offset)?;
                floats += 1;
            } else {
                writeln!(w, "    str {}, [x29, #-{}]", INT_ARGS[ints], offset)?;
                ints += 1;
            }
        }
        Ok(())
    }

    fn epilogue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        if cfg.func.ret != VarType::Void {
            if let Some(symbol) = scopes.find_visible(cfg.root_scope, RETVAL) {
                let reg = if cfg.func.ret.is_float() { "s0" } else { "w0" };
                writeln!(w, "    ldr {}, [x29, #-{}]", reg, symbol.offset)?;
            }
        }
        writeln!(w, "    add sp, sp, #{}", frame_size(cfg, scopes, self.frame_align()))?;
        writeln!(w, "    ldp x29, x30, [sp], #16")?;
        writeln!(w, "    ret")
    }

    fn instr(&self, w: &mut dyn Write, instr: &Instr, labels: &mut LabelAlloc) -> io::Result<()> {
        let ops = &instr.operands;
        let ty = instr.ty;
        match instr.op {
            Op::LdConst | Op::Copy => {
                let reg = if ty.is_float() { "s9" } else { "w9" };
                self.load(w, &ops[1], reg)?;
                self.store(w, reg, &ops[0])
            }
            Op::Alu(alu) => {
                if ty.is_float() {
                    let mnemonic = match alu {
                        AluOp::Add => "fadd",
                        AluOp::Sub => "fsub",
                        AluOp::Mul => "fmul",
                        AluOp::Div => "fdiv",
                        other => panic!("no float lowering for {:?}", other),
                    };
                    self.load(w, &ops[1], "s0")?;
                    self.load(w, &ops[2], "s1")?;
                    writeln!(w, "    {} s0, s0, s1", mnemonic)?;
                    return self.store(w, "s0", &ops[0]);
                }
                self.load(w, &ops[1], "w0")?;
                self.load(w, &ops[2], "w1")?;
                match alu {
                    AluOp::Add => writeln!(w, "    add w0, w0, w1")?,
                    AluOp::Sub => writeln!(w, "    sub w0, w0, w1")?,
                    AluOp::Mul => writeln!(w, "    mul w0, w0, w1")?,
                    AluOp::Div => writeln!(w, "    sdiv w0, w0, w1")?,
                    AluOp::Mod => {
                        writeln!(w, "    sdiv w2, w0, w1")?;
                        writeln!(w, "    msub w0, w2, w1, w0")?;
                    }
                    AluOp::And => writeln!(w, "    and w0, w0, w1")?,
                    AluOp::Or => writeln!(w, "    orr w0, w0, w1")?,
                    AluOp::Xor => writeln!(w, "    eor w0, w0, w1")?,
                }
                self.store(w, "w0", &ops[0])
            }
            Op::Cmp(cmp) => {
                if ty.is_float() {
                    self.load(w, &ops[1], "s0")?;
                    self.load(w, &ops[2], "s1")?;
                    writeln!(w, "    fcmp s0, s1")?;
                    writeln!(w, "    cset w0, {}", self.cmp_cond(cmp, true))?;
                    return self.store(w, "w0", &ops[0]);
                }
                self.load(w, &ops[1], "w0")?;
                self.load(w, &ops[2], "w1")?;
                writeln!(w, "    cmp w0, w1")?;
                writeln!(w, "    cset w0, {}", self.cmp_cond(cmp, false))?;
                self.store(w, "w0", &ops[0])
            }
            Op::LogAnd => {
                let (label_false, label_end) = labels.pair("false", "end");
                self.load(w, &ops[1], "w0")?;
                writeln!(w, "    cmp w0, #0")?;
                writeln!(w, "    b.eq {}", label_false)?;
                self.load(w, &ops[2], "w0")?;
                writeln!(w, "    cmp w0, #0")?;
                writeln!(w, "    b.eq {}", label_false)?;
                writeln!(w, "    mov w0, #1")?;
                writeln!(w, "    b {}", label_end)?;
                writeln!(w, "{}:", label_false)?;
                writeln!(w, "    mov w0, #0")?;
                writeln!(w, "{}:", label_end)?;
                self.store(w, "w0", &ops[0])
            }
            Op::LogOr => {
                let (label_true, label_end) = labels.pair("true", "end");
                self.load(w, &ops[1], "w0")?;
                writeln!(w, "    cmp w0, #0")?;
                writeln!(w, "    b.ne {}", label_true)?;
                self.load(w, &ops[2], "w0")?;
                writeln!(w, "    cmp w0, #0")?;
                writeln!(w, "    b.ne {}", label_true)?;
                writeln!(w, "    mov w0, #0")?;
                writeln!(w, "    b {}", label_end)?;
                writeln!(w, "{}:", label_true)?;
                writeln!(w, "    mov w0, #1")?;
                writeln!(w, "{}:", label_end)?;
                self.store(w, "w0", &ops[0])
            }
            Op::Not => {
                self.load(w, &ops[1], "w0")?;
                writeln!(w, "    cmp w0, #0")?;
                writeln!(w, "    cset w0, eq")?;
                self.store(w, "w0", &ops[0])
            }
            Op::Neg => {
                if ty.is_float() {
                    self.load(w, &ops[1], "s0")?;
                    writeln!(w, "    fneg s0, s0")?;
                    return self.store(w, "s0", &ops[0]);
                }
                self.load(w, &ops[1], "w0")?;
                writeln!(w, "    neg w0, w0")?;
                self.store(w, "w0", &ops[0])
            }
            Op::Incr | Op::Decr => {
                if ty.is_float() {
                    let mnemonic = if instr.op == Op::Incr { "fadd" } else { "fsub" };
                    self.load(w, &ops[0], "s0")?;
                    self.load(w, &ops[1], "s1")?;
                    writeln!(w, "    {} s0, s0, s1", mnemonic)?;
                    return self.store(w, "s0", &ops[0]);
                }
                let mnemonic = if instr.op == Op::Incr { "add" } else { "sub" };
                self.load(w, &ops[0], "w0")?;
                writeln!(w, "    {} w0, w0, #1", mnemonic)?;
                self.store(w, "w0", &ops[0])
            }
            Op::RMem => {
                self.load(w, &ops[1], "w1")?;
                writeln!(w, "    ldr w0, [x1]")?;
                self.store(w, "w0", &ops[0])
            }
            Op::WMem => {
                self.load(w, &ops[0], "w1")?;
                self.load(w, &ops[1], "w0")?;
                writeln!(w, "    str w0, [x1]")
            }
            Op::StoreIdx => {
                let base = self.stack_offset(&ops[0]);
                let reg = if ty.is_float() { "s0" } else { "w0" };
                self.load(w, &ops[1], reg)?;
                self.element_address(w, base, &ops[2])?;
                writeln!(w, "    str {}, [x2]", reg)
            }
            Op::AluIdx(alu) => {
                let base = self.stack_offset(&ops[0]);
                if ty.is_float() {
                    self.load(w, &ops[1], "s0")?;
                    self.element_address(w, base, &ops[2])?;
                    writeln!(w, "    ldr s1, [x2]")?;
                    match alu {
                        AluOp::Add => writeln!(w, "    fadd s1, s1, s0")?,
                        AluOp::Sub => writeln!(w, "    fsub s1, s1, s0")?,
                        AluOp::Mul => writeln!(w, "    fmul s1, s1, s0")?,
                        AluOp::Div => writeln!(w, "    fdiv s1, s1, s0")?,
                        other => panic!("no float lowering for {:?}", other),
                    }
                    return writeln!(w, "    str s1, [x2]");
                }
                self.load(w, &ops[1], "w0")?;
                self.element_address(w, base, &ops[2])?;
                writeln!(w, "    ldr w3, [x2]")?;
                match alu {
                    AluOp::Add => writeln!(w, "    add w3, w3, w0")?,
                    AluOp::Sub => writeln!(w, "    sub w3, w3, w0")?,
                    AluOp::Mul => writeln!(w, "    mul w3, w3, w0")?,
                    AluOp::Div => writeln!(w, "    sdiv w3, w3, w0")?,
                    AluOp::Mod => {
                        writeln!(w, "    sdiv w4, w3, w0")?;
                        writeln!(w, "    msub w3, w4, w0, w3")?;
                    }
                    AluOp::And => writeln!(w, "    and w3, w3, w0")?,
                    AluOp::Or => writeln!(w, "    orr w3, w3, w0")?,
                    AluOp::Xor => writeln!(w, "    eor w3, w3, w0")?,
                }
                writeln!(w, "    str w3, [x2]")
            }
            Op::LoadIdx => {
                let base = self.stack_offset(&ops[1]);
                self.element_address(w, base, &ops[2])?;
                let reg = if ty.is_float() { "s0" } else { "w0" };
                writeln!(w, "    ldr {}, [x2]", reg)?;
                self.store(w, reg, &ops[0])
            }
            Op::IntToFloat => {
                self.load(w, &ops[1], "w0")?;
                writeln!(w, "    scvtf s0, w0")?;
                self.store(w, "s0", &ops[0])
            }
            Op::FloatToInt => {
                self.load(w, &ops[1], "s0")?;
                writeln!(w, "    fcvtzs w0, s0")?;
                self.store(w, "w0", &ops[0])
            }
            Op::Call => {
                let mut ints = 0;
                let mut floats = 0;
                for arg in &ops[2..] {
                    if arg.ty().is_float() {
                        self.load(w, arg, FLOAT_ARGS[floats])?;
                        floats += 1;
                    } else {
                        self.load(w, arg, INT_ARGS[ints])?;
                        ints += 1;
                    }
                }
                writeln!(w, "    bl {}", self.mangle(&self.operand(&ops[0])))?;
                let reg = if ty.is_float() { "s0" } else { "w0" };
                self.store(w, reg, &ops[1])
            }
            Op::Jmp => writeln!(w, "    b {}", self.operand(&ops[0])),
        }
    }

    fn branch_if_zero(&self, w: &mut dyn Write, test: &Operand, label: &str) -> io::Result<()> {
        self.load(w, test, "w0")?;
        writeln!(w, "    cmp w0, #0")?;
        writeln!(w, "    b.eq {}", label)
    }

    fn jump(&self, w: &mut dyn Write, label: &str) -> io::Result<()> {
        writeln!(w, "    b {}", label)
    }

    fn emit_data(&self, w: &mut dyn Write, ctx: &Context) -> io::Result<()> {
        if ctx.globals.is_empty() {
            return Ok(());
        }
        writeln!(w, ".data")?;
        writeln!(w, ".p2align 2")?;
        for name in ctx.globals.names() {
            let symbol = match ctx.scopes.find_in_scope(ctx.global_scope, name) {
                Some(symbol) => symbol,
                None => panic!("global '{}' has no symbol", name),
            };
            writeln!(w, ".global _{}", name)?;
            writeln!(w, "_{}:", name)?;
            match ctx.globals.value(name) {
                None => writeln!(w, "    .space 4")?,
                Some(value) => {
                    if symbol.ty == VarType::Float {
                        let bits = match value.parse::<f32>() {
                            Ok(parsed) => parsed.to_bits(),
                            Err(_) => panic!("malformed float initializer '{}'", value),
                        };
                        writeln!(w, "    .word {}", bits)?;
                    } else {
                        writeln!(w, "    .word {}", value)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_rodata(&self, w: &mut dyn Write, ctx: &Context) -> io::Result<()> {
        if ctx.rodata.is_empty() {
            return Ok(());
        }
        writeln!(w, ".section __TEXT,__const")?;
        for (label, value) in ctx.rodata.entries() {
            writeln!(w, ".p2align 2")?;
            writeln!(w, "{}:", label)?;
            writeln!(w, "    .word {}", value.to_bits())?;
        }
        if let Some(label) = ctx.rodata.mask_label() {
            writeln!(w, ".p2align 4")?;
            writeln!(w, "{}:", label)?;
            writeln!(w, "    .word 2147483648")?;
            writeln!(w, "    .word 0")?;
            writeln!(w, "    .word 0")?;
            writeln!(w, "    .word 0")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lower(instr: Instr) -> String {
        let mut out = Vec::new();
        let mut labels = LabelAlloc::new();
        Aarch64.instr(&mut out, &instr, &mut labels).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn slot(offset: i32) -> Operand {
        Operand::Stack {
            offset,
            ty: VarType::Int,
        }
    }

    #[test]
    fn operand_rendering() {
        assert_eq!(
            Aarch64.operand(&Operand::Imm {
                text: "5".to_string(),
                ty: VarType::Int
            }),
            "#5"
        );
        assert_eq!(Aarch64.operand(&slot(8)), "[x29, #-8]");
        assert_eq!(
            Aarch64.operand(&Operand::Global {
                name: "g".to_string(),
                ty: VarType::Int
            }),
            "_g"
        );
    }

    #[test]
    fn arithmetic_loads_both_sides() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Sub),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert_eq!(
            asm,
            "    ldr w0, [x29, #-4]\n    ldr w1, [x29, #-8]\n    sub w0, w0, w1\n    str w0, [x29, #-12]\n"
        );
    }

    #[test]
    fn modulo_uses_msub() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Mod),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert!(asm.contains("sdiv w2, w0, w1"));
        assert!(asm.contains("msub w0, w2, w1, w0"));
    }

    #[test]
    fn float_arithmetic_uses_s_registers() {
        let float_slot = |offset| Operand::Stack {
            offset,
            ty: VarType::Float,
        };
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Add),
            ty: VarType::Float,
            operands: vec![float_slot(12), float_slot(4), float_slot(8)],
        });
        assert!(asm.contains("fadd s0, s0, s1"));
    }

    #[test]
    fn globals_go_through_the_page_address() {
        let asm = lower(Instr {
            op: Op::Copy,
            ty: VarType::Int,
            operands: vec![
                slot(4),
                Operand::Global {
                    name: "g".to_string(),
                    ty: VarType::Int,
                },
            ],
        });
        assert!(asm.contains("adrp x8, _g@PAGE"));
        assert!(asm.contains("ldr w9, [x8, _g@PAGEOFF]"));
    }

    #[test]
    fn calls_are_underscore_prefixed() {
        let asm = lower(Instr {
            op: Op::Call,
            ty: VarType::Int,
            operands: vec![
                Operand::Label {
                    name: "putchar".to_string(),
                },
                slot(4),
                Operand::Imm {
                    text: "65".to_string(),
                    ty: VarType::Char,
                },
            ],
        });
        assert!(asm.contains("mov w0, #65"));
        assert!(asm.contains("bl _putchar"));
    }

    #[test]
    fn conversions_round_trip_the_register_classes() {
        let asm = lower(Instr {
            op: Op::IntToFloat,
            ty: VarType::Float,
            operands: vec![
                Operand::Stack {
                    offset: 8,
                    ty: VarType::Float,
                },
                slot(4),
            ],
        });
        assert!(asm.contains("scvtf s0, w0"));
    }
}
