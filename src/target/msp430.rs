//! MSP430 lowering, integers only. The base instruction set has neither
//! multiply nor divide, so both go through the libgcc helpers `__mulhi3`
//! and `__divhi3` (arguments in `r15`/`r14`, result in `r15`). `r4` is the
//! frame pointer, `r11` the scratch register for moves; frames align to
//! 2 bytes and globals use `&` absolute addressing.

use std::io::{self, Write};

use crate::ir::{AluOp, Cfg, CmpOp, Context, Instr, Op, Operand};
use crate::symbols::ScopeArena;
use crate::target::{frame_size, LabelAlloc, TargetIsa, RETVAL};
use crate::types::VarType;

const INT_ARGS: [&str; 4] = ["r15", "r14", "r13", "r12"];

pub struct Msp430;

impl Msp430 {
    /// Every addressing mode is a plain `mov` operand on this target.
    fn mov(&self, w: &mut dyn Write, src: &str, dest: &str) -> io::Result<()> {
        writeln!(w, "    mov {}, {}", src, dest)
    }

    /// Leaves the address of element `index` of the array `base_offset`
    /// bytes below the frame pointer in `r13`.
    fn element_address(&self, w: &mut dyn Write, base_offset: i32, index: &Operand) -> io::Result<()> {
        self.mov(w, &self.operand(index), "r14")?;
        writeln!(w, "    rla r14")?;
        writeln!(w, "    rla r14")?;
        self.mov(w, "r4", "r13")?;
        writeln!(w, "    sub #{}, r13", base_offset)?;
        writeln!(w, "    add r14, r13")
    }

    fn stack_offset(&self, op: &Operand) -> i32 {
        match op {
            Operand::Stack { offset, .. } => *offset,
            other => panic!("array base must be a frame slot, got {:?}", other),
        }
    }

    fn unsupported(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "    ; unsupported float operation")
    }

    /// Writes the 0/1 result of a comparison into `r15` through a jump pair.
    fn cmp_select(
        &self,
        w: &mut dyn Write,
        jump: &str,
        labels: &mut LabelAlloc,
    ) -> io::Result<()> {
        let (label_true, label_end) = labels.pair("true", "end");
        writeln!(w, "    {} {}", jump, label_true)?;
        self.mov(w, "#0", "r15")?;
        writeln!(w, "    jmp {}", label_end)?;
        writeln!(w, "{}:", label_true)?;
        self.mov(w, "#1", "r15")?;
        writeln!(w, "{}:", label_end)
    }
}

impl TargetIsa for Msp430 {
    fn name(&self) -> &'static str {
        "msp430"
    }

    fn mangle(&self, name: &str) -> String {
        format!("_{}", name)
    }

    fn frame_align(&self) -> i32 {
        2
    }

    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Imm { text, .. } => format!("#{}", text),
            Operand::Stack { offset, .. } => format!("-{}(r4)", offset),
            Operand::Global { name, .. } => format!("&_{}", name),
            Operand::Ro { label } => label.clone(),
            Operand::Label { name } => name.clone(),
        }
    }

    fn prologue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        writeln!(w, "    push r4")?;
        writeln!(w, "    mov r1, r4")?;
        writeln!(w, "    sub #{}, r1", frame_size(cfg, scopes, self.frame_align()))?;

        for (index, (name, _)) in cfg.func.params.iter().enumerate() {
            let offset = match scopes.find_visible(cfg.root_scope, name) {
                Some(symbol) => symbol.offset,
                None => panic!("parameter '{}' has no slot", name),
            };
            writeln!(w, "    mov {}, -{}(r4)", INT_ARGS[index], offset)?;
        }
        Ok(())
    }

    fn epilogue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        if cfg.func.ret != VarType::Void {
            if let Some(symbol) = scopes.find_visible(cfg.root_scope, RETVAL) {
                writeln!(w, "    mov -{}(r4), r15", symbol.offset)?;
            }
        }
        writeln!(w, "    mov r4, r1")?;
        writeln!(w, "    pop r4")?;
        writeln!(w, "    ret")
    }

    fn instr(&self, w: &mut dyn Write, instr: &Instr, labels: &mut LabelAlloc) -> io::Result<()> {
        let ops = &instr.operands;
        if instr.ty.is_float() {
            return self.unsupported(w);
        }
        match instr.op {
            Op::LdConst | Op::Copy => {
                self.mov(w, &self.operand(&ops[1]), "r11")?;
                self.mov(w, "r11", &self.operand(&ops[0]))
            }
            Op::Alu(alu) => {
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                self.mov(w, &self.operand(&ops[2]), "r14")?;
                match alu {
                    AluOp::Add => writeln!(w, "    add r14, r15")?,
                    AluOp::Sub => writeln!(w, "    sub r14, r15")?,
                    AluOp::Mul => writeln!(w, "    call #__mulhi3")?,
                    AluOp::Div => writeln!(w, "    call #__divhi3")?,
                    AluOp::Mod => {
                        writeln!(w, "    call #__divhi3")?;
                        self.mov(w, &self.operand(&ops[2]), "r14")?;
                        writeln!(w, "    call #__mulhi3")?;
                        self.mov(w, "r15", "r14")?;
                        self.mov(w, &self.operand(&ops[1]), "r15")?;
                        writeln!(w, "    sub r14, r15")?;
                    }
                    AluOp::And => writeln!(w, "    and r14, r15")?,
                    AluOp::Or => writeln!(w, "    bis r14, r15")?,
                    AluOp::Xor => writeln!(w, "    xor r14, r15")?,
                }
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::Cmp(cmp) => {
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                self.mov(w, &self.operand(&ops[2]), "r14")?;
                // `cmp src, dst` sets the flags of `dst - src`; Gt/Le reuse
                // the Lt/Ge jumps with the operands the other way round.
                let (first, second, jump) = match cmp {
                    CmpOp::Eq => ("r14", "r15", "jeq"),
                    CmpOp::Ne => ("r14", "r15", "jne"),
                    CmpOp::Lt => ("r14", "r15", "jl"),
                    CmpOp::Ge => ("r14", "r15", "jge"),
                    CmpOp::Gt => ("r15", "r14", "jl"),
                    CmpOp::Le => ("r15", "r14", "jge"),
                };
                writeln!(w, "    cmp {}, {}", first, second)?;
                self.cmp_select(w, jump, labels)?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::LogAnd => {
                let (label_false, label_end) = labels.pair("false", "end");
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                writeln!(w, "    cmp #0, r15")?;
                writeln!(w, "    jeq {}", label_false)?;
                self.mov(w, &self.operand(&ops[2]), "r15")?;
                writeln!(w, "    cmp #0, r15")?;
                writeln!(w, "    jeq {}", label_false)?;
                self.mov(w, "#1", "r15")?;
                writeln!(w, "    jmp {}", label_end)?;
                writeln!(w, "{}:", label_false)?;
                self.mov(w, "#0", "r15")?;
                writeln!(w, "{}:", label_end)?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::LogOr => {
                let (label_true, label_end) = labels.pair("true", "end");
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                writeln!(w, "    cmp #0, r15")?;
                writeln!(w, "    jne {}", label_true)?;
                self.mov(w, &self.operand(&ops[2]), "r15")?;
                writeln!(w, "    cmp #0, r15")?;
                writeln!(w, "    jne {}", label_true)?;
                self.mov(w, "#0", "r15")?;
                writeln!(w, "    jmp {}", label_end)?;
                writeln!(w, "{}:", label_true)?;
                self.mov(w, "#1", "r15")?;
                writeln!(w, "{}:", label_end)?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::Not => {
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                writeln!(w, "    cmp #0, r15")?;
                self.cmp_select(w, "jeq", labels)?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::Neg => {
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                writeln!(w, "    inv r15")?;
                writeln!(w, "    inc r15")?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::Incr | Op::Decr => {
                let var = self.operand(&ops[0]);
                let mnemonic = if instr.op == Op::Incr { "add" } else { "sub" };
                self.mov(w, &var, "r15")?;
                writeln!(w, "    {} #1, r15", mnemonic)?;
                self.mov(w, "r15", &var)
            }
            Op::RMem => {
                self.mov(w, &self.operand(&ops[1]), "r14")?;
                self.mov(w, "@r14", "r15")?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::WMem => {
                self.mov(w, &self.operand(&ops[0]), "r14")?;
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                self.mov(w, "r15", "0(r14)")
            }
            Op::StoreIdx => {
                let base = self.stack_offset(&ops[0]);
                self.element_address(w, base, &ops[2])?;
                self.mov(w, &self.operand(&ops[1]), "r15")?;
                self.mov(w, "r15", "0(r13)")
            }
            Op::AluIdx(alu) => {
                let base = self.stack_offset(&ops[0]);
                self.element_address(w, base, &ops[2])?;
                match alu {
                    AluOp::Mul | AluOp::Div | AluOp::Mod => {
                        // The helper calls clobber the working registers, so
                        // park the element address in r10.
                        self.mov(w, "r13", "r10")?;
                        self.mov(w, "@r10", "r15")?;
                        self.mov(w, &self.operand(&ops[1]), "r14")?;
                        match alu {
                            AluOp::Mul => writeln!(w, "    call #__mulhi3")?,
                            AluOp::Div => writeln!(w, "    call #__divhi3")?,
                            AluOp::Mod => {
                                writeln!(w, "    call #__divhi3")?;
                                self.mov(w, &self.operand(&ops[1]), "r14")?;
                                writeln!(w, "    call #__mulhi3")?;
                                self.mov(w, "r15", "r14")?;
                                self.mov(w, "@r10", "r15")?;
                                writeln!(w, "    sub r14, r15")?;
                            }
                            _ => unreachable!(),
                        }
                        self.mov(w, "r15", "0(r10)")
                    }
                    _ => {
                        self.mov(w, "@r13", "r15")?;
                        self.mov(w, &self.operand(&ops[1]), "r14")?;
                        match alu {
                            AluOp::Add => writeln!(w, "    add r14, r15")?,
                            AluOp::Sub => writeln!(w, "    sub r14, r15")?,
                            AluOp::And => writeln!(w, "    and r14, r15")?,
                            AluOp::Or => writeln!(w, "    bis r14, r15")?,
                            AluOp::Xor => writeln!(w, "    xor r14, r15")?,
                            _ => unreachable!(),
                        }
                        self.mov(w, "r15", "0(r13)")
                    }
                }
            }
            Op::LoadIdx => {
                let base = self.stack_offset(&ops[1]);
                self.element_address(w, base, &ops[2])?;
                self.mov(w, "@r13", "r15")?;
                self.mov(w, "r15", &self.operand(&ops[0]))
            }
            Op::IntToFloat | Op::FloatToInt => self.unsupported(w),
            Op::Call => {
                for (index, arg) in ops[2..].iter().enumerate() {
                    self.mov(w, &self.operand(arg), INT_ARGS[index])?;
                }
                writeln!(w, "    call #{}", self.mangle(&self.operand(&ops[0])))?;
                self.mov(w, "r15", &self.operand(&ops[1]))
            }
            Op::Jmp => writeln!(w, "    jmp {}", self.operand(&ops[0])),
        }
    }

    fn branch_if_zero(&self, w: &mut dyn Write, test: &Operand, label: &str) -> io::Result<()> {
        self.mov(w, &self.operand(test), "r15")?;
        writeln!(w, "    cmp #0, r15")?;
        writeln!(w, "    jeq {}", label)
    }

    fn jump(&self, w: &mut dyn Write, label: &str) -> io::Result<()> {
        writeln!(w, "    jmp {}", label)
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
                None => writeln!(w, "    .space 2")?,
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

#[cfg(test)]
mod test {
    use super::*;

    fn lower(instr: Instr) -> String {
        let mut out = Vec::new();
        let mut labels = LabelAlloc::new();
        Msp430.instr(&mut out, &instr, &mut labels).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn slot(offset: i32) -> Operand {
        Operand::Stack {
            offset,
            ty: VarType::Int,
        }
    }

    #[test]
    fn multiplication_calls_the_runtime_helper() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Mul),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert!(asm.contains("call #__mulhi3"));
        assert!(asm.ends_with("    mov r15, -12(r4)\n"));
    }

    #[test]
    fn comparison_selects_through_jumps() {
        let asm = lower(Instr {
            op: Op::Cmp(CmpOp::Lt),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert!(asm.contains("cmp r14, r15"));
        assert!(asm.contains("jl .Ltrue0"));
    }

    #[test]
    fn globals_use_absolute_addressing() {
        assert_eq!(
            Msp430.operand(&Operand::Global {
                name: "g".to_string(),
                ty: VarType::Int
            }),
            "&_g"
        );
    }

    #[test]
    fn calls_target_the_underscored_label() {
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
        assert!(asm.contains("mov #65, r15"));
        assert!(asm.contains("call #_putchar"));
    }
}
