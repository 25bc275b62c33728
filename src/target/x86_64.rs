//! x86-64 System V lowering. Expression results travel through `%eax`
//! (`%xmm0` for floats); every IR operand is addressed directly where the
//! ISA allows a memory operand.

use std::io::{self, Write};

use crate::ir::{AluOp, Cfg, CmpOp, Context, Instr, Op, Operand};
use crate::symbols::ScopeArena;
use crate::target::{frame_size, LabelAlloc, TargetIsa, RETVAL};
use crate::types::VarType;

const INT_ARGS: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
const FLOAT_ARGS: [&str; 8] = [
    "%xmm0", "%xmm1", "%xmm2", "%xmm3", "%xmm4", "%xmm5", "%xmm6", "%xmm7",
];

pub struct Amd64;

impl Amd64 {
    fn mov(&self, w: &mut dyn Write, ty: VarType, src: &str, dest: &str) -> io::Result<()> {
        if ty.is_float() {
            writeln!(w, "    movss {}, {}", src, dest)
        } else {
            writeln!(w, "    movl {}, {}", src, dest)
        }
    }

    /// `leaq` of element `index` of the array based `base_offset` bytes
    /// below the frame pointer, leaving the address in `addr_reg`.
    fn element_address(
        &self,
        w: &mut dyn Write,
        base_offset: i32,
        index: &str,
        addr_reg: &str,
    ) -> io::Result<()> {
        writeln!(w, "    movl {}, %eax", index)?;
        writeln!(w, "    movslq %eax, %rbx")?;
        writeln!(w, "    leaq -{}(%rbp, %rbx, 4), {}", base_offset, addr_reg)
    }

    fn set_flag(&self, w: &mut dyn Write, setcc: &str, dest: &str) -> io::Result<()> {
        writeln!(w, "    {} %al", setcc)?;
        writeln!(w, "    movzbl %al, %eax")?;
        writeln!(w, "    movl %eax, {}", dest)
    }

    /// `idivl` refuses immediates; reroute them through `%ecx`.
    fn divisor(&self, w: &mut dyn Write, rhs: &Operand) -> io::Result<()> {
        if rhs.is_immediate() {
            writeln!(w, "    movl {}, %ecx", self.operand(rhs))?;
            writeln!(w, "    idivl %ecx")
        } else {
            writeln!(w, "    idivl {}", self.operand(rhs))
        }
    }

    fn stack_offset(&self, op: &Operand) -> i32 {
        match op {
            Operand::Stack { offset, .. } => *offset,
            other => panic!("array base must be a frame slot, got {:?}", other),
        }
    }
}

impl TargetIsa for Amd64 {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn mangle(&self, name: &str) -> String {
        name.to_string()
    }

    fn frame_align(&self) -> i32 {
        16
    }

    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Imm { text, .. } => format!("${}", text),
            Operand::Stack { offset, .. } => format!("-{}(%rbp)", offset),
            Operand::Global { name, .. } => format!("{}(%rip)", name),
            Operand::Ro { label } => format!("{}(%rip)", label),
            Operand::Label { name } => name.clone(),
        }
    }

    fn prologue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        writeln!(w, "    pushq %rbp")?;
        writeln!(w, "    movq %rsp, %rbp")?;
        writeln!(w, "    subq ${}, %rsp", frame_size(cfg, scopes, self.frame_align()))?;

        let mut ints = 0;
        let mut floats = 0;
        for (name, ty) in &cfg.func.params {
            let offset = match scopes.find_visible(cfg.root_scope, name) {
                Some(symbol) => symbol.offset,
                None => panic!("parameter '{}' has no slot", name),
            };
            if ty.is_float() {
                writeln!(w, "    movss {}, -{}(%rbp)", FLOAT_ARGS[floats], offset)?;
                floats += 1;
            } else {
                writeln!(w, "    movl {}, -{}(%rbp)", INT_ARGS[ints], offset)?;
                ints += 1;
            }
        }
        Ok(())
    }

    fn epilogue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()> {
        if cfg.func.ret != VarType::Void {
            if let Some(symbol) = scopes.find_visible(cfg.root_scope, RETVAL) {
                if cfg.func.ret.is_float() {
                    writeln!(w, "    movss -{}(%rbp), %xmm0", symbol.offset)?;
                } else {
                    writeln!(w, "    movl -{}(%rbp), %eax", symbol.offset)?;
                }
            }
        }
        writeln!(w, "    leave")?;
        writeln!(w, "    ret")
    }

    fn instr(&self, w: &mut dyn Write, instr: &Instr, labels: &mut LabelAlloc) -> io::Result<()> {
        let ops = &instr.operands;
        let ty = instr.ty;
        match instr.op {
            Op::LdConst => {
                writeln!(w, "    movl {}, {}", self.operand(&ops[1]), self.operand(&ops[0]))
            }
            Op::Copy => {
                if ty.is_float() {
                    self.mov(w, ty, &self.operand(&ops[1]), "%xmm5")?;
                    self.mov(w, ty, "%xmm5", &self.operand(&ops[0]))
                } else {
                    writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                    writeln!(w, "    movl %eax, {}", self.operand(&ops[0]))
                }
            }
            Op::Alu(alu) => {
                let (dest, lhs, rhs) = (&ops[0], &ops[1], &ops[2]);
                if ty.is_float() {
                    let mnemonic = match alu {
                        AluOp::Add => "addss",
                        AluOp::Sub => "subss",
                        AluOp::Mul => "mulss",
                        AluOp::Div => "divss",
                        other => panic!("no float lowering for {:?}", other),
                    };
                    writeln!(w, "    movss {}, %xmm0", self.operand(lhs))?;
                    writeln!(w, "    {} {}, %xmm0", mnemonic, self.operand(rhs))?;
                    return writeln!(w, "    movss %xmm0, {}", self.operand(dest));
                }
                match alu {
                    AluOp::Div => {
                        writeln!(w, "    movl {}, %eax", self.operand(lhs))?;
                        writeln!(w, "    cltd")?;
                        self.divisor(w, rhs)?;
                        writeln!(w, "    movl %eax, {}", self.operand(dest))
                    }
                    AluOp::Mod => {
                        writeln!(w, "    movl {}, %eax", self.operand(lhs))?;
                        writeln!(w, "    cltd")?;
                        self.divisor(w, rhs)?;
                        writeln!(w, "    movl %edx, {}", self.operand(dest))
                    }
                    _ => {
                        let mnemonic = match alu {
                            AluOp::Add => "addl",
                            AluOp::Sub => "subl",
                            AluOp::Mul => "imull",
                            AluOp::And => "andl",
                            AluOp::Or => "orl",
                            AluOp::Xor => "xorl",
                            AluOp::Div | AluOp::Mod => unreachable!(),
                        };
                        writeln!(w, "    movl {}, %eax", self.operand(lhs))?;
                        writeln!(w, "    {} {}, %eax", mnemonic, self.operand(rhs))?;
                        writeln!(w, "    movl %eax, {}", self.operand(dest))
                    }
                }
            }
            Op::Cmp(cmp) => {
                let (dest, lhs, rhs) = (&ops[0], &ops[1], &ops[2]);
                if ty.is_float() {
                    return match cmp {
                        CmpOp::Eq | CmpOp::Ne => {
                            // ucomiss raises PF on unordered operands; fold it
                            // in so NaN compares unequal to everything.
                            let (setcc, fixup) = if cmp == CmpOp::Eq {
                                ("setnp", "$0")
                            } else {
                                ("setp", "$1")
                            };
                            writeln!(w, "    movss {}, %xmm0", self.operand(lhs))?;
                            writeln!(w, "    ucomiss {}, %xmm0", self.operand(rhs))?;
                            writeln!(w, "    {} %al", setcc)?;
                            writeln!(w, "    movl {}, %edx", fixup)?;
                            writeln!(w, "    movss {}, %xmm0", self.operand(lhs))?;
                            writeln!(w, "    ucomiss {}, %xmm0", self.operand(rhs))?;
                            writeln!(w, "    cmovne %edx, %eax")?;
                            writeln!(w, "    movzbl %al, %eax")?;
                            writeln!(w, "    movl %eax, {}", self.operand(dest))
                        }
                        CmpOp::Lt | CmpOp::Le => {
                            // Swap the comparison so `seta`/`setnb` read the
                            // flags the right way round.
                            let setcc = if cmp == CmpOp::Lt { "seta" } else { "setnb" };
                            writeln!(w, "    movss {}, %xmm0", self.operand(rhs))?;
                            writeln!(w, "    comiss {}, %xmm0", self.operand(lhs))?;
                            self.set_flag(w, setcc, &self.operand(dest))
                        }
                        CmpOp::Gt | CmpOp::Ge => {
                            let setcc = if cmp == CmpOp::Gt { "seta" } else { "setnb" };
                            writeln!(w, "    movss {}, %xmm0", self.operand(lhs))?;
                            writeln!(w, "    comiss {}, %xmm0", self.operand(rhs))?;
                            self.set_flag(w, setcc, &self.operand(dest))
                        }
                    };
                }
                let setcc = match cmp {
                    CmpOp::Eq => "sete",
                    CmpOp::Ne => "setne",
                    CmpOp::Lt => "setl",
                    CmpOp::Le => "setle",
                    CmpOp::Gt => "setg",
                    CmpOp::Ge => "setge",
                };
                writeln!(w, "    movl {}, %eax", self.operand(lhs))?;
                writeln!(w, "    cmpl {}, %eax", self.operand(rhs))?;
                self.set_flag(w, setcc, &self.operand(dest))
            }
            Op::LogAnd => {
                let (label_false, label_end) = labels.pair("false", "end");
                writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    testl %eax, %eax")?;
                writeln!(w, "    jz {}", label_false)?;
                writeln!(w, "    movl {}, %eax", self.operand(&ops[2]))?;
                writeln!(w, "    testl %eax, %eax")?;
                writeln!(w, "    jz {}", label_false)?;
                writeln!(w, "    movl $1, %eax")?;
                writeln!(w, "    jmp {}", label_end)?;
                writeln!(w, "{}:", label_false)?;
                writeln!(w, "    movl $0, %eax")?;
                writeln!(w, "{}:", label_end)?;
                writeln!(w, "    movl %eax, {}", self.operand(&ops[0]))
            }
            Op::LogOr => {
                let (label_true, label_end) = labels.pair("true", "end");
                writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    testl %eax, %eax")?;
                writeln!(w, "    jnz {}", label_true)?;
                writeln!(w, "    movl {}, %eax", self.operand(&ops[2]))?;
                writeln!(w, "    testl %eax, %eax")?;
                writeln!(w, "    jnz {}", label_true)?;
                writeln!(w, "    movl $0, %eax")?;
                writeln!(w, "    jmp {}", label_end)?;
                writeln!(w, "{}:", label_true)?;
                writeln!(w, "    movl $1, %eax")?;
                writeln!(w, "{}:", label_end)?;
                writeln!(w, "    movl %eax, {}", self.operand(&ops[0]))
            }
            Op::Not => {
                writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    cmpl $0, %eax")?;
                self.set_flag(w, "sete", &self.operand(&ops[0]))
            }
            Op::Neg => {
                if ty.is_float() {
                    // ops[2] is the interned sign-bit mask vector.
                    writeln!(w, "    movss {}, %xmm0", self.operand(&ops[1]))?;
                    writeln!(w, "    movss {}, %xmm1", self.operand(&ops[2]))?;
                    writeln!(w, "    xorps %xmm1, %xmm0")?;
                    return writeln!(w, "    movss %xmm0, {}", self.operand(&ops[0]));
                }
                writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    negl %eax")?;
                writeln!(w, "    movl %eax, {}", self.operand(&ops[0]))
            }
            Op::Incr | Op::Decr => {
                let var = self.operand(&ops[0]);
                if ty.is_float() {
                    let mnemonic = if instr.op == Op::Incr { "addss" } else { "subss" };
                    writeln!(w, "    movss {}, %xmm0", var)?;
                    writeln!(w, "    movss {}, %xmm1", self.operand(&ops[1]))?;
                    writeln!(w, "    {} %xmm1, %xmm0", mnemonic)?;
                    return writeln!(w, "    movss %xmm0, {}", var);
                }
                let mnemonic = if instr.op == Op::Incr { "addl" } else { "subl" };
                writeln!(w, "    movl {}, %eax", var)?;
                writeln!(w, "    {} $1, %eax", mnemonic)?;
                writeln!(w, "    movl %eax, {}", var)
            }
            Op::RMem => {
                writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    movl (%rax), %eax")?;
                writeln!(w, "    movl %eax, {}", self.operand(&ops[0]))
            }
            Op::WMem => {
                writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    movl {}, %edx", self.operand(&ops[0]))?;
                writeln!(w, "    movl %eax, (%rdx)")
            }
            Op::StoreIdx => {
                let base = self.stack_offset(&ops[0]);
                if ty.is_float() {
                    writeln!(w, "    movss {}, %xmm0", self.operand(&ops[1]))?;
                    self.element_address(w, base, &self.operand(&ops[2]), "%rax")?;
                    return writeln!(w, "    movss %xmm0, (%rax)");
                }
                self.element_address(w, base, &self.operand(&ops[2]), "%rax")?;
                writeln!(w, "    movl {}, %edx", self.operand(&ops[1]))?;
                writeln!(w, "    movl %edx, (%rax)")
            }
            Op::AluIdx(alu) => {
                let base = self.stack_offset(&ops[0]);
                if ty.is_float() {
                    writeln!(w, "    movss {}, %xmm0", self.operand(&ops[1]))?;
                    self.element_address(w, base, &self.operand(&ops[2]), "%rax")?;
                    writeln!(w, "    movss (%rax), %xmm1")?;
                    let store = match alu {
                        AluOp::Add => {
                            writeln!(w, "    addss %xmm1, %xmm0")?;
                            "%xmm0"
                        }
                        AluOp::Sub => {
                            writeln!(w, "    subss %xmm0, %xmm1")?;
                            "%xmm1"
                        }
                        AluOp::Mul => {
                            writeln!(w, "    mulss %xmm1, %xmm0")?;
                            "%xmm0"
                        }
                        AluOp::Div => {
                            writeln!(w, "    divss %xmm0, %xmm1")?;
                            "%xmm1"
                        }
                        other => panic!("no float lowering for {:?}", other),
                    };
                    return writeln!(w, "    movss {}, (%rax)", store);
                }
                match alu {
                    AluOp::Div | AluOp::Mod => {
                        // %rcx keeps the element address across the divide,
                        // so an immediate divisor detours through %ebx.
                        self.element_address(w, base, &self.operand(&ops[2]), "%rcx")?;
                        writeln!(w, "    movl (%rcx), %eax")?;
                        writeln!(w, "    cltd")?;
                        if ops[1].is_immediate() {
                            writeln!(w, "    movl {}, %ebx", self.operand(&ops[1]))?;
                            writeln!(w, "    idivl %ebx")?;
                        } else {
                            writeln!(w, "    idivl {}", self.operand(&ops[1]))?;
                        }
                        let result = if alu == AluOp::Div { "%eax" } else { "%edx" };
                        writeln!(w, "    movl {}, (%rcx)", result)
                    }
                    _ => {
                        let mnemonic = match alu {
                            AluOp::Add => "addl",
                            AluOp::Sub => "subl",
                            AluOp::Mul => "imull",
                            AluOp::And => "andl",
                            AluOp::Or => "orl",
                            AluOp::Xor => "xorl",
                            AluOp::Div | AluOp::Mod => unreachable!(),
                        };
                        self.element_address(w, base, &self.operand(&ops[2]), "%rax")?;
                        writeln!(w, "    movl (%rax), %edx")?;
                        writeln!(w, "    {} {}, %edx", mnemonic, self.operand(&ops[1]))?;
                        writeln!(w, "    movl %edx, (%rax)")
                    }
                }
            }
            Op::LoadIdx => {
                let base = self.stack_offset(&ops[1]);
                self.element_address(w, base, &self.operand(&ops[2]), "%rax")?;
                if ty.is_float() {
                    writeln!(w, "    movss (%rax), %xmm1")?;
                    writeln!(w, "    movss %xmm1, {}", self.operand(&ops[0]))
                } else {
                    writeln!(w, "    movl (%rax), %edx")?;
                    writeln!(w, "    movl %edx, {}", self.operand(&ops[0]))
                }
            }
            Op::IntToFloat => {
                writeln!(w, "    pxor %xmm0, %xmm0")?;
                if ops[1].is_immediate() {
                    writeln!(w, "    movl {}, %eax", self.operand(&ops[1]))?;
                    writeln!(w, "    cvtsi2ssl %eax, %xmm0")?;
                } else {
                    writeln!(w, "    cvtsi2ssl {}, %xmm0", self.operand(&ops[1]))?;
                }
                writeln!(w, "    movss %xmm0, {}", self.operand(&ops[0]))
            }
            Op::FloatToInt => {
                writeln!(w, "    cvttss2sil {}, %eax", self.operand(&ops[1]))?;
                writeln!(w, "    movl %eax, {}", self.operand(&ops[0]))
            }
            Op::Call => {
                let mut ints = 0;
                let mut floats = 0;
                for arg in &ops[2..] {
                    if arg.ty().is_float() {
                        writeln!(w, "    movss {}, {}", self.operand(arg), FLOAT_ARGS[floats])?;
                        floats += 1;
                    } else {
                        writeln!(w, "    movl {}, {}", self.operand(arg), INT_ARGS[ints])?;
                        ints += 1;
                    }
                }
                writeln!(w, "    call {}", self.operand(&ops[0]))?;
                if ty.is_float() {
                    writeln!(w, "    movss %xmm0, {}", self.operand(&ops[1]))
                } else {
                    writeln!(w, "    movl %eax, {}", self.operand(&ops[1]))
                }
            }
            Op::Jmp => writeln!(w, "    jmp {}", self.operand(&ops[0])),
        }
    }

    fn branch_if_zero(&self, w: &mut dyn Write, test: &Operand, label: &str) -> io::Result<()> {
        writeln!(w, "    movl {}, %eax", self.operand(test))?;
        writeln!(w, "    cmpl $0, %eax")?;
        writeln!(w, "    je {}", label)
    }

    fn jump(&self, w: &mut dyn Write, label: &str) -> io::Result<()> {
        writeln!(w, "    jmp {}", label)
    }

    fn emit_data(&self, w: &mut dyn Write, ctx: &Context) -> io::Result<()> {
        if ctx.globals.is_empty() {
            return Ok(());
        }
        writeln!(w, "    .data")?;
        for name in ctx.globals.names() {
            let symbol = match ctx.scopes.find_in_scope(ctx.global_scope, name) {
                Some(symbol) => symbol,
                None => panic!("global '{}' has no symbol", name),
            };
            writeln!(w, "    .globl {}", name)?;
            writeln!(w, "{}:", name)?;
            match ctx.globals.value(name) {
                None => writeln!(w, "    .zero 4")?,
                Some(value) => {
                    if symbol.ty == VarType::Float {
                        let bits = match value.parse::<f32>() {
                            Ok(parsed) => parsed.to_bits(),
                            Err(_) => panic!("malformed float initializer '{}'", value),
                        };
                        writeln!(w, "    .long {}", bits)?;
                    } else {
                        writeln!(w, "    .long {}", value)?;
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
        writeln!(w, ".section .rodata")?;
        for (label, value) in ctx.rodata.entries() {
            writeln!(w, "    .align 4")?;
            writeln!(w, "{}:", label)?;
            writeln!(w, "    .long {}", value.to_bits())?;
        }
        if let Some(label) = ctx.rodata.mask_label() {
            writeln!(w, "    .align 16")?;
            writeln!(w, "{}:", label)?;
            writeln!(w, "    .long -2147483648")?;
            writeln!(w, "    .long 0")?;
            writeln!(w, "    .long 0")?;
            writeln!(w, "    .long 0")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::Function;

    fn lower(instr: Instr) -> String {
        let mut out = Vec::new();
        let mut labels = LabelAlloc::new();
        Amd64.instr(&mut out, &instr, &mut labels).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn slot(offset: i32) -> Operand {
        Operand::Stack {
            offset,
            ty: VarType::Int,
        }
    }

    fn imm(text: &str) -> Operand {
        Operand::Imm {
            text: text.to_string(),
            ty: VarType::Int,
        }
    }

    #[test]
    fn operand_rendering() {
        assert_eq!(Amd64.operand(&imm("5")), "$5");
        assert_eq!(Amd64.operand(&slot(8)), "-8(%rbp)");
        assert_eq!(
            Amd64.operand(&Operand::Global {
                name: "g".to_string(),
                ty: VarType::Int
            }),
            "g(%rip)"
        );
        assert_eq!(
            Amd64.operand(&Operand::Ro {
                label: ".LFD0".to_string()
            }),
            ".LFD0(%rip)"
        );
    }

    #[test]
    fn ldconst_writes_straight_to_the_slot() {
        let asm = lower(Instr {
            op: Op::LdConst,
            ty: VarType::Int,
            operands: vec![slot(4), imm("42")],
        });
        assert_eq!(asm, "    movl $42, -4(%rbp)\n");
    }

    #[test]
    fn add_goes_through_eax() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Add),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert_eq!(
            asm,
            "    movl -4(%rbp), %eax\n    addl -8(%rbp), %eax\n    movl %eax, -12(%rbp)\n"
        );
    }

    #[test]
    fn division_never_takes_an_immediate_divisor() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Div),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), imm("2")],
        });
        assert!(asm.contains("movl $2, %ecx\n    idivl %ecx"));
        assert!(asm.contains("cltd"));
    }

    #[test]
    fn modulo_reads_the_remainder_from_edx() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Mod),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert!(asm.ends_with("    movl %edx, -12(%rbp)\n"));
    }

    #[test]
    fn comparisons_set_a_boolean() {
        let asm = lower(Instr {
            op: Op::Cmp(CmpOp::Lt),
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        });
        assert!(asm.contains("cmpl -8(%rbp), %eax"));
        assert!(asm.contains("setl %al"));
        assert!(asm.contains("movzbl %al, %eax"));
    }

    #[test]
    fn float_arithmetic_uses_the_sse_unit() {
        let asm = lower(Instr {
            op: Op::Alu(AluOp::Mul),
            ty: VarType::Float,
            operands: vec![
                Operand::Stack {
                    offset: 4,
                    ty: VarType::Float,
                },
                Operand::Stack {
                    offset: 8,
                    ty: VarType::Float,
                },
                Operand::Ro {
                    label: ".LFD0".to_string(),
                },
            ],
        });
        assert_eq!(
            asm,
            "    movss -8(%rbp), %xmm0\n    mulss .LFD0(%rip), %xmm0\n    movss %xmm0, -4(%rbp)\n"
        );
    }

    #[test]
    fn short_circuit_and_allocates_fresh_labels() {
        let instr = Instr {
            op: Op::LogAnd,
            ty: VarType::Int,
            operands: vec![slot(12), slot(4), slot(8)],
        };
        let mut out = Vec::new();
        let mut labels = LabelAlloc::new();
        Amd64.instr(&mut out, &instr, &mut labels).unwrap();
        Amd64.instr(&mut out, &instr, &mut labels).unwrap();
        let asm = String::from_utf8(out).unwrap();
        assert!(asm.contains(".Lfalse0:"));
        assert!(asm.contains(".Lfalse1:"));
    }

    #[test]
    fn element_store_scales_the_index() {
        let asm = lower(Instr {
            op: Op::StoreIdx,
            ty: VarType::IntPtr,
            operands: vec![
                Operand::Stack {
                    offset: 40,
                    ty: VarType::IntPtr,
                },
                imm("7"),
                slot(44),
            ],
        });
        assert!(asm.contains("leaq -40(%rbp, %rbx, 4), %rax"));
        assert!(asm.contains("movl $7, %edx"));
        assert!(asm.ends_with("    movl %edx, (%rax)\n"));
    }

    #[test]
    fn indirect_access_goes_through_registers() {
        let asm = lower(Instr {
            op: Op::RMem,
            ty: VarType::Int,
            operands: vec![slot(4), slot(8)],
        });
        assert!(asm.contains("movl (%rax), %eax"));

        let asm = lower(Instr {
            op: Op::WMem,
            ty: VarType::Int,
            operands: vec![slot(4), slot(8)],
        });
        assert!(asm.ends_with("    movl %eax, (%rdx)\n"));
    }

    #[test]
    fn calls_fill_integer_and_float_registers_independently() {
        let asm = lower(Instr {
            op: Op::Call,
            ty: VarType::Int,
            operands: vec![
                Operand::Label {
                    name: "mix".to_string(),
                },
                slot(4),
                imm("1"),
                Operand::Ro {
                    label: ".LFD0".to_string(),
                },
                imm("2"),
            ],
        });
        assert!(asm.contains("movl $1, %edi"));
        assert!(asm.contains("movss .LFD0(%rip), %xmm0"));
        assert!(asm.contains("movl $2, %esi"));
        assert!(asm.contains("call mix"));
        assert!(asm.ends_with("    movl %eax, -4(%rbp)\n"));
    }

    #[test]
    fn prologue_aligns_and_spills_parameters() {
        let mut ctx = Context::new();
        let scope = ctx.scopes.push(Some(ctx.global_scope));
        ctx.scopes.add_param(scope, "a", VarType::Int).unwrap();
        ctx.scopes.add_param(scope, "f", VarType::Float).unwrap();
        let cfg = Cfg::new(
            Function {
                name: "two".to_string(),
                ret: VarType::Int,
                params: vec![
                    ("a".to_string(), VarType::Int),
                    ("f".to_string(), VarType::Float),
                ],
            },
            scope,
        );

        let mut out = Vec::new();
        Amd64.prologue(&mut out, &cfg, &ctx.scopes).unwrap();
        let asm = String::from_utf8(out).unwrap();
        assert!(asm.contains("subq $16, %rsp"));
        assert!(asm.contains("movl %edi, -4(%rbp)"));
        assert!(asm.contains("movss %xmm0, -8(%rbp)"));
    }

    #[test]
    fn epilogue_loads_the_return_slot() {
        let mut ctx = Context::new();
        let scope = ctx.scopes.push(Some(ctx.global_scope));
        ctx.scopes.add_local(scope, RETVAL, VarType::Int, 1).unwrap();
        let cfg = Cfg::new(
            Function {
                name: "f".to_string(),
                ret: VarType::Int,
                params: Vec::new(),
            },
            scope,
        );

        let mut out = Vec::new();
        Amd64.epilogue(&mut out, &cfg, &ctx.scopes).unwrap();
        let asm = String::from_utf8(out).unwrap();
        assert_eq!(asm, "    movl -4(%rbp), %eax\n    leave\n    ret\n");
    }
}
