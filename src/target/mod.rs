//! The backend contract and the per-target lowerings.
//!
//! Every backend implements [`TargetIsa`]: operand rendering, prologue and
//! epilogue, one lowering per IR opcode, and the two branch primitives the
//! shared block-emission logic is built from. The backend is selected at
//! runtime through [`Target`], so one binary carries all four ISAs.

use std::io::{self, Write};
use std::str::FromStr;

use log::debug;
use util::{EnumFromStr, ParseEnumError};

use crate::ir::{Cfg, Context, Instr, Operand};
use crate::symbols::ScopeArena;

mod aarch64;
mod arm32;
mod msp430;
mod x86_64;

pub use self::aarch64::Aarch64;
pub use self::arm32::Arm32;
pub use self::msp430::Msp430;
pub use self::x86_64::Amd64;

/// Name of the per-function slot the return value is copied into.
pub const RETVAL: &str = "!retval";

/// The supported instruction set architectures.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Target {
    Amd64,
    Aarch64,
    Arm32,
    Msp430,
}

impl Target {
    pub fn isa(self) -> &'static dyn TargetIsa {
        match self {
            Target::Amd64 => &Amd64,
            Target::Aarch64 => &Aarch64,
            Target::Arm32 => &Arm32,
            Target::Msp430 => &Msp430,
        }
    }

    /// The architecture this compiler itself runs on; used as the CLI
    /// default so `rcc file.c | cc -x assembler -` works out of the box.
    pub fn host() -> Target {
        if cfg!(target_arch = "aarch64") {
            Target::Aarch64
        } else if cfg!(target_arch = "arm") {
            Target::Arm32
        } else {
            Target::Amd64
        }
    }
}

impl EnumFromStr for Target {
    fn from_str(s: &str) -> Result<Target, ParseEnumError> {
        match s {
            "x86_64" => Ok(Target::Amd64),
            "aarch64" => Ok(Target::Aarch64),
            "arm32" => Ok(Target::Arm32),
            "msp430" => Ok(Target::Msp430),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                enum_name: "Target",
            }),
        }
    }
}

impl FromStr for Target {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Target, ParseEnumError> {
        EnumFromStr::from_str(s)
    }
}

/// Hands out the numbered local labels used inside the short-circuit
/// lowerings. One allocator spans a whole emission so labels never collide
/// across functions.
pub struct LabelAlloc {
    next: u32,
}

impl Default for LabelAlloc {
    fn default() -> LabelAlloc {
        LabelAlloc::new()
    }
}

impl LabelAlloc {
    pub fn new() -> LabelAlloc {
        LabelAlloc { next: 0 }
    }

    /// Returns a `(.L<first>N, .L<second>N)` label pair.
    pub fn pair(&mut self, first: &str, second: &str) -> (String, String) {
        let n = self.next;
        self.next += 1;
        (format!(".L{}{}", first, n), format!(".L{}{}", second, n))
    }
}

/// Rounds a function's slot usage up to the target's frame alignment, always
/// leaving at least one spare alignment unit (the allocation the prologue
/// subtracts from the stack pointer).
pub fn frame_size(cfg: &Cfg, scopes: &ScopeArena, align: i32) -> i32 {
    scopes.decl_offset(cfg.root_scope) / align * align + align
}

pub trait TargetIsa {
    fn name(&self) -> &'static str;

    /// Assembly-level spelling of a function or global symbol.
    fn mangle(&self, name: &str) -> String;

    fn frame_align(&self) -> i32;

    /// Renders one operand into target syntax: immediate prefix for
    /// constants, frame-pointer-relative slot for locals, label reference
    /// for globals and read-only data.
    fn operand(&self, op: &Operand) -> String;

    /// Frame setup: push and set the frame pointer, carve out the aligned
    /// stack allocation, then spill the incoming register arguments into
    /// their parameter slots.
    fn prologue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()>;

    /// Loads the return slot into the return register, tears the frame down
    /// and returns.
    fn epilogue(&self, w: &mut dyn Write, cfg: &Cfg, scopes: &ScopeArena) -> io::Result<()>;

    /// Lowers one IR instruction.
    fn instr(&self, w: &mut dyn Write, instr: &Instr, labels: &mut LabelAlloc) -> io::Result<()>;

    /// Loads `test`, compares it against zero and branches to `label` when
    /// it is zero.
    fn branch_if_zero(&self, w: &mut dyn Write, test: &Operand, label: &str) -> io::Result<()>;

    fn jump(&self, w: &mut dyn Write, label: &str) -> io::Result<()>;

    fn emit_data(&self, w: &mut dyn Write, ctx: &Context) -> io::Result<()>;

    fn emit_rodata(&self, w: &mut dyn Write, ctx: &Context) -> io::Result<()>;

    /// Emits one function: entry label, prologue, every block in layout
    /// order, epilogue at the terminal block.
    ///
    /// Block tails follow the contract: a block with a test operand loads
    /// it, compares against zero and branches both ways; a block with only
    /// `exit_true` jumps unless the target is the epilogue (return
    /// statements already carry that jump in the IR); the successor-less
    /// epilogue block ends the function.
    fn emit_function(
        &self,
        w: &mut dyn Write,
        cfg: &Cfg,
        scopes: &ScopeArena,
        labels: &mut LabelAlloc,
    ) -> io::Result<()> {
        writeln!(w, ".global {}", self.mangle(&cfg.func.name))?;
        for id in cfg.layout() {
            let block = &cfg.blocks[id];
            if id == 0 {
                writeln!(w, "{}:", self.mangle(&cfg.func.name))?;
                self.prologue(w, cfg, scopes)?;
            } else {
                writeln!(w, "{}:", block.label)?;
            }
            for instr in &block.instrs {
                self.instr(w, instr, labels)?;
            }
            match (&block.test_var, block.exit_true, block.exit_false) {
                (Some(test), Some(on_true), Some(on_false)) => {
                    self.branch_if_zero(w, test, &cfg.blocks[on_false].label)?;
                    self.jump(w, &cfg.blocks[on_true].label)?;
                }
                (None, Some(on_true), _) => {
                    if on_true != cfg.epilogue {
                        self.jump(w, &cfg.blocks[on_true].label)?;
                    }
                }
                _ => {
                    self.epilogue(w, cfg, scopes)?;
                }
            }
        }
        Ok(())
    }
}

/// Writes the complete listing: `.data`, `.text` with every function, then
/// `.rodata` — sections elided when empty.
pub fn emit_program(
    w: &mut dyn Write,
    isa: &dyn TargetIsa,
    ctx: &Context,
    cfgs: &[Cfg],
) -> io::Result<()> {
    debug!("emitting {} function(s) for {}", cfgs.len(), isa.name());
    isa.emit_data(w, ctx)?;
    writeln!(w, ".text")?;
    let mut labels = LabelAlloc::new();
    for cfg in cfgs {
        isa.emit_function(w, cfg, &ctx.scopes, &mut labels)?;
        writeln!(w)?;
    }
    isa.emit_rodata(w, ctx)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn targets_parse_by_their_conventional_names() {
        assert_eq!("x86_64".parse::<Target>(), Ok(Target::Amd64));
        assert_eq!("aarch64".parse::<Target>(), Ok(Target::Aarch64));
        assert_eq!("arm32".parse::<Target>(), Ok(Target::Arm32));
        assert_eq!("msp430".parse::<Target>(), Ok(Target::Msp430));
        assert!("ia64".parse::<Target>().is_err());
    }

    #[test]
    fn label_pairs_share_one_counter() {
        let mut labels = LabelAlloc::new();
        assert_eq!(
            labels.pair("false", "end"),
            (".Lfalse0".to_string(), ".Lend0".to_string())
        );
        assert_eq!(
            labels.pair("true", "end"),
            (".Ltrue1".to_string(), ".Lend1".to_string())
        );
    }
}
