//! Second walk over the syntax tree: builds one control-flow graph per
//! function, allocating stack slots and expression temporaries as it goes.
//!
//! Expression emission returns the *name* of the symbol holding the result;
//! operands are resolved into typed IR operands at the moment an
//! instruction is appended, and operand temporaries are reclaimed right
//! after, so result temporaries reuse their slots. Mixed int/float operands
//! get an `intToFloat` on the narrower side. Scopes close with
//! `synchronize`, so a block's slots stay allocated for the rest of the
//! function and no two live symbols ever share an offset.

use std::collections::HashMap;

use log::debug;
use rcc::ir::{AluOp, BlockId, Cfg, CmpOp, Context, Function as IrFunction, Op, Operand};
use rcc::symbols::{self, ScopeId};
use rcc::target::RETVAL;
use rcc::types::VarType;

use crate::ast::{
    AssignOp, BinaryOp, Decl, Declarator, Expr, Function, Item, LValue, Program, Stmt, UnaryOp,
};
use crate::sema::FnSig;

struct Builder<'f> {
    ctx: Context,
    functions: &'f HashMap<String, FnSig>,
    scope: ScopeId,
    loops: Vec<(BlockId, BlockId)>,
}

/// Builds the IR of a validated program: the shared compilation context
/// (scopes, read-only pool, globals, counters) and one CFG per function.
pub fn build(program: &Program, functions: &HashMap<String, FnSig>) -> (Context, Vec<Cfg>) {
    let ctx = Context::new();
    let scope = ctx.global_scope;
    let mut builder = Builder {
        ctx,
        functions,
        scope,
        loops: Vec::new(),
    };

    let mut cfgs = Vec::new();
    for item in &program.items {
        match item {
            Item::Decl(decl) => builder.global_decl(decl),
            Item::Function(func) => cfgs.push(builder.function(func)),
        }
    }
    (builder.ctx, cfgs)
}

fn literal_text(expr: &Expr) -> String {
    match expr {
        Expr::Int { value, .. } => value.to_string(),
        Expr::Char { value, .. } => value.to_string(),
        Expr::Float { text, .. } => text.clone(),
        other => panic!("global initializer is not a literal: {:?}", other),
    }
}

fn alu_op(op: AssignOp) -> AluOp {
    match op {
        AssignOp::Add => AluOp::Add,
        AssignOp::Sub => AluOp::Sub,
        AssignOp::Mul => AluOp::Mul,
        AssignOp::Div => AluOp::Div,
        AssignOp::Mod => AluOp::Mod,
        AssignOp::Assign => panic!("plain assignment has no ALU function"),
    }
}

impl<'f> Builder<'f> {
    fn global_decl(&mut self, decl: &Decl) {
        for declarator in &decl.declarators {
            if let Err(err) = self.ctx.globals.declare(
                &mut self.ctx.scopes,
                self.ctx.global_scope,
                declarator.name,
                decl.ty,
            ) {
                panic!("{}", err);
            }
            if let Some(init) = &declarator.init {
                if let Err(err) = self.ctx.globals.set_value(
                    &self.ctx.scopes,
                    self.ctx.global_scope,
                    declarator.name,
                    literal_text(init),
                ) {
                    panic!("{}", err);
                }
            }
        }
    }

    fn function(&mut self, func: &Function) -> Cfg {
        debug!("building CFG for function '{}'", func.name);
        let params_scope = self.ctx.scopes.push(Some(self.ctx.global_scope));
        let ir_func = IrFunction {
            name: func.name.to_string(),
            ret: func.ret,
            params: func
                .params
                .iter()
                .map(|p| (p.name.to_string(), p.ty))
                .collect(),
        };
        let mut cfg = Cfg::new(ir_func, params_scope);

        for param in &func.params {
            if let Err(err) = self.ctx.scopes.add_param(params_scope, param.name, param.ty) {
                panic!("{}", err);
            }
        }
        let retval_ty = if func.ret == VarType::Void {
            VarType::Int
        } else {
            func.ret
        };
        if let Err(err) = self.ctx.scopes.add_local(params_scope, RETVAL, retval_ty, 1) {
            panic!("{}", err);
        }

        self.scope = params_scope;
        self.block(&mut cfg, &func.body);
        self.close_into_epilogue(&mut cfg);
        self.scope = self.ctx.global_scope;
        cfg
    }

    /// Frees an expression result if it is the topmost temporary; named
    /// variables and buried temporaries are left alone.
    fn reclaim(&mut self, name: &str) {
        if symbols::is_temp(name) && self.ctx.scopes.is_top_temp(self.scope, name) {
            self.ctx.scopes.free_last_temp(self.scope);
        }
    }

    /// Appends an `intToFloat`/`floatToInt` when `name` does not already
    /// hold a value of `to`'s register class.
    fn convert(&mut self, cfg: &mut Cfg, name: String, to: VarType) -> String {
        let from = self.ctx.type_of(self.scope, &name);
        let (op, result) = if !from.is_float() && to == VarType::Float {
            (Op::IntToFloat, VarType::Float)
        } else if from == VarType::Float && !to.is_float() && to != VarType::Void {
            (Op::FloatToInt, VarType::Int)
        } else {
            return name;
        };
        let src = self.ctx.resolve(self.scope, &name);
        self.reclaim(&name);
        let dest = self.ctx.scopes.add_temp(self.scope, result);
        let dest_op = self.ctx.resolve(self.scope, &dest);
        cfg.add_instr(op, result, vec![dest_op, src]);
        dest
    }

    fn block(&mut self, cfg: &mut Cfg, stmts: &[Stmt]) {
        let parent = self.scope;
        let scope = self.ctx.scopes.push(Some(parent));
        self.scope = scope;
        for stmt in stmts {
            self.stmt(cfg, stmt);
        }
        self.ctx.scopes.synchronize(parent, scope);
        self.scope = parent;
    }

    fn stmt(&mut self, cfg: &mut Cfg, stmt: &Stmt) {
        match stmt {
            Stmt::Decl(decl) => {
                for declarator in &decl.declarators {
                    self.local_decl(cfg, decl.ty, declarator);
                }
            }
            Stmt::Expr(expr) => {
                let name = self.emit_expr(cfg, expr);
                self.reclaim(&name);
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.emit_if(cfg, cond, then_branch, else_branch.as_deref()),
            Stmt::While { cond, body } => self.emit_while(cfg, cond, body),
            Stmt::DoWhile { body, cond } => self.emit_do_while(cfg, body, cond),
            Stmt::Break(_) => self.emit_loop_exit(cfg, true),
            Stmt::Continue(_) => self.emit_loop_exit(cfg, false),
            Stmt::Return { value, .. } => self.emit_return(cfg, value.as_ref()),
            Stmt::Block(stmts) => self.block(cfg, stmts),
        }
    }

    fn local_decl(&mut self, cfg: &mut Cfg, ty: VarType, declarator: &Declarator) {
        let (slot_ty, count) = match declarator.len {
            Some(len) => (ty.pointer(), len),
            None => (ty, 1),
        };
        if let Err(err) = self
            .ctx
            .scopes
            .add_local(self.scope, declarator.name, slot_ty, count)
        {
            panic!("{}", err);
        }
        if let Some(init) = &declarator.init {
            let value = self.emit_expr(cfg, init);
            let value = self.convert(cfg, value, ty);
            let value_op = self.ctx.resolve(self.scope, &value);
            let target_op = self.ctx.resolve(self.scope, declarator.name);
            self.reclaim(&value);
            cfg.add_instr(Op::Copy, ty, vec![target_op, value_op]);
        }
    }

    /// Emits the condition into the current block and records the resolved
    /// test operand for the branch at the block's tail.
    fn emit_condition(&mut self, cfg: &mut Cfg, cond: &Expr) {
        let name = self.emit_expr(cfg, cond);
        let test = self.ctx.resolve(self.scope, &name);
        self.reclaim(&name);
        cfg.current_mut().test_var = Some(test);
    }

    fn emit_if(
        &mut self,
        cfg: &mut Cfg,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) {
        self.emit_condition(cfg, cond);
        let head = cfg.current;
        let then_block = cfg.new_block(&mut self.ctx);
        let else_block = cfg.new_block(&mut self.ctx);
        cfg.blocks[head].exit_true = Some(then_block);
        cfg.blocks[head].exit_false = Some(else_block);

        cfg.current = then_block;
        self.stmt(cfg, then_branch);
        let then_end = cfg.current;

        cfg.current = else_block;
        if let Some(els) = else_branch {
            self.stmt(cfg, els);
        }
        let else_end = cfg.current;

        let join = cfg.new_block(&mut self.ctx);
        if cfg.blocks[then_end].exit_true.is_none() {
            cfg.blocks[then_end].exit_true = Some(join);
        }
        if cfg.blocks[else_end].exit_true.is_none() {
            cfg.blocks[else_end].exit_true = Some(join);
        }
        cfg.current = join;
    }

    fn emit_while(&mut self, cfg: &mut Cfg, cond: &Expr, body: &Stmt) {
        let cond_block = cfg.new_block(&mut self.ctx);
        if cfg.current_mut().exit_true.is_none() {
            cfg.current_mut().exit_true = Some(cond_block);
        }
        cfg.current = cond_block;
        self.emit_condition(cfg, cond);

        let body_block = cfg.new_block(&mut self.ctx);
        let exit_block = cfg.new_block(&mut self.ctx);
        cfg.blocks[cond_block].exit_true = Some(body_block);
        cfg.blocks[cond_block].exit_false = Some(exit_block);

        self.loops.push((cond_block, exit_block));
        cfg.current = body_block;
        self.stmt(cfg, body);
        self.loops.pop();

        if cfg.current_mut().exit_true.is_none() {
            cfg.current_mut().exit_true = Some(cond_block);
        }
        cfg.current = exit_block;
    }

    fn emit_do_while(&mut self, cfg: &mut Cfg, body: &Stmt, cond: &Expr) {
        let body_block = cfg.new_block(&mut self.ctx);
        let cond_block = cfg.new_block(&mut self.ctx);
        let exit_block = cfg.new_block(&mut self.ctx);
        if cfg.current_mut().exit_true.is_none() {
            cfg.current_mut().exit_true = Some(body_block);
        }

        self.loops.push((cond_block, exit_block));
        cfg.current = body_block;
        self.stmt(cfg, body);
        self.loops.pop();
        if cfg.current_mut().exit_true.is_none() {
            cfg.current_mut().exit_true = Some(cond_block);
        }

        cfg.current = cond_block;
        self.emit_condition(cfg, cond);
        cfg.blocks[cond_block].exit_true = Some(body_block);
        cfg.blocks[cond_block].exit_false = Some(exit_block);
        cfg.current = exit_block;
    }

    /// `break` (true) or `continue` (false): wires the current block to the
    /// innermost loop's exit or condition block and parks any unreachable
    /// trailing statements in a fresh block.
    fn emit_loop_exit(&mut self, cfg: &mut Cfg, is_break: bool) {
        let (cond_block, exit_block) = match self.loops.last() {
            Some(targets) => *targets,
            None => panic!("loop exit emitted outside of a loop"),
        };
        let target = if is_break { exit_block } else { cond_block };
        if cfg.current_mut().exit_true.is_none() {
            cfg.current_mut().exit_true = Some(target);
        }
        let dead = cfg.new_block(&mut self.ctx);
        cfg.current = dead;
    }

    fn emit_return(&mut self, cfg: &mut Cfg, value: Option<&Expr>) {
        if let Some(value) = value {
            let ret = cfg.func.ret;
            let name = self.emit_expr(cfg, value);
            let name = self.convert(cfg, name, ret);
            let value_op = self.ctx.resolve(self.scope, &name);
            let retval_op = self.ctx.resolve(self.scope, RETVAL);
            self.reclaim(&name);
            cfg.add_instr(Op::Copy, ret, vec![retval_op, value_op]);
        }
        self.close_into_epilogue(cfg);
        let dead = cfg.new_block(&mut self.ctx);
        cfg.current = dead;
    }

    /// Wires the current block to the epilogue with an explicit jump, which
    /// lets the emitter fall through instead of emitting a second one.
    fn close_into_epilogue(&mut self, cfg: &mut Cfg) {
        if cfg.current_mut().exit_true.is_none() {
            let label = cfg.epilogue_label().to_string();
            cfg.add_instr(Op::Jmp, VarType::Int, vec![Operand::Label { name: label }]);
            cfg.current_mut().exit_true = Some(cfg.epilogue);
        }
    }

    fn emit_expr(&mut self, cfg: &mut Cfg, expr: &Expr) -> String {
        match expr {
            Expr::Int { value, .. } => {
                self.ctx
                    .scopes
                    .add_temp_const(self.scope, VarType::Int, value.to_string())
            }
            Expr::Char { value, .. } => {
                self.ctx
                    .scopes
                    .add_temp_const(self.scope, VarType::Char, value.to_string())
            }
            Expr::Float { text, .. } => {
                self.ctx
                    .scopes
                    .add_temp_const(self.scope, VarType::Float, text.clone())
            }
            Expr::Var { name, .. } => (*name).to_string(),
            Expr::Index { name, index, .. } => {
                let idx = self.emit_expr(cfg, index);
                let array_ty = self.ctx.type_of(self.scope, name);
                let base = self.ctx.resolve(self.scope, name);
                let idx_op = self.ctx.resolve(self.scope, &idx);
                self.reclaim(&idx);
                let dest = self.ctx.scopes.add_temp(self.scope, array_ty.element());
                let dest_op = self.ctx.resolve(self.scope, &dest);
                cfg.add_instr(Op::LoadIdx, array_ty, vec![dest_op, base, idx_op]);
                dest
            }
            Expr::Call { name, args, .. } => self.emit_call(cfg, name, args),
            Expr::Unary { op, operand, .. } => self.emit_unary(cfg, *op, operand),
            Expr::Binary { op, lhs, rhs, .. } => self.emit_binary(cfg, *op, lhs, rhs),
            Expr::Assign {
                target, op, value, ..
            } => self.emit_assign(cfg, target, *op, value),
        }
    }

    fn emit_call(&mut self, cfg: &mut Cfg, name: &str, args: &[Expr]) -> String {
        let sig = match self.functions.get(name) {
            Some(sig) => sig.clone(),
            None => panic!("unknown function '{}' during IR emission", name),
        };

        let mut arg_names = Vec::new();
        for (arg, param_ty) in args.iter().zip(&sig.params) {
            let value = self.emit_expr(cfg, arg);
            let value = self.convert(cfg, value, *param_ty);
            arg_names.push(value);
        }
        let arg_ops: Vec<Operand> = arg_names
            .iter()
            .map(|arg| self.ctx.resolve(self.scope, arg))
            .collect();
        for arg in arg_names.iter().rev() {
            self.reclaim(arg);
        }

        let result_ty = if sig.ret == VarType::Void {
            VarType::Int
        } else {
            sig.ret
        };
        let dest = self.ctx.scopes.add_temp(self.scope, result_ty);
        let mut operands = vec![
            Operand::Label {
                name: name.to_string(),
            },
            self.ctx.resolve(self.scope, &dest),
        ];
        operands.extend(arg_ops);
        cfg.add_instr(Op::Call, result_ty, operands);
        dest
    }

    fn emit_unary(&mut self, cfg: &mut Cfg, op: UnaryOp, operand: &Expr) -> String {
        match op {
            UnaryOp::Not => {
                let src = self.emit_expr(cfg, operand);
                let src_op = self.ctx.resolve(self.scope, &src);
                self.reclaim(&src);
                let dest = self.ctx.scopes.add_temp(self.scope, VarType::Int);
                let dest_op = self.ctx.resolve(self.scope, &dest);
                cfg.add_instr(Op::Not, VarType::Int, vec![dest_op, src_op]);
                dest
            }
            UnaryOp::Neg => {
                let src = self.emit_expr(cfg, operand);
                let ty = self.ctx.type_of(self.scope, &src);
                let src_op = self.ctx.resolve(self.scope, &src);
                self.reclaim(&src);
                let dest = self.ctx.scopes.add_temp(self.scope, ty);
                let dest_op = self.ctx.resolve(self.scope, &dest);
                if ty == VarType::Float {
                    let mask = self.ctx.rodata.negation_mask();
                    cfg.add_instr(
                        Op::Neg,
                        VarType::Float,
                        vec![dest_op, src_op, Operand::Ro { label: mask }],
                    );
                } else {
                    cfg.add_instr(Op::Neg, ty, vec![dest_op, src_op]);
                }
                dest
            }
            UnaryOp::PreIncr | UnaryOp::PostIncr | UnaryOp::PreDecr | UnaryOp::PostDecr => {
                let name = match operand {
                    Expr::Var { name, .. } => *name,
                    other => panic!("increment target is not a variable: {:?}", other),
                };
                let ty = self.ctx.type_of(self.scope, name);
                let var_op = self.ctx.resolve(self.scope, name);
                let ir_op = match op {
                    UnaryOp::PreIncr | UnaryOp::PostIncr => Op::Incr,
                    _ => Op::Decr,
                };
                if ty == VarType::Float {
                    let one =
                        self.ctx
                            .scopes
                            .add_temp_const(self.scope, VarType::Float, "1.0".to_string());
                    let one_op = self.ctx.resolve(self.scope, &one);
                    self.reclaim(&one);
                    cfg.add_instr(ir_op, VarType::Float, vec![var_op, one_op]);
                } else {
                    cfg.add_instr(ir_op, ty, vec![var_op]);
                }
                name.to_string()
            }
        }
    }

    fn emit_binary(&mut self, cfg: &mut Cfg, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> String {
        let left = self.emit_expr(cfg, lhs);
        let right = self.emit_expr(cfg, rhs);
        let promoted = VarType::higher(
            self.ctx.type_of(self.scope, &left),
            self.ctx.type_of(self.scope, &right),
        );
        let (left, right) = if promoted == VarType::Float {
            let left = self.convert(cfg, left, VarType::Float);
            let right = self.convert(cfg, right, VarType::Float);
            (left, right)
        } else {
            (left, right)
        };

        let left_op = self.ctx.resolve(self.scope, &left);
        let right_op = self.ctx.resolve(self.scope, &right);
        self.reclaim(&right);
        self.reclaim(&left);

        let (ir_op, tag, result_ty) = match op {
            BinaryOp::Add => (Op::Alu(AluOp::Add), promoted, promoted),
            BinaryOp::Sub => (Op::Alu(AluOp::Sub), promoted, promoted),
            BinaryOp::Mul => (Op::Alu(AluOp::Mul), promoted, promoted),
            BinaryOp::Div => (Op::Alu(AluOp::Div), promoted, promoted),
            BinaryOp::Mod => (Op::Alu(AluOp::Mod), promoted, promoted),
            BinaryOp::BitAnd => (Op::Alu(AluOp::And), promoted, promoted),
            BinaryOp::BitOr => (Op::Alu(AluOp::Or), promoted, promoted),
            BinaryOp::BitXor => (Op::Alu(AluOp::Xor), promoted, promoted),
            BinaryOp::Eq => (Op::Cmp(CmpOp::Eq), promoted, VarType::Int),
            BinaryOp::Ne => (Op::Cmp(CmpOp::Ne), promoted, VarType::Int),
            BinaryOp::Lt => (Op::Cmp(CmpOp::Lt), promoted, VarType::Int),
            BinaryOp::Le => (Op::Cmp(CmpOp::Le), promoted, VarType::Int),
            BinaryOp::Gt => (Op::Cmp(CmpOp::Gt), promoted, VarType::Int),
            BinaryOp::Ge => (Op::Cmp(CmpOp::Ge), promoted, VarType::Int),
            BinaryOp::LogAnd => (Op::LogAnd, VarType::Int, VarType::Int),
            BinaryOp::LogOr => (Op::LogOr, VarType::Int, VarType::Int),
        };
        let dest = self.ctx.scopes.add_temp(self.scope, result_ty);
        let dest_op = self.ctx.resolve(self.scope, &dest);
        cfg.add_instr(ir_op, tag, vec![dest_op, left_op, right_op]);
        dest
    }

    fn emit_assign(
        &mut self,
        cfg: &mut Cfg,
        target: &LValue,
        op: AssignOp,
        value: &Expr,
    ) -> String {
        match &target.index {
            None => {
                let ty = self.ctx.type_of(self.scope, target.name);
                let value_name = self.emit_expr(cfg, value);
                let value_name = self.convert(cfg, value_name, ty);
                let value_op = self.ctx.resolve(self.scope, &value_name);
                let target_op = self.ctx.resolve(self.scope, target.name);
                self.reclaim(&value_name);
                match op {
                    AssignOp::Assign => cfg.add_instr(Op::Copy, ty, vec![target_op, value_op]),
                    compound => cfg.add_instr(
                        Op::Alu(alu_op(compound)),
                        ty,
                        vec![target_op.clone(), target_op, value_op],
                    ),
                }
                target.name.to_string()
            }
            Some(index) => {
                let array_ty = self.ctx.type_of(self.scope, target.name);
                let value_name = self.emit_expr(cfg, value);
                let value_name = self.convert(cfg, value_name, array_ty.element());
                let idx_name = self.emit_expr(cfg, index);
                let base = self.ctx.resolve(self.scope, target.name);
                let value_op = self.ctx.resolve(self.scope, &value_name);
                let idx_op = self.ctx.resolve(self.scope, &idx_name);
                self.reclaim(&idx_name);
                let ir_op = match op {
                    AssignOp::Assign => Op::StoreIdx,
                    compound => Op::AluIdx(alu_op(compound)),
                };
                cfg.add_instr(ir_op, array_ty, vec![base, value_op, idx_op]);
                // The stored value doubles as the expression's result; its
                // temporary stays alive for the caller to reclaim.
                value_name
            }
        }
    }
}
