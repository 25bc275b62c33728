//! Semantic analysis: one walk over the syntax tree that builds the scope
//! tree, checks declarations and references, validates calls and control
//! flow placement, and collects unused-variable warnings.
//!
//! The first error aborts the compilation; warnings accumulate and are
//! reported by the driver without affecting the exit code.

use std::collections::HashMap;

use log::debug;
use rcc::symbols::{ScopeArena, ScopeId};
use rcc::types::VarType;

use crate::ast::{
    AssignOp, BinaryOp, Decl, Expr, Function, Item, Program, Stmt, UnaryOp,
};
use crate::{new_parser_error, Result};

/// Register-passing convention floor across the supported targets.
pub const MAX_ARGS: usize = 4;

#[derive(Clone, Debug)]
pub struct FnSig {
    pub ret: VarType,
    pub params: Vec<VarType>,
}

/// Functions available without declaration; they resolve to the C runtime
/// of the host platform.
pub fn predeclared() -> HashMap<String, FnSig> {
    let mut map = HashMap::new();
    map.insert(
        "putchar".to_string(),
        FnSig {
            ret: VarType::Char,
            params: vec![VarType::Char],
        },
    );
    map.insert(
        "getchar".to_string(),
        FnSig {
            ret: VarType::Char,
            params: Vec::new(),
        },
    );
    map
}

/// Collects every function signature up front so calls may reference
/// functions defined later in the file (mutual recursion).
pub fn collect_functions(program: &Program) -> Result<HashMap<String, FnSig>> {
    let mut functions = predeclared();
    for item in &program.items {
        if let Item::Function(func) = item {
            if functions.contains_key(func.name) {
                return Err(new_parser_error(
                    func.span.clone(),
                    format!("function '{}' already defined", func.name),
                ));
            }
            if func.params.len() > MAX_ARGS {
                return Err(new_parser_error(
                    func.span.clone(),
                    format!("functions are limited to {} parameters", MAX_ARGS),
                ));
            }
            functions.insert(
                func.name.to_string(),
                FnSig {
                    ret: func.ret,
                    params: func.params.iter().map(|p| p.ty).collect(),
                },
            );
        }
    }
    Ok(functions)
}

struct Analyzer<'f> {
    scopes: ScopeArena,
    current: ScopeId,
    functions: &'f HashMap<String, FnSig>,
    warnings: Vec<String>,
    loop_depth: u32,
    ret: VarType,
}

/// Validates the whole program and returns the accumulated warnings.
pub fn analyze(program: &Program, functions: &HashMap<String, FnSig>) -> Result<Vec<String>> {
    let mut scopes = ScopeArena::new();
    let global = scopes.push(None);
    let mut analyzer = Analyzer {
        scopes,
        current: global,
        functions,
        warnings: Vec::new(),
        loop_depth: 0,
        ret: VarType::Void,
    };

    for item in &program.items {
        match item {
            Item::Decl(decl) => analyzer.global_decl(decl)?,
            Item::Function(func) => analyzer.function(func)?,
        }
    }
    analyzer.warn_unused(global);
    debug!("validation finished with {} warning(s)", analyzer.warnings.len());
    Ok(analyzer.warnings)
}

impl<'f> Analyzer<'f> {
    fn warn_unused(&mut self, scope: ScopeId) {
        for name in self.scopes.unused_names(scope) {
            self.warnings
                .push(format!("variable '{}' declared but not used", name));
        }
    }

    fn global_decl(&mut self, decl: &Decl) -> Result<()> {
        for declarator in &decl.declarators {
            if decl.ty == VarType::Void {
                return Err(new_parser_error(
                    declarator.span.clone(),
                    "variable cannot have type 'void'".to_string(),
                ));
            }
            if declarator.len.is_some() {
                return Err(new_parser_error(
                    declarator.span.clone(),
                    "global arrays are not supported".to_string(),
                ));
            }
            if self
                .scopes
                .add_global(self.current, declarator.name, decl.ty)
                .is_err()
            {
                return Err(new_parser_error(
                    declarator.span.clone(),
                    format!("redeclaration of '{}'", declarator.name),
                ));
            }
            if let Some(init) = &declarator.init {
                if !init.is_literal() {
                    return Err(new_parser_error(
                        declarator.span.clone(),
                        "global variable must be initialized with a constant".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn function(&mut self, func: &Function) -> Result<()> {
        let params_scope = self.scopes.push(Some(self.current));
        let saved = self.current;
        self.current = params_scope;
        self.ret = func.ret;

        for param in &func.params {
            if param.ty == VarType::Void {
                return Err(new_parser_error(
                    param.span.clone(),
                    "parameter cannot have type 'void'".to_string(),
                ));
            }
            if self
                .scopes
                .add_param(params_scope, param.name, param.ty)
                .is_err()
            {
                return Err(new_parser_error(
                    param.span.clone(),
                    format!("redeclaration of '{}'", param.name),
                ));
            }
        }

        self.block(&func.body)?;
        self.warn_unused(params_scope);
        self.current = saved;
        Ok(())
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<()> {
        let scope = self.scopes.push(Some(self.current));
        let saved = self.current;
        self.current = scope;
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        self.warn_unused(scope);
        self.current = saved;
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Decl(decl) => self.local_decl(decl),
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond)?;
                self.stmt(then_branch)?;
                if let Some(els) = else_branch {
                    self.stmt(els)?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.expr(cond)?;
                self.loop_depth += 1;
                let result = self.stmt(body);
                self.loop_depth -= 1;
                result
            }
            Stmt::DoWhile { body, cond } => {
                self.loop_depth += 1;
                let result = self.stmt(body);
                self.loop_depth -= 1;
                result?;
                self.expr(cond)
            }
            Stmt::Break(span) => {
                if self.loop_depth == 0 {
                    return Err(new_parser_error(
                        span.clone(),
                        "break outside of a loop".to_string(),
                    ));
                }
                Ok(())
            }
            Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    return Err(new_parser_error(
                        span.clone(),
                        "continue outside of a loop".to_string(),
                    ));
                }
                Ok(())
            }
            Stmt::Return { value, span } => match (value, self.ret) {
                (Some(_), VarType::Void) => Err(new_parser_error(
                    span.clone(),
                    "return with a value in a function returning void".to_string(),
                )),
                (None, ret) if ret != VarType::Void => Err(new_parser_error(
                    span.clone(),
                    "return without a value in a function returning non-void".to_string(),
                )),
                (Some(value), _) => self.expr(value),
                (None, _) => Ok(()),
            },
            Stmt::Block(stmts) => self.block(stmts),
        }
    }

    fn local_decl(&mut self, decl: &Decl) -> Result<()> {
        for declarator in &decl.declarators {
            if decl.ty == VarType::Void {
                return Err(new_parser_error(
                    declarator.span.clone(),
                    "variable cannot have type 'void'".to_string(),
                ));
            }
            if declarator.len.is_some() && declarator.init.is_some() {
                return Err(new_parser_error(
                    declarator.span.clone(),
                    "array initializers are not supported".to_string(),
                ));
            }
            let ty = if declarator.len.is_some() {
                decl.ty.pointer()
            } else {
                decl.ty
            };
            let count = declarator.len.unwrap_or(1);
            if self
                .scopes
                .add_local(self.current, declarator.name, ty, count)
                .is_err()
            {
                return Err(new_parser_error(
                    declarator.span.clone(),
                    format!("redeclaration of '{}'", declarator.name),
                ));
            }
            if let Some(init) = &declarator.init {
                self.expr(init)?;
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Int { .. } | Expr::Char { .. } | Expr::Float { .. } => Ok(()),
            Expr::Var { name, span } => {
                if !self.scopes.mark_used(self.current, name) {
                    return Err(new_parser_error(
                        span.clone(),
                        format!("variable '{}' used before declaration", name),
                    ));
                }
                Ok(())
            }
            Expr::Index { name, index, span } => {
                match self.scopes.find_visible(self.current, name) {
                    None => {
                        return Err(new_parser_error(
                            span.clone(),
                            format!("variable '{}' used before declaration", name),
                        ))
                    }
                    Some(symbol) if symbol.ty.element() == symbol.ty => {
                        return Err(new_parser_error(
                            span.clone(),
                            format!("variable '{}' is not an array", name),
                        ))
                    }
                    Some(_) => {}
                }
                self.scopes.mark_used(self.current, name);
                self.expr(index)
            }
            Expr::Call { name, args, span } => {
                let sig = match self.functions.get(*name) {
                    Some(sig) => sig,
                    None => {
                        return Err(new_parser_error(
                            span.clone(),
                            format!("call to unknown function '{}'", name),
                        ))
                    }
                };
                if args.len() != sig.params.len() {
                    return Err(new_parser_error(
                        span.clone(),
                        format!(
                            "function '{}' expects {} argument(s), got {}",
                            name,
                            sig.params.len(),
                            args.len()
                        ),
                    ));
                }
                for arg in args {
                    self.expr(arg)?;
                }
                Ok(())
            }
            Expr::Unary { op, operand, span } => match op {
                UnaryOp::PreIncr | UnaryOp::PreDecr | UnaryOp::PostIncr | UnaryOp::PostDecr => {
                    match operand.as_ref() {
                        Expr::Var { .. } => self.expr(operand),
                        _ => Err(new_parser_error(
                            span.clone(),
                            "increment and decrement require a variable".to_string(),
                        )),
                    }
                }
                UnaryOp::Not | UnaryOp::Neg => self.expr(operand),
            },
            Expr::Binary { op, lhs, rhs, span } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                if *op == BinaryOp::Mod
                    && (self.expr_type(lhs) == VarType::Float
                        || self.expr_type(rhs) == VarType::Float)
                {
                    return Err(new_parser_error(
                        span.clone(),
                        "invalid operands to '%'".to_string(),
                    ));
                }
                Ok(())
            }
            Expr::Assign {
                target, op, value, ..
            } => {
                let target_ty = match self.scopes.find_visible(self.current, target.name) {
                    None => {
                        return Err(new_parser_error(
                            target.span.clone(),
                            format!("variable '{}' used before declaration", target.name),
                        ))
                    }
                    Some(symbol) => symbol.ty,
                };
                // A write counts as a use; only never-touched variables warn.
                self.scopes.mark_used(self.current, target.name);

                match &target.index {
                    Some(index) => {
                        if target_ty.element() == target_ty {
                            return Err(new_parser_error(
                                target.span.clone(),
                                format!("variable '{}' is not an array", target.name),
                            ));
                        }
                        self.expr(index)?;
                    }
                    None => {
                        if target_ty.element() != target_ty {
                            return Err(new_parser_error(
                                target.span.clone(),
                                format!("cannot assign to array '{}'", target.name),
                            ));
                        }
                    }
                }
                if *op == AssignOp::Mod && target_ty.is_float() {
                    return Err(new_parser_error(
                        target.span.clone(),
                        "invalid operands to '%'".to_string(),
                    ));
                }
                self.expr(value)?;
                if self.expr_type(value) == VarType::Void {
                    return Err(new_parser_error(
                        value.span(),
                        "cannot assign a value of type 'void'".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Static type of an already validated expression; used for the few
    /// operator checks the subset needs.
    fn expr_type(&self, expr: &Expr) -> VarType {
        match expr {
            Expr::Int { .. } => VarType::Int,
            Expr::Char { .. } => VarType::Char,
            Expr::Float { .. } => VarType::Float,
            Expr::Var { name, .. } => match self.scopes.find_visible(self.current, name) {
                Some(symbol) => symbol.ty,
                None => VarType::Int,
            },
            Expr::Index { name, .. } => match self.scopes.find_visible(self.current, name) {
                Some(symbol) => symbol.ty.element(),
                None => VarType::Int,
            },
            Expr::Call { name, .. } => match self.functions.get(*name) {
                Some(sig) => sig.ret,
                None => VarType::Int,
            },
            Expr::Unary { op, operand, .. } => match op {
                UnaryOp::Not => VarType::Int,
                _ => self.expr_type(operand),
            },
            Expr::Binary { op, lhs, rhs, .. } => match op {
                BinaryOp::LogOr
                | BinaryOp::LogAnd
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge => VarType::Int,
                _ => VarType::higher(self.expr_type(lhs), self.expr_type(rhs)),
            },
            Expr::Assign { target, .. } => match self.scopes.find_visible(self.current, target.name)
            {
                Some(symbol) => {
                    if target.index.is_some() {
                        symbol.ty.element()
                    } else {
                        symbol.ty
                    }
                }
                None => VarType::Int,
            },
        }
    }
}
