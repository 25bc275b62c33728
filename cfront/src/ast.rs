//! The syntax tree handed to the analyzer and the IR builder, plus the
//! conversion from pest's parse pairs. Nodes are tagged sums carrying the
//! source span they came from, so every later pass can report line and
//! column without holding on to the parser.

use matches::debug_assert_matches;
use pest::iterators::Pair;
use pest::Span;
use rcc::types::VarType;

use crate::literals;
use crate::parser::Rule;
use crate::{new_parser_error, Result};

#[derive(Debug)]
pub struct Program<'i> {
    pub items: Vec<Item<'i>>,
}

#[derive(Debug)]
pub enum Item<'i> {
    Function(Function<'i>),
    Decl(Decl<'i>),
}

#[derive(Debug)]
pub struct Function<'i> {
    pub name: &'i str,
    pub ret: VarType,
    pub params: Vec<Param<'i>>,
    pub body: Vec<Stmt<'i>>,
    pub span: Span<'i>,
}

#[derive(Debug)]
pub struct Param<'i> {
    pub name: &'i str,
    pub ty: VarType,
    pub span: Span<'i>,
}

#[derive(Debug)]
pub struct Decl<'i> {
    pub ty: VarType,
    pub declarators: Vec<Declarator<'i>>,
}

#[derive(Debug)]
pub struct Declarator<'i> {
    pub name: &'i str,
    pub len: Option<i32>,
    pub init: Option<Expr<'i>>,
    pub span: Span<'i>,
}

#[derive(Debug)]
pub enum Stmt<'i> {
    Decl(Decl<'i>),
    Expr(Expr<'i>),
    If {
        cond: Expr<'i>,
        then_branch: Box<Stmt<'i>>,
        else_branch: Option<Box<Stmt<'i>>>,
    },
    While {
        cond: Expr<'i>,
        body: Box<Stmt<'i>>,
    },
    DoWhile {
        body: Box<Stmt<'i>>,
        cond: Expr<'i>,
    },
    Break(Span<'i>),
    Continue(Span<'i>),
    Return {
        value: Option<Expr<'i>>,
        span: Span<'i>,
    },
    Block(Vec<Stmt<'i>>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Not,
    Neg,
    PreIncr,
    PreDecr,
    PostIncr,
    PostDecr,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    LogOr,
    LogAnd,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug)]
pub struct LValue<'i> {
    pub name: &'i str,
    pub index: Option<Box<Expr<'i>>>,
    pub span: Span<'i>,
}

#[derive(Debug)]
pub enum Expr<'i> {
    Int {
        value: i32,
        span: Span<'i>,
    },
    Char {
        value: i32,
        span: Span<'i>,
    },
    Float {
        text: String,
        span: Span<'i>,
    },
    Var {
        name: &'i str,
        span: Span<'i>,
    },
    Index {
        name: &'i str,
        index: Box<Expr<'i>>,
        span: Span<'i>,
    },
    Call {
        name: &'i str,
        args: Vec<Expr<'i>>,
        span: Span<'i>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr<'i>>,
        span: Span<'i>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr<'i>>,
        rhs: Box<Expr<'i>>,
        span: Span<'i>,
    },
    Assign {
        target: LValue<'i>,
        op: AssignOp,
        value: Box<Expr<'i>>,
        span: Span<'i>,
    },
}

impl<'i> Expr<'i> {
    pub fn span(&self) -> Span<'i> {
        match self {
            Expr::Int { span, .. }
            | Expr::Char { span, .. }
            | Expr::Float { span, .. }
            | Expr::Var { span, .. }
            | Expr::Index { span, .. }
            | Expr::Call { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Assign { span, .. } => span.clone(),
        }
    }

    /// True for the syntactic literals; the only initializers a global may
    /// carry.
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Int { .. } | Expr::Char { .. } | Expr::Float { .. } => true,
            _ => false,
        }
    }
}

pub fn build_program(pair: Pair<Rule>) -> Result<Program> {
    debug_assert_matches!(pair.as_rule(), Rule::program);
    let mut items = Vec::new();
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::function_def => items.push(Item::Function(build_function(item)?)),
            Rule::decl_stmt => items.push(Item::Decl(build_decl(item)?)),
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    Ok(Program { items })
}

fn process_type(pair: &Pair<Rule>) -> Result<VarType> {
    pair.as_str()
        .parse()
        .map_err(|err| new_parser_error(pair.as_span(), format!("{}", err)))
}

fn build_function(pair: Pair<Rule>) -> Result<Function> {
    let span = pair.as_span();
    let mut pairs = pair.into_inner();
    let ret = process_type(&pairs.next().unwrap())?;
    let name = pairs.next().unwrap().as_str();

    let mut params = Vec::new();
    let mut body = Vec::new();
    for pair in pairs {
        match pair.as_rule() {
            Rule::param_list => {
                for param in pair.into_inner() {
                    let param_span = param.as_span();
                    let mut parts = param.into_inner();
                    let ty = process_type(&parts.next().unwrap())?;
                    let param_name = parts.next().unwrap().as_str();
                    params.push(Param {
                        name: param_name,
                        ty,
                        span: param_span,
                    });
                }
            }
            Rule::block => {
                for stmt in pair.into_inner() {
                    body.push(build_stmt(stmt)?);
                }
            }
            _ => unreachable!(),
        }
    }
    Ok(Function {
        name,
        ret,
        params,
        body,
        span,
    })
}

fn build_decl(pair: Pair<Rule>) -> Result<Decl> {
    debug_assert_matches!(pair.as_rule(), Rule::decl_stmt);
    let mut pairs = pair.into_inner();
    let ty = process_type(&pairs.next().unwrap())?;

    let mut declarators = Vec::new();
    for declarator in pairs {
        let span = declarator.as_span();
        let mut parts = declarator.into_inner();
        let name = parts.next().unwrap().as_str();
        let mut len = None;
        let mut init = None;
        for part in parts {
            match part.as_rule() {
                Rule::array_len => {
                    let lit = part.into_inner().next().unwrap();
                    let lit_span = lit.as_span();
                    let count = literals::parse_int(lit)?;
                    if count <= 0 {
                        return Err(new_parser_error(
                            lit_span,
                            "array length must be positive".to_string(),
                        ));
                    }
                    len = Some(count);
                }
                Rule::expr => init = Some(build_expr(part)?),
                _ => unreachable!(),
            }
        }
        declarators.push(Declarator {
            name,
            len,
            init,
            span,
        });
    }
    Ok(Decl { ty, declarators })
}

fn build_stmt(pair: Pair<Rule>) -> Result<Stmt> {
    let span = pair.as_span();
    match pair.as_rule() {
        Rule::decl_stmt => Ok(Stmt::Decl(build_decl(pair)?)),
        Rule::expr_stmt => Ok(Stmt::Expr(build_expr(pair.into_inner().next().unwrap())?)),
        Rule::if_stmt => {
            let mut pairs = pair.into_inner();
            let cond = build_expr(pairs.next().unwrap())?;
            let then_branch = Box::new(build_stmt(pairs.next().unwrap())?);
            let else_branch = match pairs.next() {
                Some(els) => Some(Box::new(build_stmt(els)?)),
                None => None,
            };
            Ok(Stmt::If {
                cond,
                then_branch,
                else_branch,
            })
        }
        Rule::while_stmt => {
            let mut pairs = pair.into_inner();
            let cond = build_expr(pairs.next().unwrap())?;
            let body = Box::new(build_stmt(pairs.next().unwrap())?);
            Ok(Stmt::While { cond, body })
        }
        Rule::do_while_stmt => {
            let mut pairs = pair.into_inner();
            let body = Box::new(build_stmt(pairs.next().unwrap())?);
            let cond = build_expr(pairs.next().unwrap())?;
            Ok(Stmt::DoWhile { body, cond })
        }
        Rule::break_stmt => Ok(Stmt::Break(span)),
        Rule::continue_stmt => Ok(Stmt::Continue(span)),
        Rule::return_stmt => {
            let value = match pair.into_inner().next() {
                Some(expr) => Some(build_expr(expr)?),
                None => None,
            };
            Ok(Stmt::Return { value, span })
        }
        Rule::block => {
            let mut stmts = Vec::new();
            for stmt in pair.into_inner() {
                stmts.push(build_stmt(stmt)?);
            }
            Ok(Stmt::Block(stmts))
        }
        _ => unreachable!(),
    }
}

pub fn build_expr(pair: Pair<Rule>) -> Result<Expr> {
    debug_assert_matches!(pair.as_rule(), Rule::expr);
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::assign => build_assign(inner),
        Rule::binary => build_binary(inner),
        _ => unreachable!(),
    }
}

fn build_assign(pair: Pair<Rule>) -> Result<Expr> {
    let span = pair.as_span();
    let mut pairs = pair.into_inner();

    let lvalue = pairs.next().unwrap();
    let lvalue_span = lvalue.as_span();
    let mut parts = lvalue.into_inner();
    let name = parts.next().unwrap().as_str();
    let index = match parts.next() {
        Some(suffix) => Some(Box::new(build_expr(suffix.into_inner().next().unwrap())?)),
        None => None,
    };

    let op = match pairs.next().unwrap().as_str() {
        "=" => AssignOp::Assign,
        "+=" => AssignOp::Add,
        "-=" => AssignOp::Sub,
        "*=" => AssignOp::Mul,
        "/=" => AssignOp::Div,
        "%=" => AssignOp::Mod,
        _ => unreachable!(),
    };
    let value = Box::new(build_expr(pairs.next().unwrap())?);

    Ok(Expr::Assign {
        target: LValue {
            name,
            index,
            span: lvalue_span,
        },
        op,
        value,
        span,
    })
}

/// Operator table: (node, precedence). Higher binds tighter; all the
/// operators of the subset associate left.
fn binary_op(rule: Rule) -> (BinaryOp, u32) {
    match rule {
        Rule::log_or => (BinaryOp::LogOr, 1),
        Rule::log_and => (BinaryOp::LogAnd, 2),
        Rule::bit_or => (BinaryOp::BitOr, 3),
        Rule::bit_xor => (BinaryOp::BitXor, 4),
        Rule::bit_and => (BinaryOp::BitAnd, 5),
        Rule::eq => (BinaryOp::Eq, 6),
        Rule::ne => (BinaryOp::Ne, 6),
        Rule::lt => (BinaryOp::Lt, 7),
        Rule::le => (BinaryOp::Le, 7),
        Rule::gt => (BinaryOp::Gt, 7),
        Rule::ge => (BinaryOp::Ge, 7),
        Rule::add => (BinaryOp::Add, 8),
        Rule::sub => (BinaryOp::Sub, 8),
        Rule::mul => (BinaryOp::Mul, 9),
        Rule::div => (BinaryOp::Div, 9),
        Rule::rem => (BinaryOp::Mod, 9),
        other => panic!("not a binary operator: {:?}", other),
    }
}

fn build_binary(pair: Pair<Rule>) -> Result<Expr> {
    let mut pairs = pair.into_inner().peekable();
    let first = build_unary(pairs.next().unwrap())?;
    climb(first, &mut pairs, 0)
}

type Pairs<'i> = std::iter::Peekable<pest::iterators::Pairs<'i, Rule>>;

/// Classic precedence climbing over the flat `unary (op unary)*` list.
fn climb<'i>(mut lhs: Expr<'i>, pairs: &mut Pairs<'i>, min_prec: u32) -> Result<Expr<'i>> {
    while let Some(next) = pairs.peek() {
        let (_, prec) = binary_op(next.as_rule());
        if prec < min_prec {
            break;
        }
        let op_pair = pairs.next().unwrap();
        let (op, prec) = binary_op(op_pair.as_rule());
        let mut rhs = build_unary(pairs.next().unwrap())?;
        while let Some(next) = pairs.peek() {
            let (_, next_prec) = binary_op(next.as_rule());
            if next_prec > prec {
                rhs = climb(rhs, pairs, prec + 1)?;
            } else {
                break;
            }
        }
        lhs = Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            span: op_pair.as_span(),
        };
    }
    Ok(lhs)
}

fn build_unary(pair: Pair<Rule>) -> Result<Expr> {
    debug_assert_matches!(pair.as_rule(), Rule::unary);
    let pairs: Vec<Pair<Rule>> = pair.into_inner().collect();
    let (postfix, prefixes) = pairs.split_last().unwrap();

    let mut expr = build_postfix(postfix.clone())?;
    for prefix in prefixes.iter().rev() {
        let op = match prefix.as_rule() {
            Rule::bang => UnaryOp::Not,
            Rule::minus => UnaryOp::Neg,
            Rule::incr_op => UnaryOp::PreIncr,
            Rule::decr_op => UnaryOp::PreDecr,
            _ => unreachable!(),
        };
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
            span: prefix.as_span(),
        };
    }
    Ok(expr)
}

fn build_postfix(pair: Pair<Rule>) -> Result<Expr> {
    debug_assert_matches!(pair.as_rule(), Rule::postfix);
    let mut pairs = pair.into_inner();
    let mut expr = build_primary(pairs.next().unwrap())?;
    if let Some(suffix) = pairs.next() {
        let op = match suffix.as_rule() {
            Rule::incr_op => UnaryOp::PostIncr,
            Rule::decr_op => UnaryOp::PostDecr,
            _ => unreachable!(),
        };
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
            span: suffix.as_span(),
        };
    }
    Ok(expr)
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr> {
    let span = pair.as_span();
    match pair.as_rule() {
        Rule::float_lit => Ok(Expr::Float {
            text: literals::parse_float_text(&pair),
            span,
        }),
        Rule::int_lit => Ok(Expr::Int {
            value: literals::parse_int(pair)?,
            span,
        }),
        Rule::char_lit => Ok(Expr::Char {
            value: literals::parse_char(pair)?,
            span,
        }),
        Rule::call => {
            let mut pairs = pair.into_inner();
            let name = pairs.next().unwrap().as_str();
            let mut args = Vec::new();
            if let Some(arg_list) = pairs.next() {
                for arg in arg_list.into_inner() {
                    args.push(build_expr(arg)?);
                }
            }
            Ok(Expr::Call { name, args, span })
        }
        Rule::index_access => {
            let mut pairs = pair.into_inner();
            let name = pairs.next().unwrap().as_str();
            let index = Box::new(build_expr(pairs.next().unwrap())?);
            Ok(Expr::Index { name, index, span })
        }
        Rule::var => Ok(Expr::Var {
            name: pair.into_inner().next().unwrap().as_str(),
            span,
        }),
        Rule::paren => build_expr(pair.into_inner().next().unwrap()),
        _ => unreachable!(),
    }
}
