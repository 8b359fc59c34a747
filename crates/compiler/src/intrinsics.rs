//! Built-in operator signatures for Tack.
//!
//! Every intrinsic has a fixed stack effect. Effects may be generic over
//! the placeholders `a`, `b`, `c`: a placeholder binds to whatever type is
//! popped for it first and must match on every later use.

use crate::lexer::TokenKind;
use crate::types::Type;
use std::fmt;

/// A built-in operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    Shl,
    Shr,
    Not,
    Neg,
    Dup,
    Drop,
    Swap,
    Rot,
    Over,
    /// Reinterpret the top of the stack as the given type.
    Cast(Type),
}

impl Intrinsic {
    /// Map a token to its intrinsic, if it is one. The cast keywords map
    /// through here too (`str` casts to `ptr`).
    pub fn from_token(kind: TokenKind) -> Option<Intrinsic> {
        let op = match kind {
            TokenKind::Plus => Intrinsic::Add,
            TokenKind::Minus => Intrinsic::Sub,
            TokenKind::Star => Intrinsic::Mul,
            TokenKind::Slash => Intrinsic::Div,
            TokenKind::Lt => Intrinsic::Lt,
            TokenKind::Gt => Intrinsic::Gt,
            TokenKind::Le => Intrinsic::Le,
            TokenKind::Ge => Intrinsic::Ge,
            TokenKind::Eq => Intrinsic::Eq,
            TokenKind::Ne => Intrinsic::Ne,
            TokenKind::BitAnd => Intrinsic::BitAnd,
            TokenKind::BitOr => Intrinsic::BitOr,
            TokenKind::Shl => Intrinsic::Shl,
            TokenKind::Shr => Intrinsic::Shr,
            TokenKind::KwNot => Intrinsic::Not,
            TokenKind::KwNeg => Intrinsic::Neg,
            TokenKind::KwDup => Intrinsic::Dup,
            TokenKind::KwDrop => Intrinsic::Drop,
            TokenKind::KwSwap => Intrinsic::Swap,
            TokenKind::KwRot => Intrinsic::Rot,
            TokenKind::KwOver => Intrinsic::Over,
            TokenKind::KwInt => Intrinsic::Cast(Type::Int),
            TokenKind::KwBool => Intrinsic::Cast(Type::Bool),
            TokenKind::KwLong => Intrinsic::Cast(Type::Long),
            TokenKind::KwPtr | TokenKind::KwStr => Intrinsic::Cast(Type::Ptr),
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intrinsic::Add => write!(f, "+"),
            Intrinsic::Sub => write!(f, "-"),
            Intrinsic::Mul => write!(f, "*"),
            Intrinsic::Div => write!(f, "/"),
            Intrinsic::Lt => write!(f, "<"),
            Intrinsic::Gt => write!(f, ">"),
            Intrinsic::Le => write!(f, "<="),
            Intrinsic::Ge => write!(f, ">="),
            Intrinsic::Eq => write!(f, "="),
            Intrinsic::Ne => write!(f, "!="),
            Intrinsic::BitAnd => write!(f, "&"),
            Intrinsic::BitOr => write!(f, "|"),
            Intrinsic::Shl => write!(f, "<<"),
            Intrinsic::Shr => write!(f, ">>"),
            Intrinsic::Not => write!(f, "not"),
            Intrinsic::Neg => write!(f, "neg"),
            Intrinsic::Dup => write!(f, "dup"),
            Intrinsic::Drop => write!(f, "drop"),
            Intrinsic::Swap => write!(f, "swap"),
            Intrinsic::Rot => write!(f, "rot"),
            Intrinsic::Over => write!(f, "over"),
            Intrinsic::Cast(ty) => write!(f, "{}", ty),
        }
    }
}

/// One entry of a stack effect: a concrete primitive or a generic
/// placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Prim(Type),
    Var(char),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Prim(ty) => write!(f, "{}", ty),
            Param::Var(name) => write!(f, "{}", name),
        }
    }
}

/// A stack effect, args and rets both listed bottom-to-top (top = last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEffect {
    pub args: Vec<Param>,
    pub rets: Vec<Param>,
}

/// The stack effect of an intrinsic.
///
/// Matching pops the stack top against the *last* listed arg, so
/// `swap : a b -- b a` really does exchange the two topmost values.
pub fn stack_effect(op: Intrinsic) -> StackEffect {
    use Param::{Prim, Var};
    use Type::{Bool, Int};

    let (args, rets): (Vec<Param>, Vec<Param>) = match op {
        Intrinsic::Add
        | Intrinsic::Sub
        | Intrinsic::Mul
        | Intrinsic::Div
        | Intrinsic::BitAnd
        | Intrinsic::BitOr
        | Intrinsic::Shl
        | Intrinsic::Shr => (vec![Prim(Int), Prim(Int)], vec![Prim(Int)]),
        Intrinsic::Lt
        | Intrinsic::Gt
        | Intrinsic::Le
        | Intrinsic::Ge
        | Intrinsic::Eq
        | Intrinsic::Ne => (vec![Prim(Int), Prim(Int)], vec![Prim(Bool)]),
        Intrinsic::Not => (vec![Var('a')], vec![Var('a')]),
        Intrinsic::Neg => (vec![Prim(Int)], vec![Prim(Int)]),
        Intrinsic::Dup => (vec![Var('a')], vec![Var('a'), Var('a')]),
        Intrinsic::Drop => (vec![Var('a')], vec![]),
        Intrinsic::Swap => (vec![Var('a'), Var('b')], vec![Var('b'), Var('a')]),
        Intrinsic::Rot => (
            vec![Var('a'), Var('b'), Var('c')],
            vec![Var('b'), Var('c'), Var('a')],
        ),
        Intrinsic::Over => (
            vec![Var('a'), Var('b')],
            vec![Var('a'), Var('b'), Var('a')],
        ),
        Intrinsic::Cast(target) => (vec![Var('a')], vec![Prim(target)]),
    };
    StackEffect { args, rets }
}
