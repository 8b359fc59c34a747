//! Abstract syntax tree for Tack.
//!
//! Function bodies are flat op sequences; the only nesting comes from
//! conditionals. The op family is closed, so the backend dispatches on it
//! exhaustively.

use crate::intrinsics::Intrinsic;
use crate::lexer::Position;
use crate::types::Signature;

/// One operation in a function body.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Push an integer constant (a literal, or a named constant already
    /// folded to its value).
    PushInt { value: i64, pos: Position },
    /// Push a pointer to a pooled, null-terminated string literal.
    PushStr { value: String, pos: Position },
    /// A built-in operator.
    Intrinsic { op: Intrinsic, pos: Position },
    /// A call to a user-defined or extern function.
    Call {
        name: String,
        signature: Signature,
        pos: Position,
    },
    /// `if ... end` or `if ... else ... end`; an empty `else_body` means
    /// there was no else branch.
    If {
        then_body: Vec<Op>,
        else_body: Vec<Op>,
        pos: Position,
    },
}

/// `const NAME <expr>`, with the expression already evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstDef {
    pub name: String,
    pub value: i64,
    pub pos: Position,
}

/// `func NAME args -> rets (do ... end | extern)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub signature: Signature,
    pub body: Vec<Op>,
    pub is_extern: bool,
    pub pos: Position,
}

/// A top-level definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Const(ConstDef),
    Func(FuncDef),
}

/// A fully parsed and type-checked translation unit, with all includes
/// flattened in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    /// Iterate over the function definitions in source order.
    pub fn funcs(&self) -> impl Iterator<Item = &FuncDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Func(func) => Some(func),
            Item::Const(_) => None,
        })
    }

    pub fn find_func(&self, name: &str) -> Option<&FuncDef> {
        self.funcs().find(|func| func.name == name)
    }
}
