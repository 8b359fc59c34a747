//! Stack-effect application for the fused parser/type-checker.
//!
//! The parser symbolically executes every op against a [`TypeStack`] by
//! calling into this module before admitting the op to the AST, so a
//! program that parses is already well-typed. Generic placeholders bind on
//! first pop and must agree on every later pop; return entries substitute
//! the bound type.

use crate::intrinsics::Param;
use crate::lexer::Position;
use crate::types::{Type, TypeStack};
use std::collections::HashMap;

fn display_params(params: &[Param]) -> String {
    let parts: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    format!("({})", parts.join(" "))
}

/// Apply a stack effect to `stack`.
///
/// `args` and `rets` are listed bottom-to-top: popping matches the stack
/// top against the last listed arg and walks leftward; pushing emits rets
/// left to right, leaving the last one on top.
pub fn apply_effect(
    stack: &mut TypeStack,
    args: &[Param],
    rets: &[Param],
    what: &str,
    pos: &Position,
) -> Result<(), String> {
    if stack.len() < args.len() {
        return Err(format!(
            "{}: not enough values on the stack for {}: expected {}, got {}",
            pos,
            what,
            display_params(args),
            stack
        ));
    }

    let mut bindings: HashMap<char, Type> = HashMap::new();
    for param in args.iter().rev() {
        let actual = stack.pop().expect("stack depth checked above");
        match *param {
            Param::Prim(expected) => {
                if actual != expected {
                    return Err(format!(
                        "{}: type mismatch for {}: expected {}, got {}",
                        pos, what, expected, actual
                    ));
                }
            }
            Param::Var(name) => match bindings.get(&name) {
                Some(&bound) if bound != actual => {
                    return Err(format!(
                        "{}: type mismatch for {}: '{}' is {} here but {} was popped",
                        pos, what, name, bound, actual
                    ));
                }
                Some(_) => {}
                None => {
                    bindings.insert(name, actual);
                }
            },
        }
    }

    for param in rets {
        let ty = match *param {
            Param::Prim(ty) => ty,
            Param::Var(name) => *bindings
                .get(&name)
                .expect("return placeholder bound while popping arguments"),
        };
        stack.push(ty);
    }
    Ok(())
}

/// Apply a fully concrete signature (a call, or a literal push).
pub fn apply_signature(
    stack: &mut TypeStack,
    args: &[Type],
    rets: &[Type],
    what: &str,
    pos: &Position,
) -> Result<(), String> {
    let args: Vec<Param> = args.iter().copied().map(Param::Prim).collect();
    let rets: Vec<Param> = rets.iter().copied().map(Param::Prim).collect();
    apply_effect(stack, &args, &rets, what, pos)
}

/// Check the residual stack at the `end` of a function body: it must hold
/// exactly the declared return types (top = last) and nothing else.
pub fn check_function_end(
    stack: &mut TypeStack,
    rets: &[Type],
    func: &str,
    pos: &Position,
) -> Result<(), String> {
    apply_signature(
        stack,
        rets,
        &[],
        &format!("the return of function '{}'", func),
        pos,
    )?;
    if !stack.is_empty() {
        return Err(format!(
            "{}: function '{}' leaves {} extra value(s) on the stack: {}",
            pos,
            func,
            stack.len(),
            stack
        ));
    }
    Ok(())
}
