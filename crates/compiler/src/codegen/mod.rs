//! QBE backend for Tack.
//!
//! Lowers a type-checked program to textual QBE SSA. Emission is
//! function-local: a symbolic value stack maps the Tack operand stack onto
//! QBE operands (SSA temporaries, data symbols, integer literals), so stack
//! shuffles, literal pushes, and same-width casts cost no instructions. The
//! only cross-function state is the string pool, which becomes a `data`
//! prefix of the final IR.
//!
//! Operand-type disagreements in here are internal errors: the fused
//! parser/type-checker makes them unreachable.

mod control_flow;
mod error;

pub use error::CodeGenError;

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ast::{FuncDef, Item, Op, Program};
use crate::intrinsics::Intrinsic;
use crate::lexer::Position;
use crate::types::{Signature, Type};

/// One entry of the symbolic value stack: a QBE operand and its type. The
/// operand is an SSA temporary (`%s3`), a data symbol (`$s0`), or an
/// integer literal (`33`).
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) value: String,
    pub(crate) ty: Type,
}

pub struct CodeGen {
    pub(crate) output: String,
    data_section: String,
    string_constants: HashMap<String, String>, // literal -> symbol
    string_counter: usize,
    value_counter: usize,
    block_counter: usize,
    pub(crate) stack: Vec<Slot>,
    /// Label of the block instructions are currently appended to; phi
    /// predecessors are read from here.
    pub(crate) current_block: String,
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            output: String::new(),
            data_section: String::new(),
            string_constants: HashMap::new(),
            string_counter: 0,
            value_counter: 0,
            block_counter: 0,
            stack: Vec::new(),
            current_block: String::new(),
        }
    }

    /// Lower a whole program to QBE SSA text. `extern` functions emit
    /// nothing; everything else becomes an `export function`.
    pub fn codegen_program(&mut self, program: &Program) -> Result<String, CodeGenError> {
        for item in &program.items {
            if let Item::Func(func) = item
                && !func.is_extern
            {
                self.codegen_func(func)?;
            }
        }
        Ok(self.assemble())
    }

    /// Final IR layout: the string pool first, then the functions.
    fn assemble(&self) -> String {
        if self.data_section.is_empty() {
            self.output.clone()
        } else {
            format!("{}\n{}", self.data_section, self.output)
        }
    }

    pub(crate) fn fresh_value(&mut self) -> String {
        let name = format!("%s{}", self.value_counter);
        self.value_counter += 1;
        name
    }

    pub(crate) fn fresh_block(&mut self) -> String {
        let name = format!("b{}", self.block_counter);
        self.block_counter += 1;
        name
    }

    pub(crate) fn emit_label(&mut self, label: &str) -> Result<(), CodeGenError> {
        writeln!(&mut self.output, "@{}", label)?;
        self.current_block = label.to_string();
        Ok(())
    }

    pub(crate) fn pop_slot(&mut self, what: &str, pos: &Position) -> Result<Slot, CodeGenError> {
        self.stack.pop().ok_or_else(|| {
            CodeGenError::Logic(format!(
                "{}: internal: value stack underflow lowering {}",
                pos, what
            ))
        })
    }

    /// Intern a string literal, emitting its null-terminated `data`
    /// definition on first sight. Identical literals share one symbol;
    /// symbols are numbered in first-appearance order.
    fn string_symbol(&mut self, literal: &str) -> Result<String, CodeGenError> {
        if let Some(symbol) = self.string_constants.get(literal) {
            return Ok(symbol.clone());
        }
        let symbol = format!("$s{}", self.string_counter);
        self.string_counter += 1;
        writeln!(
            &mut self.data_section,
            "data {} = {{ b \"{}\", b 0 }}",
            symbol, literal
        )?;
        self.string_constants.insert(literal.to_string(), symbol.clone());
        Ok(symbol)
    }

    fn codegen_func(&mut self, func: &FuncDef) -> Result<(), CodeGenError> {
        if func.signature.rets.len() > 1 {
            return Err(CodeGenError::Logic(format!(
                "{}: function '{}' declares {} return types; the C calling convention allows at most one",
                func.pos,
                func.name,
                func.signature.rets.len()
            )));
        }

        self.value_counter = 0;
        self.block_counter = 0;
        self.stack.clear();

        let mut params = Vec::new();
        for &ty in &func.signature.args {
            let value = self.fresh_value();
            params.push(format!("{} {}", ty.ir(), value));
            self.stack.push(Slot { value, ty });
        }
        match func.signature.rets.first() {
            Some(ret) => writeln!(
                &mut self.output,
                "export function {} ${}({}) {{",
                ret.ir(),
                func.name,
                params.join(", ")
            )?,
            None => writeln!(
                &mut self.output,
                "export function ${}({}) {{",
                func.name,
                params.join(", ")
            )?,
        }
        let entry = self.fresh_block();
        self.emit_label(&entry)?;

        self.codegen_ops(&func.body)?;

        if func.signature.rets.is_empty() {
            writeln!(&mut self.output, "  ret")?;
        } else {
            let result = self.pop_slot("the return value", &func.pos)?;
            writeln!(&mut self.output, "  ret {}", result.value)?;
        }
        writeln!(&mut self.output, "}}")?;
        writeln!(&mut self.output)?;
        Ok(())
    }

    pub(crate) fn codegen_ops(&mut self, ops: &[Op]) -> Result<(), CodeGenError> {
        for op in ops {
            self.codegen_op(op)?;
        }
        Ok(())
    }

    fn codegen_op(&mut self, op: &Op) -> Result<(), CodeGenError> {
        match op {
            Op::PushInt { value, .. } => {
                self.stack.push(Slot {
                    value: value.to_string(),
                    ty: Type::Int,
                });
                Ok(())
            }
            Op::PushStr { value, .. } => {
                let symbol = self.string_symbol(value)?;
                self.stack.push(Slot {
                    value: symbol,
                    ty: Type::Ptr,
                });
                Ok(())
            }
            Op::Intrinsic { op, pos } => self.codegen_intrinsic(*op, pos),
            Op::Call {
                name,
                signature,
                pos,
            } => self.codegen_call(name, signature, pos),
            Op::If {
                then_body,
                else_body,
                pos,
            } => self.codegen_conditional(then_body, else_body, pos),
        }
    }

    fn codegen_intrinsic(&mut self, op: Intrinsic, pos: &Position) -> Result<(), CodeGenError> {
        match op {
            Intrinsic::Add
            | Intrinsic::Sub
            | Intrinsic::Mul
            | Intrinsic::Div
            | Intrinsic::BitAnd
            | Intrinsic::BitOr
            | Intrinsic::Shl
            | Intrinsic::Shr => {
                let what = format!("'{}'", op);
                let rhs = self.pop_slot(&what, pos)?;
                let lhs = self.pop_slot(&what, pos)?;
                if lhs.ty != rhs.ty {
                    return Err(CodeGenError::Logic(format!(
                        "{}: internal: operand types disagree for '{}': {} vs {}",
                        pos, op, lhs.ty, rhs.ty
                    )));
                }
                let name = match op {
                    Intrinsic::Add => "add",
                    Intrinsic::Sub => "sub",
                    Intrinsic::Mul => "mul",
                    Intrinsic::Div => "div",
                    Intrinsic::BitAnd => "and",
                    Intrinsic::BitOr => "or",
                    Intrinsic::Shl => "shl",
                    Intrinsic::Shr => "shr",
                    _ => unreachable!("binary operator group"),
                };
                let result = self.fresh_value();
                writeln!(
                    &mut self.output,
                    "  {} ={} {} {}, {}",
                    result,
                    lhs.ty.ir(),
                    name,
                    lhs.value,
                    rhs.value
                )?;
                self.stack.push(Slot {
                    value: result,
                    ty: lhs.ty,
                });
            }
            Intrinsic::Lt
            | Intrinsic::Gt
            | Intrinsic::Le
            | Intrinsic::Ge
            | Intrinsic::Eq
            | Intrinsic::Ne => {
                let what = format!("'{}'", op);
                let rhs = self.pop_slot(&what, pos)?;
                let lhs = self.pop_slot(&what, pos)?;
                if lhs.ty != rhs.ty {
                    return Err(CodeGenError::Logic(format!(
                        "{}: internal: operand types disagree for '{}': {} vs {}",
                        pos, op, lhs.ty, rhs.ty
                    )));
                }
                let name = match op {
                    Intrinsic::Lt => "cslt",
                    Intrinsic::Gt => "csgt",
                    Intrinsic::Le => "csle",
                    Intrinsic::Ge => "csge",
                    Intrinsic::Eq => "ceq",
                    Intrinsic::Ne => "cne",
                    _ => unreachable!("comparison group"),
                };
                let result = self.fresh_value();
                writeln!(
                    &mut self.output,
                    "  {} =w {}{} {}, {}",
                    result,
                    name,
                    lhs.ty.ir(),
                    lhs.value,
                    rhs.value
                )?;
                self.stack.push(Slot {
                    value: result,
                    ty: Type::Bool,
                });
            }
            Intrinsic::Not => {
                let operand = self.pop_slot("'not'", pos)?;
                let result = self.fresh_value();
                writeln!(
                    &mut self.output,
                    "  {} ={} ceq{} {}, 0",
                    result,
                    operand.ty.ir(),
                    operand.ty.ir(),
                    operand.value
                )?;
                self.stack.push(Slot {
                    value: result,
                    ty: operand.ty,
                });
            }
            Intrinsic::Neg => {
                let operand = self.pop_slot("'neg'", pos)?;
                let result = self.fresh_value();
                writeln!(
                    &mut self.output,
                    "  {} ={} neg {}",
                    result,
                    operand.ty.ir(),
                    operand.value
                )?;
                self.stack.push(Slot {
                    value: result,
                    ty: operand.ty,
                });
            }
            Intrinsic::Dup => {
                let top = self.stack.last().cloned().ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "{}: internal: value stack underflow lowering 'dup'",
                        pos
                    ))
                })?;
                self.stack.push(top);
            }
            Intrinsic::Drop => {
                self.pop_slot("'drop'", pos)?;
            }
            Intrinsic::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(CodeGenError::Logic(format!(
                        "{}: internal: value stack underflow lowering 'swap'",
                        pos
                    )));
                }
                self.stack.swap(len - 1, len - 2);
            }
            Intrinsic::Rot => {
                let len = self.stack.len();
                if len < 3 {
                    return Err(CodeGenError::Logic(format!(
                        "{}: internal: value stack underflow lowering 'rot'",
                        pos
                    )));
                }
                self.stack[len - 3..].rotate_left(1);
            }
            Intrinsic::Over => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(CodeGenError::Logic(format!(
                        "{}: internal: value stack underflow lowering 'over'",
                        pos
                    )));
                }
                let slot = self.stack[len - 2].clone();
                self.stack.push(slot);
            }
            Intrinsic::Cast(target) => {
                let operand = self.pop_slot("a cast", pos)?;
                if operand.ty.ir() == target.ir() {
                    // Same width: retype in place, no instruction.
                    self.stack.push(Slot {
                        value: operand.value,
                        ty: target,
                    });
                } else {
                    let result = self.fresh_value();
                    if target.ir() == "l" {
                        writeln!(&mut self.output, "  {} =l extsw {}", result, operand.value)?;
                    } else {
                        writeln!(&mut self.output, "  {} =w copy {}", result, operand.value)?;
                    }
                    self.stack.push(Slot {
                        value: result,
                        ty: target,
                    });
                }
            }
        }
        Ok(())
    }

    fn codegen_call(
        &mut self,
        name: &str,
        signature: &Signature,
        pos: &Position,
    ) -> Result<(), CodeGenError> {
        if signature.rets.len() > 1 {
            return Err(CodeGenError::Logic(format!(
                "{}: function '{}' declares {} return types; the C calling convention allows at most one",
                pos,
                name,
                signature.rets.len()
            )));
        }

        // The stack top is the last declared argument.
        let mut operands = Vec::with_capacity(signature.args.len());
        for &ty in signature.args.iter().rev() {
            let slot = self.pop_slot(&format!("the call to '{}'", name), pos)?;
            if slot.ty != ty {
                return Err(CodeGenError::Logic(format!(
                    "{}: internal: argument to '{}' is {}, expected {}",
                    pos, name, slot.ty, ty
                )));
            }
            operands.push(format!("{} {}", ty.ir(), slot.value));
        }
        operands.reverse();
        let operands = operands.join(", ");

        match signature.rets.first() {
            Some(&ret) => {
                let result = self.fresh_value();
                writeln!(
                    &mut self.output,
                    "  {} ={} call ${}({})",
                    result,
                    ret.ir(),
                    name,
                    operands
                )?;
                self.stack.push(Slot {
                    value: result,
                    ty: ret,
                });
            }
            None => writeln!(&mut self.output, "  call ${}({})", name, operands)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile(source: &str) -> String {
        let program = Parser::new(source, "<test>", Vec::new())
            .parse()
            .expect("parse error");
        CodeGen::new()
            .codegen_program(&program)
            .expect("codegen error")
    }

    #[test]
    fn test_stack_shuffles_emit_nothing() {
        let ir = compile("func test -> do 33 43 swap drop drop end");
        assert_eq!(ir, "export function $test() {\n@b0\n  ret\n}\n\n");
    }

    #[test]
    fn test_add_on_arguments() {
        let ir = compile("func f int int -> int do + end");
        assert_eq!(
            ir,
            "export function w $f(w %s0, w %s1) {\n\
             @b0\n  \
               %s2 =w add %s0, %s1\n  \
               ret %s2\n\
             }\n\n"
        );
    }

    #[test]
    fn test_subtraction_operand_order() {
        // 5 3 - must compute 5 - 3: deeper operand first.
        let ir = compile("func f -> int do 5 3 - end");
        assert!(ir.contains("%s0 =w sub 5, 3"), "{}", ir);
    }

    #[test]
    fn test_shift_operand_order() {
        // 1 4 << shifts 1 left by 4: base first, amount second.
        let ir = compile("func f -> int do 1 4 << end");
        assert!(ir.contains("%s0 =w shl 1, 4"), "{}", ir);
    }

    #[test]
    fn test_comparison_suffix_and_result() {
        let ir = compile("func f int int -> bool do < end");
        assert!(ir.contains("%s2 =w csltw %s0, %s1"), "{}", ir);
        assert!(ir.contains("export function w $f"), "{}", ir);
    }

    #[test]
    fn test_equality() {
        let ir = compile("func f int int -> bool do = end");
        assert!(ir.contains("%s2 =w ceqw %s0, %s1"), "{}", ir);
        let ir = compile("func f int int -> bool do != end");
        assert!(ir.contains("%s2 =w cnew %s0, %s1"), "{}", ir);
    }

    #[test]
    fn test_not_compares_against_zero() {
        let ir = compile("func f bool -> bool do not end");
        assert!(ir.contains("%s1 =w ceqw %s0, 0"), "{}", ir);
    }

    #[test]
    fn test_neg() {
        let ir = compile("func f int -> int do neg end");
        assert!(ir.contains("%s1 =w neg %s0"), "{}", ir);
    }

    #[test]
    fn test_if_else_join_has_phi() {
        let ir = compile("func g int int bool -> int do if drop else swap drop end end");
        assert!(ir.contains("jnz %s2, @b1, @b2"), "{}", ir);
        assert!(ir.contains("%s3 =w phi @b1 %s0, @b2 %s1"), "{}", ir);
        assert!(ir.contains("ret %s3"), "{}", ir);
    }

    #[test]
    fn test_if_without_else_phi_against_entry() {
        let ir = compile("func p int bool -> int do if drop 5 end end");
        // The then branch rewrote the slot; the else edge carries the
        // original value.
        assert!(ir.contains("%s2 =w phi @b1 5, @b2 %s0"), "{}", ir);
    }

    #[test]
    fn test_identical_slots_need_no_phi() {
        let ir = compile("func q int bool -> int do if end end");
        assert!(!ir.contains("phi"), "{}", ir);
    }

    #[test]
    fn test_nested_conditional_predecessor() {
        let ir = compile(
            "func n bool bool -> int do \
               if if 1 else 2 end else drop 3 end \
             end",
        );
        // The outer join's then-edge comes from the inner join block, not
        // from the outer then label.
        assert!(ir.contains("%s2 =w phi @b4 1, @b5 2"), "{}", ir);
        assert!(ir.contains("%s3 =w phi @b6 %s2, @b2 3"), "{}", ir);
    }

    #[test]
    fn test_string_pool_and_call() {
        let ir = compile(
            "func puts ptr -> int extern \
             func main int ptr -> int do drop drop \"Hi\" puts drop 0 end",
        );
        assert!(ir.contains("data $s0 = { b \"Hi\", b 0 }"), "{}", ir);
        assert!(ir.contains("call $puts(l $s0)"), "{}", ir);
        assert!(ir.contains("ret 0"), "{}", ir);
        // The extern declaration emits no function.
        assert!(!ir.contains("function w $puts"), "{}", ir);
    }

    #[test]
    fn test_string_pool_deduplicates() {
        let ir = compile(
            "func f -> ptr do \"a\" \"a\" drop end \
             func g -> ptr do \"b\" \"a\" drop end",
        );
        // One pooled symbol per distinct literal, in first-appearance
        // order, shared across functions.
        assert_eq!(ir.matches("data $s0 = { b \"a\", b 0 }").count(), 1);
        assert_eq!(ir.matches("data $s1 = { b \"b\", b 0 }").count(), 1);
        assert!(!ir.contains("$s2"), "{}", ir);
    }

    #[test]
    fn test_multi_return_function_rejected() {
        let program = Parser::new("func f -> int int do 1 2 end", "<test>", Vec::new())
            .parse()
            .expect("parse error");
        let err = CodeGen::new().codegen_program(&program).unwrap_err();
        assert!(err.to_string().contains("at most one"), "{}", err);
    }

    #[test]
    fn test_call_argument_order() {
        let ir = compile(
            "func put2 int ptr -> extern \
             func m -> do 1 \"x\" put2 end",
        );
        assert!(ir.contains("call $put2(w 1, l $s0)"), "{}", ir);
    }

    #[test]
    fn test_same_width_cast_is_free() {
        let ir = compile("func f int -> bool do bool end");
        assert_eq!(
            ir,
            "export function w $f(w %s0) {\n@b0\n  ret %s0\n}\n\n"
        );
    }

    #[test]
    fn test_widening_cast_extends() {
        let ir = compile("func f int -> long do long end");
        assert!(ir.contains("%s1 =l extsw %s0"), "{}", ir);
        assert!(ir.contains("ret %s1"), "{}", ir);
    }

    #[test]
    fn test_narrowing_cast_copies() {
        let ir = compile("func f long -> int do int end");
        assert!(ir.contains("%s1 =w copy %s0"), "{}", ir);
    }

    #[test]
    fn test_str_cast_retypes_to_ptr() {
        let ir = compile("func f long -> ptr do str end");
        // long and ptr share a width, so the cast is free.
        assert_eq!(ir, "export function l $f(l %s0) {\n@b0\n  ret %s0\n}\n\n");
    }

    #[test]
    fn test_void_function_returns_nothing() {
        let ir = compile("func f int -> do drop end");
        assert!(ir.contains("export function $f(w %s0)"), "{}", ir);
        assert!(ir.trim_end().ends_with("ret\n}"), "{}", ir);
    }
}
