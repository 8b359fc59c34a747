//! Conditional lowering.
//!
//! `if` lowers to a `jnz` and three fresh blocks. Both branches run
//! against a copy of the entry stack and jump to the join block, where the
//! two stacks are reconciled: slots whose operands differ get a phi. The
//! phi predecessor is the branch's *final* block, which a nested
//! conditional moves past the branch's entry label.

use std::fmt::Write as _;

use super::{CodeGen, CodeGenError, Slot};
use crate::ast::Op;
use crate::lexer::Position;

/// Where a branch left off: its value stack, and the block that jumps to
/// the join.
struct BranchExit {
    stack: Vec<Slot>,
    predecessor: String,
}

impl CodeGen {
    pub(crate) fn codegen_conditional(
        &mut self,
        then_body: &[Op],
        else_body: &[Op],
        pos: &Position,
    ) -> Result<(), CodeGenError> {
        let condition = self.pop_slot("the 'if' condition", pos)?;
        let then_label = self.fresh_block();
        let else_label = self.fresh_block();
        let join_label = self.fresh_block();
        writeln!(
            &mut self.output,
            "  jnz {}, @{}, @{}",
            condition.value, then_label, else_label
        )?;

        let entry = self.stack.clone();
        let then_exit = self.codegen_branch(then_body, &then_label, &join_label, entry.clone())?;
        let else_exit = self.codegen_branch(else_body, &else_label, &join_label, entry)?;

        self.emit_label(&join_label)?;
        if then_exit.stack.len() != else_exit.stack.len() {
            return Err(CodeGenError::Logic(format!(
                "{}: internal: branch stacks have different depths at the join ({} vs {})",
                pos,
                then_exit.stack.len(),
                else_exit.stack.len()
            )));
        }

        let mut merged = Vec::with_capacity(then_exit.stack.len());
        for (then_slot, else_slot) in then_exit.stack.iter().zip(&else_exit.stack) {
            if then_slot.ty != else_slot.ty {
                return Err(CodeGenError::Logic(format!(
                    "{}: internal: branch stacks have different types at the join ({} vs {})",
                    pos, then_slot.ty, else_slot.ty
                )));
            }
            if then_slot.value == else_slot.value {
                // The same value surfaces from both branches.
                merged.push(then_slot.clone());
                continue;
            }
            let result = self.fresh_value();
            writeln!(
                &mut self.output,
                "  {} ={} phi @{} {}, @{} {}",
                result,
                then_slot.ty.ir(),
                then_exit.predecessor,
                then_slot.value,
                else_exit.predecessor,
                else_slot.value
            )?;
            merged.push(Slot {
                value: result,
                ty: then_slot.ty,
            });
        }
        self.stack = merged;
        Ok(())
    }

    /// Compile one branch: emit its entry label, run its ops against a
    /// copy of the entry stack, and jump to the join.
    fn codegen_branch(
        &mut self,
        body: &[Op],
        label: &str,
        join: &str,
        entry: Vec<Slot>,
    ) -> Result<BranchExit, CodeGenError> {
        self.emit_label(label)?;
        self.stack = entry;
        self.codegen_ops(body)?;
        writeln!(&mut self.output, "  jmp @{}", join)?;
        Ok(BranchExit {
            stack: std::mem::take(&mut self.stack),
            predecessor: self.current_block.clone(),
        })
    }
}
