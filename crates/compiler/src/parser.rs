//! Parser for Tack, with interleaved stack type-checking.
//!
//! Parsing a function body *is* the type-check: every op is validated
//! against the compile-time type stack before it is admitted to the AST,
//! so a program that parses is already well-typed. The first error aborts.
//!
//! Includes are flattened by nested parsers: the nested parser takes over
//! the symbol tables (constants, function signatures, include history),
//! parses its file to exhaustion, and hands the tables back together with
//! its top-level items. Already-included canonical paths are skipped, which
//! makes re-inclusion idempotent and breaks cycles.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::debug;

use crate::ast::{ConstDef, FuncDef, Item, Op, Program};
use crate::intrinsics::{self, Intrinsic};
use crate::lexer::{Lexer, Position, Token, TokenKind};
use crate::typechecker::{apply_effect, apply_signature, check_function_end};
use crate::types::{Signature, Type, TypeStack};

/// Symbol tables shared across a translation unit (the entry file plus
/// everything it transitively includes). Redefinition is last-wins and is
/// documented undefined behavior.
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub constants: HashMap<String, i64>,
    pub funcs: HashMap<String, Signature>,
    pub include_history: HashSet<PathBuf>,
}

pub struct Parser {
    lexer: Lexer,
    symbols: SymbolTable,
    include_dirs: Vec<PathBuf>,
}

fn parse_int(tok: &Token) -> Result<i64, String> {
    tok.lexeme
        .parse::<i64>()
        .map_err(|_| format!("{}: integer literal '{}' out of range", tok.pos, tok.lexeme))
}

impl Parser {
    pub fn new(source: &str, file: impl Into<PathBuf>, include_dirs: Vec<PathBuf>) -> Self {
        Parser {
            lexer: Lexer::new(source, file),
            symbols: SymbolTable::default(),
            include_dirs,
        }
    }

    /// Parse (and type-check) the whole translation unit.
    pub fn parse(mut self) -> Result<Program, String> {
        let items = self.run()?;
        Ok(Program { items })
    }

    fn run(&mut self) -> Result<Vec<Item>, String> {
        // The entry file counts as included, so a cycle back to it is a
        // no-op. Sources that do not come from a file (tests, stdin) have
        // no canonical path and are skipped.
        if let Ok(canonical) = self.lexer.file().canonicalize() {
            self.symbols.include_history.insert(canonical);
        }

        let mut items = Vec::new();
        while let Some(tok) = self.lexer.next_token()? {
            match tok.kind {
                TokenKind::KwConst => {
                    let def = self.parse_const(tok.pos)?;
                    items.push(Item::Const(def));
                }
                TokenKind::KwFunc => {
                    let def = self.parse_func(tok.pos)?;
                    items.push(Item::Func(def));
                }
                TokenKind::KwInclude => self.parse_include(tok.pos, &mut items)?,
                _ => {
                    return Err(format!(
                        "{}: unexpected token '{}' at top level (expected 'const', 'func', or 'include')",
                        tok.pos, tok.lexeme
                    ));
                }
            }
        }
        Ok(items)
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, String> {
        match self.lexer.next_token()? {
            Some(tok) if tok.kind == TokenKind::Ident => Ok(tok.lexeme),
            Some(tok) => Err(format!("{}: expected {}, got '{}'", tok.pos, what, tok.lexeme)),
            None => Err(format!(
                "{}: expected {}, got end of input",
                self.lexer.here(),
                what
            )),
        }
    }

    fn parse_const(&mut self, pos: Position) -> Result<ConstDef, String> {
        let name = self.expect_ident("a constant name after 'const'")?;
        let value = self.eval_const_expr(&pos)?;
        // Constants and functions share one namespace; the last definition
        // wins even across kinds.
        self.symbols.funcs.remove(&name);
        self.symbols.constants.insert(name.clone(), value);
        Ok(ConstDef { name, value, pos })
    }

    /// Evaluate an RPN constant expression: number literals and `+ - * /`
    /// (truncated division). Consumes tokens while the next token belongs
    /// to the expression; exactly one value must remain.
    fn eval_const_expr(&mut self, pos: &Position) -> Result<i64, String> {
        let mut values: Vec<i64> = Vec::new();
        loop {
            let kind = match self.lexer.peek()? {
                Some(tok) => tok.kind,
                None => break,
            };
            match kind {
                TokenKind::Number => {
                    let tok = self.lexer.next_token()?.expect("peeked");
                    values.push(parse_int(&tok)?);
                }
                TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash => {
                    let tok = self.lexer.next_token()?.expect("peeked");
                    let b = values.pop().ok_or_else(|| {
                        format!(
                            "{}: not enough operands for '{}' in constant expression",
                            tok.pos, tok.lexeme
                        )
                    })?;
                    let a = values.pop().ok_or_else(|| {
                        format!(
                            "{}: not enough operands for '{}' in constant expression",
                            tok.pos, tok.lexeme
                        )
                    })?;
                    let result = match tok.kind {
                        TokenKind::Plus => a.wrapping_add(b),
                        TokenKind::Minus => a.wrapping_sub(b),
                        TokenKind::Star => a.wrapping_mul(b),
                        _ => {
                            if b == 0 {
                                return Err(format!(
                                    "{}: division by zero in constant expression",
                                    tok.pos
                                ));
                            }
                            a.wrapping_div(b)
                        }
                    };
                    values.push(result);
                }
                _ => break,
            }
        }
        match values.as_slice() {
            [value] => Ok(*value),
            [] => Err(format!("{}: empty constant expression", pos)),
            _ => Err(format!(
                "{}: constant expression leaves {} values on the stack (expected exactly one)",
                pos,
                values.len()
            )),
        }
    }

    fn parse_func(&mut self, pos: Position) -> Result<FuncDef, String> {
        let name = self.expect_ident("a function name after 'func'")?;

        let mut args = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Some(tok) if tok.kind == TokenKind::Arrow => break,
                Some(tok) => match Type::from_keyword(tok.kind) {
                    Some(ty) => args.push(ty),
                    None => {
                        return Err(format!(
                            "{}: expected an argument type or '->' in function '{}', got '{}'",
                            tok.pos, name, tok.lexeme
                        ));
                    }
                },
                None => {
                    return Err(format!(
                        "{}: unexpected end of input in the signature of function '{}'",
                        self.lexer.here(),
                        name
                    ));
                }
            }
        }

        let mut rets = Vec::new();
        let body_intro = loop {
            match self.lexer.next_token()? {
                Some(tok)
                    if tok.kind == TokenKind::KwDo || tok.kind == TokenKind::KwExtern =>
                {
                    break tok;
                }
                Some(tok) => match Type::from_keyword(tok.kind) {
                    Some(ty) => rets.push(ty),
                    None => {
                        return Err(format!(
                            "{}: expected a return type, 'do', or 'extern' in function '{}', got '{}'",
                            tok.pos, name, tok.lexeme
                        ));
                    }
                },
                None => {
                    return Err(format!(
                        "{}: unexpected end of input in the signature of function '{}'",
                        self.lexer.here(),
                        name
                    ));
                }
            }
        };

        let signature = Signature { args, rets };
        // Registered before the body is parsed so direct recursion
        // resolves. The shared namespace is last-wins, so any constant of
        // the same name is evicted.
        self.symbols.constants.remove(&name);
        self.symbols.funcs.insert(name.clone(), signature.clone());

        if body_intro.kind == TokenKind::KwExtern {
            return Ok(FuncDef {
                name,
                signature,
                body: Vec::new(),
                is_extern: true,
                pos,
            });
        }

        let mut stack = TypeStack::from_types(&signature.args);
        let (body, end_tok) = self.parse_body(&mut stack, &[TokenKind::KwEnd], &name)?;
        check_function_end(&mut stack, &signature.rets, &name, &end_tok.pos)?;

        Ok(FuncDef {
            name,
            signature,
            body,
            is_extern: false,
            pos,
        })
    }

    /// Parse ops until one of `terminators`, symbolically executing each op
    /// against `stack`. Returns the ops and the terminator token.
    fn parse_body(
        &mut self,
        stack: &mut TypeStack,
        terminators: &[TokenKind],
        func: &str,
    ) -> Result<(Vec<Op>, Token), String> {
        let mut ops = Vec::new();
        loop {
            let Some(tok) = self.lexer.next_token()? else {
                return Err(format!(
                    "{}: unexpected end of input in function '{}' (missing 'end')",
                    self.lexer.here(),
                    func
                ));
            };
            if terminators.contains(&tok.kind) {
                return Ok((ops, tok));
            }
            ops.push(self.parse_op(tok, stack, func)?);
        }
    }

    fn parse_op(&mut self, tok: Token, stack: &mut TypeStack, func: &str) -> Result<Op, String> {
        match tok.kind {
            TokenKind::Number => {
                let value = parse_int(&tok)?;
                apply_signature(stack, &[], &[Type::Int], "an integer literal", &tok.pos)?;
                Ok(Op::PushInt { value, pos: tok.pos })
            }
            TokenKind::Str => {
                apply_signature(stack, &[], &[Type::Ptr], "a string literal", &tok.pos)?;
                Ok(Op::PushStr {
                    value: tok.lexeme,
                    pos: tok.pos,
                })
            }
            TokenKind::Ident => {
                if let Some(&value) = self.symbols.constants.get(&tok.lexeme) {
                    apply_signature(
                        stack,
                        &[],
                        &[Type::Int],
                        &format!("the constant '{}'", tok.lexeme),
                        &tok.pos,
                    )?;
                    Ok(Op::PushInt { value, pos: tok.pos })
                } else if let Some(signature) = self.symbols.funcs.get(&tok.lexeme).cloned() {
                    apply_signature(
                        stack,
                        &signature.args,
                        &signature.rets,
                        &format!("the call to '{}'", tok.lexeme),
                        &tok.pos,
                    )?;
                    Ok(Op::Call {
                        name: tok.lexeme,
                        signature,
                        pos: tok.pos,
                    })
                } else {
                    Err(format!("{}: undefined identifier '{}'", tok.pos, tok.lexeme))
                }
            }
            TokenKind::KwIf => self.parse_conditional(tok.pos, stack, func),
            _ => match Intrinsic::from_token(tok.kind) {
                Some(op) => {
                    let effect = intrinsics::stack_effect(op);
                    apply_effect(
                        stack,
                        &effect.args,
                        &effect.rets,
                        &format!("'{}'", op),
                        &tok.pos,
                    )?;
                    Ok(Op::Intrinsic { op, pos: tok.pos })
                }
                None => Err(format!(
                    "{}: unexpected token '{}' in function '{}'",
                    tok.pos, tok.lexeme, func
                )),
            },
        }
    }

    /// Parse `if ... [else ...] end`, reconciling the branch stacks at the
    /// join point: with an else branch both sides must agree, without one
    /// the body must be net-neutral.
    fn parse_conditional(
        &mut self,
        pos: Position,
        stack: &mut TypeStack,
        func: &str,
    ) -> Result<Op, String> {
        apply_signature(stack, &[Type::Bool], &[], "the 'if' condition", &pos)?;
        let entry = stack.clone();

        let mut then_stack = entry.clone();
        let (then_body, term) =
            self.parse_body(&mut then_stack, &[TokenKind::KwEnd, TokenKind::KwElse], func)?;

        if term.kind == TokenKind::KwEnd {
            if then_stack != entry {
                return Err(format!(
                    "{}: an 'if' without 'else' must leave the stack as it found it: entered with {}, body ends with {}",
                    term.pos, entry, then_stack
                ));
            }
            *stack = then_stack;
            return Ok(Op::If {
                then_body,
                else_body: Vec::new(),
                pos,
            });
        }

        let mut else_stack = entry;
        let (else_body, end_tok) = self.parse_body(&mut else_stack, &[TokenKind::KwEnd], func)?;
        if else_stack != then_stack {
            return Err(format!(
                "{}: 'if' and 'else' branches end with different stacks: {} vs {}",
                end_tok.pos, then_stack, else_stack
            ));
        }
        *stack = then_stack;
        Ok(Op::If {
            then_body,
            else_body,
            pos,
        })
    }

    fn parse_include(&mut self, pos: Position, items: &mut Vec<Item>) -> Result<(), String> {
        let Some(tok) = self.lexer.next_token()? else {
            return Err(format!("{}: expected a path string after 'include'", pos));
        };
        if tok.kind != TokenKind::Str {
            return Err(format!(
                "{}: include path must be a string literal, got '{}'",
                tok.pos, tok.lexeme
            ));
        }

        let path = self.resolve_include(&tok.lexeme, &tok.pos)?;
        if self.symbols.include_history.contains(&path) {
            return Ok(());
        }
        self.symbols.include_history.insert(path.clone());

        let source = std::fs::read_to_string(&path)
            .map_err(|e| format!("{}: failed to read {}: {}", tok.pos, path.display(), e))?;
        debug!("including {}", path.display());

        let mut nested = Parser {
            lexer: Lexer::new(&source, path),
            symbols: std::mem::take(&mut self.symbols),
            include_dirs: self.include_dirs.clone(),
        };
        let result = nested.run();
        self.symbols = nested.symbols;
        items.extend(result?);
        Ok(())
    }

    /// Resolve an include path: the literal path first, then each include
    /// directory in order. The result is canonical so the history survives
    /// symlinks and different spellings of the same file.
    fn resolve_include(&self, path: &str, pos: &Position) -> Result<PathBuf, String> {
        let mut candidates = vec![PathBuf::from(path)];
        for dir in &self.include_dirs {
            candidates.push(dir.join(path));
        }
        for candidate in candidates {
            if candidate.is_file() {
                return candidate.canonicalize().map_err(|e| {
                    format!("{}: failed to resolve {}: {}", pos, candidate.display(), e)
                });
            }
        }
        Err(format!("{}: cannot resolve include \"{}\"", pos, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse(source: &str) -> Result<Program, String> {
        Parser::new(source, "<test>", Vec::new()).parse()
    }

    // --- constant evaluator ---

    #[test]
    fn test_const_simple() {
        let program = parse("const N 42").unwrap();
        assert_eq!(
            program.items,
            vec![Item::Const(ConstDef {
                name: "N".to_string(),
                value: 42,
                pos: Position {
                    file: "<test>".into(),
                    line: 1,
                    column: 1
                },
            })]
        );
    }

    #[test]
    fn test_const_rpn() {
        // (2 + 3) * 4 - 1
        let program = parse("const N 2 3 + 4 * 1 -").unwrap();
        match &program.items[0] {
            Item::Const(def) => assert_eq!(def.value, 19),
            other => panic!("expected const, got {:?}", other),
        }
    }

    #[test]
    fn test_const_division_truncates() {
        let program = parse("const N 7 2 /").unwrap();
        match &program.items[0] {
            Item::Const(def) => assert_eq!(def.value, 3),
            other => panic!("expected const, got {:?}", other),
        }
    }

    #[test]
    fn test_const_division_by_zero() {
        let err = parse("const N 1 0 /").unwrap_err();
        assert!(err.contains("division by zero"), "{}", err);
    }

    #[test]
    fn test_const_empty_expression() {
        let err = parse("const N const M 1").unwrap_err();
        assert!(err.contains("empty constant expression"), "{}", err);
    }

    #[test]
    fn test_const_multiple_values() {
        let err = parse("const N 1 2").unwrap_err();
        assert!(err.contains("expected exactly one"), "{}", err);
    }

    #[test]
    fn test_const_operator_underflow() {
        let err = parse("const N 1 +").unwrap_err();
        assert!(err.contains("not enough operands"), "{}", err);
    }

    #[test]
    fn test_const_used_in_body() {
        let program = parse("const N 33 func f -> int do N end").unwrap();
        let func = program.find_func("f").unwrap();
        assert!(matches!(func.body[0], Op::PushInt { value: 33, .. }));
    }

    // --- functions and bodies ---

    #[test]
    fn test_forth_primitives() {
        let program = parse("func test -> do 33 43 swap drop drop end").unwrap();
        let func = program.find_func("test").unwrap();
        assert_eq!(func.body.len(), 5);
        assert!(func.signature.args.is_empty());
        assert!(func.signature.rets.is_empty());
    }

    #[test]
    fn test_generic_swap_signature() {
        // swap binds a=int (deeper), b=ptr (top) and pushes b then a, so
        // the result has int on top of ptr.
        parse("func h int ptr -> ptr int do swap end").unwrap();
    }

    #[test]
    fn test_residual_stack_rejected() {
        let err = parse("func bad -> int do 1 2 end").unwrap_err();
        assert!(err.contains("extra value"), "{}", err);
    }

    #[test]
    fn test_missing_return_value_rejected() {
        let err = parse("func bad -> int do end").unwrap_err();
        assert!(err.contains("not enough values"), "{}", err);
    }

    #[test]
    fn test_undefined_identifier() {
        let err = parse("func f -> do nope end").unwrap_err();
        assert!(err.contains("undefined identifier 'nope'"), "{}", err);
    }

    #[test]
    fn test_unknown_type_name() {
        let err = parse("func f float -> do end").unwrap_err();
        assert!(err.contains("expected an argument type"), "{}", err);
    }

    #[test]
    fn test_extern_and_call() {
        let program = parse(
            "func puts ptr -> int extern \
             func main -> do \"hi\" puts drop end",
        )
        .unwrap();
        let puts = program.find_func("puts").unwrap();
        assert!(puts.is_extern);
        let main = program.find_func("main").unwrap();
        assert!(matches!(&main.body[1], Op::Call { name, .. } if name == "puts"));
    }

    #[test]
    fn test_direct_recursion() {
        parse("func loop_forever -> do loop_forever end").unwrap();
    }

    #[test]
    fn test_redefinition_last_wins() {
        let program = parse(
            "func f -> int do 1 end \
             func f -> do end \
             func g -> do f end",
        )
        .unwrap();
        // The second definition (no return value) is the one 'g' calls.
        let g = program.find_func("g").unwrap();
        match &g.body[0] {
            Op::Call { signature, .. } => assert!(signature.rets.is_empty()),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_redefinition_across_kinds_last_wins() {
        // Constants and functions share one namespace: a later function
        // shadows an earlier constant of the same name...
        let program = parse(
            "const x 1 \
             func x -> int do 42 end \
             func g -> int do x end",
        )
        .unwrap();
        let g = program.find_func("g").unwrap();
        assert!(matches!(&g.body[0], Op::Call { name, .. } if name == "x"));

        // ...and a later constant shadows an earlier function.
        let program = parse(
            "func y -> int do 1 end \
             const y 2 \
             func h -> int do y end",
        )
        .unwrap();
        let h = program.find_func("h").unwrap();
        assert!(matches!(h.body[0], Op::PushInt { value: 2, .. }));
    }

    // --- conditionals ---

    #[test]
    fn test_if_else_join() {
        parse("func g int int bool -> int do if drop else swap drop end end").unwrap();
    }

    #[test]
    fn test_if_without_else_must_be_neutral() {
        let err = parse("func bad2 bool -> do if 1 end end").unwrap_err();
        assert!(err.contains("leave the stack as it found it"), "{}", err);
    }

    #[test]
    fn test_branch_mismatch() {
        let err = parse("func bad bool -> do if 1 drop else 1 end end").unwrap_err();
        assert!(err.contains("different stacks"), "{}", err);
    }

    #[test]
    fn test_if_condition_must_be_bool() {
        let err = parse("func bad int -> do if drop end end").unwrap_err();
        assert!(err.contains("expected bool, got int"), "{}", err);
    }

    #[test]
    fn test_nested_conditionals() {
        parse(
            "func n bool bool -> int do \
               if if 1 else 2 end else drop 3 end \
             end",
        )
        .unwrap();
    }

    #[test]
    fn test_missing_end() {
        let err = parse("func f -> do 1 drop").unwrap_err();
        assert!(err.contains("missing 'end'"), "{}", err);
    }

    // --- includes ---

    #[test]
    fn test_include_merges_symbols() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("util.tack"), "func three -> int do 3 end").unwrap();
        let main = dir.path().join("main.tack");
        fs::write(
            &main,
            "include \"util.tack\" func main -> int do three end",
        )
        .unwrap();

        let source = fs::read_to_string(&main).unwrap();
        let program = Parser::new(&source, &main, vec![dir.path().to_path_buf()])
            .parse()
            .unwrap();
        assert!(program.find_func("three").is_some());
        assert!(program.find_func("main").is_some());
    }

    #[test]
    fn test_include_idempotent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("util.tack"), "func three -> int do 3 end").unwrap();
        let main = dir.path().join("main.tack");
        fs::write(
            &main,
            "include \"util.tack\" include \"util.tack\" func main -> int do three end",
        )
        .unwrap();

        let source = fs::read_to_string(&main).unwrap();
        let program = Parser::new(&source, &main, vec![dir.path().to_path_buf()])
            .parse()
            .unwrap();
        // Including twice has the same effect as including once.
        assert_eq!(program.funcs().filter(|f| f.name == "three").count(), 1);
    }

    #[test]
    fn test_include_cycle() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.tack"),
            "include \"b.tack\" func fa -> do end",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.tack"),
            "include \"a.tack\" func fb -> do end",
        )
        .unwrap();

        let entry = dir.path().join("a.tack");
        let source = fs::read_to_string(&entry).unwrap();
        let program = Parser::new(&source, &entry, vec![dir.path().to_path_buf()])
            .parse()
            .unwrap();
        assert!(program.find_func("fa").is_some());
        assert!(program.find_func("fb").is_some());
    }

    #[test]
    fn test_include_nested() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("c.tack"), "const DEPTH 2").unwrap();
        fs::write(dir.path().join("b.tack"), "include \"c.tack\"").unwrap();
        let entry = dir.path().join("a.tack");
        fs::write(
            &entry,
            "include \"b.tack\" func main -> int do DEPTH end",
        )
        .unwrap();

        let source = fs::read_to_string(&entry).unwrap();
        let program = Parser::new(&source, &entry, vec![dir.path().to_path_buf()])
            .parse()
            .unwrap();
        let main = program.find_func("main").unwrap();
        assert!(matches!(main.body[0], Op::PushInt { value: 2, .. }));
    }

    #[test]
    fn test_include_unresolvable() {
        let err = parse("include \"no-such-file.tack\"").unwrap_err();
        assert!(err.contains("cannot resolve include"), "{}", err);
    }

    #[test]
    fn test_include_requires_string() {
        let err = parse("include util").unwrap_err();
        assert!(err.contains("must be a string literal"), "{}", err);
    }

    // --- top level ---

    #[test]
    fn test_unexpected_top_level_token() {
        let err = parse("42").unwrap_err();
        assert!(err.contains("unexpected token '42' at top level"), "{}", err);
    }

    #[test]
    fn test_missing_const_name() {
        let err = parse("const 1").unwrap_err();
        assert!(err.contains("expected a constant name"), "{}", err);
    }
}
