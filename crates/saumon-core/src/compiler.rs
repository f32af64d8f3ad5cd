//! compiler.rs — Compilateur Saumon : source → fonction top-niveau, en une
//! seule passe.
//!
//! Un parseur Pratt pilote l’émission : une table (préfixe, infixe,
//! précédence) par espèce de token, la montée de précédence consommant
//! d’abord la règle préfixe du token courant puis les règles infixes tant
//! que leur précédence tient. L’affectation n’est permise qu’au niveau
//! `Assignment` : les règles cibles reçoivent un drapeau `can_assign` et ne
//! doivent jamais avaler un `=` à précédence supérieure.
//!
//! Résolution des portées :
//!   - globales → par nom, au runtime, contre la table de la VM ;
//!   - locales → tableau de la fonction courante, du sommet vers le bas ;
//!     l’ombrage est permis entre profondeurs, interdit dans la même ;
//!   - upvalues → recherche récursive dans les contextes englobants, avec
//!     insertion (dédupliquée) d’un descripteur à chaque étage traversé ;
//!   - classes → pile parallèle portant `has_superclass` pour `super`.
//!
//! Récupération d’erreur en mode panique : la première erreur s’affiche,
//! les suivantes sont tues jusqu’au prochain point de synchronisation
//! (`;` ou mot-clé ouvrant d’instruction) ; toutes les instructions sont
//! quand même parcourues et le résultat global est un échec.

use thiserror::Error;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::op::OpCode;
use crate::heap::Heap;
use crate::object::{Obj, ObjFunction, ObjRef};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

/// Issue d’une compilation ratée. Les diagnostics sont déjà sur stderr.
#[derive(Debug, Error)]
#[error("compile error")]
pub struct CompileError;

/// Compile `source` en fonction top-niveau (`<script>`) allouée dans `heap`.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, CompileError> {
    let mut parser = Parser::new(source, heap);
    parser.advance();
    while !parser.matches(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();
    if parser.had_error {
        Err(CompileError)
    } else {
        Ok(function)
    }
}

/* ───────────────────────── Précédences & règles ───────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

/// La table Pratt : (préfixe, infixe, précédence) par espèce de token.
fn rule<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    use TokenKind::*;
    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'h>>,
        Option<ParseFn<'src, 'h>>,
        Precedence,
    ) = match kind {
        LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        Dot => (None, Some(Parser::dot), Precedence::Call),
        Minus => (Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        Plus => (None, Some(Parser::binary), Precedence::Term),
        Slash | Star => (None, Some(Parser::binary), Precedence::Factor),
        Bang => (Some(Parser::unary), None, Precedence::None),
        BangEqual | EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            (None, Some(Parser::binary), Precedence::Comparison)
        }
        Identifier => (Some(Parser::variable), None, Precedence::None),
        Str => (Some(Parser::string), None, Precedence::None),
        Number => (Some(Parser::number), None, Precedence::None),
        And => (None, Some(Parser::and_), Precedence::And),
        Or => (None, Some(Parser::or_), Precedence::Or),
        False | Nil | True => (Some(Parser::literal), None, Precedence::None),
        Super => (Some(Parser::super_), None, Precedence::None),
        This => (Some(Parser::this_), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule { prefix, infix, precedence }
}

/* ───────────────────────── Contextes de compilation ───────────────────────── */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    /// −1 tant que l’initialiseur n’est pas terminé.
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Un contexte par fonction imbriquée en cours de compilation.
struct FuncCompiler<'src> {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FuncCompiler<'src> {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        let mut function = ObjFunction::new();
        function.name = name;
        // le slot 0 appartient à la fonction appelée (receveur des méthodes)
        let slot_zero = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
            "this"
        } else {
            ""
        };
        Self {
            function,
            kind,
            locals: vec![Local { name: slot_zero, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Contexte de classe — porte la présence d’une superclasse pour `super`.
struct ClassCompiler {
    has_superclass: bool,
}

/* ───────────────────────── Parseur ───────────────────────── */

struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    heap: &'h mut Heap,
    compilers: Vec<FuncCompiler<'src>>,
    classes: Vec<ClassCompiler>,
}

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        let placeholder = Token { kind: TokenKind::Eof, lexeme: "", line: 0 };
        Self {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            heap,
            compilers: vec![FuncCompiler::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        }
    }

    /* ────── contexte courant ────── */

    fn ctx(&self) -> &FuncCompiler<'src> {
        match self.compilers.last() {
            Some(c) => c,
            None => unreachable!("aucun contexte de fonction actif"),
        }
    }

    fn ctx_mut(&mut self) -> &mut FuncCompiler<'src> {
        match self.compilers.last_mut() {
            Some(c) => c,
            None => unreachable!("aucun contexte de fonction actif"),
        }
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.ctx_mut().function.chunk
    }

    /* ────── flux de tokens ────── */

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    /* ────── diagnostics ────── */

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    /// Première erreur affichée ; les suivantes sont tues jusqu’à la
    /// synchronisation. `had_error` reste vrai dans tous les cas.
    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let place = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        eprintln!("[line {}] Error{place}: {message}", token.line);
        self.had_error = true;
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Class | Fun | Var | For | If | While | Print | Return => return,
                _ => self.advance(),
            }
        }
    }

    /* ────── émission ────── */

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.as_byte());
    }

    fn emit_ops(&mut self, a: OpCode, b: OpCode) {
        self.emit_op(a);
        self.emit_op(b);
    }

    fn emit_return(&mut self) {
        // un initialiseur rend toujours son receveur (slot 0)
        if self.ctx().kind == FunctionKind::Initializer {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line;
        if !self.current_chunk().write_constant(value, line) {
            self.error("Too many constants in one chunk.");
        }
    }

    /// Constante adressée sur un octet (noms, fonctions, méthodes).
    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_chunk().add_constant(value);
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 : l’opérande lui-même précède la destination
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_le_bytes();
        self.current_chunk().code[offset] = bytes[0];
        self.current_chunk().code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_le_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    /// Clôt le contexte courant : émet le retour implicite, alloue la
    /// fonction, renvoie (fonction, descripteurs d’upvalues).
    fn end_compiler(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
        self.emit_return();
        let ctx = match self.compilers.pop() {
            Some(c) => c,
            None => unreachable!("aucun contexte de fonction actif"),
        };

        #[cfg(feature = "print-code")]
        if !self.had_error {
            let label = match ctx.function.name {
                Some(name) => self.heap.string(name).chars.to_string(),
                None => "<script>".to_string(),
            };
            log::debug!(
                "{}",
                crate::bytecode::disasm::disassemble_full(self.heap, &ctx.function.chunk, &label)
            );
        }

        let upvalues = ctx.upvalues.clone();
        let function = self.heap.alloc(Obj::Function(ctx.function));
        (function, upvalues)
    }

    /* ────── portées ────── */

    fn begin_scope(&mut self) {
        self.ctx_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.ctx_mut().scope_depth -= 1;
        loop {
            let (close, done) = {
                let ctx = self.ctx();
                match ctx.locals.last() {
                    Some(local) if local.depth > ctx.scope_depth => (local.is_captured, false),
                    _ => (false, true),
                }
            };
            if done {
                break;
            }
            // un local capturé se ferme, les autres se jettent
            self.emit_op(if close { OpCode::CloseUpvalue } else { OpCode::Pop });
            self.ctx_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.ctx().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut duplicate = false;
        {
            let ctx = self.ctx();
            for local in ctx.locals.iter().rev() {
                if local.depth != -1 && local.depth < ctx.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let ctx = self.ctx_mut();
        if ctx.scope_depth == 0 {
            return;
        }
        let depth = ctx.scope_depth;
        if let Some(local) = ctx.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.heap.copy_string(name);
        self.make_constant(Value::obj(interned))
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    /// Recherche un local du contexte `level`, du sommet vers le bas.
    fn resolve_local(&mut self, level: usize, name: &str) -> Option<u8> {
        let mut found = None;
        for (index, local) in self.compilers[level].locals.iter().enumerate().rev() {
            if local.name == name {
                found = Some((index, local.depth == -1));
                break;
            }
        }
        let (index, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        Some(index as u8)
    }

    /// Recherche remontante : insère un descripteur à chaque étage traversé.
    fn resolve_upvalue(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.compilers[enclosing].locals[local as usize].is_captured = true;
            return self.add_upvalue(level, local, true);
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return self.add_upvalue(level, upvalue, false);
        }
        None
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> Option<u8> {
        let desc = UpvalueDesc { index, is_local };
        if let Some(existing) =
            self.compilers[level].upvalues.iter().position(|u| *u == desc)
        {
            return Some(existing as u8);
        }
        if self.compilers[level].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return Some(0);
        }
        self.compilers[level].upvalues.push(desc);
        self.compilers[level].function.upvalue_count = self.compilers[level].upvalues.len();
        Some((self.compilers[level].upvalues.len() - 1) as u8)
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let level = self.compilers.len() - 1;
        let (get, set, arg) = if let Some(arg) = self.resolve_local(level, name) {
            (OpCode::GetLocal, OpCode::SetLocal, arg)
        } else if let Some(arg) = self.resolve_upvalue(level, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, arg)
        } else {
            let arg = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, arg)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op(set);
        } else {
            self.emit_op(get);
        }
        self.emit_byte(arg);
    }

    /* ────── expressions (règles Pratt) ────── */

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        // un `=` resté sur place n’était la cible de personne
        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1]; // sans les guillemets
        let interned = self.heap.copy_string(contents);
        self.emit_constant(Value::obj(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("littéral inattendu"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("opérateur unaire inattendu"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(rule(operator).precedence.next());
        use TokenKind::*;
        match operator {
            BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            EqualEqual => self.emit_op(OpCode::Equal),
            Greater => self.emit_op(OpCode::Greater),
            GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            Less => self.emit_op(OpCode::Less),
            LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            Plus => self.emit_op(OpCode::Add),
            Minus => self.emit_op(OpCode::Subtract),
            Star => self.emit_op(OpCode::Multiply),
            Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("opérateur binaire inattendu"),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        // court-circuit : gauche fausse → on saute la droite
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetProperty);
            self.emit_byte(name);
        } else if self.matches(TokenKind::LeftParen) {
            // accès + appel fusionnés
            let argc = self.argument_list();
            self.emit_op(OpCode::Invoke);
            self.emit_byte(name);
            self.emit_byte(argc);
        } else {
            self.emit_op(OpCode::GetProperty);
            self.emit_byte(name);
        }
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable("super", false);
            self.emit_op(OpCode::SuperInvoke);
            self.emit_byte(name);
            self.emit_byte(argc);
        } else {
            self.named_variable("super", false);
            self.emit_op(OpCode::GetSuper);
            self.emit_byte(name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc.min(255) as u8
    }

    /* ────── déclarations & instructions ────── */

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    /// `for` désucré : initialiseur + saut de condition + corps + rattrapage
    /// de l’incrément.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // pas d’initialiseur
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.ctx().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.ctx().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    /* ────── fonctions, méthodes, classes ────── */

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // initialisée d’emblée : la récursion doit pouvoir se nommer
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile un corps de fonction dans un contexte imbriqué, puis émet
    /// `CLOSURE fn_const` suivi d’une paire `(is_local, index)` par upvalue.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.copy_string(self.previous.lexeme);
        self.compilers.push(FuncCompiler::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.ctx().function.arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.ctx_mut().function.arity += 1;
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // pas de end_scope() : la frame disparaît entière au retour
        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::obj(function));
        self.emit_op(OpCode::Closure);
        self.emit_byte(constant);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);
        self.emit_op(OpCode::Method);
        self.emit_byte(constant);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_op(OpCode::Class);
        self.emit_byte(name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCompiler { has_superclass: false });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // `super` vit dans une portée à elle, fermée après les méthodes
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().is_some_and(|c| c.has_superclass) {
            self.end_scope();
        }
        self.classes.pop();
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disasm::disassemble_compact;

    fn listing(source: &str) -> String {
        let mut heap = Heap::new();
        let function = compile(source, &mut heap).expect("compilation ok");
        disassemble_compact(&heap, &heap.function(function).chunk)
    }

    fn mnemonics(source: &str) -> Vec<String> {
        listing(source)
            .lines()
            .map(|l| {
                l.split_whitespace()
                    .nth(2)
                    .or_else(|| l.split_whitespace().nth(1))
                    .unwrap_or("")
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn arithmetic_respects_precedence() {
        // 1 + 2 * 3 : la multiplication se fait d’abord
        let ops = mnemonics("print 1 + 2 * 3;");
        let expected = ["CONSTANT", "CONSTANT", "CONSTANT", "MULTIPLY", "ADD", "PRINT", "NIL", "RETURN"];
        let tail: Vec<&str> = ops.iter().map(String::as_str).collect();
        assert_eq!(tail, expected);
    }

    #[test]
    fn locals_compile_to_slots() {
        let text = listing("{ var a = 1; print a; a = 2; }");
        assert!(text.contains("GET_LOCAL"));
        assert!(text.contains("SET_LOCAL"));
        assert!(!text.contains("GET_GLOBAL"));
    }

    #[test]
    fn globals_go_through_the_table() {
        let text = listing("var a = 1; print a;");
        assert!(text.contains("DEFINE_GLOBAL"));
        assert!(text.contains("GET_GLOBAL"));
    }

    #[test]
    fn nested_function_captures_an_upvalue() {
        use crate::object::{Obj, ObjKind};

        fn function_constants(heap: &Heap, function: crate::object::ObjRef) -> Vec<crate::object::ObjRef> {
            heap.function(function)
                .chunk
                .constants
                .iter()
                .filter_map(|v| v.as_obj())
                .filter(|r| heap.get(*r).kind() == ObjKind::Function)
                .collect()
        }

        let mut heap = Heap::new();
        let script = compile(
            "fun outer() { var x = 1; fun inner() { return x; } return inner; }",
            &mut heap,
        )
        .expect("compilation ok");
        let text = disassemble_compact(&heap, &heap.function(script).chunk);
        assert!(text.contains("CLOSURE"));

        // outer porte inner en constante, avec 1 upvalue déclaré (x, slot 1)
        let outer = function_constants(&heap, script)[0];
        let outer_text = disassemble_compact(&heap, &heap.function(outer).chunk);
        assert!(outer_text.contains("local 1"));

        let inner = function_constants(&heap, outer)[0];
        let Obj::Function(inner_fn) = heap.get(inner) else { panic!("fonction attendue") };
        assert_eq!(inner_fn.upvalue_count, 1);
        let inner_text = disassemble_compact(&heap, &inner_fn.chunk);
        assert!(inner_text.contains("GET_UPVALUE"));
    }

    #[test]
    fn control_flow_uses_patched_jumps() {
        let text = listing("if (true) { print 1; } else { print 2; }");
        assert!(text.contains("JUMP_IF_FALSE"));
        assert!(text.contains("JUMP"));
        let loops = listing("while (true) { print 1; }");
        assert!(loops.contains("LOOP"));
        let fors = listing("for (var i = 0; i < 3; i = i + 1) { print i; }");
        assert!(fors.contains("LOOP"));
        assert!(fors.contains("JUMP_IF_FALSE"));
    }

    #[test]
    fn classes_emit_inherit_and_methods() {
        let text = listing("class A { hi() { print 1; } } class B < A { init() { this.x = 1; } }");
        assert!(text.contains("CLASS"));
        assert!(text.contains("METHOD"));
        assert!(text.contains("INHERIT"));
    }

    #[test]
    fn syntax_errors_fail_and_recover() {
        let mut heap = Heap::new();
        // deux instructions fautives : la panique se resynchronise au `;`
        assert!(compile("print ; var 1 = 2; print 3;", &mut heap).is_err());
        // un programme sain compile toujours après un échec sur le même tas
        assert!(compile("print 3;", &mut heap).is_ok());
    }

    #[test]
    fn assignment_targets_are_checked() {
        let mut heap = Heap::new();
        assert!(compile("1 + 2 = 3;", &mut heap).is_err());
        assert!(compile("var a = 1; a = 2;", &mut heap).is_ok());
    }

    #[test]
    fn this_and_super_need_a_class() {
        let mut heap = Heap::new();
        assert!(compile("print this;", &mut heap).is_err());
        assert!(compile("class A { f() { return super.f(); } }", &mut heap).is_err());
        assert!(compile("return 1;", &mut heap).is_err());
    }

    #[test]
    fn same_scope_shadowing_is_rejected() {
        let mut heap = Heap::new();
        assert!(compile("{ var a = 1; var a = 2; }", &mut heap).is_err());
        assert!(compile("{ var a = 1; { var a = 2; } }", &mut heap).is_ok());
    }
}
