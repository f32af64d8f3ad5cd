//! disasm.rs — Désassembleur “lisible humain” des chunks Saumon.
//!
//! Deux niveaux :
//!  - `disassemble_compact(heap, chunk)` : 1 ligne par instruction ;
//!  - `disassemble_full(heap, chunk, title)` : header + pool de constantes
//!    + plages de lignes + code.
//!
//! Robustesse :
//!  - constantes résolues via le tas (aperçu inline) ;
//!  - destinations de saut calculées (`-> 0012`) ;
//!  - octet inconnu affiché tel quel, avancement d’un octet ;
//!  - `CLOSURE` déplie ses paires `(local|upvalue, index)` d’après le
//!    compte d’upvalues de la fonction référencée.

use std::fmt::Write as _;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::op::{OpCode, OperandKind};
use crate::heap::Heap;

/// Vue compacte : `OFFSET (line) MNEMONIC …`, une instruction par ligne.
pub fn disassemble_compact(heap: &Heap, chunk: &Chunk) -> String {
    let mut out = String::new();
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(heap, chunk, offset);
        let _ = writeln!(out, "{text}");
        offset = next;
    }
    out
}

/// Vue complète : header + pool + table des lignes + code.
pub fn disassemble_full(heap: &Heap, chunk: &Chunk, title: &str) -> String {
    let mut s = String::new();

    let _ = writeln!(s, "== {title} ==");
    let _ = writeln!(
        s,
        "• code: {} octets   constantes: {}",
        chunk.code.len(),
        chunk.constants.len()
    );

    if chunk.constants.is_empty() {
        let _ = writeln!(s, "\n# Const Pool (vide)");
    } else {
        let _ = writeln!(s, "\n# Const Pool");
        for (ix, value) in chunk.constants.iter().enumerate() {
            let _ = writeln!(s, "  [{ix:03}] {}", heap.stringify(*value));
        }
    }

    let _ = writeln!(s, "\n# Line Table (plages RLE)");
    let mut start = 0usize;
    for run in chunk.lines.runs() {
        let end = start + run.len as usize;
        let _ = writeln!(s, "  [{start:04}..{end:04})  line {}", run.line);
        start = end;
    }
    if start == 0 {
        let _ = writeln!(s, "  <aucune info de ligne>");
    }

    let _ = writeln!(s, "\n# Code");
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(heap, chunk, offset);
        let _ = writeln!(s, "  {text}");
        offset = next;
    }

    s
}

/// Une instruction : renvoie (texte, offset suivant).
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut text = String::new();
    let _ = write!(text, "{offset:04} ");

    // colonne ligne : "   |" si identique à l’octet précédent
    let line = chunk.lines.line_of(offset);
    if offset > 0 && line == chunk.lines.line_of(offset - 1) {
        let _ = write!(text, "   | ");
    } else {
        let _ = write!(text, "{line:4} ");
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        let _ = write!(text, "UNKNOWN 0x{byte:02x}");
        return (text, offset + 1);
    };

    match op.operand_kind() {
        OperandKind::None => {
            let _ = write!(text, "{}", op.mnemonic());
            (text, offset + 1)
        }
        OperandKind::Byte => {
            let operand = chunk.code[offset + 1];
            let _ = write!(text, "{:<16} {operand:4}", op.mnemonic());
            (text, offset + 2)
        }
        OperandKind::Const => {
            let ix = chunk.code[offset + 1] as usize;
            let _ = write!(text, "{:<16} {ix:4} {}", op.mnemonic(), const_preview(heap, chunk, ix));
            (text, offset + 2)
        }
        OperandKind::ConstLong => {
            let ix = chunk.read_u24(offset + 1);
            let _ = write!(text, "{:<16} {ix:4} {}", op.mnemonic(), const_preview(heap, chunk, ix));
            (text, offset + 4)
        }
        OperandKind::JumpFwd | OperandKind::JumpBack => {
            let jump = chunk.read_u16(offset + 1) as isize;
            let base = offset as isize + 3;
            let target = if op.operand_kind() == OperandKind::JumpBack {
                base - jump
            } else {
                base + jump
            };
            let _ = write!(text, "{:<16} {offset:4} -> {target}", op.mnemonic());
            (text, offset + 3)
        }
        OperandKind::Invoke => {
            let ix = chunk.code[offset + 1] as usize;
            let argc = chunk.code[offset + 2];
            let _ = write!(
                text,
                "{:<16} ({argc} args) {ix:4} {}",
                op.mnemonic(),
                const_preview(heap, chunk, ix)
            );
            (text, offset + 3)
        }
        OperandKind::Closure => {
            let ix = chunk.code[offset + 1] as usize;
            let _ = write!(text, "{:<16} {ix:4} {}", op.mnemonic(), const_preview(heap, chunk, ix));
            let mut next = offset + 2;
            // une paire (is_local, index) par upvalue déclaré
            let upvalue_count = chunk.constants.get(ix)
                .and_then(|v| v.as_obj())
                .map_or(0, |f| heap.function(f).upvalue_count);
            for _ in 0..upvalue_count {
                let is_local = chunk.code[next];
                let index = chunk.code[next + 1];
                let _ = write!(
                    text,
                    "\n{:04}    |                        {} {index}",
                    next,
                    if is_local == 1 { "local" } else { "upvalue" }
                );
                next += 2;
            }
            (text, next)
        }
    }
}

fn const_preview(heap: &Heap, chunk: &Chunk, ix: usize) -> String {
    match chunk.constants.get(ix) {
        Some(v) => format!("'{}'", heap.stringify(*v)),
        None => "<invalid>".to_string(),
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use crate::value::Value;

    #[test]
    fn listing_reproduces_the_instruction_stream() {
        let mut heap = Heap::new();
        let name = heap.copy_string("x");
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::number(1.0), 1);
        chunk.write_constant(Value::obj(name), 1);
        chunk.write_op(OpCode::Add, 2);
        chunk.write_op(OpCode::Print, 2);
        chunk.write_op(OpCode::Return, 3);

        let listing = disassemble_compact(&heap, &chunk);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("CONSTANT"));
        assert!(lines[0].contains("'1'"));
        assert!(lines[1].contains("'x'"));
        assert!(lines[2].contains("ADD"));
        assert!(lines[3].contains("PRINT"));
        assert!(lines[4].contains("RETURN"));
        // la colonne ligne se répète en "   |"
        assert!(lines[3].contains("   |"));
    }

    #[test]
    fn jump_targets_are_resolved() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, 1);
        chunk.write(2, 1);
        chunk.write(0, 1);
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Pop, 1);

        let (text, next) = disassemble_instruction(&heap, &chunk, 0);
        assert_eq!(next, 3);
        assert!(text.contains("JUMP"));
        assert!(text.contains("-> 5"));
    }

    #[test]
    fn unknown_bytes_advance_one() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write(0xEE, 1);
        let (text, next) = disassemble_instruction(&heap, &chunk, 0);
        assert!(text.contains("UNKNOWN"));
        assert_eq!(next, 1);
    }

    #[test]
    fn full_listing_has_pool_and_line_runs() {
        let mut heap = Heap::new();
        let s = heap.copy_string("hé");
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::obj(s), 7);
        chunk.write_op(OpCode::Return, 8);

        let full = disassemble_full(&heap, &chunk, "script");
        assert!(full.contains("== script =="));
        assert!(full.contains("# Const Pool"));
        assert!(full.contains("hé"));
        assert!(full.contains("# Line Table"));
        assert!(full.contains("line 7"));
        assert!(full.contains("# Code"));
    }
}
