//! saumon-core — Cœur du langage Saumon
//!
//! Tout le pipeline d’exécution : source → tokens → compilateur Pratt en
//! une passe → fonction top-niveau (chunk + fonctions imbriquées en
//! constantes) → VM à pile qui l’enveloppe dans une fermeture et déroule la
//! boucle de dispatch, le GC s’invitant aux points d’allocation.
//!
//! ## Modules
//! - `value`    : la valeur taggée (ou NaN-boxée, feature `nan-boxing`).
//! - `object`   : les huit espèces d’objets du tas + hash FNV-1a.
//! - `heap`     : arène d’objets, internement des chaînes, GC mark/sweep.
//! - `table`    : table à adressage ouvert (globales, champs, méthodes,
//!   ensemble d’internement).
//! - `bytecode` : opcodes, `Chunk` (code + constantes + lignes RLE),
//!   désassembleur.
//! - `scanner`  : producteur du flux de tokens.
//! - `compiler` : parseur Pratt → bytecode, résolution locales/upvalues/
//!   classes.
//! - `vm`       : frames d’appel, dispatch, upvalues, natives, racines GC.
//!
//! ## Features
//! - **nan-boxing** : `Value` en mot 64 bits (payload de NaN silencieux).
//! - **gc-stress**  : collection à chaque point d’allocation éligible.
//! - **print-code** : désassemblage loggé de chaque fonction compilée.
//! - **trace-exec** : pile + instruction loggées à chaque pas.
//!
//! ## Exemple rapide
//! ```
//! use saumon_core::{Vm, VmOptions};
//!
//! let mut vm = Vm::with_options(VmOptions { capture_stdout: true });
//! vm.interpret("print 1 + 2 * 3;").expect("exécution ok");
//! assert_eq!(vm.take_output(), "7\n");
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

// ---------- Modules publics ----------
pub mod bytecode;
pub mod compiler;
pub mod heap;
pub mod object;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

// ---------- Reexports de confort ----------
pub use bytecode::{chunk::Chunk, chunk::LineTable, op::OpCode};
pub use compiler::{compile, CompileError};
pub use heap::Heap;
pub use object::{Obj, ObjKind, ObjRef};
pub use value::Value;
pub use vm::{InterpretError, Vm, VmOptions};

// ---------- Version ----------
/// Version du crate (lisible, via Cargo).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bannière de version (logs et REPL).
pub fn version() -> String {
    format!("saumon {VERSION}")
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_banner() {
        assert!(version().starts_with("saumon "));
    }

    #[test]
    fn the_public_surface_compiles_and_runs() {
        let mut vm = Vm::with_options(VmOptions { capture_stdout: true });
        vm.interpret("var x = \"sau\" + \"mon\"; print x;").expect("exécution ok");
        assert_eq!(vm.take_output(), "saumon\n");
    }
}
