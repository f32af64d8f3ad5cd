//! bytecode — flux d’instructions, chunks et désassemblage.

pub mod chunk;
pub mod disasm;
pub mod op;

pub use chunk::{Chunk, LineTable};
pub use op::OpCode;
