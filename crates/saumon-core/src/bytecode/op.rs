//! op.rs — Jeu d’instructions de la VM Saumon.
//!
//! Encodage : un octet d’opcode suivi de ses opérandes déclarés. Les index
//! de constantes tiennent sur 1 octet (`CONSTANT`) ou 3 octets little-endian
//! (`CONSTANT_LONG`, pools jusqu’à 2²⁴) ; les sauts portent un offset 16 bits
//! little-endian ; `CLOSURE` est de taille variable (une paire
//! `(is_local, index)` par upvalue de la fonction référencée).
//!
//! ⚠️ Compat : `from_byte` repose sur l’ordre des variantes. Ajouter les
//! nouveaux opcodes EN BAS.

/// Opcode sur un octet. Les discriminants sont contigus depuis zéro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ----- Constantes & littéraux -----
    Constant,
    ConstantLong,
    Nil,
    True,
    False,

    // ----- Pile -----
    Pop,

    // ----- Variables -----
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,

    // ----- Propriétés & super -----
    GetProperty,
    SetProperty,
    GetSuper,

    // ----- Comparaisons -----
    Equal,
    Greater,
    Less,

    // ----- Arith / logique -----
    Add,
    Subtract,
    Multiply,
    Divide,
    Not,
    Negate,

    // ----- I/O -----
    Print,

    // ----- Contrôle -----
    Jump,
    JumpIfFalse,
    Loop,

    // ----- Appels & fermetures -----
    Call,
    Invoke,
    SuperInvoke,
    Closure,
    CloseUpvalue,
    Return,

    // ----- Classes -----
    Class,
    Inherit,
    Method,
}

/// Nature des opérandes immédiats — pilote le désassembleur et la
/// validation de forme des chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Aucun opérande.
    None,
    /// Un octet : slot local, index d’upvalue ou argc.
    Byte,
    /// Un octet : index dans le pool de constantes.
    Const,
    /// Trois octets LE : index de constante étendu.
    ConstLong,
    /// Deux octets LE : offset de saut avant.
    JumpFwd,
    /// Deux octets LE : offset de saut arrière (`LOOP` soustrait).
    JumpBack,
    /// Index de nom (1 octet) + argc (1 octet).
    Invoke,
    /// Index de fonction (1 octet) + paires `(is_local, index)` variables.
    Closure,
}

impl OpCode {
    const ALL: [OpCode; 38] = [
        OpCode::Constant,
        OpCode::ConstantLong,
        OpCode::Nil,
        OpCode::True,
        OpCode::False,
        OpCode::Pop,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::GetGlobal,
        OpCode::DefineGlobal,
        OpCode::SetGlobal,
        OpCode::GetUpvalue,
        OpCode::SetUpvalue,
        OpCode::GetProperty,
        OpCode::SetProperty,
        OpCode::GetSuper,
        OpCode::Equal,
        OpCode::Greater,
        OpCode::Less,
        OpCode::Add,
        OpCode::Subtract,
        OpCode::Multiply,
        OpCode::Divide,
        OpCode::Not,
        OpCode::Negate,
        OpCode::Print,
        OpCode::Jump,
        OpCode::JumpIfFalse,
        OpCode::Loop,
        OpCode::Call,
        OpCode::Invoke,
        OpCode::SuperInvoke,
        OpCode::Closure,
        OpCode::CloseUpvalue,
        OpCode::Return,
        OpCode::Class,
        OpCode::Inherit,
        OpCode::Method,
    ];

    /// Décodage d’un octet ; `None` si l’octet ne nomme aucun opcode.
    #[inline]
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        Self::ALL.get(byte as usize).copied()
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Mnémonique pour le désassembleur et les logs.
    pub fn mnemonic(self) -> &'static str {
        use OpCode::*;
        match self {
            Constant => "CONSTANT",
            ConstantLong => "CONSTANT_LONG",
            Nil => "NIL",
            True => "TRUE",
            False => "FALSE",
            Pop => "POP",
            GetLocal => "GET_LOCAL",
            SetLocal => "SET_LOCAL",
            GetGlobal => "GET_GLOBAL",
            DefineGlobal => "DEFINE_GLOBAL",
            SetGlobal => "SET_GLOBAL",
            GetUpvalue => "GET_UPVALUE",
            SetUpvalue => "SET_UPVALUE",
            GetProperty => "GET_PROPERTY",
            SetProperty => "SET_PROPERTY",
            GetSuper => "GET_SUPER",
            Equal => "EQUAL",
            Greater => "GREATER",
            Less => "LESS",
            Add => "ADD",
            Subtract => "SUBTRACT",
            Multiply => "MULTIPLY",
            Divide => "DIVIDE",
            Not => "NOT",
            Negate => "NEGATE",
            Print => "PRINT",
            Jump => "JUMP",
            JumpIfFalse => "JUMP_IF_FALSE",
            Loop => "LOOP",
            Call => "CALL",
            Invoke => "INVOKE",
            SuperInvoke => "SUPER_INVOKE",
            Closure => "CLOSURE",
            CloseUpvalue => "CLOSE_UPVALUE",
            Return => "RETURN",
            Class => "CLASS",
            Inherit => "INHERIT",
            Method => "METHOD",
        }
    }

    pub fn operand_kind(self) -> OperandKind {
        use OpCode::*;
        match self {
            Constant | GetGlobal | DefineGlobal | SetGlobal | GetProperty | SetProperty
            | GetSuper | Class | Method => OperandKind::Const,
            ConstantLong => OperandKind::ConstLong,
            GetLocal | SetLocal | GetUpvalue | SetUpvalue | Call => OperandKind::Byte,
            Jump | JumpIfFalse => OperandKind::JumpFwd,
            Loop => OperandKind::JumpBack,
            Invoke | SuperInvoke => OperandKind::Invoke,
            Closure => OperandKind::Closure,
            _ => OperandKind::None,
        }
    }

    /// Variation statique de la profondeur de pile ; `None` si elle dépend
    /// du runtime (appels, retours, accès propriété).
    pub fn stack_delta(self) -> Option<i32> {
        use OpCode::*;
        match self {
            Constant | ConstantLong | Nil | True | False | GetLocal | GetGlobal | GetUpvalue
            | Closure => Some(1),
            Pop | Print | DefineGlobal | Equal | Greater | Less | Add | Subtract | Multiply
            | Divide | CloseUpvalue | Inherit | Method => Some(-1),
            SetLocal | SetGlobal | SetUpvalue | Not | Negate | Jump | JumpIfFalse | Loop
            | Class | GetSuper => Some(0),
            Call | Invoke | SuperInvoke | Return | GetProperty | SetProperty => None,
        }
    }

    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(
            self.operand_kind(),
            OperandKind::JumpFwd | OperandKind::JumpBack
        )
    }
}

impl core::fmt::Display for OpCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_roundtrip_is_total() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(op.as_byte() as usize, i);
            assert_eq!(OpCode::from_byte(op.as_byte()), Some(*op));
        }
        assert_eq!(OpCode::from_byte(OpCode::ALL.len() as u8), None);
        assert_eq!(OpCode::from_byte(0xFF), None);
    }

    #[test]
    fn mnemonics_are_stable() {
        assert_eq!(OpCode::Constant.mnemonic(), "CONSTANT");
        assert_eq!(OpCode::JumpIfFalse.mnemonic(), "JUMP_IF_FALSE");
        assert_eq!(OpCode::SuperInvoke.mnemonic(), "SUPER_INVOKE");
    }

    #[test]
    fn operand_shapes() {
        assert_eq!(OpCode::Constant.operand_kind(), OperandKind::Const);
        assert_eq!(OpCode::ConstantLong.operand_kind(), OperandKind::ConstLong);
        assert_eq!(OpCode::Call.operand_kind(), OperandKind::Byte);
        assert_eq!(OpCode::Loop.operand_kind(), OperandKind::JumpBack);
        assert_eq!(OpCode::Invoke.operand_kind(), OperandKind::Invoke);
        assert_eq!(OpCode::Add.operand_kind(), OperandKind::None);
        assert!(OpCode::Jump.is_jump());
        assert!(!OpCode::Return.is_jump());
    }

    #[test]
    fn stack_deltas_basic() {
        assert_eq!(OpCode::Constant.stack_delta(), Some(1));
        assert_eq!(OpCode::Add.stack_delta(), Some(-1));
        assert_eq!(OpCode::Negate.stack_delta(), Some(0));
        assert_eq!(OpCode::Call.stack_delta(), None);
    }
}
