//! object.rs — Les huit espèces d’objets du tas Saumon.
//!
//! Un objet vit dans l’arène du tas ([`crate::heap::Heap`]) et n’est désigné
//! que par un handle copiable [`ObjRef`] — jamais par pointeur. L’union
//! discriminée [`Obj`] porte la charge utile ; l’en-tête (marque GC, taille
//! comptabilisée) appartient au slot de l’arène.
//!
//! Espèces :
//!   - `Str`         : octets immuables + hash FNV-1a mémoïsé, internés
//!   - `Function`    : arité, nb d’upvalues, chunk possédé, nom optionnel
//!   - `Closure`     : fonction + upvalues capturés
//!   - `Upvalue`     : ouvert (slot de pile) ou fermé (valeur possédée)
//!   - `Native`      : fonction hôte `fn(&[Value]) -> Value`
//!   - `Class`       : nom + table des méthodes
//!   - `Instance`    : classe + table des champs
//!   - `BoundMethod` : receveur + méthode

use crate::bytecode::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Handle d’objet : index 32 bits dans l’arène du tas.
///
/// L’identité (`==`) des handles EST l’identité des objets — c’est ce que
/// garantit l’internement pour les chaînes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    #[inline]
    pub fn from_index(index: u32) -> Self {
        ObjRef(index)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Discriminant d’espèce, exposé pour le GC et le désassembleur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    BoundMethod,
    Class,
    Closure,
    Function,
    Instance,
    Native,
    Str,
    Upvalue,
}

/* ───────────────────────── Charges utiles ───────────────────────── */

/// Chaîne internée : contenu immuable + hash FNV-1a calculé une fois.
#[derive(Debug)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

/// Fonction compilée : son chunk lui appartient.
#[derive(Debug)]
pub struct ObjFunction {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Nom interné ; `None` pour le script top-niveau.
    pub name: Option<ObjRef>,
}

impl ObjFunction {
    pub fn new() -> Self {
        Self { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name: None }
    }
}

impl Default for ObjFunction {
    fn default() -> Self {
        Self::new()
    }
}

/// Fonction hôte : argc = longueur de la tranche.
pub type NativeFn = fn(&[Value]) -> Value;

#[derive(Debug)]
pub struct ObjNative {
    pub function: NativeFn,
}

/// Fermeture : la fonction + un upvalue par capture déclarée.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// État d’un upvalue : ouvert (pointe un slot de pile) puis fermé (possède
/// la valeur copiée).
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

/// Upvalue ; `next` enfile les upvalues OUVERTS en liste triée par slot
/// décroissant (propriété requise par capture et fermeture en O(k)).
#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
    pub next: Option<ObjRef>,
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

/* ───────────────────────── Union discriminée ───────────────────────── */

#[derive(Debug)]
pub enum Obj {
    BoundMethod(ObjBoundMethod),
    Class(ObjClass),
    Closure(ObjClosure),
    Function(ObjFunction),
    Instance(ObjInstance),
    Native(ObjNative),
    Str(ObjString),
    Upvalue(ObjUpvalue),
}

impl Obj {
    pub fn kind(&self) -> ObjKind {
        match self {
            Obj::BoundMethod(_) => ObjKind::BoundMethod,
            Obj::Class(_) => ObjKind::Class,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Function(_) => ObjKind::Function,
            Obj::Instance(_) => ObjKind::Instance,
            Obj::Native(_) => ObjKind::Native,
            Obj::Str(_) => ObjKind::Str,
            Obj::Upvalue(_) => ObjKind::Upvalue,
        }
    }

    /// Empreinte mémoire comptabilisée par le GC : la variante + la capacité
    /// réelle des conteneurs qu’elle possède (pas seulement `size_of`).
    pub fn accounted_size(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            Obj::Str(s) => s.chars.len(),
            Obj::Function(f) => {
                f.chunk.code.capacity()
                    + f.chunk.constants.capacity() * std::mem::size_of::<Value>()
                    + f.chunk.lines.accounted_size()
            }
            Obj::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.accounted_size(),
            Obj::Instance(i) => i.fields.accounted_size(),
            Obj::BoundMethod(_) | Obj::Native(_) | Obj::Upvalue(_) => 0,
        }
    }
}

/* ───────────────────────── Hash FNV-1a ───────────────────────── */

/// FNV-1a 32 bits — le hash mémoïsé de chaque chaîne internée.
pub fn hash_str(chars: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in chars.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_vectors() {
        // Vecteurs connus de FNV-1a 32 bits.
        assert_eq!(hash_str(""), 2_166_136_261);
        assert_eq!(hash_str("a"), 0xe40c_292c);
        assert_eq!(hash_str("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn kinds_match_payloads() {
        let f = Obj::Function(ObjFunction::new());
        assert_eq!(f.kind(), ObjKind::Function);
        let s = Obj::Str(ObjString { chars: "x".into(), hash: hash_str("x") });
        assert_eq!(s.kind(), ObjKind::Str);
    }

    #[test]
    fn accounted_size_counts_contents() {
        let small = Obj::Str(ObjString { chars: "".into(), hash: 0 });
        let big = Obj::Str(ObjString { chars: "abcdefghij".into(), hash: 0 });
        assert!(big.accounted_size() > small.accounted_size());
    }
}
