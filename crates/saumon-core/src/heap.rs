//! heap.rs — Le tas Saumon : arène d’objets, internement, GC mark/sweep.
//!
//! Le tas possède TOUS les objets. Une arène de slots (`Vec` + liste libre)
//! remplace la liste intrusive chaînée de l’allocateur C : le balayage
//! visite chaque slot, la liste libre recycle les index — même contrat,
//! zéro unsafe.
//!
//! Cycle de collection (ordre imposé) :
//!   1. marquage des racines (orchestré par la VM, qui les connaît) ;
//!   2. traçage : vidage de la pile grise, marquage des enfants par espèce ;
//!   3. élagage FAIBLE de l’ensemble d’internement (clés non marquées) —
//!      AVANT le balayage, sinon la table pointerait des slots libérés ;
//!   4. balayage : slot non marqué → libéré, marqué → marque effacée.
//!
//! Déclenchement : `bytes_allocated > next_gc` (1 Mio au départ, ×2 après
//! chaque balayage). La feature `gc-stress` force le seuil à zéro. Les
//! collections partent des points d’allocation de la VM, jamais du milieu
//! d’une opération du tas.

use log::{debug, trace};

use crate::object::{
    hash_str, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance, ObjNative,
    ObjRef, ObjString, ObjUpvalue, UpvalueState,
};
use crate::table::Table;
use crate::value::{print_number, Value};

/// Premier seuil de collection.
const FIRST_GC_AT: usize = 1024 * 1024;
/// Facteur de croissance du seuil après balayage.
const GC_GROW_FACTOR: usize = 2;

#[derive(Debug)]
struct Slot {
    marked: bool,
    /// Taille comptabilisée à l’allocation (reprise telle quelle à la
    /// libération, même si les conteneurs internes ont grandi entre-temps).
    size: usize,
    obj: Obj,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    /// Ensemble d’internement — l’unique référence faible du système.
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    /// Pile grise du traçage tricolore.
    gray: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Self { next_gc: FIRST_GC_AT, ..Self::default() }
    }

    /* ───────────────────────── Allocation ───────────────────────── */

    /// Place `obj` dans un slot (recyclé si possible) et comptabilise sa
    /// taille. Ne déclenche jamais de collection : les appelants testent
    /// `should_collect()` AVANT, pendant que leurs racines sont en règle.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        let size = obj.accounted_size();
        self.bytes_allocated += size;
        let slot = Slot { marked: false, size, obj };
        let r = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjRef::from_index(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef::from_index((self.slots.len() - 1) as u32)
            }
        };
        trace!("alloc slot {} ({} octets, {:?})", r.index(), size, self.get(r).kind());
        r
    }

    /// Le prochain objet doit-il attendre une collection ?
    #[inline]
    pub fn should_collect(&self) -> bool {
        if cfg!(feature = "gc-stress") {
            return true;
        }
        self.bytes_allocated > self.next_gc
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Nombre d’objets vivants (diagnostic et tests).
    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /* ───────────────────────── Accès typés ───────────────────────── */

    #[inline]
    pub fn get(&self, r: ObjRef) -> &Obj {
        match &self.slots[r.index() as usize] {
            Some(slot) => &slot.obj,
            None => unreachable!("handle mort : slot {}", r.index()),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        match &mut self.slots[r.index() as usize] {
            Some(slot) => &mut slot.obj,
            None => unreachable!("handle mort : slot {}", r.index()),
        }
    }

    pub fn string(&self, r: ObjRef) -> &ObjString {
        match self.get(r) {
            Obj::Str(s) => s,
            other => unreachable!("slot {} : chaîne attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    #[inline]
    pub fn string_hash(&self, r: ObjRef) -> u32 {
        self.string(r).hash
    }

    pub fn function(&self, r: ObjRef) -> &ObjFunction {
        match self.get(r) {
            Obj::Function(f) => f,
            other => unreachable!("slot {} : fonction attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &ObjClass {
        match self.get(r) {
            Obj::Class(c) => c,
            other => unreachable!("slot {} : classe attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut ObjClass {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            other => unreachable!("classe attendue, {:?} trouvé", other.kind()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &ObjInstance {
        match self.get(r) {
            Obj::Instance(i) => i,
            other => unreachable!("slot {} : instance attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut ObjInstance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            other => unreachable!("instance attendue, {:?} trouvé", other.kind()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &ObjClosure {
        match self.get(r) {
            Obj::Closure(c) => c,
            other => unreachable!("slot {} : fermeture attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut ObjClosure {
        match self.get_mut(r) {
            Obj::Closure(c) => c,
            other => unreachable!("fermeture attendue, {:?} trouvé", other.kind()),
        }
    }

    pub fn bound_method(&self, r: ObjRef) -> &ObjBoundMethod {
        match self.get(r) {
            Obj::BoundMethod(b) => b,
            other => unreachable!("slot {} : méthode liée attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn native(&self, r: ObjRef) -> &ObjNative {
        match self.get(r) {
            Obj::Native(n) => n,
            other => unreachable!("slot {} : native attendue, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &ObjUpvalue {
        match self.get(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("slot {} : upvalue attendu, {:?} trouvé", r.index(), other.kind()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut ObjUpvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("upvalue attendu, {:?} trouvé", other.kind()),
        }
    }

    /* ───────────────────────── Internement ───────────────────────── */

    /// Interne une copie de `chars` : renvoie l’objet existant à contenu
    /// égal, sinon alloue et enregistre.
    pub fn copy_string(&mut self, chars: &str) -> ObjRef {
        let hash = hash_str(chars);
        if let Some(existing) = self.strings.find_string(self, chars, hash) {
            return existing;
        }
        self.intern_new(chars.into(), hash)
    }

    /// Variante qui consomme un tampon déjà possédé (concaténation) ; le
    /// tampon est relâché sur un hit du cache.
    pub fn take_string(&mut self, chars: String) -> ObjRef {
        let hash = hash_str(&chars);
        if let Some(existing) = self.strings.find_string(self, &chars, hash) {
            return existing;
        }
        self.intern_new(chars.into_boxed_str(), hash)
    }

    fn intern_new(&mut self, chars: Box<str>, hash: u32) -> ObjRef {
        let r = self.alloc(Obj::Str(ObjString { chars, hash }));
        // valeur sans importance : l’ensemble n’utilise que les clés
        self.strings.set(r, hash, Value::NIL);
        r
    }

    /* ───────────────────────── Marquage ───────────────────────── */

    /// Marque GC posée ? (introspection : diagnostic et tests)
    #[inline]
    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.slots[r.index() as usize]
            .as_ref()
            .is_some_and(|s| s.marked)
    }

    pub(crate) fn mark_value(&mut self, value: Value) {
        if let Some(r) = value.as_obj() {
            self.mark_object(r);
        }
    }

    pub(crate) fn mark_object(&mut self, r: ObjRef) {
        let slot = match &mut self.slots[r.index() as usize] {
            Some(slot) => slot,
            None => unreachable!("marquage d’un slot libéré : {}", r.index()),
        };
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    /// Marque toutes les paires occupées d’une table (globales, champs…).
    pub(crate) fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }

    /// Vide la pile grise ; chaque objet gris noircit ses enfants.
    pub(crate) fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    fn blacken(&mut self, r: ObjRef) {
        trace!("blacken slot {} ({:?})", r.index(), self.get(r).kind());
        let mut objs: Vec<ObjRef> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        match self.get(r) {
            Obj::Str(_) | Obj::Native(_) => {}
            Obj::Upvalue(u) => {
                if let UpvalueState::Closed(v) = u.state {
                    values.push(v);
                }
            }
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    objs.push(name);
                }
                values.extend(f.chunk.constants.iter().copied());
            }
            Obj::Closure(c) => {
                objs.push(c.function);
                objs.extend(c.upvalues.iter().copied());
            }
            Obj::Class(c) => {
                objs.push(c.name);
                for (k, v) in c.methods.iter() {
                    objs.push(k);
                    values.push(v);
                }
            }
            Obj::Instance(i) => {
                objs.push(i.class);
                for (k, v) in i.fields.iter() {
                    objs.push(k);
                    values.push(v);
                }
            }
            Obj::BoundMethod(b) => {
                values.push(b.receiver);
                objs.push(b.method);
            }
        }
        for o in objs {
            self.mark_object(o);
        }
        for v in values {
            self.mark_value(v);
        }
    }

    /* ───────────────────────── Élagage & balayage ───────────────────────── */

    /// Tombale pour toute chaîne internée non marquée — à exécuter AVANT le
    /// balayage.
    pub(crate) fn prune_interned(&mut self) {
        let slots = &self.slots;
        self.strings
            .remove_white(|k| slots[k.index() as usize].as_ref().is_some_and(|s| s.marked));
    }

    /// Libère les slots non marqués, efface les marques restantes, relève le
    /// seuil. Renvoie les octets rendus.
    pub(crate) fn sweep(&mut self) -> usize {
        let before = self.bytes_allocated;
        for index in 0..self.slots.len() {
            match &mut self.slots[index] {
                Some(slot) if slot.marked => slot.marked = false,
                Some(slot) => {
                    trace!("free slot {index} ({} octets, {:?})", slot.size, slot.obj.kind());
                    self.bytes_allocated -= slot.size;
                    self.slots[index] = None;
                    self.free.push(index as u32);
                }
                None => {}
            }
        }
        self.next_gc = self.bytes_allocated * GC_GROW_FACTOR;
        let freed = before - self.bytes_allocated;
        debug!(
            "gc: {} octets rendus ({} -> {}), prochain seuil {}",
            freed, before, self.bytes_allocated, self.next_gc
        );
        freed
    }

    /* ───────────────────────── Affichage ───────────────────────── */

    /// Rend une valeur comme `print` l’écrirait.
    pub fn stringify(&self, value: Value) -> String {
        if value.is_nil() {
            return "nil".to_string();
        }
        if let Some(b) = value.as_bool() {
            return if b { "true" } else { "false" }.to_string();
        }
        if let Some(n) = value.as_number() {
            return print_number(n);
        }
        let Some(r) = value.as_obj() else {
            unreachable!("variante de valeur restante : objet");
        };
        match self.get(r) {
            Obj::Str(s) => s.chars.to_string(),
            Obj::Function(f) => self.function_label(f),
            Obj::Closure(c) => self.function_label(self.function(c.function)),
            Obj::BoundMethod(b) => {
                let closure = match self.get(b.method) {
                    Obj::Closure(c) => c,
                    other => unreachable!("méthode liée sur {:?}", other.kind()),
                };
                self.function_label(self.function(closure.function))
            }
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Class(c) => self.string(c.name).chars.to_string(),
            Obj::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            Obj::Upvalue(_) => "upvalue".to_string(),
        }
    }

    fn function_label(&self, f: &ObjFunction) -> String {
        match f.name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjClosure, ObjNative};

    fn collect_with_roots(heap: &mut Heap, roots: &[Value]) {
        for v in roots {
            heap.mark_value(*v);
        }
        heap.trace_references();
        heap.prune_interned();
        heap.sweep();
    }

    #[test]
    fn equal_content_interns_to_the_same_object() {
        let mut heap = Heap::new();
        let a = heap.copy_string("chaîne");
        let b = heap.copy_string("chaîne");
        let c = heap.take_string(String::from("chaîne"));
        assert_eq!(a, b);
        assert_eq!(a, c);
        let other = heap.copy_string("autre");
        assert_ne!(a, other);
    }

    #[test]
    fn collection_frees_unreachable_objects_once() {
        let mut heap = Heap::new();
        let kept = heap.copy_string("gardée");
        let _dropped = heap.copy_string("perdue");
        assert_eq!(heap.live_objects(), 2);
        let bytes_full = heap.bytes_allocated();

        collect_with_roots(&mut heap, &[Value::obj(kept)]);
        assert_eq!(heap.live_objects(), 1);
        assert!(heap.bytes_allocated() < bytes_full);

        // la racine survit, la marque est repartie à zéro
        assert!(!heap.is_marked(kept));
        assert_eq!(heap.string(kept).chars.as_ref(), "gardée");

        // recollecter sans racines libère le reste, sans double libération
        collect_with_roots(&mut heap, &[]);
        assert_eq!(heap.live_objects(), 0);
        assert_eq!(heap.bytes_allocated(), 0);
    }

    #[test]
    fn intern_set_is_weak() {
        let mut heap = Heap::new();
        let first = heap.copy_string("éphémère");
        collect_with_roots(&mut heap, &[]);
        // l’entrée a été élaguée : un nouvel internement realloue
        let second = heap.copy_string("éphémère");
        assert_eq!(heap.live_objects(), 1);
        // le slot libéré a été recyclé par la liste libre
        assert_eq!(first.index(), second.index());
    }

    #[test]
    fn tracing_reaches_children() {
        let mut heap = Heap::new();
        let name = heap.copy_string("f");
        let mut f = ObjFunction::new();
        f.name = Some(name);
        f.chunk.add_constant(Value::obj(heap.copy_string("constante")));
        let func = heap.alloc(Obj::Function(f));
        let closure = heap.alloc(Obj::Closure(ObjClosure { function: func, upvalues: vec![] }));

        collect_with_roots(&mut heap, &[Value::obj(closure)]);
        // fermeture + fonction + nom + constante = 4 objets vivants
        assert_eq!(heap.live_objects(), 4);
    }

    #[test]
    fn stringify_covers_every_kind() {
        let mut heap = Heap::new();
        assert_eq!(heap.stringify(Value::NIL), "nil");
        assert_eq!(heap.stringify(Value::TRUE), "true");
        assert_eq!(heap.stringify(Value::number(2.5)), "2.5");

        let s = heap.copy_string("brut");
        assert_eq!(heap.stringify(Value::obj(s)), "brut");

        let script = heap.alloc(Obj::Function(ObjFunction::new()));
        assert_eq!(heap.stringify(Value::obj(script)), "<script>");

        let name = heap.copy_string("carre");
        let mut f = ObjFunction::new();
        f.name = Some(name);
        let func = heap.alloc(Obj::Function(f));
        assert_eq!(heap.stringify(Value::obj(func)), "<fn carre>");

        let native = heap.alloc(Obj::Native(ObjNative { function: |_| Value::NIL }));
        assert_eq!(heap.stringify(Value::obj(native)), "<native fn>");

        let cname = heap.copy_string("Point");
        let class = heap.alloc(Obj::Class(ObjClass { name: cname, methods: Table::new() }));
        assert_eq!(heap.stringify(Value::obj(class)), "Point");

        let inst = heap.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }));
        assert_eq!(heap.stringify(Value::obj(inst)), "Point instance");
    }
}
