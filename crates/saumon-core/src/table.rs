//! table.rs — Table de hachage à adressage ouvert (sondage linéaire).
//!
//! Sert quatre usages : globales de la VM, champs d’instance, méthodes de
//! classe, et l’ensemble d’internement des chaînes.
//!
//! Invariants :
//!   - clés = chaînes INTERNÉES → la comparaison d’identité de handle suffit ;
//!   - capacité en puissance de deux, sondage `hash & (cap - 1)` ;
//!   - facteur de charge plafonné à 0.75, pierres tombales comprises ;
//!   - trois états d’entrée : vide (clé ∅, valeur nil), tombale (clé ∅,
//!     valeur true), occupée ;
//!   - l’insertion recycle la première tombale rencontrée ; la suppression
//!     écrit une tombale sans décrémenter le compte ; seule la croissance
//!     recompte les entrées occupées.
//!
//! `find_string` compare par CONTENU (longueur, hash, octets) : c’est
//! l’unique porte d’entrée de l’internement, appelée par le tas.
//!
//! Chaque entrée mémoïse le hash de sa clé : le sondage et le re-hachage
//! n’ont ainsi jamais besoin de relire le tas.

use crate::heap::Heap;
use crate::object::ObjRef;
use crate::value::Value;

const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub(crate) key: Option<ObjRef>,
    pub(crate) hash: u32,
    pub(crate) value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry { key: None, hash: 0, value: Value::NIL };
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Entrées occupées + tombales.
    pub(crate) count: usize,
    /// Longueur = capacité (puissance de deux, ou zéro).
    pub(crate) entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len_occupied(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    /// Empreinte du stockage, pour la comptabilité du GC.
    pub fn accounted_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    /// Sondage linéaire : renvoie l’index de l’entrée occupée par `key`, ou
    /// de l’emplacement où l’insérer (première tombale vue, sinon vide).
    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        return tombstone.unwrap_or(index);
                    }
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &self.entries[index];
        entry.key.map(|_| entry.value)
    }

    /// Insère ou remplace ; `true` si la clé est nouvelle.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DEN > self.entries.len() * MAX_LOAD_NUM {
            self.grow();
        }

        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // une tombale recyclée était déjà comptée
        if is_new && entry.value.is_nil() {
            self.count += 1;
        }
        *entry = Entry { key: Some(key), hash, value };
        is_new
    }

    /// Tombale à la place de l’entrée ; le compte ne bouge pas.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry { key: None, hash: 0, value: Value::TRUE };
        true
    }

    /// Copie toutes les entrées occupées de `from` (héritage de méthodes).
    pub fn add_all(&mut self, from: &Table) {
        for entry in &from.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.hash, entry.value);
            }
        }
    }

    /// Recherche par CONTENU — la porte d’entrée de l’internement.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    // une vraie case vide clôt la chaîne de sondage
                    if entry.value.is_nil() {
                        return None;
                    }
                }
                Some(key) => {
                    let s = heap.string(key);
                    if s.hash == hash && &*s.chars == chars {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Itère les paires occupées (clé, valeur) — parcours de marquage GC.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Tombale pour chaque clé non marquée (élagage faible de l’internement,
    /// à faire AVANT le balayage).
    pub fn remove_white(&mut self, is_marked: impl Fn(ObjRef) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !is_marked(key) {
                    *entry = Entry { key: None, hash: 0, value: Value::TRUE };
                }
            }
        }
    }

    /// Doublement (8 au départ) ; seul le recomptage des occupées purge les
    /// tombales accumulées.
    fn grow(&mut self) {
        let capacity = if self.entries.len() < 8 { 8 } else { self.entries.len() * 2 };
        let old = std::mem::replace(&mut self.entries, vec![Entry::EMPTY; capacity]);
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&self.entries, key, entry.hash);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> ObjRef {
        ObjRef::from_index(i)
    }

    #[test]
    fn set_get_replace() {
        let mut t = Table::new();
        assert!(t.set(key(1), 0x11, Value::number(1.0)));
        assert!(t.set(key(2), 0x22, Value::number(2.0)));
        assert!(!t.set(key(1), 0x11, Value::number(9.0)));
        assert_eq!(t.get(key(1), 0x11), Some(Value::number(9.0)));
        assert_eq!(t.get(key(2), 0x22), Some(Value::number(2.0)));
        assert_eq!(t.get(key(3), 0x33), None);
    }

    #[test]
    fn delete_leaves_probe_chain_intact() {
        let mut t = Table::new();
        // trois clés au même hash → chaîne de sondage commune
        for i in 0..3 {
            t.set(key(i), 0x40, Value::number(f64::from(i)));
        }
        assert!(t.delete(key(1), 0x40));
        // la tombale ne casse pas l’accès au maillon suivant
        assert_eq!(t.get(key(2), 0x40), Some(Value::number(2.0)));
        assert_eq!(t.get(key(1), 0x40), None);
        assert!(!t.delete(key(1), 0x40));
    }

    #[test]
    fn tombstone_is_recycled_on_insert() {
        let mut t = Table::new();
        for i in 0..3 {
            t.set(key(i), 0x40, Value::NIL);
        }
        t.delete(key(1), 0x40);
        let count_before = t.count;
        // réinsertion : recycle la tombale, le compte reste stable
        t.set(key(9), 0x40, Value::TRUE);
        assert_eq!(t.count, count_before);
        assert_eq!(t.get(key(9), 0x40), Some(Value::TRUE));
    }

    #[test]
    fn growth_rehashes_and_drops_tombstones() {
        let mut t = Table::new();
        for i in 0..32 {
            t.set(key(i), i.wrapping_mul(0x9e37), Value::number(f64::from(i)));
        }
        for i in 0..16 {
            t.delete(key(i), i.wrapping_mul(0x9e37));
        }
        // forcer une croissance : les tombales disparaissent du compte
        for i in 100..140 {
            t.set(key(i), i.wrapping_mul(0x9e37), Value::NIL);
        }
        assert_eq!(t.len_occupied(), 16 + 40);
        for i in 16..32 {
            assert_eq!(
                t.get(key(i), i.wrapping_mul(0x9e37)),
                Some(Value::number(f64::from(i)))
            );
        }
        for i in 0..16 {
            assert_eq!(t.get(key(i), i.wrapping_mul(0x9e37)), None);
        }
    }

    #[test]
    fn add_all_copies_occupied_entries() {
        let mut a = Table::new();
        a.set(key(1), 1, Value::number(1.0));
        a.set(key(2), 2, Value::number(2.0));
        a.delete(key(2), 2);
        let mut b = Table::new();
        b.set(key(3), 3, Value::number(3.0));
        b.add_all(&a);
        assert_eq!(b.get(key(1), 1), Some(Value::number(1.0)));
        assert_eq!(b.get(key(2), 2), None);
        assert_eq!(b.get(key(3), 3), Some(Value::number(3.0)));
    }

    #[test]
    fn remove_white_tombstones_unmarked() {
        let mut t = Table::new();
        t.set(key(1), 1, Value::NIL);
        t.set(key(2), 2, Value::NIL);
        t.remove_white(|k| k == key(2));
        assert_eq!(t.get(key(1), 1), None);
        assert_eq!(t.get(key(2), 2), Some(Value::NIL));
    }
}
