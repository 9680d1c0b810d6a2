use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

use ahash::AHasher;

use crate::header::HashCache;
use crate::specifier::{Specifier, hash_of};
use crate::tuple::Tuple;

/// Fixed-key hasher so iteration order is reproducible between runs.
pub type SetHasher = BuildHasherDefault<AHasher>;

/// Set body.
#[derive(Debug, Clone, Default)]
pub struct SetBody {
    elems: HashSet<Specifier, SetHasher>,
    pub(crate) hash: HashCache,
}

impl PartialEq for SetBody {
    fn eq(&self, other: &Self) -> bool {
        self.elems.len() == other.elems.len() && self.elems.iter().all(|e| other.contains(e))
    }
}

impl Eq for SetBody {}

impl SetBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn contains(&self, value: &Specifier) -> bool {
        self.elems.contains(value)
    }

    /// Insert an element; omega is never a member.
    pub fn insert(&mut self, value: Specifier) -> bool {
        if value.is_omega() {
            return false;
        }
        self.hash.invalidate();
        self.elems.insert(value)
    }

    pub fn remove(&mut self, value: &Specifier) -> bool {
        self.hash.invalidate();
        self.elems.remove(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specifier> {
        self.elems.iter()
    }

    pub fn arb(&self) -> Option<&Specifier> {
        self.elems.iter().next()
    }

    pub fn take_arb(&mut self) -> Option<Specifier> {
        let item = self.arb()?.clone();
        self.remove(&item);
        Some(item)
    }

    pub fn is_subset(&self, other: &SetBody) -> bool {
        self.len() <= other.len() && self.elems.iter().all(|e| other.contains(e))
    }

    /// True when the set is non-empty and every element is a pair.
    pub fn is_map_like(&self) -> bool {
        !self.elems.is_empty() && self.elems.iter().all(|e| e.as_pair().is_some())
    }

    pub fn hash_code(&self) -> i32 {
        self.hash.get_or_compute(|| {
            let mut h = self.elems.len() as u32;
            for e in &self.elems {
                h = h.wrapping_add(hash_of(e) as u32);
            }
            (h & 0x7fff_ffff) as i32
        })
    }
}

impl FromIterator<Specifier> for SetBody {
    fn from_iter<T: IntoIterator<Item = Specifier>>(iter: T) -> Self {
        let mut set = SetBody::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

/// `f(x)` on a domain element with several images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiValued;

/// Image of one domain element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Image {
    One(Specifier),
    /// Two or more range elements.
    Many(SetBody),
}

impl Image {
    fn len(&self) -> usize {
        match self {
            Image::One(_) => 1,
            Image::Many(set) => set.len(),
        }
    }

    fn to_set(&self) -> SetBody {
        match self {
            Image::One(v) => std::iter::once(v.clone()).collect(),
            Image::Many(set) => set.clone(),
        }
    }

    fn from_set(set: SetBody) -> Option<Image> {
        match set.len() {
            0 => None,
            1 => set.arb().cloned().map(Image::One),
            _ => Some(Image::Many(set)),
        }
    }
}

/// Map body: a set whose elements are all pairs, indexed by domain.
#[derive(Debug, Clone, Default)]
pub struct MapBody {
    cells: HashMap<Specifier, Image, SetHasher>,
    pairs: usize,
    pub(crate) hash: HashCache,
}

impl PartialEq for MapBody {
    fn eq(&self, other: &Self) -> bool {
        self.pairs == other.pairs
            && self.cells.len() == other.cells.len()
            && self
                .cells
                .iter()
                .all(|(k, v)| other.cells.get(k).is_some_and(|w| v == w))
    }
}

impl Eq for MapBody {}

impl MapBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reclassify a set; `None` if some element is not a pair.
    pub fn from_set(set: &SetBody) -> Option<MapBody> {
        let mut map = MapBody::new();
        for elem in set.iter() {
            let (d, r) = elem.as_pair()?;
            map.insert_pair(d, r);
        }
        Some(map)
    }

    pub fn to_set(&self) -> SetBody {
        self.pairs().collect()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    pub fn domain_len(&self) -> usize {
        self.cells.len()
    }

    pub fn pairs(&self) -> impl Iterator<Item = Specifier> + '_ {
        self.cells.iter().flat_map(|(d, image)| {
            let range: Vec<Specifier> = match image {
                Image::One(v) => vec![v.clone()],
                Image::Many(set) => set.iter().cloned().collect(),
            };
            range
                .into_iter()
                .map(move |r| Specifier::tuple(Tuple::from_vec(vec![d.clone(), r])))
        })
    }

    pub fn contains_pair(&self, d: &Specifier, r: &Specifier) -> bool {
        match self.cells.get(d) {
            Some(Image::One(v)) => v == r,
            Some(Image::Many(set)) => set.contains(r),
            None => false,
        }
    }

    pub fn insert_pair(&mut self, d: Specifier, r: Specifier) -> bool {
        self.hash.invalidate();
        let added = match self.cells.get_mut(&d) {
            None => {
                self.cells.insert(d, Image::One(r));
                true
            }
            Some(image) => match image {
                Image::One(v) if *v == r => false,
                Image::One(v) => {
                    let set: SetBody = [v.clone(), r].into_iter().collect();
                    *image = Image::Many(set);
                    true
                }
                Image::Many(set) => set.insert(r),
            },
        };
        if added {
            self.pairs += 1;
        }
        added
    }

    pub fn remove_pair(&mut self, d: &Specifier, r: &Specifier) -> bool {
        let Some(image) = self.cells.get(d) else {
            return false;
        };
        let mut set = image.to_set();
        if !set.remove(r) {
            return false;
        }
        self.hash.invalidate();
        self.pairs -= 1;
        match Image::from_set(set) {
            Some(image) => {
                self.cells.insert(d.clone(), image);
            }
            None => {
                self.cells.remove(d);
            }
        }
        true
    }

    /// `f(x)`: the single image of `x`, omega if none.
    pub fn image(&self, d: &Specifier) -> Result<Specifier, MultiValued> {
        match self.cells.get(d) {
            None => Ok(Specifier::Omega),
            Some(Image::One(v)) => Ok(v.clone()),
            Some(Image::Many(_)) => Err(MultiValued),
        }
    }

    /// `f{x}`: every image of `x`.
    pub fn image_set(&self, d: &Specifier) -> SetBody {
        self.cells.get(d).map(Image::to_set).unwrap_or_default()
    }

    /// `f(x) := v`; omega removes `x` from the domain.
    pub fn set_image(&mut self, d: Specifier, v: Specifier) {
        self.remove_domain(&d);
        if !v.is_omega() {
            self.insert_pair(d, v);
        }
    }

    /// `f{x} := s`.
    pub fn set_image_set(&mut self, d: Specifier, s: SetBody) {
        self.remove_domain(&d);
        if let Some(image) = Image::from_set(s) {
            self.hash.invalidate();
            self.pairs += image.len();
            self.cells.insert(d, image);
        }
    }

    pub fn remove_domain(&mut self, d: &Specifier) -> bool {
        match self.cells.remove(d) {
            Some(image) => {
                self.hash.invalidate();
                self.pairs -= image.len();
                true
            }
            None => false,
        }
    }

    pub fn domain(&self) -> SetBody {
        self.cells.keys().cloned().collect()
    }

    pub fn range(&self) -> SetBody {
        let mut out = SetBody::new();
        for image in self.cells.values() {
            match image {
                Image::One(v) => {
                    out.insert(v.clone());
                }
                Image::Many(set) => {
                    for v in set.iter() {
                        out.insert(v.clone());
                    }
                }
            }
        }
        out
    }

    pub fn hash_code(&self) -> i32 {
        self.hash.get_or_compute(|| self.to_set().hash_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: i64, b: i64) -> Specifier {
        Specifier::tuple(Tuple::from_vec(vec![Specifier::Short(a), Specifier::Short(b)]))
    }

    #[test]
    fn membership_across_small_sizes() {
        for n in [0usize, 1, 31, 32, 33] {
            let set: SetBody = (0..n as i64).map(Specifier::Short).collect();
            assert_eq!(set.len(), n);
            for i in 0..n as i64 {
                assert!(set.contains(&Specifier::Short(i)));
            }
            assert!(!set.contains(&Specifier::Short(n as i64)));
        }
    }

    #[test]
    fn omega_is_never_a_member() {
        let mut set = SetBody::new();
        assert!(!set.insert(Specifier::Omega));
        assert!(set.is_empty());
    }

    #[test]
    fn set_of_pairs_is_map_like() {
        let set: SetBody = [pair(1, 2), pair(3, 4)].into_iter().collect();
        assert!(set.is_map_like());
        let mut mixed = set.clone();
        mixed.insert(Specifier::Short(5));
        assert!(!mixed.is_map_like());
        assert!(!SetBody::new().is_map_like());
    }

    #[test]
    fn multi_valued_images() {
        let set: SetBody = [pair(1, 2), pair(1, 3), pair(2, 9)].into_iter().collect();
        let mut map = MapBody::from_set(&set).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.domain_len(), 2);
        assert!(map.image(&Specifier::Short(1)).is_err());
        assert_eq!(map.image(&Specifier::Short(2)), Ok(Specifier::Short(9)));
        assert_eq!(map.image_set(&Specifier::Short(1)).len(), 2);

        assert!(map.remove_pair(&Specifier::Short(1), &Specifier::Short(2)));
        assert_eq!(map.image(&Specifier::Short(1)), Ok(Specifier::Short(3)));
        assert_eq!(map.to_set(), [pair(1, 3), pair(2, 9)].into_iter().collect());
    }

    #[test]
    fn assigning_omega_removes_domain_element() {
        let mut map = MapBody::new();
        map.set_image(Specifier::Short(1), Specifier::Short(10));
        map.set_image(Specifier::Short(1), Specifier::Omega);
        assert!(map.is_empty());
        assert_eq!(map.domain_len(), 0);
    }

    #[test]
    fn set_hash_ignores_insertion_order() {
        let a: SetBody = (0..50).map(Specifier::Short).collect();
        let b: SetBody = (0..50).rev().map(Specifier::Short).collect();
        assert_eq!(a.hash_code(), b.hash_code());
        assert_eq!(a, b);
    }
}
