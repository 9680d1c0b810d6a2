use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::header::Form;
use crate::instance::{IterBody, MailboxBody, ObjectBody, ProcessBody};
use crate::integer::LongInt;
use crate::procedure::ProcBody;
use crate::set::{MapBody, SetBody};
use crate::string::SetlString;
use crate::tuple::Tuple;

pub const FALSE_ATOM: u64 = 0;
pub const TRUE_ATOM: u64 = 1;

/// Address of a pcode record inside a loaded unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeAddr {
    pub unit: u32,
    pub init: bool,
    pub offset: u32,
}

/// The universal value.
///
/// Heap-bearing forms own an `Rc` body; cloning a specifier shares the
/// body and mutation goes through `Rc::make_mut`, so every form except
/// procedures, processes, mailboxes and iterators behaves as a value.
#[derive(Debug, Clone, Default)]
pub enum Specifier {
    #[default]
    Omega,
    Atom(u64),
    Short(i64),
    Label(CodeAddr),
    File(u32),
    Opaque(usize),
    Proc(Rc<ProcBody>),
    Process(Rc<ProcessBody>),
    Mailbox(Rc<MailboxBody>),
    Iter(Rc<IterBody>),
    Real(Rc<f64>),
    Long(Rc<LongInt>),
    String(Rc<SetlString>),
    Tuple(Rc<Tuple>),
    Object(Rc<ObjectBody>),
    Set(Rc<SetBody>),
    Map(Rc<MapBody>),
    Void,
}

impl Specifier {
    // ── construction ───────────────────────────────────────────────

    pub fn boolean(value: bool) -> Self {
        Specifier::Atom(if value { TRUE_ATOM } else { FALSE_ATOM })
    }

    pub fn real(value: f64) -> Self {
        Specifier::Real(Rc::new(value))
    }

    pub fn string(text: impl AsRef<[u8]>) -> Self {
        Specifier::String(Rc::new(SetlString::new(text.as_ref().to_vec())))
    }

    pub fn tuple(tuple: Tuple) -> Self {
        Specifier::Tuple(Rc::new(tuple))
    }

    pub fn tuple_of(items: Vec<Specifier>) -> Self {
        Self::tuple(Tuple::from_vec(items))
    }

    /// A set, reclassified as a map when every element is a pair.
    pub fn set(set: SetBody) -> Self {
        if set.is_map_like() {
            if let Some(map) = MapBody::from_set(&set) {
                return Specifier::Map(Rc::new(map));
            }
        }
        Specifier::Set(Rc::new(set))
    }

    /// A map, reclassified as an empty set when it has no pairs.
    pub fn map(map: MapBody) -> Self {
        if map.is_empty() {
            Specifier::Set(Rc::new(SetBody::new()))
        } else {
            Specifier::Map(Rc::new(map))
        }
    }

    /// Integer from a long, normalized to `Short` when it fits.
    pub fn long(value: LongInt) -> Self {
        match value.to_i64() {
            Some(small) => Specifier::Short(small),
            None => Specifier::Long(Rc::new(value)),
        }
    }

    pub fn proc(body: ProcBody) -> Self {
        Specifier::Proc(Rc::new(body))
    }

    // ── inspection ─────────────────────────────────────────────────

    pub fn form(&self) -> Form {
        match self {
            Specifier::Omega => Form::Omega,
            Specifier::Atom(_) => Form::Atom,
            Specifier::Short(_) => Form::Short,
            Specifier::Label(_) => Form::Label,
            Specifier::File(_) => Form::File,
            Specifier::Opaque(_) => Form::Opaque,
            Specifier::Proc(_) => Form::Proc,
            Specifier::Process(_) => Form::Process,
            Specifier::Mailbox(_) => Form::Mailbox,
            Specifier::Iter(_) => Form::Iter,
            Specifier::Real(_) => Form::Real,
            Specifier::Long(_) => Form::Long,
            Specifier::String(_) => Form::String,
            Specifier::Tuple(_) => Form::Tuple,
            Specifier::Object(_) => Form::Object,
            Specifier::Set(_) => Form::Set,
            Specifier::Map(_) => Form::Map,
            Specifier::Void => Form::Void,
        }
    }

    pub fn is_omega(&self) -> bool {
        matches!(self, Specifier::Omega)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Specifier::Short(_) | Specifier::Long(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Specifier::Atom(FALSE_ATOM) => Some(false),
            Specifier::Atom(TRUE_ATOM) => Some(true),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            Specifier::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// The integer value as `LongInt`, whatever its representation.
    pub fn to_long(&self) -> Option<LongInt> {
        match self {
            Specifier::Short(v) => Some(LongInt::from_i64(*v)),
            Specifier::Long(l) => Some((**l).clone()),
            _ => None,
        }
    }

    /// Both halves of a pair (a tuple of exactly two elements).
    pub fn as_pair(&self) -> Option<(Specifier, Specifier)> {
        match self {
            Specifier::Tuple(t) if t.len() == 2 => Some((t.get(0), t.get(1))),
            _ => None,
        }
    }

    /// Cardinality for sets, maps, tuples and strings.
    pub fn card(&self) -> Option<usize> {
        match self {
            Specifier::Set(s) => Some(s.len()),
            Specifier::Map(m) => Some(m.len()),
            Specifier::Tuple(t) => Some(t.len()),
            Specifier::String(s) => Some(s.len()),
            _ => None,
        }
    }

    /// Elements in iteration order; `None` for non-collections.
    pub fn elements(&self) -> Option<Vec<Specifier>> {
        match self {
            Specifier::Set(s) => Some(s.iter().cloned().collect()),
            Specifier::Map(m) => Some(m.pairs().collect()),
            Specifier::Tuple(t) => Some(t.to_vec()),
            Specifier::String(s) => Some(
                s.as_bytes()
                    .iter()
                    .map(|b| Specifier::string([*b]))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Contents of a set or map as a set body.
    pub fn to_set_body(&self) -> Option<SetBody> {
        match self {
            Specifier::Set(s) => Some((**s).clone()),
            Specifier::Map(m) => Some(m.to_set()),
            _ => None,
        }
    }

    /// Form name, as returned by the `type` builtin.
    pub fn type_name(&self) -> &'static str {
        self.form().name()
    }

    /// Text written by `print`: strings appear without quotes.
    pub fn print_string(&self) -> String {
        match self {
            Specifier::String(s) => s.to_string_lossy(),
            other => other.to_string(),
        }
    }
}

// ── equality and hashing ───────────────────────────────────────────

impl PartialEq for Specifier {
    fn eq(&self, other: &Self) -> bool {
        use Specifier::*;
        match (self, other) {
            (Omega, Omega) | (Void, Void) => true,
            (Atom(a), Atom(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Label(a), Label(b)) => a == b,
            (File(a), File(b)) => a == b,
            (Opaque(a), Opaque(b)) => a == b,
            (Proc(a), Proc(b)) => {
                Rc::ptr_eq(a, b) || (a.kind == b.kind && a.self_instance == b.self_instance)
            }
            (Process(a), Process(b)) => a.id == b.id,
            (Mailbox(a), Mailbox(b)) => Rc::ptr_eq(a, b),
            (Iter(a), Iter(b)) => Rc::ptr_eq(a, b),
            (Real(a), Real(b)) => a.to_bits() == b.to_bits() || **a == **b,
            (Long(a), Long(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Tuple(a), Tuple(b)) => Rc::ptr_eq(a, b) || a == b,
            (Object(a), Object(b)) => Rc::ptr_eq(a, b) || a == b,
            (Set(a), Set(b)) => Rc::ptr_eq(a, b) || a == b,
            (Map(a), Map(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl Eq for Specifier {}

impl Hash for Specifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(hash_of(self));
    }
}

/// Hash code of a specifier, cached in the body where there is one.
pub fn hash_of(spec: &Specifier) -> i32 {
    let raw: u64 = match spec {
        Specifier::Omega | Specifier::Void => 0,
        Specifier::Atom(a) => a.wrapping_mul(0x9e37_79b9),
        Specifier::Short(v) => *v as u64,
        Specifier::Label(addr) => addr.offset as u64 ^ ((addr.unit as u64) << 20),
        Specifier::File(f) => *f as u64,
        Specifier::Opaque(p) => *p as u64,
        Specifier::Proc(p) => match p.kind {
            crate::procedure::ProcKind::Builtin(i) => i as u64,
            crate::procedure::ProcKind::User { unit, index }
            | crate::procedure::ProcKind::Native { unit, index } => {
                ((unit as u64) << 20) ^ index as u64
            }
        },
        Specifier::Process(p) => p.id as u64,
        Specifier::Mailbox(m) => Rc::as_ptr(m) as usize as u64,
        Specifier::Iter(i) => Rc::as_ptr(i) as usize as u64,
        Specifier::Real(r) => {
            // 0.0 and -0.0 compare equal
            if **r == 0.0 { 0 } else { r.to_bits() }
        }
        Specifier::Long(l) => l.hash_code() as u64,
        Specifier::String(s) => s.hash_code() as u64,
        Specifier::Tuple(t) => t.hash_code() as u64,
        Specifier::Object(o) => o.hash_code() as u64,
        Specifier::Set(s) => s.hash_code() as u64,
        Specifier::Map(m) => m.hash_code() as u64,
    };
    let folded = (raw ^ (raw >> 32)) as u32;
    ((folded ^ ((spec.form() as u32) << 27)) & 0x7fff_ffff) as i32
}

/// Total order used for presenting sets: form first, then value.
pub fn canonical_cmp(a: &Specifier, b: &Specifier) -> Ordering {
    use Specifier::*;
    let by_form = sort_rank(a).cmp(&sort_rank(b));
    if by_form != Ordering::Equal {
        return by_form;
    }
    match (a, b) {
        (Atom(x), Atom(y)) => x.cmp(y),
        (Short(_) | Long(_), Short(_) | Long(_)) => match (a.to_long(), b.to_long()) {
            (Some(x), Some(y)) => x.cmp_value(&y),
            _ => Ordering::Equal,
        },
        (Real(x), Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (String(x), String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Tuple(x), Tuple(y)) => {
            for (p, q) in x.iter().zip(y.iter()) {
                let ord = canonical_cmp(&p, &q);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn sort_rank(spec: &Specifier) -> u8 {
    match spec.form() {
        Form::Short | Form::Long => Form::Short as u8,
        other => other as u8,
    }
}

// ── printing ───────────────────────────────────────────────────────

fn write_real(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.1}")
    } else {
        write!(f, "{value}")
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("\"")?;
    for b in bytes {
        match b {
            b'"' => f.write_str("\\\"")?,
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\t' => f.write_str("\\t")?,
            0x20..=0x7e => write!(f, "{}", *b as char)?,
            other => write!(f, "\\x{other:02x}")?,
        }
    }
    f.write_str("\"")
}

fn write_sorted(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = Specifier>,
) -> fmt::Result {
    let mut items: Vec<Specifier> = items.collect();
    items.sort_by(canonical_cmp);
    f.write_str("{")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("}")
}

/// Form used inside collections and by `str`: strings are quoted.
impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specifier::Omega => f.write_str("<om>"),
            Specifier::Atom(FALSE_ATOM) => f.write_str("#F"),
            Specifier::Atom(TRUE_ATOM) => f.write_str("#T"),
            Specifier::Atom(n) => write!(f, "<atom {n}>"),
            Specifier::Short(v) => write!(f, "{v}"),
            Specifier::Long(l) => write!(f, "{l}"),
            Specifier::Real(r) => write_real(f, **r),
            Specifier::String(s) => write_quoted(f, s.as_bytes()),
            Specifier::Label(addr) => write!(f, "<label {}:{}>", addr.unit, addr.offset),
            Specifier::File(h) => write!(f, "<file {h}>"),
            Specifier::Opaque(p) => write!(f, "<opaque {p:#x}>"),
            Specifier::Proc(p) => write!(f, "<procedure {}>", p.name),
            Specifier::Process(p) => write!(f, "<process {} {}>", p.class_name, p.id),
            Specifier::Mailbox(_) => f.write_str("<mailbox>"),
            Specifier::Iter(_) => f.write_str("<iterator>"),
            Specifier::Tuple(t) => {
                f.write_str("[")?;
                for (i, item) in t.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Specifier::Set(s) => write_sorted(f, s.iter().cloned()),
            Specifier::Map(m) => write_sorted(f, m.pairs()),
            Specifier::Object(o) => {
                write!(f, "<object {}", o.class_name)?;
                for i in 0..o.var_count() {
                    write!(f, "{}{}", if i == 0 { ": " } else { ", " }, o.var(i))?;
                }
                f.write_str(">")
            }
            Specifier::Void => f.write_str("<void>"),
        }
    }
}

impl From<i64> for Specifier {
    fn from(value: i64) -> Self {
        Specifier::Short(value)
    }
}

impl From<bool> for Specifier {
    fn from(value: bool) -> Self {
        Specifier::boolean(value)
    }
}

impl From<&str> for Specifier {
    fn from(text: &str) -> Self {
        Specifier::string(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_of_pairs_becomes_map() {
        let pairs: SetBody = [
            Specifier::tuple_of(vec![1.into(), "a".into()]),
            Specifier::tuple_of(vec![2.into(), "b".into()]),
        ]
        .into_iter()
        .collect();
        let spec = Specifier::set(pairs);
        assert_eq!(spec.form(), Form::Map);
        assert_eq!(spec.card(), Some(2));
        assert_eq!(Specifier::set(SetBody::new()).form(), Form::Set);
    }

    #[test]
    fn long_normalizes_to_short() {
        assert_eq!(Specifier::long(LongInt::from_i64(42)), Specifier::Short(42));
        let big = LongInt::parse("123456789012345678901234567890").unwrap();
        assert_eq!(Specifier::long(big).form(), Form::Long);
    }

    #[test]
    fn printing() {
        let t = Specifier::tuple_of(vec![1.into(), "x".into(), Specifier::real(2.0)]);
        assert_eq!(t.to_string(), "[1, \"x\", 2.0]");
        assert_eq!(Specifier::from("x").print_string(), "x");
        let s = Specifier::set([3i64, 1, 2].into_iter().map(Specifier::from).collect());
        assert_eq!(s.to_string(), "{1, 2, 3}");
        assert_eq!(Specifier::boolean(true).to_string(), "#T");
        assert_eq!(Specifier::Omega.to_string(), "<om>");
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = Specifier::tuple_of(vec![1.into(), 2.into()]);
        let b = Specifier::tuple_of(vec![1.into(), 2.into()]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(hash_of(&Specifier::Short(1)), hash_of(&Specifier::real(1.0)));
        assert_eq!(Specifier::real(0.0), Specifier::real(-0.0));
        assert_eq!(hash_of(&Specifier::real(0.0)), hash_of(&Specifier::real(-0.0)));
    }

    #[test]
    fn heap_forms_are_marked() {
        assert!(Form::Tuple.has_body());
        assert!(!Form::Short.has_body());
        assert!(!Form::Omega.has_body());
    }

    #[test]
    fn copies_share_until_written() {
        let a = Specifier::tuple_of(vec![1.into()]);
        let mut b = a.clone();
        if let (Specifier::Tuple(ta), Specifier::Tuple(tb)) = (&a, &b) {
            assert!(Rc::ptr_eq(ta, tb));
            assert_eq!(Rc::strong_count(ta), 2);
        }
        if let Specifier::Tuple(tb) = &mut b {
            Rc::make_mut(tb).push(2.into());
        }
        assert_eq!(a.card(), Some(1));
        assert_eq!(b.card(), Some(2));
    }
}
