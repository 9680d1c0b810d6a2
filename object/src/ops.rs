//! Operators on specifiers.
//!
//! Every operator is a total function over forms: operands of the wrong
//! form produce a [`ValueError`], which the interpreter turns into an
//! abend. Integer results are normalized, so a value that fits in a
//! machine word is always `Short`.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::header::Form;
use crate::instance::IterKind;
use crate::integer::LongInt;
use crate::set::{MapBody, SetBody};
use crate::specifier::Specifier;
use crate::string::SetlString;
use crate::tuple::Tuple;

/// Largest set `pow` will expand.
pub const MAX_POW_CARD: usize = 20;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("invalid operands for {op}: {left} and {right}")]
    BinaryType {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("invalid operand for {op}: {form}")]
    UnaryType { op: &'static str, form: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {0} out of range")]
    IndexOutOfRange(String),
    #[error("map is multi-valued at {0}")]
    MultiValued(String),
    #[error("{0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, ValueError>;

fn binary(op: &'static str, a: &Specifier, b: &Specifier) -> ValueError {
    ValueError::BinaryType {
        op,
        left: a.type_name(),
        right: b.type_name(),
    }
}

fn unary(op: &'static str, a: &Specifier) -> ValueError {
    ValueError::UnaryType {
        op,
        form: a.type_name(),
    }
}

// ── integer plumbing ───────────────────────────────────────────────

fn int_op(
    a: &Specifier,
    b: &Specifier,
    small: fn(i64, i64) -> Option<i64>,
    long: fn(&LongInt, &LongInt) -> LongInt,
) -> Option<Specifier> {
    if let (Specifier::Short(x), Specifier::Short(y)) = (a, b) {
        if let Some(v) = small(*x, *y) {
            return Some(Specifier::Short(v));
        }
    }
    let (x, y) = (a.to_long()?, b.to_long()?);
    Some(Specifier::long(long(&x, &y)))
}

fn is_zero(spec: &Specifier) -> bool {
    match spec {
        Specifier::Short(v) => *v == 0,
        Specifier::Long(l) => l.is_zero(),
        _ => false,
    }
}

/// A one-based index converted to zero-based.
pub fn index_arg(op: &'static str, index: &Specifier) -> Result<usize> {
    match index {
        Specifier::Short(i) if *i >= 1 => Ok(*i as usize - 1),
        Specifier::Short(i) => Err(ValueError::IndexOutOfRange(i.to_string())),
        Specifier::Long(l) => Err(ValueError::IndexOutOfRange(l.to_string())),
        other => Err(unary(op, other)),
    }
}

fn int_arg(op: &'static str, value: &Specifier) -> Result<i64> {
    match value {
        Specifier::Short(v) => Ok(*v),
        other => Err(unary(op, other)),
    }
}

fn set_body(op: &'static str, value: &Specifier) -> Result<SetBody> {
    value.to_set_body().ok_or_else(|| unary(op, value))
}

// ── arithmetic ─────────────────────────────────────────────────────

pub fn add(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    use Specifier::*;
    match (a, b) {
        (Short(_) | Long(_), Short(_) | Long(_)) => {
            int_op(a, b, i64::checked_add, LongInt::add).ok_or_else(|| binary("+", a, b))
        }
        (Real(x), Real(y)) => Ok(Specifier::real(**x + **y)),
        (String(x), String(y)) => {
            let mut bytes = x.as_bytes().to_vec();
            bytes.extend_from_slice(y.as_bytes());
            Ok(Specifier::string(bytes))
        }
        (Tuple(x), Tuple(y)) => Ok(Specifier::tuple(x.concat(y))),
        (Set(_) | Map(_), Set(_) | Map(_)) => {
            let mut out = set_body("+", a)?;
            for e in set_body("+", b)?.iter() {
                out.insert(e.clone());
            }
            Ok(Specifier::set(out))
        }
        _ => Err(binary("+", a, b)),
    }
}

pub fn sub(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    use Specifier::*;
    match (a, b) {
        (Short(_) | Long(_), Short(_) | Long(_)) => {
            int_op(a, b, i64::checked_sub, LongInt::sub).ok_or_else(|| binary("-", a, b))
        }
        (Real(x), Real(y)) => Ok(Specifier::real(**x - **y)),
        (Set(_) | Map(_), Set(_) | Map(_)) => {
            let right = set_body("-", b)?;
            let out: SetBody = set_body("-", a)?
                .iter()
                .filter(|e| !right.contains(e))
                .cloned()
                .collect();
            Ok(Specifier::set(out))
        }
        _ => Err(binary("-", a, b)),
    }
}

fn repeat(count: &Specifier, op: &'static str, a: &Specifier, b: &Specifier) -> Result<usize> {
    match count {
        Specifier::Short(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(binary(op, a, b)),
    }
}

pub fn mult(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    use Specifier::*;
    match (a, b) {
        (Short(_) | Long(_), Short(_) | Long(_)) => {
            int_op(a, b, i64::checked_mul, LongInt::mul).ok_or_else(|| binary("*", a, b))
        }
        (Real(x), Real(y)) => Ok(Specifier::real(**x * **y)),
        (Set(_) | Map(_), Set(_) | Map(_)) => {
            let right = set_body("*", b)?;
            let out: SetBody = set_body("*", a)?
                .iter()
                .filter(|e| right.contains(e))
                .cloned()
                .collect();
            Ok(Specifier::set(out))
        }
        (String(s), Short(_)) | (Short(_), String(s)) => {
            let n = repeat(if matches!(a, Short(_)) { a } else { b }, "*", a, b)?;
            Ok(Specifier::string(s.as_bytes().repeat(n)))
        }
        (Tuple(t), Short(_)) | (Short(_), Tuple(t)) => {
            let n = repeat(if matches!(a, Short(_)) { a } else { b }, "*", a, b)?;
            let items = t.to_vec();
            let mut out = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                out.extend(items.iter().cloned());
            }
            Ok(Specifier::tuple_of(out))
        }
        _ => Err(binary("*", a, b)),
    }
}

/// `/`: truncating on integers, real division on reals.
pub fn div(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    match (a, b) {
        (Specifier::Real(x), Specifier::Real(y)) => {
            if **y == 0.0 {
                return Err(ValueError::DivisionByZero);
            }
            Ok(Specifier::real(**x / **y))
        }
        _ => int_div_op("/", a, b),
    }
}

/// `div`: integer division truncating toward zero.
pub fn int_div(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    int_div_op("div", a, b)
}

fn int_div_op(op: &'static str, a: &Specifier, b: &Specifier) -> Result<Specifier> {
    if !a.is_integer() || !b.is_integer() {
        return Err(binary(op, a, b));
    }
    if is_zero(b) {
        return Err(ValueError::DivisionByZero);
    }
    int_op(a, b, i64::checked_div, |x, y| {
        x.div_rem(y).map(|(q, _)| q).unwrap_or_else(LongInt::zero)
    })
    .ok_or_else(|| binary(op, a, b))
}

/// `mod`: the remainder is never negative.
pub fn modulo(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    if !a.is_integer() || !b.is_integer() {
        return Err(binary("mod", a, b));
    }
    if is_zero(b) {
        return Err(ValueError::DivisionByZero);
    }
    int_op(
        a,
        b,
        |x, y| x.checked_rem_euclid(y),
        |x, y| x.modulo(y).unwrap_or_else(LongInt::zero),
    )
    .ok_or_else(|| binary("mod", a, b))
}

pub fn exp(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    use Specifier::*;
    match (a, b) {
        (Short(_) | Long(_), Short(e)) if *e >= 0 => {
            if let Short(base) = a {
                if let Ok(e32) = u32::try_from(*e) {
                    if let Some(v) = base.checked_pow(e32) {
                        return Ok(Short(v));
                    }
                }
            }
            let base = a.to_long().ok_or_else(|| binary("**", a, b))?;
            Ok(Specifier::long(base.pow(*e as u64)))
        }
        (Real(x), Real(y)) => Ok(Specifier::real(x.powf(**y))),
        (Real(x), Short(y)) => Ok(Specifier::real(x.powi(*y as i32))),
        _ => Err(binary("**", a, b)),
    }
}

pub fn uminus(a: &Specifier) -> Result<Specifier> {
    match a {
        Specifier::Short(v) => Ok(v
            .checked_neg()
            .map(Specifier::Short)
            .unwrap_or_else(|| Specifier::long(LongInt::from_i64(*v).neg()))),
        Specifier::Long(l) => Ok(Specifier::long(l.neg())),
        Specifier::Real(r) => Ok(Specifier::real(-**r)),
        other => Err(unary("-", other)),
    }
}

pub fn max(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    Ok(if lt(a, b)? { b.clone() } else { a.clone() })
}

pub fn min(a: &Specifier, b: &Specifier) -> Result<Specifier> {
    Ok(if lt(b, a)? { b.clone() } else { a.clone() })
}

// ── comparison ─────────────────────────────────────────────────────

fn compare(op: &'static str, a: &Specifier, b: &Specifier) -> Result<Ordering> {
    use Specifier::*;
    match (a, b) {
        (Short(x), Short(y)) => Ok(x.cmp(y)),
        (Short(_) | Long(_), Short(_) | Long(_)) => match (a.to_long(), b.to_long()) {
            (Some(x), Some(y)) => Ok(x.cmp_value(&y)),
            _ => Err(binary(op, a, b)),
        },
        (Real(x), Real(y)) => x.partial_cmp(y).ok_or_else(|| binary(op, a, b)),
        (String(x), String(y)) => Ok(x.as_bytes().cmp(y.as_bytes())),
        _ => Err(binary(op, a, b)),
    }
}

pub fn lt(a: &Specifier, b: &Specifier) -> Result<bool> {
    Ok(compare("<", a, b)? == Ordering::Less)
}

pub fn le(a: &Specifier, b: &Specifier) -> Result<bool> {
    Ok(compare("<=", a, b)? != Ordering::Greater)
}

pub fn not(a: &Specifier) -> Result<Specifier> {
    a.as_bool()
        .map(|v| Specifier::boolean(!v))
        .ok_or_else(|| unary("not", a))
}

/// `x in s`.
pub fn contains(s: &Specifier, x: &Specifier) -> Result<bool> {
    match s {
        Specifier::Set(set) => Ok(set.contains(x)),
        Specifier::Map(map) => Ok(match x.as_pair() {
            Some((d, r)) => map.contains_pair(&d, &r),
            None => false,
        }),
        Specifier::Tuple(t) => Ok(!x.is_omega() && t.iter().any(|e| e == *x)),
        Specifier::String(hay) => match x {
            Specifier::String(needle) => {
                let (h, n) = (hay.as_bytes(), needle.as_bytes());
                Ok(n.is_empty() || h.windows(n.len()).any(|w| w == n))
            }
            _ => Err(binary("in", x, s)),
        },
        _ => Err(binary("in", x, s)),
    }
}

/// `a subset b`.
pub fn subset(a: &Specifier, b: &Specifier) -> Result<bool> {
    let (x, y) = match (a.to_set_body(), b.to_set_body()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(binary("subset", a, b)),
    };
    Ok(x.is_subset(&y))
}

// ── set, map and tuple operators ───────────────────────────────────

pub fn with(s: &Specifier, x: &Specifier) -> Result<Specifier> {
    match s {
        Specifier::Set(_) | Specifier::Map(_) => {
            if let (Specifier::Map(m), Some((d, r))) = (s, x.as_pair()) {
                let mut map = (**m).clone();
                map.insert_pair(d, r);
                return Ok(Specifier::Map(Rc::new(map)));
            }
            let mut set = set_body("with", s)?;
            set.insert(x.clone());
            Ok(Specifier::set(set))
        }
        Specifier::Tuple(t) => {
            let mut t = (**t).clone();
            t.push(x.clone());
            Ok(Specifier::tuple(t))
        }
        _ => Err(binary("with", s, x)),
    }
}

pub fn less(s: &Specifier, x: &Specifier) -> Result<Specifier> {
    match s {
        Specifier::Map(m) => {
            let mut map = (**m).clone();
            if let Some((d, r)) = x.as_pair() {
                map.remove_pair(&d, &r);
            }
            Ok(Specifier::map(map))
        }
        Specifier::Set(set) => {
            let mut set = (**set).clone();
            set.remove(x);
            Ok(Specifier::set(set))
        }
        _ => Err(binary("less", s, x)),
    }
}

pub fn lessf(f: &Specifier, x: &Specifier) -> Result<Specifier> {
    match f {
        Specifier::Map(m) => {
            let mut map = (**m).clone();
            map.remove_domain(x);
            Ok(Specifier::map(map))
        }
        Specifier::Set(s) if s.is_empty() => Ok(f.clone()),
        _ => Err(binary("lessf", f, x)),
    }
}

pub fn card(a: &Specifier) -> Result<Specifier> {
    a.card()
        .map(|n| Specifier::Short(n as i64))
        .ok_or_else(|| unary("#", a))
}

pub fn arb(a: &Specifier) -> Result<Specifier> {
    match a {
        Specifier::Set(s) => Ok(s.arb().cloned().unwrap_or_default()),
        Specifier::Map(m) => Ok(m.pairs().next().unwrap_or_default()),
        other => Err(unary("arb", other)),
    }
}

fn as_map(op: &'static str, f: &Specifier) -> Result<Option<Rc<MapBody>>> {
    match f {
        Specifier::Map(m) => Ok(Some(m.clone())),
        Specifier::Set(s) if s.is_empty() => Ok(None),
        other => Err(unary(op, other)),
    }
}

pub fn domain(f: &Specifier) -> Result<Specifier> {
    Ok(Specifier::set(
        as_map("domain", f)?.map(|m| m.domain()).unwrap_or_default(),
    ))
}

pub fn range(f: &Specifier) -> Result<Specifier> {
    Ok(Specifier::set(
        as_map("range", f)?.map(|m| m.range()).unwrap_or_default(),
    ))
}

pub fn pow(a: &Specifier) -> Result<Specifier> {
    let base: Vec<Specifier> = set_body("pow", a)?.iter().cloned().collect();
    if base.len() > MAX_POW_CARD {
        return Err(ValueError::Invalid(format!(
            "pow of a set with {} elements",
            base.len()
        )));
    }
    let mut out = SetBody::new();
    for mask in 0u32..(1u32 << base.len()) {
        let subset: SetBody = base
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, e)| e.clone())
            .collect();
        out.insert(Specifier::set(subset));
    }
    Ok(Specifier::set(out))
}

/// `x from s`: remove an arbitrary element of a set.
pub fn take_arb(s: &mut Specifier) -> Result<Specifier> {
    match s {
        Specifier::Set(set) => Ok(Rc::make_mut(set).take_arb().unwrap_or_default()),
        Specifier::Map(_) => {
            let mut set = set_body("from", s)?;
            let item = set.take_arb().unwrap_or_default();
            *s = Specifier::set(set);
            Ok(item)
        }
        other => Err(unary("from", other)),
    }
}

/// `x fromb t` / `x frome t`: remove the first or last element.
pub fn take_end(s: &mut Specifier, front: bool) -> Result<Specifier> {
    let op = if front { "fromb" } else { "frome" };
    match s {
        Specifier::Tuple(t) => {
            let t = Rc::make_mut(t);
            Ok(if front { t.take_first() } else { t.take_last() })
        }
        Specifier::String(text) => {
            let bytes = Rc::make_mut(text).bytes_mut();
            if bytes.is_empty() {
                return Ok(Specifier::Omega);
            }
            let b = if front {
                bytes.remove(0)
            } else {
                bytes.pop().unwrap_or_default()
            };
            Ok(Specifier::string([b]))
        }
        other => Err(unary(op, other)),
    }
}

/// Arithmetic progression `first, second .. last`; `second` may be omega.
pub fn progression(
    first: &Specifier,
    second: &Specifier,
    last: &Specifier,
) -> Result<Vec<Specifier>> {
    let a = int_arg("..", first)?;
    let z = int_arg("..", last)?;
    let step = if second.is_omega() {
        1
    } else {
        int_arg("..", second)? - a
    };
    if step == 0 {
        return Err(ValueError::Invalid("zero step in range".into()));
    }
    let mut out = Vec::new();
    let mut i = a;
    while (step > 0 && i <= z) || (step < 0 && i >= z) {
        out.push(Specifier::Short(i));
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(out)
}

// ── indexing ───────────────────────────────────────────────────────

/// `f(x)`.
pub fn of(f: &Specifier, x: &Specifier) -> Result<Specifier> {
    match f {
        Specifier::Tuple(t) => Ok(t.get(index_arg("()", x)?)),
        Specifier::String(s) => {
            let i = index_arg("()", x)?;
            match s.as_bytes().get(i) {
                Some(b) => Ok(Specifier::string([*b])),
                None => Err(ValueError::IndexOutOfRange(x.to_string())),
            }
        }
        Specifier::Map(m) => m
            .image(x)
            .map_err(|_| ValueError::MultiValued(x.to_string())),
        Specifier::Set(s) if s.is_empty() => Ok(Specifier::Omega),
        _ => Err(binary("()", f, x)),
    }
}

/// `f{x}`.
pub fn ofa(f: &Specifier, x: &Specifier) -> Result<Specifier> {
    Ok(Specifier::set(
        as_map("{}", f)?.map(|m| m.image_set(x)).unwrap_or_default(),
    ))
}

fn slice_bounds(len: usize, lo: &Specifier, hi: &Specifier) -> Result<(usize, usize)> {
    let lo = index_arg("..", lo)?;
    let hi = if hi.is_omega() {
        len
    } else {
        match hi {
            Specifier::Short(h) if *h >= 0 => *h as usize,
            other => return Err(ValueError::IndexOutOfRange(other.to_string())),
        }
    };
    if lo > hi + 1 || hi > len {
        return Err(ValueError::IndexOutOfRange(format!("{}..{}", lo + 1, hi)));
    }
    Ok((lo, hi.max(lo)))
}

/// `f(lo..hi)`; `hi` omega means to the end.
pub fn slice(f: &Specifier, lo: &Specifier, hi: &Specifier) -> Result<Specifier> {
    match f {
        Specifier::Tuple(t) => {
            let hi = if hi.is_omega() {
                Specifier::Short(t.len() as i64)
            } else {
                hi.clone()
            };
            let hi_val = match &hi {
                Specifier::Short(h) => (*h).min(t.len() as i64).max(0),
                other => return Err(ValueError::IndexOutOfRange(other.to_string())),
            };
            let (lo, hi) = slice_bounds(t.len(), lo, &Specifier::Short(hi_val))?;
            Ok(Specifier::tuple(t.slice(lo, hi)))
        }
        Specifier::String(s) => {
            let (lo, hi) = slice_bounds(s.len(), lo, hi)?;
            Ok(Specifier::string(&s.as_bytes()[lo..hi]))
        }
        _ => Err(unary("slice", f)),
    }
}

/// `f(x) := v`. An omega `f` becomes a map.
pub fn set_of(f: &mut Specifier, x: &Specifier, v: Specifier) -> Result<()> {
    if x.is_omega() {
        return Err(ValueError::Invalid("omega is not a valid index".into()));
    }
    match f {
        Specifier::Tuple(t) => {
            let i = index_arg("()", x)?;
            Rc::make_mut(t).set(i, v);
            Ok(())
        }
        Specifier::String(s) => {
            let i = index_arg("()", x)?;
            let Specifier::String(insert) = &v else {
                return Err(ValueError::BinaryType {
                    op: "():=",
                    left: Form::String.name(),
                    right: v.type_name(),
                });
            };
            let insert = insert.as_bytes().to_vec();
            let bytes = Rc::make_mut(s).bytes_mut();
            if i >= bytes.len() {
                return Err(ValueError::IndexOutOfRange(x.to_string()));
            }
            bytes.splice(i..=i, insert);
            Ok(())
        }
        Specifier::Map(m) => {
            Rc::make_mut(m).set_image(x.clone(), v);
            if m.is_empty() {
                *f = Specifier::set(SetBody::new());
            }
            Ok(())
        }
        Specifier::Omega => {
            let mut map = MapBody::new();
            map.set_image(x.clone(), v);
            *f = Specifier::map(map);
            Ok(())
        }
        Specifier::Set(s) => {
            let Some(mut map) = MapBody::from_set(s) else {
                return Err(ValueError::Invalid("set is not a map".into()));
            };
            map.set_image(x.clone(), v);
            *f = Specifier::map(map);
            Ok(())
        }
        _ => Err(binary("():=", f, x)),
    }
}

/// `f{x} := s`.
pub fn set_ofa(f: &mut Specifier, x: &Specifier, s: &Specifier) -> Result<()> {
    let images = set_body("{}:=", s)?;
    let mut map = match f {
        Specifier::Map(m) => (**m).clone(),
        Specifier::Omega => MapBody::new(),
        Specifier::Set(set) => MapBody::from_set(set)
            .ok_or_else(|| ValueError::Invalid("set is not a map".into()))?,
        other => return Err(unary("{}:=", other)),
    };
    map.set_image_set(x.clone(), images);
    *f = Specifier::map(map);
    Ok(())
}

/// `f(lo..hi) := v`.
pub fn set_slice(f: &mut Specifier, lo: &Specifier, hi: &Specifier, v: &Specifier) -> Result<()> {
    let mismatch = binary("slice:=", f, v);
    match (f, v) {
        (Specifier::Tuple(t), Specifier::Tuple(insert)) => {
            let (lo, hi) = slice_bounds(t.len(), lo, hi)?;
            let mut items = t.to_vec();
            items.splice(lo..hi, insert.to_vec());
            *t = Rc::new(Tuple::from_vec(items));
            Ok(())
        }
        (Specifier::String(s), Specifier::String(insert)) => {
            let (lo, hi) = slice_bounds(s.len(), lo, hi)?;
            let insert = insert.as_bytes().to_vec();
            Rc::make_mut(s).bytes_mut().splice(lo..hi, insert);
            Ok(())
        }
        _ => Err(mismatch),
    }
}

/// Items an iterator over `source` yields.
pub fn iteration_items(source: &Specifier, kind: IterKind) -> Result<Vec<Specifier>> {
    match (kind, source) {
        (IterKind::Pairs, Specifier::Tuple(_) | Specifier::String(_)) => {
            let items = source.elements().unwrap_or_default();
            Ok(items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_omega())
                .map(|(i, v)| Specifier::tuple_of(vec![Specifier::Short(i as i64 + 1), v]))
                .collect())
        }
        _ => {
            let mut items = source.elements().ok_or_else(|| unary("iterator", source))?;
            if source.form() == Form::Tuple {
                items.retain(|v| !v.is_omega());
            }
            Ok(items)
        }
    }
}

/// Convert a string body into owned bytes for the binary callout path.
pub fn string_bytes(value: &Specifier) -> Result<Vec<u8>> {
    match value {
        Specifier::String(s) => Ok(s.as_bytes().to_vec()),
        other => Err(unary("string", other)),
    }
}

pub fn new_string(bytes: Vec<u8>) -> Specifier {
    Specifier::String(Rc::new(SetlString::new(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(n: i64) -> Specifier {
        Specifier::Short(n)
    }

    fn set(items: &[i64]) -> Specifier {
        Specifier::set(items.iter().copied().map(s).collect())
    }

    #[test]
    fn short_overflow_promotes_to_long() {
        let big = add(&s(i64::MAX), &s(1)).unwrap();
        assert_eq!(big.form(), Form::Long);
        assert_eq!(big.to_string(), "9223372036854775808");
        assert_eq!(sub(&big, &s(1)).unwrap(), s(i64::MAX));
        assert_eq!(uminus(&s(i64::MIN)).unwrap().form(), Form::Long);
    }

    #[test]
    fn mixed_forms_are_rejected() {
        let err = add(&s(1), &Specifier::from("x")).unwrap_err();
        assert_eq!(err.to_string(), "invalid operands for +: INTEGER and STRING");
        assert_eq!(int_div(&s(1), &s(0)), Err(ValueError::DivisionByZero));
    }

    #[test]
    fn mod_is_never_negative() {
        assert_eq!(modulo(&s(-7), &s(3)).unwrap(), s(2));
        assert_eq!(int_div(&s(-7), &s(2)).unwrap(), s(-3));
    }

    #[test]
    fn set_algebra() {
        assert_eq!(add(&set(&[1, 2]), &set(&[2, 3])).unwrap(), set(&[1, 2, 3]));
        assert_eq!(sub(&set(&[1, 2]), &set(&[2, 3])).unwrap(), set(&[1]));
        assert_eq!(mult(&set(&[1, 2]), &set(&[2, 3])).unwrap(), set(&[2]));
        assert!(subset(&set(&[1]), &set(&[1, 2])).unwrap());
        assert_eq!(with(&set(&[1]), &s(5)).unwrap(), set(&[1, 5]));
        assert_eq!(less(&set(&[1, 5]), &s(5)).unwrap(), set(&[1]));
        assert_eq!(card(&pow(&set(&[1, 2, 3])).unwrap()).unwrap(), s(8));
    }

    #[test]
    fn map_assignment_from_omega() {
        let mut f = Specifier::Omega;
        set_of(&mut f, &Specifier::from("a"), s(1)).unwrap();
        set_of(&mut f, &Specifier::from("b"), s(2)).unwrap();
        assert_eq!(f.form(), Form::Map);
        assert_eq!(of(&f, &Specifier::from("b")).unwrap(), s(2));
        assert_eq!(card(&domain(&f).unwrap()).unwrap(), s(2));
        set_of(&mut f, &Specifier::from("a"), Specifier::Omega).unwrap();
        set_of(&mut f, &Specifier::from("b"), Specifier::Omega).unwrap();
        assert_eq!(f, Specifier::set(SetBody::new()));
    }

    #[test]
    fn tuple_indexing_and_slices() {
        let t = Specifier::tuple_of((1..=5).map(s).collect());
        assert_eq!(of(&t, &s(2)).unwrap(), s(2));
        assert!(of(&t, &s(9)).unwrap().is_omega());
        assert!(of(&t, &s(0)).is_err());
        assert_eq!(
            slice(&t, &s(2), &s(3)).unwrap(),
            Specifier::tuple_of(vec![s(2), s(3)])
        );
        assert_eq!(card(&slice(&t, &s(4), &Specifier::Omega).unwrap()).unwrap(), s(2));
        assert!(contains(&t, &s(4)).unwrap());
    }

    #[test]
    fn string_operations() {
        let mut text = Specifier::from("hello");
        set_of(&mut text, &s(1), Specifier::from("J")).unwrap();
        assert_eq!(text, Specifier::from("Jello"));
        assert_eq!(slice(&text, &s(2), &s(3)).unwrap(), Specifier::from("el"));
        set_slice(&mut text, &s(2), &s(4), &Specifier::from("")).unwrap();
        assert_eq!(text, Specifier::from("Jo"));
        assert_eq!(take_end(&mut text, false).unwrap(), Specifier::from("o"));
        assert!(contains(&Specifier::from("abc"), &Specifier::from("bc")).unwrap());
    }

    #[test]
    fn progressions() {
        let down = progression(&s(10), &s(8), &s(3)).unwrap();
        assert_eq!(down, vec![s(10), s(8), s(6), s(4)]);
        assert_eq!(progression(&s(1), &Specifier::Omega, &s(3)).unwrap().len(), 3);
        assert!(progression(&s(1), &s(1), &s(3)).is_err());
    }

    #[test]
    fn pair_iteration_over_tuples() {
        let items = vec![Specifier::from("a"), Specifier::Omega, Specifier::from("c")];
        let t = Specifier::tuple_of(items);
        let items = iteration_items(&t, IterKind::Pairs).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], Specifier::tuple_of(vec![s(3), Specifier::from("c")]));
    }
}
