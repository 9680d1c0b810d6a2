use std::io::Write;

use object::{LongInt, Specifier};

use super::{Flow, bad_argument};
use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::Interpreter;

fn write_items(interp: &mut Interpreter, args: &[Specifier], newline: bool) -> RuntimeResult<Flow> {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&interp.display(arg, false)?);
    }
    if newline {
        line.push('\n');
    }
    interp
        .out
        .write_all(line.as_bytes())
        .map_err(|err| RuntimeError::Abort(format!("cannot write output: {err}")))?;
    Ok(Specifier::Omega.into())
}

pub fn print(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    write_items(interp, args, true)
}

pub fn nprint(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    write_items(interp, args, false)
}

pub fn str(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(match &args[0] {
        s @ Specifier::String(_) => s.clone().into(),
        other => Specifier::from(interp.display(other, true)?.as_str()).into(),
    })
}

pub fn abs(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(match &args[0] {
        Specifier::Short(v) => match v.checked_abs() {
            Some(v) => Specifier::from(v),
            None => Specifier::long(LongInt::from_i64(*v).abs()),
        },
        Specifier::Long(l) => Specifier::long(l.abs()),
        Specifier::Real(r) => Specifier::real(r.abs()),
        Specifier::String(s) if s.len() == 1 => Specifier::from(s.as_bytes()[0] as i64),
        other => {
            let message = format!("{} has no absolute value", other.type_name());
            return Err(bad_argument("abs", message));
        }
    }
    .into())
}

pub fn char(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    match &args[0] {
        Specifier::Short(code @ 0..=255) => Ok(Specifier::string([*code as u8]).into()),
        other => Err(bad_argument("char", format!("{other} is not a character code"))),
    }
}

pub fn ichar(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    match args[0].as_str_bytes() {
        Some([byte]) => Ok(Specifier::from(*byte as i64).into()),
        _ => Err(bad_argument("ichar", "expected a one-character string")),
    }
}

fn parity(builtin: &'static str, value: &Specifier) -> RuntimeResult<bool> {
    value
        .to_long()
        .map(|l| l.is_odd())
        .ok_or_else(|| bad_argument(builtin, format!("{} is not an integer", value.type_name())))
}

pub fn even(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::boolean(!parity("even", &args[0])?).into())
}

pub fn odd(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::boolean(parity("odd", &args[0])?).into())
}

pub fn float(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    let value = args[0].to_long().ok_or_else(|| {
        bad_argument("float", format!("{} is not an integer", args[0].type_name()))
    })?;
    Ok(Specifier::real(value.to_f64()).into())
}

pub fn fix(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    match &args[0] {
        Specifier::Real(r) => LongInt::from_f64(r.trunc())
            .map(|l| Specifier::long(l).into())
            .ok_or_else(|| bad_argument("fix", format!("{r} has no integer value"))),
        other => Err(bad_argument("fix", format!("{} is not a real", other.type_name()))),
    }
}

pub fn type_of(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::from(args[0].type_name()).into())
}

pub fn is_integer(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::boolean(args[0].is_integer()).into())
}

pub fn is_string(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::boolean(matches!(args[0], Specifier::String(_))).into())
}

pub fn is_tuple(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::boolean(matches!(args[0], Specifier::Tuple(_))).into())
}

pub fn is_set(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::boolean(matches!(args[0], Specifier::Set(_) | Specifier::Map(_))).into())
}

/// Maps, and sets whose elements are all pairs.
pub fn is_map(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    let map = match &args[0] {
        Specifier::Map(_) => true,
        Specifier::Set(s) => s.is_map_like(),
        _ => false,
    };
    Ok(Specifier::boolean(map).into())
}

pub fn newat(interp: &mut Interpreter, _: &[Specifier]) -> RuntimeResult<Flow> {
    let atom = interp.next_atom;
    interp.next_atom += 1;
    Ok(Specifier::Atom(atom).into())
}

pub fn unstr(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    let text = args[0]
        .as_str_bytes()
        .ok_or_else(|| bad_argument("unstr", format!("{} is not a string", args[0].type_name())))?;
    object::unstr(text)
        .map(Flow::Value)
        .ok_or_else(|| bad_argument("unstr", format!("cannot read a value from {}", args[0])))
}

pub fn abort(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    Err(RuntimeError::Abort(args[0].print_string()))
}

#[cfg(test)]
mod tests {
    use library::Library;

    use super::*;
    use crate::interpreter::InterpreterOptions;
    use crate::output::SharedOutput;

    fn interp() -> (Interpreter, SharedOutput) {
        let out = SharedOutput::new();
        let interp = Interpreter::new(Library::new(), InterpreterOptions::default())
            .with_output(Box::new(out.clone()));
        (interp, out)
    }

    fn value(flow: RuntimeResult<Flow>) -> Specifier {
        match flow {
            Ok(Flow::Value(v)) => v,
            other => panic!("expected a value, got {other:?}"),
        }
    }

    #[test]
    fn print_separates_with_spaces() {
        let (mut i, out) = interp();
        print(&mut i, &[Specifier::from("x ="), Specifier::from(3)]).unwrap();
        nprint(&mut i, &[Specifier::tuple_of(vec![Specifier::from("a")])]).unwrap();
        assert_eq!(out.contents(), "x = 3\n[\"a\"]");
    }

    #[test]
    fn conversions() {
        let (mut i, _) = interp();
        assert_eq!(value(char(&mut i, &[Specifier::from(65)])), Specifier::from("A"));
        assert_eq!(value(ichar(&mut i, &[Specifier::from("A")])), Specifier::from(65));
        assert_eq!(value(fix(&mut i, &[Specifier::real(-2.7)])), Specifier::from(-2));
        assert_eq!(value(float(&mut i, &[Specifier::from(2)])), Specifier::real(2.0));
        assert_eq!(value(abs(&mut i, &[Specifier::from(-4)])), Specifier::from(4));
        assert_eq!(value(type_of(&mut i, &[Specifier::from("s")])), Specifier::from("STRING"));
        assert!(char(&mut i, &[Specifier::from(300)]).is_err());
    }

    #[test]
    fn parity_and_predicates() {
        let (mut i, _) = interp();
        assert_eq!(value(even(&mut i, &[Specifier::from(4)])), Specifier::boolean(true));
        assert_eq!(value(odd(&mut i, &[Specifier::from(4)])), Specifier::boolean(false));
        assert_eq!(value(is_integer(&mut i, &[Specifier::from(4)])), Specifier::boolean(true));
        assert_eq!(value(is_tuple(&mut i, &[Specifier::from(4)])), Specifier::boolean(false));
    }

    #[test]
    fn atoms_are_fresh() {
        let (mut i, _) = interp();
        let a = value(newat(&mut i, &[]));
        let b = value(newat(&mut i, &[]));
        assert_ne!(a, b);
        assert_ne!(a, Specifier::boolean(true));
    }

    #[test]
    fn str_and_unstr() {
        let (mut i, _) = interp();
        let tuple = Specifier::tuple_of(vec![Specifier::from(1), Specifier::from("b")]);
        let text = value(str(&mut i, &[tuple]));
        let back = value(unstr(&mut i, &[text]));
        assert_eq!(back, Specifier::tuple_of(vec![Specifier::from(1), Specifier::from("b")]));
        assert_eq!(value(str(&mut i, &[Specifier::from("s")])), Specifier::from("s"));
    }

    #[test]
    fn abort_carries_the_message() {
        let (mut i, _) = interp();
        assert_eq!(
            abort(&mut i, &[Specifier::from("bad")]).unwrap_err(),
            RuntimeError::Abort("bad".into())
        );
    }
}
