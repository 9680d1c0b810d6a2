use object::{Specifier, ops};

use super::{Flow, bad_argument};
use crate::callout::call_function;
use crate::error::RuntimeResult;
use crate::interpreter::Interpreter;

fn string_tuple(builtin: &'static str, value: &Specifier) -> RuntimeResult<Vec<Vec<u8>>> {
    let Specifier::Tuple(items) = value else {
        let found = value.type_name();
        return Err(bad_argument(builtin, format!("expected a tuple of strings, found {found}")));
    };
    items
        .iter()
        .map(|item| {
            ops::string_bytes(&item).map_err(|_| bad_argument(builtin, "arguments must be strings"))
        })
        .collect()
}

fn code_arg(builtin: &'static str, value: &Specifier) -> RuntimeResult<i32> {
    match value {
        Specifier::Short(code) => {
            i32::try_from(*code).map_err(|_| bad_argument(builtin, "code out of range"))
        }
        other => {
            let found = other.type_name();
            Err(bad_argument(builtin, format!("code must be an integer, found {found}")))
        }
    }
}

fn callout(
    interp: &mut Interpreter,
    builtin: &'static str,
    args: &[Specifier],
    binary: bool,
) -> RuntimeResult<Flow> {
    let code = code_arg(builtin, &args[0])?;
    let callback = match &args[1] {
        proc @ (Specifier::Proc(_) | Specifier::Omega) => proc.clone(),
        other => {
            let found = other.type_name();
            let message = format!("callback must be a procedure, found {found}");
            return Err(bad_argument(builtin, message));
        }
    };
    let strings = string_tuple(builtin, &args[2])?;
    Ok(interp.callout(code, callback, strings, binary)?.into())
}

/// `ccallout(code, callback, args)`.
pub fn ccallout(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    callout(interp, "ccallout", args, false)
}

/// `ccallout2(code, callback, args)`, binary-safe.
pub fn ccallout2(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    callout(interp, "ccallout2", args, true)
}

/// `callfunction(signature, address, args)`.
pub fn callfunction(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    let signature = args[0]
        .as_str_bytes()
        .ok_or_else(|| bad_argument("callfunction", "signature must be a string"))?;
    let address = match &args[1] {
        Specifier::Short(a) if *a > 0 => *a as usize,
        Specifier::Opaque(a) if *a != 0 => *a,
        other => {
            let message = format!("{other} is not a function address");
            return Err(bad_argument("callfunction", message));
        }
    };
    let Specifier::Tuple(list) = &args[2] else {
        return Err(bad_argument("callfunction", "arguments must be a tuple"));
    };
    // SAFETY: the program supplies the address together with its signature.
    let value = unsafe { call_function(signature, address, &list.to_vec())? };
    Ok(value.into())
}

#[cfg(test)]
mod tests {
    use std::ffi::c_int;

    use library::Library;

    use super::*;
    use crate::callout::{CallbackContext, CalloutHost};
    use crate::error::RuntimeError;
    use crate::interpreter::InterpreterOptions;

    struct Echo;

    impl CalloutHost for Echo {
        fn callout(
            &mut self,
            code: c_int,
            args: &[Vec<u8>],
            _: &mut CallbackContext<'_>,
        ) -> Result<Option<Vec<u8>>, String> {
            if code < 0 {
                return Err("negative code".into());
            }
            Ok(Some(args.concat()))
        }
    }

    fn strings(items: &[&str]) -> Specifier {
        Specifier::tuple_of(items.iter().map(|s| Specifier::from(*s)).collect())
    }

    #[test]
    fn callout_goes_to_the_host() {
        let mut i = Interpreter::new(Library::new(), InterpreterOptions::default());
        let args = [Specifier::from(1), Specifier::Omega, strings(&["ab", "c"])];
        assert!(matches!(ccallout(&mut i, &args), Err(RuntimeError::NoCalloutHost)));

        i.set_callout_host(Box::new(Echo));
        let result = ccallout(&mut i, &args);
        assert!(matches!(result, Ok(Flow::Value(v)) if v == Specifier::from("abc")));
        let failing = [Specifier::from(-1), Specifier::Omega, strings(&[])];
        assert!(matches!(ccallout2(&mut i, &failing), Err(RuntimeError::Callout(_))));
    }
}
