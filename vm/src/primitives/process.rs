use std::rc::Rc;

use object::{MailboxBody, ProcessBody, Specifier};

use super::{Flow, bad_argument};
use crate::error::RuntimeResult;
use crate::interpreter::Interpreter;
use crate::scheduler::ProcessState;

fn mailbox_arg(builtin: &'static str, value: &Specifier) -> RuntimeResult<Rc<MailboxBody>> {
    match value {
        Specifier::Mailbox(mailbox) => Ok(mailbox.clone()),
        other => Err(bad_argument(builtin, format!("{} is not a mailbox", other.type_name()))),
    }
}

fn process_arg(builtin: &'static str, value: &Specifier) -> RuntimeResult<Rc<ProcessBody>> {
    match value {
        Specifier::Process(process) => Ok(process.clone()),
        other => Err(bad_argument(builtin, format!("{} is not a process", other.type_name()))),
    }
}

/// Takes the next message, waiting for one if the mailbox is empty.
pub fn await_message(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    let mailbox = mailbox_arg("await", &args[0])?;
    Ok(match mailbox.receive() {
        Some(message) => Flow::Value(message),
        None => Flow::Block(mailbox),
    })
}

/// Whether a message is waiting.
pub fn acheck(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    let mailbox = mailbox_arg("acheck", &args[0])?;
    Ok(Specifier::boolean(!mailbox.is_empty()).into())
}

pub fn pass(_: &mut Interpreter, _: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Flow::Yield)
}

pub fn send(_: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    mailbox_arg("send", &args[0])?.send(args[1].clone());
    Ok(Specifier::Omega.into())
}

fn change_state(
    interp: &mut Interpreter,
    builtin: &'static str,
    arg: &Specifier,
    state: ProcessState,
) -> RuntimeResult<Flow> {
    let process = process_arg(builtin, arg)?;
    interp.set_process_state(&process, state)?;
    Ok(Specifier::Omega.into())
}

pub fn suspend(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    change_state(interp, "suspend", &args[0], ProcessState::Suspended)
}

pub fn resume(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    change_state(interp, "resume", &args[0], ProcessState::Ready)
}

pub fn kill(interp: &mut Interpreter, args: &[Specifier]) -> RuntimeResult<Flow> {
    change_state(interp, "kill", &args[0], ProcessState::Killed)
}

pub fn mailbox(_: &mut Interpreter, _: &[Specifier]) -> RuntimeResult<Flow> {
    Ok(Specifier::Mailbox(Rc::new(MailboxBody::new())).into())
}

#[cfg(test)]
mod tests {
    use library::Library;

    use super::*;
    use crate::interpreter::InterpreterOptions;

    fn interp() -> Interpreter {
        Interpreter::new(Library::new(), InterpreterOptions::default())
    }

    fn value(flow: RuntimeResult<Flow>) -> Option<Specifier> {
        match flow {
            Ok(Flow::Value(v)) => Some(v),
            _ => None,
        }
    }

    #[test]
    fn messages_arrive_in_order() {
        let mut i = interp();
        let Ok(Flow::Value(mb)) = mailbox(&mut i, &[]) else {
            panic!("mailbox() should return a value");
        };
        send(&mut i, &[mb.clone(), Specifier::from(1)]).unwrap();
        send(&mut i, &[mb.clone(), Specifier::from(2)]).unwrap();
        assert_eq!(value(acheck(&mut i, &[mb.clone()])), Some(Specifier::boolean(true)));
        assert_eq!(value(await_message(&mut i, &[mb.clone()])), Some(Specifier::from(1)));
        assert_eq!(value(await_message(&mut i, &[mb.clone()])), Some(Specifier::from(2)));
        assert!(matches!(await_message(&mut i, &[mb]), Ok(Flow::Block(_))));
    }

    #[test]
    fn process_builtins_check_their_argument() {
        let mut i = interp();
        assert!(kill(&mut i, &[Specifier::from(1)]).is_err());
        assert!(send(&mut i, &[Specifier::from(1), Specifier::Omega]).is_err());
        assert!(matches!(pass(&mut i, &[]), Ok(Flow::Yield)));
    }
}
