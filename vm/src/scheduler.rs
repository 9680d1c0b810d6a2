//! Cooperative process scheduling.
//!
//! The main program and every process instance own a [`Context`]: a
//! frame stack and a program stack. One context runs at a time; the
//! interpreter switches round-robin when the current one has used up its
//! time slice, waits on an empty mailbox, yields, or goes idle.
//!
//! A process that is killed or idle and whose handle nobody else holds is
//! reaped at the next switch: its instance is dropped and its entry is
//! left vacant for the next spawn, so entry indices never move.

use std::collections::VecDeque;
use std::rc::Rc;

use bytecode::CodeSpace;
use object::{MailboxBody, ProcBody, ProcKind, ProcessBody, Specifier};

use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::{Frame, FrameKind, Interpreter};

#[derive(Debug, Default)]
pub struct Context {
    pub frames: Vec<Frame>,
    pub stack: Vec<Specifier>,
    /// Mailbox this context is blocked on.
    pub waiting: Option<Rc<MailboxBody>>,
}

impl Context {
    fn can_run(&self) -> bool {
        self.waiting.as_ref().is_none_or(|mailbox| !mailbox.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Suspended,
    Killed,
    /// Reaped entry, free for reuse.
    Vacant,
}

/// A queued method call on a process.
#[derive(Debug)]
pub struct Request {
    pub method: Rc<ProcBody>,
    pub args: Vec<Specifier>,
    pub reply: Rc<MailboxBody>,
}

#[derive(Debug)]
pub struct Process {
    pub handle: Rc<ProcessBody>,
    /// The object whose methods the process runs.
    pub instance: Specifier,
    pub requests: VecDeque<Request>,
    pub state: ProcessState,
    pub context: Context,
}

impl Process {
    fn runnable(&self) -> bool {
        self.state == ProcessState::Ready
            && if self.context.frames.is_empty() {
                !self.requests.is_empty()
            } else {
                self.context.can_run()
            }
    }

    /// Nothing can send to this process or wait on it any more.
    fn unreachable(&self) -> bool {
        Rc::strong_count(&self.handle) == 1
            && match self.state {
                ProcessState::Killed => true,
                ProcessState::Vacant => false,
                _ => self.context.frames.is_empty() && self.requests.is_empty(),
            }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    pub main: Context,
    pub processes: Vec<Process>,
    /// Running process, `None` for the main program.
    pub current: Option<usize>,
    pub slice: u32,
    remaining: u32,
    /// While nonzero the current context keeps the processor.
    pub critical: u32,
    pub switch_requested: bool,
}

impl Scheduler {
    pub fn new(slice: u32) -> Self {
        Self {
            main: Context::default(),
            processes: Vec::new(),
            current: None,
            slice: slice.max(1),
            remaining: slice.max(1),
            critical: 0,
            switch_requested: false,
        }
    }

    pub fn ctx(&self) -> &Context {
        match self.current {
            None => &self.main,
            Some(i) => &self.processes[i].context,
        }
    }

    pub fn ctx_mut(&mut self) -> &mut Context {
        match self.current {
            None => &mut self.main,
            Some(i) => &mut self.processes[i].context,
        }
    }

    fn runnable(&self, who: Option<usize>) -> bool {
        match who {
            None => !self.main.frames.is_empty() && self.main.can_run(),
            Some(i) => self.processes[i].runnable(),
        }
    }

    /// Counts down the slice; true when the current context should yield.
    pub fn tick(&mut self) -> bool {
        if self.critical > 0 {
            self.switch_requested = false;
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0 || self.switch_requested || !self.runnable(self.current)
    }

    /// Vacates every unreachable entry except the running one.
    fn reap(&mut self) {
        let mut reaped = 0;
        for (i, process) in self.processes.iter_mut().enumerate() {
            if Some(i) == self.current || !process.unreachable() {
                continue;
            }
            process.state = ProcessState::Vacant;
            process.instance = Specifier::Omega;
            process.requests.clear();
            process.context = Context::default();
            reaped += 1;
        }
        if reaped > 0 {
            log::trace!("reaped {reaped} processes");
        }
    }

    /// Next runnable context after the current one, the current one last.
    fn pick(&self) -> Option<Option<usize>> {
        let count = self.processes.len() + 1;
        let position = self.current.map_or(0, |i| i + 1);
        (1..=count)
            .map(|k| (position + k) % count)
            .map(|slot| slot.checked_sub(1))
            .find(|who| self.runnable(*who))
    }
}

impl Interpreter {
    /// Hands the processor to the next runnable context.
    pub(crate) fn switch_context(&mut self) -> RuntimeResult<()> {
        self.sched.reap();
        let next = self.sched.pick().ok_or(RuntimeError::Deadlock)?;
        if next != self.sched.current {
            log::trace!("switching from {:?} to {:?}", self.sched.current, next);
        }
        self.sched.current = next;
        self.sched.switch_requested = false;
        self.sched.remaining = self.sched.slice;
        if let Some(i) = next {
            if self.sched.processes[i].context.frames.is_empty() {
                self.start_request(i)?;
            }
        }
        self.sched.ctx_mut().waiting = None;
        Ok(())
    }

    fn start_request(&mut self, process: usize) -> RuntimeResult<()> {
        let entry = &mut self.sched.processes[process];
        let Some(request) = entry.requests.pop_front() else {
            return Ok(());
        };
        let instance = entry.instance.clone();
        let ProcKind::User { unit, index } = request.method.kind else {
            return Err(RuntimeError::NotCallable(request.method.name.to_string()));
        };
        log::debug!(
            "process {} runs `{}`",
            self.sched.processes[process].handle.id,
            request.method.name
        );
        self.push_frame(
            &request.method,
            unit as usize,
            index,
            request.args,
            instance,
            FrameKind::Request { reply: request.reply },
        )
    }

    /// Registers a new process around an initialized instance.
    pub(crate) fn spawn_process(&mut self, instance: Specifier) -> RuntimeResult<Specifier> {
        let Specifier::Object(object) = &instance else {
            return Err(RuntimeError::NotAnObject {
                op: "process creation",
                found: instance.type_name().to_string(),
            });
        };
        let processes = &mut self.sched.processes;
        let index = processes
            .iter()
            .position(|p| p.state == ProcessState::Vacant)
            .unwrap_or(processes.len());
        let handle = Rc::new(ProcessBody {
            id: index as u32,
            class: object.class,
            class_name: object.class_name.clone(),
        });
        log::debug!("process {} of class `{}` created", handle.id, handle.class_name);
        let process = Process {
            handle: handle.clone(),
            instance,
            requests: VecDeque::new(),
            state: ProcessState::Ready,
            context: Context::default(),
        };
        match processes.get_mut(index) {
            Some(vacant) => *vacant = process,
            None => processes.push(process),
        }
        Ok(Specifier::Process(handle))
    }

    /// Queues a method call on a process and returns the reply mailbox.
    pub(crate) fn enqueue_request(
        &mut self,
        handle: &ProcessBody,
        method: Rc<ProcBody>,
        args: Vec<Specifier>,
    ) -> RuntimeResult<Rc<MailboxBody>> {
        let process = self.process_mut(handle)?;
        if process.state == ProcessState::Killed {
            return Err(RuntimeError::ProcessKilled(handle.id));
        }
        let reply = Rc::new(MailboxBody::new());
        process.requests.push_back(Request {
            method,
            args,
            reply: reply.clone(),
        });
        Ok(reply)
    }

    pub(crate) fn process_mut(&mut self, handle: &ProcessBody) -> RuntimeResult<&mut Process> {
        self.sched
            .processes
            .get_mut(handle.id as usize)
            .filter(|p| p.state != ProcessState::Vacant)
            .ok_or(RuntimeError::ProcessKilled(handle.id))
    }

    pub(crate) fn set_process_state(
        &mut self,
        handle: &ProcessBody,
        state: ProcessState,
    ) -> RuntimeResult<()> {
        let is_current = self.sched.current == Some(handle.id as usize);
        let process = self.process_mut(handle)?;
        if process.state == ProcessState::Killed {
            return Err(RuntimeError::ProcessKilled(handle.id));
        }
        process.state = state;
        if state == ProcessState::Killed {
            process.requests.clear();
            if !is_current {
                process.context = Context::default();
            }
        }
        if is_current && state != ProcessState::Ready {
            self.sched.switch_requested = true;
        }
        log::debug!("process {} is now {state:?}", handle.id);
        Ok(())
    }

    /// Where a frame of the current context resumes after a switch.
    pub(crate) fn rewind_call(
        &mut self,
        args: Vec<Specifier>,
        mailbox: Rc<MailboxBody>,
    ) -> RuntimeResult<()> {
        if self.sched.critical > 0 {
            return Err(RuntimeError::BlockedInHost("a nested call"));
        }
        let ctx = self.sched.ctx_mut();
        if let Some(frame) = ctx.frames.last_mut() {
            frame.ip = frame.ip.saturating_sub(1);
        }
        ctx.stack.extend(args);
        ctx.waiting = Some(mailbox);
        self.sched.switch_requested = true;
        Ok(())
    }

    /// Drops the frames of a killed process once it stops running.
    pub(crate) fn reap_current(&mut self) {
        if let Some(i) = self.sched.current {
            if self.sched.processes[i].state == ProcessState::Killed {
                self.sched.processes[i].context = Context::default();
            }
        }
    }
}

/// A frame that starts at the top of a unit's code.
pub(crate) fn unit_frame(unit: usize, space: CodeSpace, stack_base: usize) -> Frame {
    Frame {
        unit,
        space,
        ip: 0,
        proc: None,
        area_start: 0,
        locals: Vec::new(),
        env: None,
        self_val: Specifier::Omega,
        stack_base,
        kind: FrameKind::Init,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(state: ProcessState, busy: bool) -> Process {
        let mut context = Context::default();
        if busy {
            context.frames.push(unit_frame(0, CodeSpace::Body, 0));
        }
        Process {
            handle: Rc::new(ProcessBody {
                id: 0,
                class: object::ClassId(0),
                class_name: "p".into(),
            }),
            instance: Specifier::Omega,
            requests: VecDeque::new(),
            state,
            context,
        }
    }

    #[test]
    fn round_robin_skips_idle_processes() {
        let mut sched = Scheduler::new(10);
        sched.main.frames.push(unit_frame(0, CodeSpace::Body, 0));
        sched.processes.push(process(ProcessState::Ready, false));
        sched.processes.push(process(ProcessState::Ready, true));
        assert_eq!(sched.pick(), Some(Some(1)));
        sched.current = Some(1);
        assert_eq!(sched.pick(), Some(None));
    }

    #[test]
    fn blocked_main_with_nothing_else_is_a_deadlock() {
        let mut sched = Scheduler::new(10);
        sched.main.frames.push(unit_frame(0, CodeSpace::Body, 0));
        sched.main.waiting = Some(Rc::new(MailboxBody::new()));
        sched.processes.push(process(ProcessState::Suspended, true));
        assert_eq!(sched.pick(), None);
    }

    #[test]
    fn reaping_spares_held_and_running_processes() {
        let mut sched = Scheduler::new(10);
        sched.processes.push(process(ProcessState::Killed, false));
        sched.processes.push(process(ProcessState::Ready, false));
        sched.processes.push(process(ProcessState::Ready, true));
        sched.processes.push(process(ProcessState::Killed, true));
        let held = sched.processes[1].handle.clone();
        sched.current = Some(3);
        sched.reap();
        let states: Vec<ProcessState> = sched.processes.iter().map(|p| p.state).collect();
        assert_eq!(
            states,
            vec![
                ProcessState::Vacant,
                ProcessState::Ready,
                ProcessState::Ready,
                ProcessState::Killed
            ]
        );
        drop(held);
        sched.current = None;
        sched.reap();
        assert_eq!(sched.processes[1].state, ProcessState::Vacant);
        assert_eq!(sched.processes[3].state, ProcessState::Vacant);
        assert_eq!(sched.processes[2].state, ProcessState::Ready);
    }

    #[test]
    fn slice_expiry_requests_a_switch() {
        let mut sched = Scheduler::new(2);
        sched.main.frames.push(unit_frame(0, CodeSpace::Body, 0));
        assert!(!sched.tick());
        assert!(sched.tick());
        sched.critical = 1;
        assert!(!sched.tick());
    }
}
