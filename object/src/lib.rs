//! # Object
//!
//! The value model shared by the compiler and the interpreter: the
//! [`Specifier`] tagged union, its reference-counted bodies, and the
//! operators defined over them.
//!
//! ```text
//!  Specifier ─┬─ inline: omega, atom, short, label, file, opaque, void
//!             └─ Rc body: real, long, string, tuple, set, map, object,
//!                         proc, process, mailbox, iter
//! ```
//!
//! Bodies carry a cached hash code; the use count is the `Rc` strong
//! count. Values with value semantics are copied on write.

mod header;
mod instance;
mod integer;
pub mod ops;
mod procedure;
mod set;
mod specifier;
mod string;
mod tuple;
mod unstr;

pub use header::{Form, HashCache};
pub use instance::{ClassId, IterBody, IterKind, MailboxBody, ObjectBody, ProcessBody};
pub use integer::{INT_CELL_WIDTH, LongInt, MAX_INT_CELL};
pub use ops::ValueError;
pub use procedure::{ProcBody, ProcKind};
pub use set::{Image, MapBody, MultiValued, SetBody, SetHasher};
pub use specifier::{CodeAddr, FALSE_ATOM, Specifier, TRUE_ATOM, canonical_cmp, hash_of};
pub use string::{STRING_CELL_WIDTH, SetlString};
pub use tuple::{TUPLE_FANOUT, Tuple, TupleIter, height_for};
pub use unstr::unstr;
