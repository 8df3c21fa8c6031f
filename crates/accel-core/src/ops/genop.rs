//! Generic-operation envelope.
//!
//! Layout of a genop read sequence:
//!
//! ```text
//! [0] op type (u32, native endian)
//! [1..] per-type header, then the operation's inputs
//!
//! exec:               [Exec, library, symbol, inputs...]
//! exec-with-resource: [ExecWithResource, resource id, symbol, inputs...]
//! ```

use crate::arg::Arg;
use crate::domain::{Id, OpType};
use crate::error::{AccelError, Result};

/// Read sequence for a genop `noop`.
pub fn pack_noop() -> Vec<Arg> {
    vec![Arg::op_type(OpType::Noop)]
}

/// Read sequence for a genop `exec`. Inputs are copied.
pub fn pack_exec(library: &str, symbol: &str, inputs: &[Arg]) -> Vec<Arg> {
    let mut read = Vec::with_capacity(inputs.len() + 3);
    read.push(Arg::op_type(OpType::Exec));
    read.push(Arg::from_text(library));
    read.push(Arg::from_text(symbol));
    read.extend(inputs.iter().cloned());
    read
}

/// Read sequence for a genop `exec-with-resource`. Inputs are copied.
pub fn pack_exec_with_resource(resource: Id, symbol: &str, inputs: &[Arg]) -> Vec<Arg> {
    let mut read = Vec::with_capacity(inputs.len() + 3);
    read.push(Arg::op_type(OpType::ExecWithResource));
    read.push(Arg::from_u32(resource));
    read.push(Arg::from_text(symbol));
    read.extend(inputs.iter().cloned());
    read
}

/// Read sequence for any other operation type.
pub fn pack(op_type: OpType, inputs: &[Arg]) -> Vec<Arg> {
    let mut read = Vec::with_capacity(inputs.len() + 1);
    read.push(Arg::op_type(op_type));
    read.extend(inputs.iter().cloned());
    read
}

/// Split the per-type header off a genop read sequence (tag already removed).
pub(crate) fn split_head(
    rest: &mut [Arg],
    head: usize,
    op_type: OpType,
) -> Result<(&mut [Arg], &mut [Arg])> {
    if rest.len() < head {
        return Err(AccelError::InvalidArgument(format!(
            "genop {} needs {} header arguments, got {}",
            op_type,
            head,
            rest.len()
        )));
    }
    Ok(rest.split_at_mut(head))
}

/// Call `f` with `prefix` followed by `inputs`, moved in and restored after.
pub(crate) fn with_prefix<R>(
    mut prefix: Vec<Arg>,
    inputs: &mut [Arg],
    f: impl FnOnce(&mut [Arg]) -> R,
) -> R {
    let head = prefix.len();
    prefix.extend(inputs.iter_mut().map(std::mem::take));
    let out = f(&mut prefix);
    for (slot, arg) in inputs.iter_mut().zip(prefix.drain(head..)) {
        *slot = arg;
    }
    out
}
