//! # Operations and Dispatch
//!
//! Each registered operation carries one [`OpImpl`] variant. Typed variants
//! own a closure with the operation's native signature; `Generic` takes the
//! raw read/write sequences and serves any operation type.
//!
//! | Variant | Serves | Generic read layout after the tag |
//! |---------|--------|-----------------------------------|
//! | `Noop` | `OpType::Noop` | (ignored) |
//! | `Exec` | `OpType::Exec` | library, symbol, inputs... |
//! | `ExecWithResource` | `OpType::ExecWithResource` | resource id, symbol, inputs... |
//! | `Generic` | any | inputs... |
//!
//! [`Runtime::genop`] unpacks the generic envelope into a typed call;
//! the typed entry points pack into the envelope when the resolved
//! implementation is `Generic`. Either way the implementation sees the same
//! arguments.

pub mod genop;

use std::fmt;

use crate::arg::Arg;
use crate::domain::OpType;
use crate::error::{AccelError, Result};
use crate::plugin::Operation;
use crate::resource::Resource;
use crate::runtime::Runtime;
use crate::session::Session;

pub type NoopFn = dyn Fn(&Session) -> Result<()> + Send + Sync;

pub type ExecFn = dyn Fn(&Session, &str, &str, &mut [Arg], &mut [Arg]) -> Result<()> + Send + Sync;

pub type ExecWithResourceFn =
    dyn Fn(&Session, &Resource, &str, &mut [Arg], &mut [Arg]) -> Result<()> + Send + Sync;

pub type GenericFn = dyn Fn(&Session, &mut [Arg], &mut [Arg]) -> Result<()> + Send + Sync;

/// Implementation of one operation.
pub enum OpImpl {
    Noop(Box<NoopFn>),
    Exec(Box<ExecFn>),
    ExecWithResource(Box<ExecWithResourceFn>),
    Generic(Box<GenericFn>),
}

impl OpImpl {
    pub fn noop<F>(f: F) -> Self
    where
        F: Fn(&Session) -> Result<()> + Send + Sync + 'static,
    {
        OpImpl::Noop(Box::new(f))
    }

    pub fn exec<F>(f: F) -> Self
    where
        F: Fn(&Session, &str, &str, &mut [Arg], &mut [Arg]) -> Result<()> + Send + Sync + 'static,
    {
        OpImpl::Exec(Box::new(f))
    }

    pub fn exec_with_resource<F>(f: F) -> Self
    where
        F: Fn(&Session, &Resource, &str, &mut [Arg], &mut [Arg]) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        OpImpl::ExecWithResource(Box::new(f))
    }

    pub fn generic<F>(f: F) -> Self
    where
        F: Fn(&Session, &mut [Arg], &mut [Arg]) -> Result<()> + Send + Sync + 'static,
    {
        OpImpl::Generic(Box::new(f))
    }

    /// Whether this variant can implement `op_type`.
    pub fn accepts(&self, op_type: OpType) -> bool {
        match self {
            OpImpl::Noop(_) => op_type == OpType::Noop,
            OpImpl::Exec(_) => op_type == OpType::Exec,
            OpImpl::ExecWithResource(_) => op_type == OpType::ExecWithResource,
            OpImpl::Generic(_) => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OpImpl::Noop(_) => "noop",
            OpImpl::Exec(_) => "exec",
            OpImpl::ExecWithResource(_) => "exec-with-resource",
            OpImpl::Generic(_) => "generic",
        }
    }
}

impl fmt::Debug for OpImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpImpl::{}", self.kind())
    }
}

fn mismatch(op: &Operation) -> AccelError {
    AccelError::InvalidArgument(format!(
        "{} implementation registered for {}",
        op.imp().kind(),
        op.op_type()
    ))
}

impl Runtime {
    /// Pick the implementation of `op_type` for this session's hint.
    pub fn resolve(&self, session: &Session, op_type: OpType) -> Result<std::sync::Arc<Operation>> {
        let _prof = self.prof_dispatch().enter();
        if session.id() == 0 {
            return Err(AccelError::InvalidArgument("session released".into()));
        }
        self.plugins()
            .get_op(op_type, session.hint())
            .ok_or_else(|| AccelError::NotSupported(format!("no implementation of {op_type}")))
    }

    /// Do-nothing operation, useful for probing dispatch.
    pub fn noop(&self, session: &Session) -> Result<()> {
        let op = self.resolve(session, OpType::Noop)?;
        match op.imp() {
            OpImpl::Noop(f) => f(session),
            OpImpl::Generic(f) => f(session, &mut [], &mut []),
            _ => Err(mismatch(&op)),
        }
    }

    /// Run `symbol` from the code unit at `library`.
    pub fn exec(
        &self,
        session: &Session,
        library: &str,
        symbol: &str,
        read: &mut [Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        let _prof = self.prof_exec().enter();
        let op = self.resolve(session, OpType::Exec)?;
        match op.imp() {
            OpImpl::Exec(f) => f(session, library, symbol, read, write),
            OpImpl::Generic(f) => genop::with_prefix(
                vec![Arg::from_text(library), Arg::from_text(symbol)],
                read,
                |packed| f(session, packed, write),
            ),
            _ => Err(mismatch(&op)),
        }
    }

    /// Run `symbol` from the code units held by `resource`.
    pub fn exec_with_resource(
        &self,
        session: &Session,
        resource: &Resource,
        symbol: &str,
        read: &mut [Arg],
        write: &mut [Arg],
    ) -> Result<()> {
        let _prof = self.prof_exec().enter();
        if !resource.is_alive() {
            return Err(AccelError::InvalidArgument("resource destroyed".into()));
        }
        let op = self.resolve(session, OpType::ExecWithResource)?;
        match op.imp() {
            OpImpl::ExecWithResource(f) => f(session, resource, symbol, read, write),
            OpImpl::Generic(f) => genop::with_prefix(
                vec![Arg::from_u32(resource.id()), Arg::from_text(symbol)],
                read,
                |packed| f(session, packed, write),
            ),
            _ => Err(mismatch(&op)),
        }
    }

    /// Generic operation: `read[0]` is the operation type, the rest is
    /// unpacked per the resolved implementation.
    pub fn genop(&self, session: &Session, read: &mut [Arg], write: &mut [Arg]) -> Result<()> {
        let _prof = self.prof_genop().enter();
        let (tag, rest) = read
            .split_first_mut()
            .ok_or_else(|| AccelError::InvalidArgument("genop needs the operation type".into()))?;
        let op_type = OpType::try_from(tag.as_u32()?)?;
        let op = self.resolve(session, op_type)?;

        match op.imp() {
            OpImpl::Noop(f) => f(session),
            OpImpl::Exec(f) => {
                let (head, inputs) = genop::split_head(rest, 2, op_type)?;
                f(session, head[0].as_str()?, head[1].as_str()?, inputs, write)
            }
            OpImpl::ExecWithResource(f) => {
                let (head, inputs) = genop::split_head(rest, 2, op_type)?;
                let resource = self.resources().get_by_id(head[0].as_u32()?).map_err(|e| {
                    AccelError::InvalidArgument(format!("exec resource: {e}"))
                })?;
                f(session, &resource, head[1].as_str()?, inputs, write)
            }
            OpImpl::Generic(f) => f(session, rest, write),
        }
    }
}
