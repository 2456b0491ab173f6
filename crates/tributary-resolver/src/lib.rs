//! Tributary Resolver
//!
//! Parameters passed to tasks and flows form a tree ([`Param`]) whose leaves
//! are plain JSON values, references to other runs ([`RunFuture`]), captured
//! [`State`](tributary_state::State)s, or quoted subtrees that must be passed
//! through untouched.
//!
//! Resolution happens in two phases:
//! 1. Every unquoted future and state in the tree (and every future in the
//!    extra `wait_for` list) is awaited and checked. Anything that did not
//!    end `Completed` makes the whole resolution [`NotReady`].
//! 2. The tree is rebuilt with each future and state replaced by its result
//!    value. Quoted subtrees are unwrapped and passed on verbatim.
//!
//! This crate also casts raw flow-run parameters to declared types
//! ([`cast_parameters`]).

mod cast;
mod future;
mod param;
mod resolve;

pub use cast::{ParamSpec, ParamType, ParameterTypeError, cast_parameters};
pub use future::{FutureResolver, Outcome, RunFuture};
pub use param::{Param, Parameters, Reference, parameters};
pub use resolve::{NotReady, Resolution, resolve_parameters};
