//! Access enforcement: the X-line subsystem.

mod xlines;

pub use xlines::{
    register_core_factories, IdentHostLine, NickLine, XLine, XLineFactory, XLineManager,
    XLineProps, ZLine,
};
