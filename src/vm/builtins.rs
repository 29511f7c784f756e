//! Host functions callable from tripla code.
//!
//! Each entry owns a reserved negative label `-(index + 1)`. Compiler
//! labels start below the last of them, so the two never collide.

use std::io::{self, Write};

pub type HostFn = fn(&[i64], &mut dyn Write) -> io::Result<i64>;

pub struct BuiltIn {
    pub name: &'static str,
    pub arity: usize,
    pub func: HostFn,
}

fn print(args: &[i64], out: &mut dyn Write) -> io::Result<i64> {
    writeln!(out, "{}", args[0])?;
    Ok(args[0])
}

pub static BUILTINS: &[BuiltIn] = &[BuiltIn { name: "print", arity: 1, func: print }];

fn label_of(index: usize) -> i64 {
    -(index as i64 + 1)
}

/// Built-in at `label`, if any.
pub fn lookup(label: i64) -> Option<&'static BuiltIn> {
    if label >= 0 {
        return None;
    }
    let index = usize::try_from(-(label + 1)).ok()?;
    BUILTINS.get(index)
}

/// `(name, arity, label)` for every built-in, in table order.
pub fn all() -> impl Iterator<Item = (&'static str, usize, i64)> {
    BUILTINS.iter().enumerate().map(|(i, b)| (b.name, b.arity, label_of(i)))
}

/// First label the compiler may hand out.
pub fn first_free_label() -> i64 {
    label_of(BUILTINS.len())
}
