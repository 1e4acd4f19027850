//! Stable ID newtypes for program entities.
//!
//! A [`Var`] indexes the variable arena of the [`Program`](crate::program::Program)
//! that defines it. Variables are scoped to one program: a sub-program embedded
//! in a `cond`/`scan`/`while`/`call`/`map` equation has its own arena, so the
//! same `Var(3)` can mean different things inside and outside a branch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SSA variable identifier. Index into a program's variable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Var(pub u32);

impl Var {
    /// Returns the arena index of this variable.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_display() {
        assert_eq!(format!("{}", Var(7)), "v7");
    }

    #[test]
    fn var_index() {
        assert_eq!(Var(42).index(), 42);
    }

    #[test]
    fn serde_roundtrip() {
        let var = Var(42);
        let json = serde_json::to_string(&var).unwrap();
        let back: Var = serde_json::from_str(&json).unwrap();
        assert_eq!(var, back);
    }
}
