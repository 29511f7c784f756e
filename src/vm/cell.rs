use std::fmt;

/// A tagged stack cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// Plain integer (`I`)
    Int(i64),
    /// Instruction address, e.g. a saved return PC (`P`)
    Code(i64),
    /// Pending lazy binding; the payload is the initializer's entry (`C`)
    Thunk(i64),
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Int(0)
    }
}

impl Cell {
    /// Payload regardless of tag.
    pub fn value(self) -> i64 {
        match self {
            Cell::Int(v) | Cell::Code(v) | Cell::Thunk(v) => v,
        }
    }

    pub fn tag(self) -> char {
        match self {
            Cell::Int(_) => 'I',
            Cell::Code(_) => 'P',
            Cell::Thunk(_) => 'C',
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag(), self.value())
    }
}
