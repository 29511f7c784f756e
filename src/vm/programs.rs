//! Hand-assembled TRAM programs. Each one notes the source it encodes and
//! any register preset it expects beyond the state `Machine::load` leaves.

use super::instruction::{Instruction as I, Opcode};

/// `y = x * 3 + 5 * 2` with x in cell 0 and y in cell 1.
/// Expects `set_top(1)`; leaves 28 in cell 1.
pub fn program1() -> Vec<I> {
    vec![
        I::constant(6),
        I::store(0, 0),
        I::load(0, 0),
        I::constant(3),
        I::op(Opcode::Mul),
        I::constant(5),
        I::constant(2),
        I::op(Opcode::Mul),
        I::op(Opcode::Add),
        I::store(1, 0),
        I::halt(),
    ]
}

/// `x = 10; if (x == 0) then 100 else 200; 3` with x in cell 0.
/// Expects `set_top(0)`.
pub fn program2() -> Vec<I> {
    vec![
        I::constant(10),
        I::store(0, 0),
        I::load(0, 0),
        I::ifzero(6),
        I::constant(200),
        I::goto(7),
        I::constant(100),
        I::nop(),
        I::constant(3),
        I::halt(),
    ]
}

/// `let square(x) { x * x } in square(10)`
pub fn program3() -> Vec<I> {
    vec![
        I::constant(10),
        I::invoke(1, 3, 0),
        I::halt(),
        // square
        I::load(0, 0),
        I::load(0, 0),
        I::op(Opcode::Mul),
        I::ret(),
    ]
}

/// ```text
/// let wrapper(number, threshold) {
///   let square(x) { if (x * x > threshold) then x else x * x }
///   in square(number)
/// } in wrapper(4, 10)
/// ```
///
/// `square` reads `threshold` one static link up.
pub fn program4() -> Vec<I> {
    vec![
        I::constant(4),
        I::constant(10),
        I::invoke(2, 4, 0),
        I::halt(),
        // wrapper
        I::load(0, 0),
        I::invoke(1, 7, 0),
        I::ret(),
        // square
        I::load(0, 0),
        I::load(0, 0),
        I::op(Opcode::Mul),
        I::load(1, 1),
        I::op(Opcode::Gt),
        I::ifzero(15),
        I::load(0, 0),
        I::ret(),
        I::load(0, 0),
        I::load(0, 0),
        I::op(Opcode::Mul),
        I::ret(),
    ]
}

/// `let factorial(n) { if (n == 0) then 1 else n * factorial(n - 1) } in factorial(number)`
pub fn factorial(number: i64) -> Vec<I> {
    vec![
        I::constant(number),
        I::invoke(1, 3, 0),
        I::halt(),
        // factorial
        I::load(0, 0),
        I::constant(0),
        I::op(Opcode::Eq),
        I::ifzero(9),
        I::constant(1),
        I::goto(15),
        I::load(0, 0),
        I::constant(1),
        I::op(Opcode::Sub),
        I::invoke(1, 3, 0),
        I::load(0, 0),
        I::op(Opcode::Mul),
        I::nop(),
        I::ret(),
    ]
}
