//! Bytecode programs shared by the integration tests

#![allow(dead_code)]

use strata_engine::bytecode::{Constant, Op, Program};

pub fn num(n: f64) -> Op {
    Op::Push(Constant::Number(n))
}

pub fn string(s: &str) -> Op {
    Op::Push(Constant::String(s.to_string()))
}

/// print(3 + 4)
pub fn sum() -> Program {
    Program::new("sum", vec![num(3.0), num(4.0), Op::Add, Op::Print, Op::Halt])
}

/// sum of 1..=10 with two local slots and a back edge
pub fn loop_sum() -> Program {
    Program::new(
        "loop_sum",
        vec![
            num(0.0),            // 0
            Op::StoreLocal(0),   // 1: sum
            num(1.0),            // 2
            Op::StoreLocal(1),   // 3: i
            Op::LoadLocal(1),    // 4
            num(10.0),           // 5
            Op::Le,              // 6
            Op::JumpIfFalse(17), // 7
            Op::LoadLocal(0),    // 8
            Op::LoadLocal(1),    // 9
            Op::Add,             // 10
            Op::StoreLocal(0),   // 11
            Op::LoadLocal(1),    // 12
            num(1.0),            // 13
            Op::Add,             // 14
            Op::StoreLocal(1),   // 15
            Op::Jump(4),         // 16
            Op::LoadLocal(0),    // 17
            Op::Print,           // 18
            Op::Halt,            // 19
        ],
    )
}

/// Recursive factorial; the function keeps itself in local slot 1
pub fn factorial() -> Program {
    Program::new(
        "factorial",
        vec![
            Op::Jump(18),                    // 0: guard
            Op::StoreLocal(0),               // 1: n
            Op::Push(Constant::Function(1)), // 2
            Op::StoreLocal(1),               // 3: self
            Op::LoadLocal(0),                // 4
            num(1.0),                        // 5
            Op::Le,                          // 6
            Op::JumpIfFalse(10),             // 7
            num(1.0),                        // 8
            Op::Return,                      // 9
            Op::LoadLocal(0),                // 10
            Op::LoadLocal(0),                // 11
            num(1.0),                        // 12
            Op::Sub,                         // 13
            Op::LoadLocal(1),                // 14
            Op::Call(1),                     // 15
            Op::Mul,                         // 16
            Op::Return,                      // 17
            num(5.0),                        // 18
            Op::Push(Constant::Function(1)), // 19
            Op::Call(1),                     // 20
            Op::Print,                       // 21
            Op::Halt,                        // 22
        ],
    )
}

/// String concatenation, coercion and comparisons
pub fn strings() -> Program {
    Program::new(
        "strings",
        vec![
            string("a"),
            string("b"),
            Op::Add,
            Op::Print,
            string("n="),
            num(1.0),
            Op::Add,
            Op::Print,
            string("x"),
            string("x"),
            Op::Eq,
            Op::Print,
            num(2.0),
            num(3.0),
            Op::Lt,
            Op::Not,
            Op::Print,
            num(0.0),
            num(0.0),
            Op::Div,
            Op::Print,
            num(1.0),
            num(0.0),
            Op::Div,
            Op::Print,
            Op::Halt,
        ],
    )
}

/// Object properties, array elements and globals
pub fn heap() -> Program {
    Program::new(
        "heap",
        vec![
            Op::NewObject,
            Op::StoreLocal(0),
            Op::LoadLocal(0),
            num(5.0),
            Op::SetProp("x".to_string()),
            Op::LoadLocal(0),
            Op::GetProp("x".to_string()),
            num(1.0),
            Op::Add,
            Op::Print,
            Op::NewArray,
            Op::StoreLocal(1),
            Op::LoadLocal(1),
            num(0.0),
            string("z"),
            Op::SetElem,
            Op::LoadLocal(1),
            num(0.0),
            Op::GetElem,
            Op::Print,
            num(2.0),
            Op::StoreGlobal("g".to_string()),
            Op::LoadGlobal("g".to_string()),
            num(3.0),
            Op::Mul,
            Op::Print,
            Op::Halt,
        ],
    )
}

/// A closure adding its environment to its argument
pub fn closure() -> Program {
    Program::new(
        "closure",
        vec![
            Op::Jump(4),         // 0: guard
            Op::LoadEnv,         // 1
            Op::Add,             // 2
            Op::Return,          // 3
            num(10.0),           // 4: argument
            num(32.0),           // 5: environment
            Op::MakeClosure(1),  // 6
            Op::Call(1),         // 7
            Op::Print,           // 8
            Op::Halt,            // 9
        ],
    )
}

/// Branch on a value that is only known at run time
pub fn branches() -> Program {
    Program::new(
        "branches",
        vec![
            Op::LoadGlobal("missing".to_string()), // 0: undefined
            Op::JumpIfFalse(4),                    // 1
            string("then"),                        // 2
            Op::Jump(5),                           // 3
            string("else"),                        // 4
            Op::Print,                             // 5
            Op::Push(Constant::Null),              // 6
            Op::Push(Constant::Undefined),         // 7
            Op::Eq,                                // 8
            Op::Print,                             // 9
            Op::Halt,                              // 10
        ],
    )
}

/// Calls func_1(i) = i + 1 twenty times from a loop in main
pub fn hot_loop() -> Program {
    Program::new(
        "hot_loop",
        vec![
            Op::Jump(4),                     // 0: guard
            num(1.0),                        // 1
            Op::Add,                         // 2
            Op::Return,                      // 3
            num(0.0),                        // 4
            Op::StoreLocal(0),               // 5: i
            Op::LoadLocal(0),                // 6
            num(20.0),                       // 7
            Op::Lt,                          // 8
            Op::JumpIfFalse(15),             // 9
            Op::LoadLocal(0),                // 10
            Op::Push(Constant::Function(1)), // 11
            Op::Call(1),                     // 12
            Op::StoreLocal(0),               // 13
            Op::Jump(6),                     // 14
            Op::LoadLocal(0),                // 15
            Op::Print,                       // 16
            Op::Halt,                        // 17
        ],
    )
}

pub fn all() -> Vec<Program> {
    vec![sum(), loop_sum(), factorial(), strings(), heap(), closure(), branches(), hot_loop()]
}

/// Expected stdout of each program in `all`
pub fn expected_output(name: &str) -> &'static str {
    match name {
        "sum" => "7\n",
        "loop_sum" => "55\n",
        "factorial" => "120\n",
        "strings" => "ab\nn=1\ntrue\nfalse\nNaN\nInfinity\n",
        "heap" => "6\nz\n6\n",
        "closure" => "42\n",
        "branches" => "else\nfalse\n",
        "hot_loop" => "20\n",
        _ => "",
    }
}
