//! Function body discovery
//!
//! Every function referenced by a `Push(Function(addr))` or
//! `MakeClosure(addr)` must sit directly behind a guard `Jump(end)` at
//! `addr - 1`; its body is `[addr, end)`. Bodies nest but never partially
//! overlap. Whatever no body claims belongs to `main`.

use rustc_hash::FxHashMap;

use super::LoweringError;
use crate::bytecode::Op;
use crate::ir::FuncId;

/// One function's slice of the instruction stream
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLayout {
    pub id: FuncId,
    pub name: String,
    pub start: usize,
    pub end: usize,
    /// Bodies directly or transitively nested inside this one, as `[start, end)`
    pub nested: Vec<(usize, usize)>,
}

impl FunctionLayout {
    /// Whether `addr` is an instruction of this function itself
    pub fn owns(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end && !self.in_nested(addr)
    }

    pub fn in_nested(&self, addr: usize) -> bool {
        self.nested.iter().any(|&(s, e)| addr >= s && addr < e)
    }
}

/// All functions of a program, `main` first, the rest by address
#[derive(Debug, Clone)]
pub struct ProgramLayout {
    pub functions: Vec<FunctionLayout>,
    by_addr: FxHashMap<usize, FuncId>,
}

impl ProgramLayout {
    pub fn discover(code: &[Op]) -> Result<Self, LoweringError> {
        let mut starts: Vec<usize> = code.iter().filter_map(Op::function_ref).collect();
        starts.sort_unstable();
        starts.dedup();

        let mut bodies = Vec::with_capacity(starts.len());
        for &start in &starts {
            let guard = start
                .checked_sub(1)
                .and_then(|g| code.get(g))
                .ok_or(LoweringError::MissingGuard { addr: start })?;
            let end = match guard {
                Op::Jump(end) if *end >= start && *end <= code.len() => *end,
                _ => return Err(LoweringError::MissingGuard { addr: start }),
            };
            bodies.push((start, end));
        }

        // Guard and body of one function must lie wholly inside or wholly
        // outside every other body.
        for (i, &(s1, e1)) in bodies.iter().enumerate() {
            for &(s2, e2) in bodies.iter().skip(i + 1) {
                let disjoint = e1 <= s2 - 1 || e2 <= s1 - 1;
                let second_inside = s2 - 1 >= s1 && e2 <= e1;
                let first_inside = s1 - 1 >= s2 && e1 <= e2;
                if !(disjoint || second_inside || first_inside) {
                    return Err(LoweringError::OverlappingFunction { addr: s2, other: s1 });
                }
            }
        }

        let mut functions = Vec::with_capacity(bodies.len() + 1);
        let mut by_addr = FxHashMap::default();
        functions.push(FunctionLayout {
            id: FuncId(0),
            name: "main".to_string(),
            start: 0,
            end: code.len(),
            nested: bodies.clone(),
        });
        for (index, &(start, end)) in bodies.iter().enumerate() {
            let id = FuncId(index as u32 + 1);
            let nested = bodies
                .iter()
                .copied()
                .filter(|&(s, e)| (s, e) != (start, end) && s > start && e <= end)
                .collect();
            by_addr.insert(start, id);
            functions.push(FunctionLayout { id, name: format!("func_{}", start), start, end, nested });
        }
        Ok(ProgramLayout { functions, by_addr })
    }

    pub fn function_at(&self, addr: usize) -> Option<FuncId> {
        self.by_addr.get(&addr).copied()
    }
}
