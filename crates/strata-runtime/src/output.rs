//! Output sink for `print`
//!
//! Lines go to stdout unless the current thread is capturing, in which case
//! they are buffered so callers (tests, equivalence checks) can inspect them.

use std::cell::RefCell;
use std::io::Write;

thread_local! {
    static CAPTURE: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub fn print_line(line: &str) {
    let captured = CAPTURE.with(|capture| match capture.borrow_mut().as_mut() {
        Some(buffer) => {
            buffer.push_str(line);
            buffer.push('\n');
            true
        }
        None => false,
    });
    if !captured {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{}", line);
    }
}

/// Run `f` and return its result along with everything it printed
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
    let previous = CAPTURE.with(|capture| capture.borrow_mut().replace(String::new()));
    let result = f();
    let printed = CAPTURE.with(|capture| {
        let mut slot = capture.borrow_mut();
        let printed = slot.take().unwrap_or_default();
        *slot = previous;
        printed
    });
    (result, printed)
}

pub fn flush() {
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_collects_lines() {
        let ((), out) = capture(|| {
            print_line("a");
            print_line("b");
        });
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_capture_nests() {
        let (inner, outer) = capture(|| {
            print_line("outer");
            let ((), inner) = capture(|| print_line("inner"));
            inner
        });
        assert_eq!(inner, "inner\n");
        assert_eq!(outer, "outer\n");
    }
}
