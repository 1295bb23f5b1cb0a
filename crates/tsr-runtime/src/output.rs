//! The console sink.
//!
//! `console.*` writes go through an `Output` handle so tests (and the parity
//! harness) can capture what a program printed instead of scraping stdout.

use std::cell::RefCell;

#[derive(Debug)]
enum Sink {
    Stdout,
    Capture(RefCell<String>),
}

#[derive(Debug)]
pub struct Output {
    sink: Sink,
}

impl Output {
    pub fn stdout() -> Self {
        Output { sink: Sink::Stdout }
    }

    pub fn capture() -> Self {
        Output {
            sink: Sink::Capture(RefCell::new(String::new())),
        }
    }

    pub fn writeln(&self, line: &str) {
        match &self.sink {
            Sink::Stdout => println!("{line}"),
            Sink::Capture(buf) => {
                let mut buf = buf.borrow_mut();
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }

    pub fn write_err(&self, line: &str) {
        match &self.sink {
            Sink::Stdout => eprintln!("{line}"),
            Sink::Capture(buf) => {
                let mut buf = buf.borrow_mut();
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }

    /// Captured text, empty for stdout sinks.
    pub fn captured(&self) -> String {
        match &self.sink {
            Sink::Stdout => String::new(),
            Sink::Capture(buf) => buf.borrow().clone(),
        }
    }
}
