//! Indented line writer for generated source

use std::fmt::Display;

const INDENT: &str = "  ";

/// Accumulates source lines with block indentation
#[derive(Debug, Default)]
pub(crate) struct SourceWriter {
    out: String,
    depth: usize,
}

impl SourceWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn line(&mut self, text: impl Display) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(&text.to_string());
        self.out.push('\n');
    }

    /// Write a block header and indent what follows
    pub(crate) fn open(&mut self, header: impl Display) {
        self.line(header);
        self.depth += 1;
    }

    /// Close the innermost block with `end`
    pub(crate) fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("end");
    }

    pub(crate) fn blank(&mut self) {
        self.out.push('\n');
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blocks_indent_and_close() {
        let mut w = SourceWriter::new();
        w.open("type public class A");
        w.open("method public void M()");
        w.line("ret");
        w.close();
        w.close();
        assert_eq!(
            w.finish(),
            "type public class A\n  method public void M()\n    ret\n  end\nend\n"
        );
    }
}
