//! Build-system entry point
//!
//! Build tasks hand over the whole command line as one string. Tokens are
//! separated by whitespace; a double-quoted run keeps its whitespace and
//! loses the quotes.

/// Split a command line into arguments
#[must_use]
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

/// Run the processor from a task command line; `true` on success
pub fn run_task(command_line: &str) -> bool {
    let args = std::iter::once("asmproc".to_string()).chain(split_command_line(command_line));
    crate::run(args) == 0
}
