//! Shell-style tokenizer for script argument strings.
//!
//! A posted `arg_string` must tokenize exactly as the same text would on a
//! command line: whitespace separates tokens, single quotes group
//! literally, double quotes group with backslash escapes for `"` and `\`.

/// Split an argument string into CLI tokens.
///
/// Returns an error message for unbalanced quotes or a trailing backslash.
pub fn split_args(input: &str) -> Result<Vec<String>, String> {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut mode = Mode::Plain;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                '\'' => {
                    mode = Mode::Single;
                    has_token = true;
                }
                '"' => {
                    mode = Mode::Double;
                    has_token = true;
                }
                '\\' => match chars.next() {
                    Some(next) => {
                        current.push(next);
                        has_token = true;
                    }
                    None => return Err("trailing backslash".into()),
                },
                c if c.is_whitespace() => {
                    if has_token {
                        tokens.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Plain,
                c => current.push(c),
            },
            Mode::Double => match c {
                '"' => mode = Mode::Plain,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => return Err("unterminated escape inside double quotes".into()),
                },
                c => current.push(c),
            },
        }
    }

    if mode != Mode::Plain {
        return Err("unbalanced quote".into());
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}
