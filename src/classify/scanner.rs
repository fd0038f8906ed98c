#[derive(Clone, Copy)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Bracketed,
    Backticked,
    LineComment,
    BlockComment,
}

fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Count the statements in `sql`, splitting on `;` outside literals, quoted identifiers and
/// comments. Segments holding nothing but whitespace or comments are not counted, so a
/// trailing `;` never adds a statement.
pub(super) fn count_statements(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut state = State::Normal;
    let mut count = 0;
    let mut segment_has_content = false;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b';' => {
                    if segment_has_content {
                        count += 1;
                    }
                    segment_has_content = false;
                }
                _ if is_line_comment_start(bytes, idx) => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment;
                    idx += 1;
                }
                _ if b.is_ascii_whitespace() => {}
                _ => {
                    segment_has_content = true;
                    state = match b {
                        b'\'' => State::SingleQuoted,
                        b'"' => State::DoubleQuoted,
                        b'[' => State::Bracketed,
                        b'`' => State::Backticked,
                        _ => State::Normal,
                    };
                }
            },
            State::SingleQuoted => state = close_quote(bytes, &mut idx, b'\'', state),
            State::DoubleQuoted => state = close_quote(bytes, &mut idx, b'"', state),
            State::Backticked => state = close_quote(bytes, &mut idx, b'`', state),
            State::Bracketed => {
                if b == b']' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                // SQLite block comments do not nest
                if is_block_comment_end(bytes, idx) {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    if segment_has_content {
        count += 1;
    }
    count
}

fn close_quote(bytes: &[u8], idx: &mut usize, quote: u8, current: State) -> State {
    if bytes[*idx] != quote {
        return current;
    }
    if bytes.get(*idx + 1) == Some(&quote) {
        *idx += 1; // doubled quote is an escape
        current
    } else {
        State::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::count_statements;

    #[test]
    fn trailing_semicolon_is_not_a_statement() {
        assert_eq!(count_statements("SELECT 1;"), 1);
        assert_eq!(count_statements("SELECT 1;  \n ;"), 1);
    }

    #[test]
    fn semicolons_in_literals_and_comments_are_ignored() {
        assert_eq!(count_statements("SELECT 'a;b', \"c;d\", [e;f]"), 1);
        assert_eq!(count_statements("SELECT 'it''s; fine'"), 1);
        assert_eq!(count_statements("SELECT 1 -- x; y\n"), 1);
        assert_eq!(count_statements("SELECT /* ; */ 1"), 1);
    }

    #[test]
    fn counts_multiple_statements() {
        assert_eq!(count_statements("CREATE TABLE t(a); INSERT INTO t VALUES (1);"), 2);
        assert_eq!(count_statements("a; b; c"), 3);
    }

    #[test]
    fn blank_input_has_no_statements() {
        assert_eq!(count_statements(""), 0);
        assert_eq!(count_statements(" ; -- only a comment\n"), 0);
    }
}
