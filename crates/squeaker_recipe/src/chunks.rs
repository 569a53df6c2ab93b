//! The `!`-delimited chunk format reader.
//!
//! `!` terminates a chunk except that `!!` decodes to a single literal `!`.
//! A trailing unterminated non-empty chunk is still yielded — there is no
//! exception-driven end-of-stream signal, just an ordinary iterator that
//! runs dry.

/// Splits `text` into chunks, honoring `!!` escaping.
pub fn read_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '!' {
            if chars.peek() == Some(&'!') {
                chars.next();
                current.push('!');
                continue;
            }
            chunks.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_bang_terminator() {
        assert_eq!(read_chunks("one!two!"), vec!["one", "two"]);
    }

    #[test]
    fn double_bang_is_a_literal_bang() {
        assert_eq!(read_chunks("a!!b!"), vec!["a!b"]);
    }

    #[test]
    fn trailing_unterminated_chunk_is_yielded() {
        assert_eq!(read_chunks("one!two"), vec!["one", "two"]);
    }

    #[test]
    fn trailing_empty_chunk_is_not_yielded() {
        assert_eq!(read_chunks("one!"), vec!["one"]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(read_chunks("").is_empty());
    }

    #[test]
    fn escaped_bang_survives_next_to_terminator() {
        assert_eq!(read_chunks("has !! escaped!!!next!"), vec!["has ! escaped!", "next"]);
    }
}
