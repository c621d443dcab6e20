/// Reply sent when a request exceeds [`crate::MAX_MESSAGE_SIZE`].
pub const MESSAGE_TOO_LARGE: &str = "ERROR: Message too large";

/// Reply sent when a request is not valid UTF-8.
pub const INVALID_UTF8: &str = "ERROR: Invalid UTF-8 encoding";

/// The business rule: trim surrounding whitespace and upper-case the rest.
pub fn transform(message: &str) -> String {
    message.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_uppercases() {
        assert_eq!(transform("  hello world\n"), "HELLO WORLD");
        assert_eq!(transform("straße"), "STRASSE");
        assert_eq!(transform("\t"), "");
    }
}
