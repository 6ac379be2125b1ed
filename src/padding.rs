//! Session message padding.
//!
//! Clients pad message bodies with a single 0x80 byte followed by zero or more 0x00 bytes,
//! and sign the padded value. We store the body without padding plus the original length,
//! and re-pad on the way out so the signature still verifies.
//!
//! Not every body is padded, so removal is a heuristic: a body ending in 0x00 or 0x80 is only
//! treated as padded if stripping the trailing zeros leaves a final 0x80. A genuine body that
//! happens to end that way cannot be told apart from a padded one. Clients depend on exactly
//! this behaviour, so it must not be "fixed".

/// Removes trailing `0x80 0x00*` padding, if present.
pub fn remove_session_message_padding(data: &[u8]) -> &[u8] {
    if matches!(data.last(), Some(0x00 | 0x80)) {
        let end = data
            .iter()
            .rposition(|&b| b != 0x00)
            .map_or(0, |i| i + 1);
        let stripped = &data[..end];
        if stripped.last() == Some(&0x80) {
            return &stripped[..stripped.len() - 1];
        }
    }
    data
}

/// Re-applies padding so that the result is `length` bytes long.
pub fn add_session_message_padding(data: &[u8], length: usize) -> Vec<u8> {
    let mut padded = data.to_vec();
    if length > data.len() {
        padded.reserve(length - data.len());
        padded.push(0x80);
        padded.resize(length, 0x00);
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_marker_and_zeros() {
        assert_eq!(remove_session_message_padding(b"hello\x80\x00\x00"), b"hello");
        assert_eq!(remove_session_message_padding(b"hello\x80"), b"hello");
    }

    #[test]
    fn unpadded_data_is_untouched() {
        assert_eq!(remove_session_message_padding(b"hello"), b"hello");
        assert_eq!(remove_session_message_padding(b""), b"");
    }

    #[test]
    fn trailing_zeros_without_marker_are_kept() {
        // Zeros not preceded by 0x80 are real data: the whole body is used unstripped.
        assert_eq!(
            remove_session_message_padding(b"hello\x00\x00"),
            b"hello\x00\x00"
        );
        assert_eq!(remove_session_message_padding(b"\x00\x00"), b"\x00\x00");
    }

    #[test]
    fn ambiguous_trailing_marker_is_treated_as_padding() {
        // A real body ending in 0x80 loses that byte: the documented ambiguity.
        assert_eq!(remove_session_message_padding(b"abc\x80"), b"abc");
    }

    #[test]
    fn padding_restores_original_length() {
        let original = b"some protobuf bytes\x80\x00\x00\x00\x00\x00\x00";
        let stripped = remove_session_message_padding(original);
        assert_eq!(
            add_session_message_padding(stripped, original.len()),
            original.to_vec()
        );
    }

    #[test]
    fn unpadded_body_survives_the_round_trip() {
        for body in [&b"x"[..], b"hello world", b"\x01\x02\x03", b"ends in zero\x00"] {
            let stripped = remove_session_message_padding(body);
            assert_eq!(add_session_message_padding(stripped, body.len()), body.to_vec());
        }
    }

    #[test]
    fn adding_padding_to_shorter_length_is_noop() {
        assert_eq!(add_session_message_padding(b"hello", 3), b"hello".to_vec());
        assert_eq!(add_session_message_padding(b"hello", 5), b"hello".to_vec());
    }
}
