/// Pads the shorter side with zero bytes to match the longer one, then
/// interleaves both sides sample-wise as 16-bit little-endian pairs:
/// `[in0, out0, in1, out1, ...]`.
pub fn interleave(side_in: &[u8], side_out: &[u8]) -> Vec<u8> {
    let len = side_in.len().max(side_out.len());
    // Round down to a whole number of 16-bit samples so we never split a sample.
    let len = len - (len % 2);
    let mut out = Vec::with_capacity(len * 2);
    let mut i = 0;
    while i < len {
        out.extend_from_slice(side_in.get(i..i + 2).unwrap_or(&[0, 0]));
        out.extend_from_slice(side_out.get(i..i + 2).unwrap_or(&[0, 0]));
        i += 2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaves_equal_length_sides() {
        let left = [0x01, 0x00, 0x02, 0x00];
        let right = [0x10, 0x00, 0x20, 0x00];
        let out = interleave(&left, &right);
        assert_eq!(out, vec![0x01, 0x00, 0x10, 0x00, 0x02, 0x00, 0x20, 0x00]);
    }

    #[test]
    fn pads_shorter_side_with_zero_samples() {
        let left = [0x01, 0x00];
        let right = [0x10, 0x00, 0x20, 0x00];
        let out = interleave(&left, &right);
        assert_eq!(out, vec![0x01, 0x00, 0x10, 0x00, 0x00, 0x00, 0x20, 0x00]);
    }

    #[test]
    fn empty_sides_produce_empty_output() {
        assert_eq!(interleave(&[], &[]), Vec::<u8>::new());
    }
}
