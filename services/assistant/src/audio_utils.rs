use base64::Engine;
use bytes::Bytes;

/// Encodes raw little-endian PCM16 bytes for the wire.
pub fn encode_pcm16(pcm16_bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_bytes)
}

/// Decodes a base64 fragment of PCM16 audio back into raw bytes.
pub fn decode_pcm16(base64_fragment: &str) -> Result<Bytes, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(base64_fragment)
        .map(Bytes::from)
}

/// Splits `buffer` at the last whole 16-bit sample, returning the aligned
/// prefix and leaving any odd trailing byte in place.
pub fn take_whole_samples(buffer: &mut Vec<u8>) -> Vec<u8> {
    let aligned = buffer.len() - buffer.len() % 2;
    let rest = buffer.split_off(aligned);
    std::mem::replace(buffer, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pcm16() {
        // i16 value 16384 = 0x4000 in little endian = [0x00, 0x40]
        let decoded = decode_pcm16("AEA=").unwrap();
        assert_eq!(decoded.as_ref(), &[0x00, 0x40]);

        assert!(decode_pcm16("").unwrap().is_empty());
        assert!(decode_pcm16("invalid_base64!").is_err());
    }

    #[test]
    fn test_encode_pcm16() {
        assert_eq!(encode_pcm16(&[0x00, 0x40]), "AEA=");
        assert_eq!(encode_pcm16(&[]), "");

        let samples = [0x10u8, 0x20, 0x30, 0x40];
        assert_eq!(decode_pcm16(&encode_pcm16(&samples)).unwrap().as_ref(), &samples);
    }

    #[test]
    fn test_take_whole_samples() {
        let mut buffer = vec![1u8, 2, 3, 4, 5];
        assert_eq!(take_whole_samples(&mut buffer), vec![1, 2, 3, 4]);
        assert_eq!(buffer, vec![5]);

        buffer.extend_from_slice(&[6, 7]);
        assert_eq!(take_whole_samples(&mut buffer), vec![5, 6]);
        assert_eq!(buffer, vec![7]);

        let mut single = vec![9u8];
        assert!(take_whole_samples(&mut single).is_empty());
        assert_eq!(single, vec![9]);
    }
}
