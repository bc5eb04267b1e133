use std::io::Read;

use rsprims_frame::{decode_slice, DecodeOptions};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input = match args.hex {
        Some(hex) => hex,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|err| io_error("failed reading stdin", err))?;
            buf
        }
    };

    let bytes = parse_hex(&input)?;
    let options = DecodeOptions {
        length_optional: args.no_length,
    };
    let frame = decode_slice(&bytes, &options).map_err(|err| frame_error("decode failed", err))?;
    print_frame(&frame, format);
    Ok(SUCCESS)
}

/// Parse hex digits, ignoring whitespace and an optional `0x` prefix.
fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let input = input.trim();
    let digits: Vec<u8> = input
        .strip_prefix("0x")
        .unwrap_or(input)
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if digits.len() % 2 != 0 {
        return Err(CliError::new(DATA_INVALID, "hex input has an odd number of digits"));
    }

    digits
        .chunks_exact(2)
        .map(|pair| -> CliResult<u8> { Ok((nibble(pair[0])? << 4) | nibble(pair[1])?) })
        .collect()
}

fn nibble(digit: u8) -> CliResult<u8> {
    char::from(digit)
        .to_digit(16)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| {
            CliError::new(
                DATA_INVALID,
                format!("invalid hex digit '{}'", char::from(digit)),
            )
        })
}

#[cfg(test)]
mod tests {
    use rsprims_frame::{encode_to_bytes, Frame, FrameBody, Payload};

    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x} ")).collect()
    }

    #[test]
    fn parses_spaced_and_prefixed_hex() {
        assert_eq!(parse_hex("0x0a0B").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(parse_hex("de ad\nbe ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rejects_bad_hex() {
        assert_eq!(parse_hex("abc").unwrap_err().code, DATA_INVALID);
        assert_eq!(parse_hex("zz").unwrap_err().code, DATA_INVALID);
    }

    #[test]
    fn hex_of_encoded_frame_decodes_back() {
        let frame = Frame::response(7, Payload::new("ok").with_metadata("md"));
        let bytes = parse_hex(&to_hex(&encode_to_bytes(&frame).unwrap())).unwrap();
        let decoded = decode_slice(&bytes, &DecodeOptions::default()).unwrap();
        assert!(matches!(decoded.body, FrameBody::Response(ref p) if p.data.as_ref() == b"ok"));
    }
}
