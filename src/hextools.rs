use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Offset, sixteen hex bytes split in two groups of eight, then the
/// printable ASCII of the same bytes.
pub fn format_hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(BYTES_PER_LINE) * 80);

    for (line, chunk) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "0x{:04x}: ", line * BYTES_PER_LINE);

        for column in 0..BYTES_PER_LINE {
            if column == BYTES_PER_LINE / 2 {
                out.push(' ');
            }
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, " {byte:02x}");
                }
                None => out.push_str("   "),
            }
        }

        out.push_str("  ");
        out.extend(chunk.iter().map(|&byte| {
            if byte.is_ascii_graphic() {
                byte as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_line() {
        let data: Vec<u8> = (0x41..0x51).collect();
        assert_eq!(
            format_hexdump(&data),
            "0x0000:  41 42 43 44 45 46 47 48  49 4a 4b 4c 4d 4e 4f 50  ABCDEFGHIJKLMNOP\n"
        );
    }

    #[test]
    fn short_line_is_padded() {
        let dump = format_hexdump(&[0x45, 0x00, 0x00, 0x28]);
        assert_eq!(
            dump,
            format!("0x0000:  45 00 00 28{}  E..(\n", " ".repeat(12 * 3 + 1))
        );
    }

    #[test]
    fn packet_spans_three_lines() {
        let dump = format_hexdump(&[0u8; 40]);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0x0010:"));
        assert!(lines[2].starts_with("0x0020:"));
        // every line has the same width up to the ASCII column
        let ascii_at = |l: &str| l.rfind("  ").unwrap();
        assert_eq!(ascii_at(lines[0]), ascii_at(lines[2]));
    }

    #[test]
    fn empty_input() {
        assert_eq!(format_hexdump(&[]), "");
    }
}
