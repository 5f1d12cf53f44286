//! Decides whether a chunk of child output would put anything visible on screen.

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const CSI_8BIT: u8 = 0x9B;

fn is_csi_final(byte: u8) -> bool {
    (0x40..=0x7E).contains(&byte)
}

/// Advance past CSI parameters and the final byte. Returns the index after the
/// sequence, or `bytes.len()` when the chunk ends mid-sequence.
fn skip_csi(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        let byte = bytes[idx];
        idx += 1;
        if is_csi_final(byte) {
            break;
        }
    }
    idx
}

/// Advance past an OSC body terminated by BEL or ST (`ESC \`).
fn skip_osc(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        let byte = bytes[idx];
        idx += 1;
        if byte == BEL {
            break;
        }
        if byte == ESC && bytes.get(idx) == Some(&b'\\') {
            idx += 1;
            break;
        }
    }
    idx
}

/// True when `data` holds at least one byte that renders as text once CSI,
/// OSC and charset-designation sequences are skipped.
///
/// Printable ASCII, `\n`, `\r`, `\t` and any byte >= 0x80 count as visible.
/// Cursor movement, styling and title updates alone do not, so they never
/// re-arm the idle timer. The scan is a single forward pass and tolerates
/// sequences cut off at the end of the chunk.
pub fn contains_visible_content(data: &[u8]) -> bool {
    let mut idx = 0;
    while idx < data.len() {
        let byte = data[idx];
        if byte == ESC {
            match data.get(idx + 1) {
                Some(b'[') => {
                    idx = skip_csi(data, idx + 2);
                    continue;
                }
                Some(b']') => {
                    idx = skip_osc(data, idx + 2);
                    continue;
                }
                Some(b'(') | Some(b')') => {
                    idx = (idx + 3).min(data.len());
                    continue;
                }
                _ => {
                    // Two-byte escapes (ESC 7, ESC M, ESC c) carry no text.
                    idx = (idx + 2).min(data.len());
                    continue;
                }
            }
        }
        if byte == CSI_8BIT {
            idx = skip_csi(data, idx + 1);
            continue;
        }
        if matches!(byte, b'\n' | b'\r' | b'\t') || (0x20..=0x7E).contains(&byte) || byte >= 0x80
        {
            return true;
        }
        idx += 1;
    }
    false
}
