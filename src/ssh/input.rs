use std::borrow::Cow;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const DEL: u8 = 0x7f;

fn is_control(byte: u8) -> bool {
    (byte < 0x20 && byte != CR && byte != LF) || byte == DEL
}

/// Normalize keystrokes before they reach the shell.
///
/// Input carrying any control byte (escape sequences, Ctrl-C, tab,
/// backspace) is forwarded untouched. Otherwise a bare carriage return
/// becomes a line feed, so a plain Enter press reads as a newline.
pub fn normalize_input(data: &[u8]) -> Cow<'_, [u8]> {
    if data.iter().any(|&b| is_control(b)) || !data.contains(&CR) {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len());
    for (i, &byte) in data.iter().enumerate() {
        if byte == CR && data.get(i + 1) != Some(&LF) {
            out.push(LF);
        } else {
            out.push(byte);
        }
    }
    Cow::Owned(out)
}
