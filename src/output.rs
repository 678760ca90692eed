//! Renders disassembled functions as assembler text.

use crate::function::Function;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

/// Appends a function's instructions to an assembler listing.
///
/// Labelled addresses get a `label:` line. Instructions that failed to decode are written as a
/// comment spelling out their raw bytes. In-function jumps carry their byte distance as a
/// trailing comment.
pub fn append_as_text(text: &mut String, function: &Function) {
    for instruction in function.get_instructions() {
        if let Some(label) = function.get_label(instruction.address) {
            let _ = writeln!(text, "{}:", label.label);
        }

        if instruction.is_invalid {
            let _ = write!(
                text,
                "; Unrecognized opcode at runtime-address:0x{:08X} bytes:{}",
                instruction.address,
                to_hex_string(instruction.bytes.as_slice())
            );
        } else {
            let _ = write!(text, "    {}", instruction.text);
        }

        if instruction.is_jump {
            let _ = write!(text, " ; {:+} bytes", instruction.jump_len);
        }

        text.push('\n');
    }
}

fn to_hex_string(bytes: &[u8]) -> String {
    let mut str = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(str, "{byte:02X}");
    }
    str
}

/// Writes the assembler listing of the given functions to a file, separated by blank lines.
pub fn write_asm_file<'a>(
    filename: &Path,
    functions: impl IntoIterator<Item = &'a Function>,
) -> io::Result<()> {
    let mut text = String::new();
    for function in functions {
        append_as_text(&mut text, function);
        text.push('\n');
    }
    fs::write(filename, text)
}
