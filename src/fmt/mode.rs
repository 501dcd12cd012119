//! Symbolic mode strings like ls -l

use crate::walk::FileKind;

/// Format a mode as the classic ten-character "-rwxr-xr-x" string.
pub fn mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);

    s.push(match FileKind::from_mode(mode) {
        FileKind::Block => 'b',
        FileKind::Char => 'c',
        FileKind::Dir => 'd',
        FileKind::Door => 'D',
        FileKind::Fifo => 'p',
        FileKind::Link => 'l',
        FileKind::Socket => 's',
        FileKind::Regular | FileKind::Unknown => '-',
    });

    let rwx = |s: &mut String, shift: u32, special: u32, special_char: char| {
        let bits = mode >> shift;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        let x = bits & 0o1 != 0;
        s.push(if mode & special != 0 {
            if x {
                special_char
            } else {
                special_char.to_ascii_uppercase()
            }
        } else if x {
            'x'
        } else {
            '-'
        });
    };

    rwx(&mut s, 6, 0o4000, 's');
    rwx(&mut s, 3, 0o2000, 's');
    rwx(&mut s, 0, 0o1000, 't');

    s
}
