//! Filesystem type lookup for the %F directive
//!
//! Builds a device-to-type map once by reading the mount table and statting
//! each mount point. Unknown devices report as "unknown" rather than
//! failing the walk.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::sync::OnceLock;

static MOUNTS: OnceLock<HashMap<u64, String>> = OnceLock::new();

/// The filesystem type name for a device number.
pub fn fstype_name(dev: u64) -> String {
    let table = MOUNTS.get_or_init(load_mount_table);
    table
        .get(&dev)
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

fn load_mount_table() -> HashMap<u64, String> {
    let contents = fs::read_to_string("/proc/self/mounts")
        .or_else(|_| fs::read_to_string("/etc/mtab"))
        .unwrap_or_default();

    let mut table = HashMap::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(_source), Some(target), Some(fstype)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        // Mount points may contain octal escapes like \040 for spaces
        let target = unescape_mount_path(target);

        if let Ok(meta) = fs::metadata(&target) {
            // Later mounts shadow earlier ones
            table.insert(meta.dev(), fstype.to_string());
        }
    }
    table
}

fn unescape_mount_path(escaped: &str) -> String {
    let bytes = escaped.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &escaped[i + 1..i + 4];
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_fs_has_a_type() {
        let meta = fs::metadata("/").unwrap();
        let name = fstype_name(meta.dev());
        assert!(!name.is_empty());
    }

    #[test]
    fn test_unknown_device() {
        assert_eq!(fstype_name(u64::MAX), "unknown");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_mount_path("/mnt/with\\040space"), "/mnt/with space");
        assert_eq!(unescape_mount_path("/plain"), "/plain");
    }
}
