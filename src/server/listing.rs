//! The three listing serializations: Unix-style long lines (`LIST`),
//! RFC 3659 machine facts (`MLSD`/`MLST`) and bare names (`NLST`).

use chrono::{Datelike, Utc};

use crate::tvfs::{Entry, EntryType, Permissions};

/// One `LIST` line: `drwxr-xr-x 1 ftp ftp  size mon dd hh:mm name`.
pub fn unix_long_line(entry: &Entry) -> String {
    let type_char = match entry.entry_type {
        EntryType::Dir => 'd',
        EntryType::Link => 'l',
        EntryType::File | EntryType::Unknown => '-',
    };

    let can_read = entry.perms.contains(Permissions::READ);
    let can_write = entry.perms.contains(Permissions::WRITE);
    let rwx = |r: bool, w: bool, x: bool| {
        format!(
            "{}{}{}",
            if r { 'r' } else { '-' },
            if w { 'w' } else { '-' },
            if x { 'x' } else { '-' }
        )
    };
    let exec = entry.entry_type == EntryType::Dir;
    let perms = format!("{}{}{}", rwx(can_read, can_write, exec), rwx(can_read, false, exec), rwx(can_read, false, exec));

    let modified = {
        let now = Utc::now();
        if entry.mtime.year() == now.year() {
            entry.mtime.format("%b %d %H:%M").to_string()
        } else {
            entry.mtime.format("%b %d  %Y").to_string()
        }
    };

    let name = entry.tvfs_name.rsplit('/').next().unwrap_or(&entry.tvfs_name);

    format!(
        "{}{} {:>4} {:>8} {:>8} {:>12} {} {}",
        type_char, perms, 1, "ftp", "ftp", entry.size, modified, name
    )
}

/// One `MLSD` line: `fact=value;fact=value; name`. Which facts appear is
/// negotiated via `OPTS MLST`.
pub fn mlsx_line(entry: &Entry, facts: &[String], full_path: bool) -> String {
    let mut out = String::new();

    for fact in facts {
        match fact.as_str() {
            "type" => {
                let value = match entry.entry_type {
                    EntryType::Dir => "dir",
                    EntryType::File => "file",
                    EntryType::Link => "OS.unix=symlink",
                    EntryType::Unknown => "file",
                };
                out.push_str(&format!("type={};", value));
            }
            "size" => {
                if entry.entry_type != EntryType::Dir {
                    out.push_str(&format!("size={};", entry.size));
                }
            }
            "modify" => {
                out.push_str(&format!("modify={};", entry.mtime.format("%Y%m%d%H%M%S")));
            }
            "perm" => {
                // RFC 3659 perm fact letters, derived from the TVFS bits.
                let mut letters = String::new();
                if entry.entry_type == EntryType::Dir {
                    if entry.perms.contains(Permissions::READ) || entry.perms.contains(Permissions::LIST_MOUNTS) {
                        letters.push('e');
                        letters.push('l');
                    }
                    if entry.perms.contains(Permissions::ALLOW_STRUCTURE_MODIFICATION) {
                        letters.push('c');
                        letters.push('m');
                    }
                } else {
                    if entry.perms.contains(Permissions::READ) {
                        letters.push('r');
                    }
                    if entry.perms.contains(Permissions::WRITE) {
                        letters.push('a');
                        letters.push('w');
                    }
                }
                if entry.perms.contains(Permissions::REMOVE) {
                    letters.push('d');
                }
                if entry.perms.contains(Permissions::RENAME) {
                    letters.push('f');
                }
                out.push_str(&format!("perm={};", letters));
            }
            "unix.mode" => {
                let mode = if entry.entry_type == EntryType::Dir { "0755" } else { "0644" };
                out.push_str(&format!("UNIX.mode={};", mode));
            }
            _ => {}
        }
    }

    let name = if full_path {
        entry.tvfs_name.as_str()
    } else {
        entry.tvfs_name.rsplit('/').next().unwrap_or(&entry.tvfs_name)
    };
    out.push(' ');
    out.push_str(name);
    out
}

/// One `NLST` line: just the name.
pub fn name_only_line(entry: &Entry) -> String {
    entry
        .tvfs_name
        .rsplit('/')
        .next()
        .unwrap_or(&entry.tvfs_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, entry_type: EntryType, size: u64) -> Entry {
        Entry {
            tvfs_name: name.to_string(),
            native_name: None,
            entry_type,
            size,
            mtime: Utc.with_ymd_and_hms(2019, 7, 15, 10, 30, 0).unwrap(),
            perms: Permissions::READ | Permissions::WRITE | Permissions::LIST_MOUNTS,
        }
    }

    #[test]
    fn long_line_shape() {
        let line = unix_long_line(&entry("hello.txt", EntryType::File, 1234));
        assert!(line.starts_with("-rw-"), "got {:?}", line);
        assert!(line.contains("1234"));
        assert!(line.ends_with("hello.txt"));
    }

    #[test]
    fn long_line_marks_directories() {
        let line = unix_long_line(&entry("pub", EntryType::Dir, 0));
        assert!(line.starts_with("drwx"), "got {:?}", line);
    }

    #[test]
    fn mlsd_facts_obey_negotiation() {
        let e = entry("/pub/hello.txt", EntryType::File, 5);
        let facts: Vec<String> = vec!["type".into(), "size".into(), "modify".into()];
        let line = mlsx_line(&e, &facts, false);
        assert_eq!(line, "type=file;size=5;modify=20190715103000; hello.txt");
    }

    #[test]
    fn mlsd_directories_have_no_size_fact() {
        let e = entry("pub", EntryType::Dir, 0);
        let facts: Vec<String> = vec!["type".into(), "size".into()];
        let line = mlsx_line(&e, &facts, false);
        assert_eq!(line, "type=dir; pub");
    }

    #[test]
    fn mlst_uses_the_full_path() {
        let e = entry("/pub/hello.txt", EntryType::File, 5);
        let facts: Vec<String> = vec!["type".into()];
        assert_eq!(mlsx_line(&e, &facts, true), "type=file; /pub/hello.txt");
    }

    #[test]
    fn nlst_is_name_only() {
        assert_eq!(name_only_line(&entry("/pub/a.txt", EntryType::File, 1)), "a.txt");
    }
}
