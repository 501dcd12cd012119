//! Cached user and group database lookups
//!
//! Wraps the getpwuid_r/getgrgid_r family with growable buffers and memoizes
//! results, since a walk asks about the same handful of ids millions of
//! times. Lookups that fail stay cached as misses.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;

thread_local! {
    static USERS_BY_ID: RefCell<HashMap<u32, Option<String>>> = RefCell::new(HashMap::new());
    static GROUPS_BY_ID: RefCell<HashMap<u32, Option<String>>> = RefCell::new(HashMap::new());
}

/// The name for a uid, or `None` when the user database has no entry.
pub fn user_name(uid: u32) -> Option<String> {
    USERS_BY_ID.with(|cache| {
        cache
            .borrow_mut()
            .entry(uid)
            .or_insert_with(|| lookup_user_name(uid))
            .clone()
    })
}

/// The name for a gid, or `None` when the group database has no entry.
pub fn group_name(gid: u32) -> Option<String> {
    GROUPS_BY_ID.with(|cache| {
        cache
            .borrow_mut()
            .entry(gid)
            .or_insert_with(|| lookup_group_name(gid))
            .clone()
    })
}

/// Whether the uid exists in the user database.
pub fn user_exists(uid: u32) -> bool {
    user_name(uid).is_some()
}

/// Whether the gid exists in the group database.
pub fn group_exists(gid: u32) -> bool {
    group_name(gid).is_some()
}

/// Resolve a user name to a uid. Used by `-user`.
pub fn uid_for_name(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    let mut buf = vec![0u8; 1024];

    loop {
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let ret = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        match ret {
            0 if !result.is_null() => {
                let pwd = unsafe { pwd.assume_init() };
                return Some(pwd.pw_uid);
            }
            0 => return None,
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            _ => return None,
        }
    }
}

/// Resolve a group name to a gid. Used by `-group`.
pub fn gid_for_name(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    let mut buf = vec![0u8; 1024];

    loop {
        let mut grp = MaybeUninit::<libc::group>::uninit();
        let mut result: *mut libc::group = std::ptr::null_mut();
        let ret = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        match ret {
            0 if !result.is_null() => {
                let grp = unsafe { grp.assume_init() };
                return Some(grp.gr_gid);
            }
            0 => return None,
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            _ => return None,
        }
    }
}

fn lookup_user_name(uid: u32) -> Option<String> {
    let mut buf = vec![0u8; 1024];

    loop {
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let ret = unsafe {
            libc::getpwuid_r(
                uid,
                pwd.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        match ret {
            0 if !result.is_null() => {
                let pwd = unsafe { pwd.assume_init() };
                let name = unsafe { CStr::from_ptr(pwd.pw_name) };
                return Some(name.to_string_lossy().into_owned());
            }
            0 => return None,
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            _ => return None,
        }
    }
}

fn lookup_group_name(gid: u32) -> Option<String> {
    let mut buf = vec![0u8; 1024];

    loop {
        let mut grp = MaybeUninit::<libc::group>::uninit();
        let mut result: *mut libc::group = std::ptr::null_mut();
        let ret = unsafe {
            libc::getgrgid_r(
                gid,
                grp.as_mut_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        match ret {
            0 if !result.is_null() => {
                let grp = unsafe { grp.assume_init() };
                let name = unsafe { CStr::from_ptr(grp.gr_name) };
                return Some(name.to_string_lossy().into_owned());
            }
            0 => return None,
            libc::ERANGE => buf.resize(buf.len() * 2, 0),
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_resolves() {
        let uid = unsafe { libc::getuid() };
        let name = user_name(uid).expect("current user should have a name");
        assert!(!name.is_empty());
        assert_eq!(uid_for_name(&name), Some(uid));
        assert!(user_exists(uid));
    }

    #[test]
    fn test_missing_user_is_cached_miss() {
        // High uids are very unlikely to exist
        assert_eq!(user_name(0xfffe_fffd), None);
        assert_eq!(user_name(0xfffe_fffd), None);
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(uid_for_name("no-such-user-bfind-test"), None);
        assert_eq!(gid_for_name("no-such-group-bfind-test"), None);
    }
}
