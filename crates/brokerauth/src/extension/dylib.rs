//! Shared-library extension units.
//!
//! The library exports the six entry points with C linkage:
//!
//! ```c
//! int         Init(const char **keys, const char **values, size_t len, const char *log_level);
//! const char *GetName(void);
//! bool        GetUser(const char *username, const char *password);
//! bool        GetSuperuser(const char *username);
//! bool        CheckAcl(const char *username, const char *topic, const char *client_id, int acc);
//! void        Halt(void);
//! ```
//!
//! `Init` returns 0 on success. `GetName` may return null, in which case the
//! extension is named [`DEFAULT_NAME`]. Arguments containing a NUL byte
//! cannot cross the boundary and are denied without calling in.

use std::ffi::{CStr, CString, c_char, c_int};
use std::sync::Arc;

use libloading::{Library, Symbol as LibSymbol};

use super::{ExtensionError, ExtensionLoader, ExtensionUnit, Symbol};
use crate::config::AuthOptions;
use crate::observability::LogLevel;

/// Name used when `GetName` returns null.
pub const DEFAULT_NAME: &str = "Custom plugin";

type RawInit = unsafe extern "C" fn(
    *const *const c_char,
    *const *const c_char,
    usize,
    *const c_char,
) -> c_int;
type RawGetName = unsafe extern "C" fn() -> *const c_char;
type RawGetUser = unsafe extern "C" fn(*const c_char, *const c_char) -> bool;
type RawGetSuperuser = unsafe extern "C" fn(*const c_char) -> bool;
type RawCheckAcl =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char, c_int) -> bool;
type RawHalt = unsafe extern "C" fn();

/// Opens extension units with `dlopen` (or the platform equivalent).
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl DylibLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExtensionLoader for DylibLoader {
    fn open(&self, path: &str) -> Result<Arc<dyn ExtensionUnit>, ExtensionError> {
        // SAFETY: the operator names the library; its initializers run here.
        let lib = unsafe { Library::new(path) }.map_err(|e| ExtensionError::Open {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(path, "opened extension library");
        Ok(Arc::new(DylibUnit { lib: Arc::new(lib) }))
    }
}

/// A loaded shared library. Resolved entry points keep it mapped.
pub struct DylibUnit {
    lib: Arc<Library>,
}

impl DylibUnit {
    /// Copies the function pointer for `name` out of the library.
    fn raw<T: Copy>(&self, name: &str) -> Option<T> {
        // SAFETY: `T` is the C signature documented for `name`.
        let sym: LibSymbol<'_, T> = match unsafe { self.lib.get(name.as_bytes()) } {
            Ok(sym) => sym,
            Err(e) => {
                tracing::debug!(symbol = name, error = %e, "symbol not exported");
                return None;
            }
        };
        Some(*sym)
    }
}

impl ExtensionUnit for DylibUnit {
    fn lookup(&self, symbol: &str) -> Option<Symbol> {
        let lib = Arc::clone(&self.lib);
        let resolved = match symbol {
            "Init" => {
                let f: RawInit = self.raw(symbol)?;
                Symbol::init(move |options, level| {
                    let _lib = &lib;
                    call_init(f, options, level)
                })
            }
            "GetName" => {
                let f: RawGetName = self.raw(symbol)?;
                Symbol::get_name(move || {
                    let _lib = &lib;
                    // SAFETY: the library owns the returned string.
                    let name = unsafe { f() };
                    if name.is_null() {
                        return DEFAULT_NAME.to_string();
                    }
                    // SAFETY: non-null and NUL-terminated per the ABI.
                    unsafe { CStr::from_ptr(name) }
                        .to_string_lossy()
                        .into_owned()
                })
            }
            "GetUser" => {
                let f: RawGetUser = self.raw(symbol)?;
                Symbol::get_user(move |username, password| {
                    let _lib = &lib;
                    let (Ok(username), Ok(password)) =
                        (CString::new(username), CString::new(password))
                    else {
                        return false;
                    };
                    // SAFETY: both pointers outlive the call.
                    unsafe { f(username.as_ptr(), password.as_ptr()) }
                })
            }
            "GetSuperuser" => {
                let f: RawGetSuperuser = self.raw(symbol)?;
                Symbol::get_superuser(move |username| {
                    let _lib = &lib;
                    let Ok(username) = CString::new(username) else {
                        return false;
                    };
                    // SAFETY: the pointer outlives the call.
                    unsafe { f(username.as_ptr()) }
                })
            }
            "CheckAcl" => {
                let f: RawCheckAcl = self.raw(symbol)?;
                Symbol::check_acl(move |username, topic, client_id, acc| {
                    let _lib = &lib;
                    let (Ok(username), Ok(topic), Ok(client_id)) = (
                        CString::new(username),
                        CString::new(topic),
                        CString::new(client_id),
                    ) else {
                        return false;
                    };
                    // SAFETY: every pointer outlives the call.
                    unsafe { f(username.as_ptr(), topic.as_ptr(), client_id.as_ptr(), acc) }
                })
            }
            "Halt" => {
                let f: RawHalt = self.raw(symbol)?;
                Symbol::halt(move || {
                    let _lib = &lib;
                    // SAFETY: takes no arguments.
                    unsafe { f() }
                })
            }
            _ => return None,
        };
        Some(resolved)
    }
}

fn call_init(f: RawInit, options: &AuthOptions, level: LogLevel) -> Result<(), String> {
    let (keys, values) = c_options(options);
    let key_ptrs: Vec<*const c_char> = keys.iter().map(|k| k.as_ptr()).collect();
    let value_ptrs: Vec<*const c_char> = values.iter().map(|v| v.as_ptr()).collect();
    let level = CString::new(level.to_string()).map_err(|e| e.to_string())?;

    // SAFETY: the arrays hold `len` pointers and outlive the call.
    let code = unsafe {
        f(
            key_ptrs.as_ptr(),
            value_ptrs.as_ptr(),
            key_ptrs.len(),
            level.as_ptr(),
        )
    };
    match code {
        0 => Ok(()),
        code => Err(format!("Init returned {code}")),
    }
}

/// Converts the option map into parallel C string arrays, sorted by key.
/// Pairs containing a NUL byte are dropped.
fn c_options(options: &AuthOptions) -> (Vec<CString>, Vec<CString>) {
    let mut pairs: Vec<_> = options.iter().collect();
    pairs.sort();

    pairs
        .into_iter()
        .filter_map(|(key, value)| {
            match (CString::new(key.as_str()), CString::new(value.as_str())) {
                (Ok(key), Ok(value)) => Some((key, value)),
                _ => {
                    tracing::warn!(option = %key, "option contains a NUL byte, not passed to extension");
                    None
                }
            }
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtensionSlot;

    #[test]
    fn test_missing_library_is_an_open_error() {
        let err = DylibLoader::new()
            .open("/nonexistent/libbrokerauth_ext.so")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ExtensionError::Open { ref path, .. } if path == "/nonexistent/libbrokerauth_ext.so"
        ));
    }

    #[test]
    fn test_missing_library_leaves_slot_empty() {
        let slot = ExtensionSlot::load(
            &DylibLoader::new(),
            Some("/nonexistent/libbrokerauth_ext.so"),
            &AuthOptions::new(),
            LogLevel::Info,
        );
        assert!(!slot.is_present());
    }

    #[test]
    fn test_c_options_are_sorted_and_drop_nul() {
        let mut options = AuthOptions::new();
        options.insert("plugin_opt_b".into(), "2".into());
        options.insert("plugin_opt_a".into(), "1".into());
        options.insert("plugin_opt_bad".into(), "x\0y".into());

        let (keys, values) = c_options(&options);
        let keys: Vec<_> = keys.iter().map(|k| k.to_str().unwrap()).collect();
        let values: Vec<_> = values.iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(keys, ["plugin_opt_a", "plugin_opt_b"]);
        assert_eq!(values, ["1", "2"]);
    }
}
