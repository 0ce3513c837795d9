//! Extension slot: one optional, separately supplied backend.
//!
//! An extension unit is opened by an [`ExtensionLoader`] and exposes its
//! entry points by symbol name, the way a shared object exposes exported
//! functions. At load time the slot resolves:
//!
//! | Symbol         | Shape                                           |
//! |----------------|-------------------------------------------------|
//! | `Init`         | `(options, log level) -> Result<(), String>`    |
//! | `GetName`      | `() -> String`                                  |
//! | `GetUser`      | `(username, password) -> bool`                  |
//! | `GetSuperuser` | `(username) -> bool`                            |
//! | `CheckAcl`     | `(username, topic, client id, access) -> bool`  |
//! | `Halt`         | `()`                                            |
//!
//! A unit that cannot be opened, lacks a symbol, exports one with the wrong
//! shape, or fails `Init` leaves the slot empty until the process exits.
//! Entry points are synchronous and run on tokio's blocking pool.
//!
//! Two loaders ship: [`StaticLoader`] for units linked into the host and
//! [`DylibLoader`] for shared libraries exporting a C ABI.

mod dylib;

pub use dylib::{DylibLoader, DylibUnit};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{AccessLevel, Backend};
use crate::config::AuthOptions;
use crate::observability::LogLevel;

pub type InitFn = Arc<dyn Fn(&AuthOptions, LogLevel) -> Result<(), String> + Send + Sync>;
pub type GetNameFn = Arc<dyn Fn() -> String + Send + Sync>;
pub type GetUserFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;
pub type GetSuperuserFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type CheckAclFn = Arc<dyn Fn(&str, &str, &str, i32) -> bool + Send + Sync>;
pub type HaltFn = Arc<dyn Fn() + Send + Sync>;

/// An exported entry point.
#[derive(Clone)]
pub enum Symbol {
    Init(InitFn),
    GetName(GetNameFn),
    GetUser(GetUserFn),
    GetSuperuser(GetSuperuserFn),
    CheckAcl(CheckAclFn),
    Halt(HaltFn),
}

impl Symbol {
    pub fn init<F>(f: F) -> Self
    where
        F: Fn(&AuthOptions, LogLevel) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Init(Arc::new(f))
    }

    pub fn get_name<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::GetName(Arc::new(f))
    }

    pub fn get_user<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        Self::GetUser(Arc::new(f))
    }

    pub fn get_superuser<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::GetSuperuser(Arc::new(f))
    }

    pub fn check_acl<F>(f: F) -> Self
    where
        F: Fn(&str, &str, &str, i32) -> bool + Send + Sync + 'static,
    {
        Self::CheckAcl(Arc::new(f))
    }

    pub fn halt<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::Halt(Arc::new(f))
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Init(_) => "Init",
            Self::GetName(_) => "GetName",
            Self::GetUser(_) => "GetUser",
            Self::GetSuperuser(_) => "GetSuperuser",
            Self::CheckAcl(_) => "CheckAcl",
            Self::Halt(_) => "Halt",
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.shape())
    }
}

/// Errors raised while loading an extension. None of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("no extension path configured")]
    NoPath,

    #[error("could not open extension unit {path}: {message}")]
    Open { path: String, message: String },

    #[error("couldn't find func {symbol} in extension")]
    MissingSymbol { symbol: &'static str },

    #[error("symbol {symbol} has the wrong shape (found {found})")]
    WrongShape {
        symbol: &'static str,
        found: &'static str,
    },

    #[error("couldn't init extension: {0}")]
    Init(String),
}

// =============================================================================
// Units and Loaders
// =============================================================================

/// A loaded unit that can be queried for symbols.
pub trait ExtensionUnit: Send + Sync {
    fn lookup(&self, symbol: &str) -> Option<Symbol>;
}

/// A unit whose symbols are registered in-process.
#[derive(Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.symbols.insert(name.into(), symbol);
    }
}

impl ExtensionUnit for SymbolTable {
    fn lookup(&self, symbol: &str) -> Option<Symbol> {
        self.symbols.get(symbol).cloned()
    }
}

/// Opens extension units by path.
pub trait ExtensionLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if no unit exists at `path` or it cannot be opened.
    fn open(&self, path: &str) -> Result<Arc<dyn ExtensionUnit>, ExtensionError>;
}

/// Resolves units linked into the host binary and registered under a path.
#[derive(Clone, Default)]
pub struct StaticLoader {
    units: HashMap<String, Arc<dyn ExtensionUnit>>,
}

impl StaticLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, unit: Arc<dyn ExtensionUnit>) {
        self.units.insert(path.into(), unit);
    }

    #[must_use]
    pub fn with(mut self, path: impl Into<String>, unit: Arc<dyn ExtensionUnit>) -> Self {
        self.register(path, unit);
        self
    }
}

impl ExtensionLoader for StaticLoader {
    fn open(&self, path: &str) -> Result<Arc<dyn ExtensionUnit>, ExtensionError> {
        self.units
            .get(path)
            .cloned()
            .ok_or_else(|| ExtensionError::Open {
                path: path.to_string(),
                message: "no unit registered under this path".to_string(),
            })
    }
}

// =============================================================================
// Loaded Extension
// =============================================================================

/// An extension whose entry points have all been resolved.
pub struct LoadedExtension {
    name: String,
    get_user: GetUserFn,
    get_superuser: GetSuperuserFn,
    check_acl: CheckAclFn,
    halt: HaltFn,
}

macro_rules! resolve {
    ($unit:expr, $name:literal, $variant:ident) => {
        match $unit.lookup($name) {
            Some(Symbol::$variant(f)) => f,
            Some(other) => {
                return Err(ExtensionError::WrongShape {
                    symbol: $name,
                    found: other.shape(),
                });
            }
            None => return Err(ExtensionError::MissingSymbol { symbol: $name }),
        }
    };
}

impl LoadedExtension {
    /// Resolves every entry point, then runs `Init` once.
    ///
    /// # Errors
    ///
    /// Returns an error if a symbol is missing or mis-shaped, or `Init`
    /// fails.
    pub fn resolve(
        unit: &dyn ExtensionUnit,
        options: &AuthOptions,
        log_level: LogLevel,
    ) -> Result<Self, ExtensionError> {
        let init = resolve!(unit, "Init", Init);
        let get_name = resolve!(unit, "GetName", GetName);
        let get_user = resolve!(unit, "GetUser", GetUser);
        let get_superuser = resolve!(unit, "GetSuperuser", GetSuperuser);
        let check_acl = resolve!(unit, "CheckAcl", CheckAcl);
        let halt = resolve!(unit, "Halt", Halt);

        init(options, log_level).map_err(ExtensionError::Init)?;

        Ok(Self {
            name: get_name(),
            get_user,
            get_superuser,
            check_acl,
            halt,
        })
    }
}

async fn run_blocking<F>(symbol: &'static str, f: F) -> bool
where
    F: FnOnce() -> bool + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::error!(symbol, error = %e, "extension call failed, denying");
            false
        }
    }
}

#[async_trait]
impl Backend for LoadedExtension {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_credential(&self, username: &str, password: &str) -> bool {
        let f = Arc::clone(&self.get_user);
        let (username, password) = (username.to_owned(), password.to_owned());
        run_blocking("GetUser", move || f(&username, &password)).await
    }

    async fn check_superuser(&self, username: &str) -> bool {
        let f = Arc::clone(&self.get_superuser);
        let username = username.to_owned();
        run_blocking("GetSuperuser", move || f(&username)).await
    }

    async fn check_acl(
        &self,
        username: &str,
        topic: &str,
        client_id: &str,
        access: AccessLevel,
    ) -> bool {
        let f = Arc::clone(&self.check_acl);
        let (username, topic, client_id) =
            (username.to_owned(), topic.to_owned(), client_id.to_owned());
        run_blocking("CheckAcl", move || {
            f(&username, &topic, &client_id, access.code())
        })
        .await
    }

    async fn shutdown(&self) {
        let halt = Arc::clone(&self.halt);
        if let Err(e) = tokio::task::spawn_blocking(move || halt()).await {
            tracing::error!(extension = %self.name, error = %e, "extension halt failed");
        }
    }
}

// =============================================================================
// Extension Slot
// =============================================================================

/// Holds at most one extension.
///
/// Every method on an empty slot answers `false` without doing anything,
/// so callers can delegate unconditionally.
#[derive(Clone, Default)]
pub struct ExtensionSlot {
    extension: Option<Arc<dyn Backend>>,
}

impl ExtensionSlot {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fills the slot with a compiled-in backend.
    #[must_use]
    pub fn new(extension: Arc<dyn Backend>) -> Self {
        Self {
            extension: Some(extension),
        }
    }

    /// Opens and resolves the unit at `path`. Any failure is logged and
    /// yields an empty slot.
    pub fn load(
        loader: &dyn ExtensionLoader,
        path: Option<&str>,
        options: &AuthOptions,
        log_level: LogLevel,
    ) -> Self {
        let result = path
            .ok_or(ExtensionError::NoPath)
            .and_then(|path| loader.open(path))
            .and_then(|unit| LoadedExtension::resolve(unit.as_ref(), options, log_level));

        match result {
            Ok(extension) => {
                tracing::info!(backend = %extension.name, "Backend registered");
                Self::new(Arc::new(extension))
            }
            Err(e) => {
                tracing::error!(error = %e, "could not init custom plugin, extension disabled");
                Self::empty()
            }
        }
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.extension.is_some()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.extension.as_deref().map(Backend::name)
    }

    pub async fn check_credential(&self, username: &str, password: &str) -> bool {
        match &self.extension {
            Some(ext) => ext.check_credential(username, password).await,
            None => false,
        }
    }

    pub async fn check_superuser(&self, username: &str) -> bool {
        match &self.extension {
            Some(ext) => ext.check_superuser(username).await,
            None => false,
        }
    }

    pub async fn check_acl(
        &self,
        username: &str,
        topic: &str,
        client_id: &str,
        access: AccessLevel,
    ) -> bool {
        match &self.extension {
            Some(ext) => ext.check_acl(username, topic, client_id, access).await,
            None => false,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(ext) = &self.extension {
            ext.shutdown().await;
        }
    }
}

impl fmt::Debug for ExtensionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSlot")
            .field("extension", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn full_unit(halted: Arc<AtomicBool>) -> SymbolTable {
        SymbolTable::new()
            .with("Init", Symbol::init(|_, _| Ok(())))
            .with("GetName", Symbol::get_name(|| "custom".to_string()))
            .with(
                "GetUser",
                Symbol::get_user(|u, p| u == "ext_user" && p == "pw"),
            )
            .with("GetSuperuser", Symbol::get_superuser(|u| u == "root"))
            .with(
                "CheckAcl",
                Symbol::check_acl(|_, topic, _, acc| topic == "ext/data" && acc == 1),
            )
            .with(
                "Halt",
                Symbol::halt(move || halted.store(true, Ordering::SeqCst)),
            )
    }

    #[tokio::test]
    async fn test_load_and_call() {
        let halted = Arc::new(AtomicBool::new(false));
        let loader = StaticLoader::new().with("/ext/custom.so", Arc::new(full_unit(halted.clone())));

        let slot = ExtensionSlot::load(
            &loader,
            Some("/ext/custom.so"),
            &AuthOptions::new(),
            LogLevel::Info,
        );
        assert!(slot.is_present());
        assert_eq!(slot.name(), Some("custom"));

        assert!(slot.check_credential("ext_user", "pw").await);
        assert!(!slot.check_credential("ext_user", "nope").await);
        assert!(slot.check_superuser("root").await);
        assert!(slot.check_acl("u", "ext/data", "c", AccessLevel::Read).await);
        assert!(!slot.check_acl("u", "ext/data", "c", AccessLevel::Write).await);

        slot.shutdown().await;
        assert!(halted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_symbol_empties_slot() {
        let mut unit = full_unit(Arc::new(AtomicBool::new(false)));
        unit.symbols.remove("CheckAcl");
        let loader = StaticLoader::new().with("ext", Arc::new(unit));

        let slot = ExtensionSlot::load(&loader, Some("ext"), &AuthOptions::new(), LogLevel::Info);
        assert!(!slot.is_present());
        assert!(!slot.check_credential("ext_user", "pw").await);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let unit = full_unit(Arc::new(AtomicBool::new(false)))
            .with("GetUser", Symbol::get_superuser(|_| true));

        let err = LoadedExtension::resolve(&unit, &AuthOptions::new(), LogLevel::Info)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ExtensionError::WrongShape {
                symbol: "GetUser",
                found: "GetSuperuser"
            }
        ));
    }

    #[test]
    fn test_failed_init_is_rejected() {
        let unit = full_unit(Arc::new(AtomicBool::new(false)))
            .with("Init", Symbol::init(|_, _| Err("bad dsn".to_string())));
        let err = LoadedExtension::resolve(&unit, &AuthOptions::new(), LogLevel::Info)
            .err()
            .unwrap();
        assert!(matches!(err, ExtensionError::Init(msg) if msg == "bad dsn"));
    }

    #[test]
    fn test_init_receives_options() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_init = Arc::clone(&seen);
        let unit = full_unit(Arc::new(AtomicBool::new(false))).with(
            "Init",
            Symbol::init(move |opts, level| {
                seen_in_init.store(opts.len(), Ordering::SeqCst);
                assert_eq!(level, LogLevel::Debug);
                Ok(())
            }),
        );
        let mut options = AuthOptions::new();
        options.insert("plugin_opt_dsn".into(), "mem://".into());

        LoadedExtension::resolve(&unit, &options, LogLevel::Debug).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_path_and_no_path() {
        let loader = StaticLoader::new();
        let slot = ExtensionSlot::load(&loader, Some("/missing.so"), &AuthOptions::new(), LogLevel::Info);
        assert!(!slot.is_present());
        let slot = ExtensionSlot::load(&loader, None, &AuthOptions::new(), LogLevel::Info);
        assert!(!slot.is_present());
    }
}
