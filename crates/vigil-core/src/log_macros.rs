//! Domain-aware logging macros. Each injects a `domain` field so callers
//! never repeat the string literal. Domains used in this engine: `sys`
//! (lifecycle), `conf` (config/rule load), `pipe` (query pipeline),
//! `alert` (alert flow/delivery), `conn` (store client I/O).

#[doc(hidden)]
#[macro_export]
macro_rules! vg_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

#[macro_export]
macro_rules! vg_error {
    ($domain:ident, $($rest:tt)*) => {
        $crate::vg_log!(error, $domain, $($rest)*)
    };
}

#[macro_export]
macro_rules! vg_warn {
    ($domain:ident, $($rest:tt)*) => {
        $crate::vg_log!(warn, $domain, $($rest)*)
    };
}

#[macro_export]
macro_rules! vg_info {
    ($domain:ident, $($rest:tt)*) => {
        $crate::vg_log!(info, $domain, $($rest)*)
    };
}

#[macro_export]
macro_rules! vg_debug {
    ($domain:ident, $($rest:tt)*) => {
        $crate::vg_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
#[macro_export]
macro_rules! vg_trace {
    ($domain:ident, $($rest:tt)*) => {
        $crate::vg_log!(trace, $domain, $($rest)*)
    };
}
