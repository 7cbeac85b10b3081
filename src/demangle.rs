//! In-process demangling of Rust and C++ symbol names.

#[cfg(feature = "demangle")]
use std::borrow::Cow;


/// Demangle `name`, if it is mangled and we recognize the scheme.
#[cfg(feature = "demangle")]
pub(crate) fn maybe_demangle(name: &str) -> Option<Cow<'_, str>> {
    // Rust names are a superset of the legacy C++ scheme (with a trailing
    // hash); try them first so they do not demangle as C++ with the hash
    // left in place.
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        // The alternate form drops the trailing hash.
        return Some(Cow::Owned(format!("{demangled:#}")))
    }

    let symbol = cpp_demangle::Symbol::new(name).ok()?;
    let demangled = symbol
        .demangle(&cpp_demangle::DemangleOptions::default())
        .ok()?;
    Some(Cow::Owned(demangled))
}

#[cfg(not(feature = "demangle"))]
pub(crate) fn maybe_demangle(_name: &str) -> Option<std::borrow::Cow<'_, str>> {
    None
}
