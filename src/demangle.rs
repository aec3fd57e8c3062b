use rustc_demangle::try_demangle;

/// Demangle a symbol name, returning it unchanged when it is not mangled.
///
/// The alternate form is used so the trailing `::h<hash>` is left out.
#[must_use]
pub fn demangle(name: &str) -> String {
    match try_demangle(name) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => name.to_owned(),
    }
}
