//! Nearest-symbol resolution over dynamic loader metadata.
//!
//! The loader answers with four loosely related fields (the containing
//! image, its base, the nearest preceding exported symbol and that symbol's
//! address). [`resolve`] picks a symbol name, an image name and an offset
//! out of them with a fixed precedence, and always computes the offset
//! against the same base the symbol name was taken from.

use serde::Serialize;

/// Image name used when the loader reports no usable image path.
pub const UNKNOWN_IMAGE: &str = "???";

/// What the dynamic loader knows about an address, `dladdr` style.
///
/// A lookup that found nothing is `SymbolInfo::default()`: no paths, no
/// names, zero bases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolInfo {
    pub image_path: Option<String>,
    pub image_base: usize,
    pub symbol_name: Option<String>,
    pub symbol_address: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSymbol {
    pub image: String,
    pub symbol: String,
    pub offset: usize,
}

pub fn resolve(address: usize, info: &SymbolInfo) -> ResolvedSymbol {
    ResolvedSymbol {
        image: image_name(info),
        symbol: symbol_name(info),
        offset: offset(address, info),
    }
}

fn image_name(info: &SymbolInfo) -> String {
    match info.image_path.as_deref() {
        Some(path) => match path.rfind('/') {
            Some(i) => last_component(path, i),
            None => UNKNOWN_IMAGE.to_owned(),
        },
        None => UNKNOWN_IMAGE.to_owned(),
    }
}

// A trailing separator is ignored, "/usr/lib/" names "lib".
fn last_component(path: &str, sep: usize) -> String {
    if sep + 1 < path.len() {
        return path[sep + 1..].to_owned();
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => trimmed[i + 1..].to_owned(),
        None if trimmed.is_empty() => "/".to_owned(),
        None => trimmed.to_owned(),
    }
}

fn symbol_name(info: &SymbolInfo) -> String {
    if let Some(name) = &info.symbol_name {
        name.clone()
    } else if info.image_path.is_some() {
        image_name(info)
    } else {
        // Nothing resolved: render the raw symbol base, whatever it holds.
        format!("{:#x}", info.symbol_address)
    }
}

fn offset(address: usize, info: &SymbolInfo) -> usize {
    if info.symbol_name.is_some() {
        address.wrapping_sub(info.symbol_address)
    } else if info.image_path.is_some() {
        address.wrapping_sub(info.image_base)
    } else {
        address.wrapping_sub(info.symbol_address)
    }
}
